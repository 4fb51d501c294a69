use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::connection::ConnectionPool;
use crate::{ConnectionId, PortRole, TransportError, TransportEvent};

/// Largest UDP payload we try to receive.
const MAX_DATAGRAM: usize = 65_535;

/// A LAN transport node: one UDP discovery socket and two TCP listeners.
///
/// All three endpoints are bound in [`bind`](Self::bind); failing to bind
/// any of them is fatal. Everything the node receives (datagrams, frames
/// from any TCP connection, connection closures) arrives through
/// [`recv`](Self::recv), which is the single readiness source for the
/// reactor. Sending goes through a [`LanSender`], which can be cloned into
/// other tasks.
pub struct LanNode {
    sender: LanSender,
    events_rx: mpsc::Receiver<TransportEvent>,
    local: LocalAddrs,
    tasks: Vec<JoinHandle<()>>,
}

/// The sending half of a [`LanNode`].
///
/// Clones share the discovery socket and the connection pool, so a frame
/// sent from any clone reuses the node's cached links.
#[derive(Clone)]
pub struct LanSender {
    config: TransportConfig,
    udp: Arc<UdpSocket>,
    pool: Arc<ConnectionPool>,
}

/// Addresses the node actually bound (useful when ports were `0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddrs {
    pub discovery: SocketAddr,
    pub private: SocketAddr,
    pub group: SocketAddr,
}

impl LanNode {
    /// Bind the discovery socket and both listeners, then start accepting.
    pub async fn bind(config: TransportConfig) -> Result<Self, TransportError> {
        let (events_tx, events_rx) = mpsc::channel(config.recv_buffer);

        let udp_addr = SocketAddr::new(IpAddr::V4(config.bind_ip), config.discovery_port);
        let udp = UdpSocket::bind(udp_addr)
            .await
            .map_err(|source| TransportError::Bind {
                what: "discovery socket",
                addr: udp_addr,
                source,
            })?;
        udp.set_broadcast(true)
            .map_err(|source| TransportError::Bind {
                what: "discovery socket",
                addr: udp_addr,
                source,
            })?;

        let private = bind_listener(&config, config.private_port, "private listener").await?;
        let group = bind_listener(&config, config.group_port, "group listener").await?;

        let local = LocalAddrs {
            discovery: udp.local_addr()?,
            private: private.local_addr()?,
            group: group.local_addr()?,
        };

        let udp = Arc::new(udp);
        let pool = Arc::new(ConnectionPool::new(
            events_tx.clone(),
            config.max_message_size,
        ));

        let tasks = vec![
            tokio::spawn(udp_loop(
                Arc::clone(&udp),
                events_tx,
                config.max_message_size,
            )),
            tokio::spawn(accept_loop(private, PortRole::Private, Arc::clone(&pool))),
            tokio::spawn(accept_loop(group, PortRole::Group, Arc::clone(&pool))),
        ];

        tracing::info!(
            "transport bound: udp {} / private {} / group {}",
            local.discovery,
            local.private,
            local.group
        );

        Ok(Self {
            sender: LanSender { config, udp, pool },
            events_rx,
            local,
            tasks,
        })
    }

    /// Addresses actually bound.
    pub fn local_addrs(&self) -> LocalAddrs {
        self.local
    }

    pub fn config(&self) -> &TransportConfig {
        &self.sender.config
    }

    /// A sending handle that can move into other tasks.
    pub fn sender(&self) -> LanSender {
        self.sender.clone()
    }

    /// Broadcast a frame on the discovery port.
    pub async fn broadcast_udp(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.sender.broadcast_udp(frame).await
    }

    /// Send a frame to one discovery address.
    pub async fn unicast_udp(&self, to: SocketAddr, frame: &[u8]) -> Result<(), TransportError> {
        self.sender.unicast_udp(to, frame).await
    }

    /// Connect (or reuse a link) to `ip` on the port serving `role`.
    pub async fn connect_tcp(
        &self,
        ip: Ipv4Addr,
        role: PortRole,
    ) -> Result<ConnectionId, TransportError> {
        let addr = self.sender.config.remote_addr(ip, role);
        self.sender.connect_addr(addr, role).await
    }

    /// Connect (or reuse a link) to an explicit listener address.
    pub async fn connect_addr(
        &self,
        addr: SocketAddr,
        role: PortRole,
    ) -> Result<ConnectionId, TransportError> {
        self.sender.connect_addr(addr, role).await
    }

    /// Queue a frame on a live connection.
    pub async fn send(&self, conn: ConnectionId, frame: &[u8]) -> Result<(), TransportError> {
        self.sender.send(conn, frame).await
    }

    /// See [`LanSender::send_tcp`].
    pub async fn send_tcp(
        &self,
        addr: SocketAddr,
        role: PortRole,
        frame: &[u8],
    ) -> Result<ConnectionId, TransportError> {
        self.sender.send_tcp(addr, role, frame).await
    }

    /// Close a connection.
    pub async fn close(&self, conn: ConnectionId) {
        self.sender.pool.remove(conn).await;
    }

    /// Remote address and role of a live connection.
    pub async fn peer_of(&self, conn: ConnectionId) -> Option<(SocketAddr, PortRole)> {
        self.sender.pool.describe(conn).await
    }

    /// Number of live TCP connections.
    pub async fn connection_count(&self) -> usize {
        self.sender.pool.len().await
    }

    /// Receive the next transport event. Blocks until one arrives.
    pub async fn recv(&mut self) -> Result<TransportEvent, TransportError> {
        self.events_rx.recv().await.ok_or(TransportError::Shutdown)
    }

    /// Stop accepting and drop every connection.
    pub async fn shutdown(self) -> Result<(), TransportError> {
        for task in &self.tasks {
            task.abort();
        }
        self.sender.pool.clear().await;
        Ok(())
    }
}

impl LanSender {
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Broadcast a frame on the discovery port.
    pub async fn broadcast_udp(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.unicast_udp(self.config.broadcast_addr(), frame).await
    }

    /// Send a frame to one discovery address.
    pub async fn unicast_udp(&self, to: SocketAddr, frame: &[u8]) -> Result<(), TransportError> {
        self.check_size(frame)?;
        self.udp
            .send_to(frame, to)
            .await
            .map_err(|e| TransportError::Send {
                addr: to,
                source: e.into(),
            })?;
        Ok(())
    }

    /// Connect (or reuse a link) to an explicit listener address.
    pub async fn connect_addr(
        &self,
        addr: SocketAddr,
        role: PortRole,
    ) -> Result<ConnectionId, TransportError> {
        self.pool
            .get_or_connect(addr, role, self.config.connect_timeout)
            .await
    }

    /// Queue a frame on a live connection.
    pub async fn send(&self, conn: ConnectionId, frame: &[u8]) -> Result<(), TransportError> {
        self.check_size(frame)?;
        self.pool.send(conn, Bytes::copy_from_slice(frame)).await
    }

    /// Send one frame to a remote listener, reusing the cached link if any.
    ///
    /// A cached link whose writer has already stopped is stale: it is
    /// dropped and the address dialed once. A failed fresh dial is returned
    /// as is.
    pub async fn send_tcp(
        &self,
        addr: SocketAddr,
        role: PortRole,
        frame: &[u8],
    ) -> Result<ConnectionId, TransportError> {
        self.check_size(frame)?;
        if let Some(conn) = self.pool.cached(addr).await {
            match self.send(conn, frame).await {
                Ok(()) => return Ok(conn),
                Err(e) => {
                    tracing::debug!("link {conn} to {addr} ({role}) is stale: {e}");
                    self.pool.remove(conn).await;
                }
            }
        }
        let conn = self.connect_addr(addr, role).await?;
        self.send(conn, frame).await?;
        Ok(conn)
    }

    fn check_size(&self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: frame.len(),
                max: self.config.max_message_size,
            });
        }
        Ok(())
    }
}

async fn bind_listener(
    config: &TransportConfig,
    port: u16,
    what: &'static str,
) -> Result<TcpListener, TransportError> {
    let addr = SocketAddr::new(IpAddr::V4(config.bind_ip), port);
    TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind { what, addr, source })
}

async fn udp_loop(
    udp: Arc<UdpSocket>,
    events: mpsc::Sender<TransportEvent>,
    max_message_size: usize,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match udp.recv_from(&mut buf).await {
            Ok((len, from)) => {
                if len > max_message_size {
                    tracing::debug!("dropping {len}-byte datagram from {from}");
                    continue;
                }
                let event = TransportEvent::Datagram {
                    from,
                    data: buf[..len].to_vec(),
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("udp receive failed: {e}");
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, role: PortRole, pool: Arc<ConnectionPool>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                pool.register(stream, remote, role, false).await;
            }
            Err(e) => {
                tracing::warn!("{role} accept failed: {e}");
            }
        }
    }
}
