use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::protocol::{read_framed, write_framed};
use crate::{ConnectionId, PortRole, TransportError, TransportEvent};

/// Outbound frames queued per connection before `send` starts waiting.
const WRITE_QUEUE: usize = 64;

struct Entry {
    remote: SocketAddr,
    role: PortRole,
    outbound: bool,
    tx: mpsc::Sender<Bytes>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<ConnectionId, Entry>,
    /// Live outbound link per remote listener address.
    dialed: HashMap<SocketAddr, ConnectionId>,
}

/// Every live TCP connection, inbound or outbound.
///
/// Each connection gets a reader task that forwards frames to the node's
/// event channel and a writer task fed by a bounded queue. Outbound links
/// are cached per remote address so mesh traffic reuses one stream.
pub(crate) struct ConnectionPool {
    next_id: AtomicU64,
    inner: Mutex<Inner>,
    events: mpsc::Sender<TransportEvent>,
    max_message_size: usize,
}

impl ConnectionPool {
    pub fn new(events: mpsc::Sender<TransportEvent>, max_message_size: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: Mutex::new(Inner::default()),
            events,
            max_message_size,
        }
    }

    /// The cached outbound link to `addr`, if one is still registered.
    pub async fn cached(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.inner.lock().await.dialed.get(&addr).copied()
    }

    /// Get the cached outbound link to `addr`, or dial a new one.
    pub async fn get_or_connect(
        self: &Arc<Self>,
        addr: SocketAddr,
        role: PortRole,
        timeout: Duration,
    ) -> Result<ConnectionId, TransportError> {
        if let Some(id) = self.inner.lock().await.dialed.get(&addr).copied() {
            return Ok(id);
        }

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Unreachable {
                    addr,
                    role,
                    source: e.into(),
                })
            }
            Err(_) => {
                return Err(TransportError::Unreachable {
                    addr,
                    role,
                    source: anyhow::anyhow!("connect timed out after {timeout:?}"),
                })
            }
        };

        Ok(self.register(stream, addr, role, true).await)
    }

    /// Adopt a connected stream and spawn its reader and writer tasks.
    pub async fn register(
        self: &Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        role: PortRole,
        outbound: bool,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<Bytes>(WRITE_QUEUE);

        {
            let mut inner = self.inner.lock().await;
            inner.entries.insert(
                id,
                Entry {
                    remote,
                    role,
                    outbound,
                    tx,
                },
            );
            if outbound {
                inner.dialed.insert(remote, id);
            }
        }

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_framed(&mut write_half, &frame).await {
                    tracing::debug!("write to {remote} failed: {e}");
                    break;
                }
            }
        });

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match read_framed(&mut read_half, pool.max_message_size).await {
                    Ok(Some(data)) => {
                        let event = TransportEvent::Frame {
                            conn: id,
                            from: remote,
                            role,
                            data,
                        };
                        if pool.events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("read from {remote} failed: {e}");
                        break;
                    }
                }
            }
            pool.remove(id).await;
            let _ = pool
                .events
                .send(TransportEvent::Closed { conn: id, from: remote })
                .await;
        });

        tracing::debug!(
            "{} {role} connection {id} with {remote}",
            if outbound { "opened" } else { "accepted" }
        );
        id
    }

    /// Queue a frame on an existing connection.
    pub async fn send(&self, id: ConnectionId, frame: Bytes) -> Result<(), TransportError> {
        let (tx, remote) = {
            let inner = self.inner.lock().await;
            let entry = inner
                .entries
                .get(&id)
                .ok_or(TransportError::UnknownConnection(id))?;
            (entry.tx.clone(), entry.remote)
        };
        tx.send(frame).await.map_err(|_| TransportError::Send {
            addr: remote,
            source: anyhow::anyhow!("connection {id} closed"),
        })
    }

    /// Forget a connection; dropping its queue ends the writer task.
    pub async fn remove(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.remove(&id) {
            if entry.outbound && inner.dialed.get(&entry.remote) == Some(&id) {
                inner.dialed.remove(&entry.remote);
            }
        }
    }

    /// Remote address and role of a live connection.
    pub async fn describe(&self, id: ConnectionId) -> Option<(SocketAddr, PortRole)> {
        let inner = self.inner.lock().await;
        inner.entries.get(&id).map(|e| (e.remote, e.role))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.dialed.clear();
    }
}
