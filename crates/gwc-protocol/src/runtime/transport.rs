use std::net::SocketAddr;

use gwc_transport::{ConnectionId, LanSender, PortRole};

/// Abstraction reseau pour le runtime.
///
/// En production : impl par LanSender (UDP + TCP).
/// En test : impl par MockTransport (enregistre les envois).
///
/// Clone : chaque file d'envoi TCP garde sa propre copie.
#[async_trait::async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Diffuser une trame sur le port de decouverte.
    async fn broadcast(&self, frame: &[u8]) -> Result<(), String>;

    /// Envoyer une trame UDP a une adresse.
    async fn send_udp(&self, to: SocketAddr, frame: &[u8]) -> Result<(), String>;

    /// Envoyer une trame TCP vers l'ecouteur d'un pair.
    async fn send_tcp(&self, to: SocketAddr, role: PortRole, frame: &[u8]) -> Result<(), String>;

    /// Repondre sur une connexion existante.
    async fn reply(&self, conn: ConnectionId, frame: &[u8]) -> Result<(), String>;
}

// ── Impl pour LanSender (production) ────────────────────────────────

#[async_trait::async_trait]
impl Transport for LanSender {
    async fn broadcast(&self, frame: &[u8]) -> Result<(), String> {
        self.broadcast_udp(frame).await.map_err(|e| e.to_string())
    }

    async fn send_udp(&self, to: SocketAddr, frame: &[u8]) -> Result<(), String> {
        self.unicast_udp(to, frame).await.map_err(|e| e.to_string())
    }

    async fn send_tcp(&self, to: SocketAddr, role: PortRole, frame: &[u8]) -> Result<(), String> {
        LanSender::send_tcp(self, to, role, frame)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn reply(&self, conn: ConnectionId, frame: &[u8]) -> Result<(), String> {
        self.send(conn, frame).await.map_err(|e| e.to_string())
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────
