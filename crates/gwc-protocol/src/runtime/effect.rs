use std::net::SocketAddr;

use gwc_transport::{ConnectionId, PortRole};

use crate::envelope::Envelope;
use crate::prompt::PromptId;
use crate::types::Kind;

use super::{ProtocolEvent, UiSessionId};

/// Intention produite par la logique pure de RuntimeState.
///
/// Chaque methode handle_* / tick_* retourne Vec<RuntimeEffect>.
/// La boucle principale execute ensuite ces effets via Transport + channels.
#[derive(Debug)]
pub enum RuntimeEffect {
    /// Diffuser une enveloppe sur le port de decouverte (UDP broadcast).
    Broadcast(Envelope),

    /// Repondre en UDP a une adresse precise (reponse de decouverte).
    SendTo { addr: SocketAddr, envelope: Envelope },

    /// Envoyer en TCP vers l'ecouteur `role` d'un pair (connexion reutilisee).
    SendTcp {
        addr: SocketAddr,
        role: PortRole,
        envelope: Envelope,
    },

    /// Repondre sur la connexion TCP d'ou vient la requete.
    Reply {
        conn: ConnectionId,
        envelope: Envelope,
    },

    /// Pousser une ligne formatee vers une session UI attachee.
    UiLine { session: UiSessionId, line: String },

    /// Oublier une session UI (ferme son canal d'ecriture).
    DropUi(UiSessionId),

    /// Notification bureau, fire-and-forget.
    Notify { title: String, text: String },

    /// Demander confirmation hors de la boucle; la reponse revient par canal.
    Prompt {
        id: PromptId,
        title: String,
        text: String,
    },

    /// Ajouter une ligne au journal texte d'un chat.
    Transcript { chat_id: String, line: String },

    /// Emettre un evenement protocole vers l'application.
    Emit(ProtocolEvent),
}

/// Echec d'un envoi TCP, remonte a la boucle par les files d'envoi.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub addr: SocketAddr,
    pub role: PortRole,
    pub kind: Kind,
}

impl SendFailure {
    /// Notice shown to the user for this failure.
    pub fn notice(&self) -> String {
        format!("[X] unreachable: {}", self.addr.ip())
    }
}
