/// Protocol-level errors for GhostWhisperChat.
///
/// Covers decoding, persistence, the control channel and the runtime lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid envelope: {0}")]
    Decode(#[from] DecodeError),

    #[error("persistence error at {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("control channel error: {0}")]
    Control(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime shut down")]
    RuntimeClosed,
}

/// Why a received frame was not accepted as an envelope.
///
/// Decoding never panics; every failure maps to one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed framing: {0}")]
    Framing(#[from] gwc_transport::FrameError),

    #[error("body is not valid UTF-8 (at byte {valid_up_to})")]
    Utf8 { valid_up_to: usize },

    #[error("body is not a JSON envelope object: {reason}")]
    Malformed { reason: String },

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("incomplete `origen`: missing `{0}`")]
    IncompleteOrigen(&'static str),

    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion { found: i64, expected: u32 },

    #[error("unknown envelope kind `{0}`")]
    UnknownKind(String),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}
