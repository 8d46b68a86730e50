use thiserror::Error;

/// Room identifier decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomIdError {
    #[error("room id '{0}' must start with a 'p' (direct) or 'g' (group) prefix")]
    MissingPrefix(String),
    #[error("room id '{0}' must encode a positive decimal remote identifier")]
    InvalidIdentifier(String),
}

/// Bridge failure taxonomy.
///
/// `Authentication` is terminal for the login attempt and never retried
/// automatically. `Disconnected` is non-fatal; recovery is delegated to the
/// connection library. `Delivery` and `Resolution` stay local to a single
/// message or annotation and never interrupt the session.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },
    #[error("remote connection lost: {reason}")]
    Disconnected { reason: String },
    #[error("delivery failed: {message}")]
    Delivery { message: String },
    #[error("no annotation identity could be resolved for room {room}")]
    Resolution { room: String },
    #[error("unsupported capability: {message}")]
    Unsupported { message: String },
}
