use std::fmt;

/// Unified error type for the concierge crate.
#[derive(Debug, Clone)]
pub enum CoreError {
    /// Invalid input provided by the caller.
    InvalidInput(String),
    /// The targeted session does not exist or has expired.
    SessionNotFound(String),
    /// The targeted pending action does not exist.
    ActionNotFound(String),
    /// A pending action was asked to leave a state it is not in.
    InvalidTransition { action_id: String, from: String, attempted: String },
    /// The caller does not own the targeted session or action.
    Forbidden(String),
    /// The intent resolver is unavailable or errored.
    ResolverUnavailable(String),
    /// Internal error.
    Internal(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            CoreError::SessionNotFound(id) => write!(f, "session not found: {id}"),
            CoreError::ActionNotFound(id) => write!(f, "action not found: {id}"),
            CoreError::InvalidTransition { action_id, from, attempted } => write!(
                f,
                "action {action_id} cannot move from '{from}' to '{attempted}'"
            ),
            CoreError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            CoreError::ResolverUnavailable(msg) => write!(f, "intent resolver unavailable: {msg}"),
            CoreError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;
