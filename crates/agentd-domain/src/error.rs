/// The four error kinds every core component classifies its failures into.
///
/// Adapters, stores, and the session service all funnel errors through
/// [`Error::kind`] so the gateway facade can translate them into a uniform
/// HTTP status without needing to know the originating component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Invalid,
    NotFound,
    Unavailable,
    Internal,
}

/// Shared error type used across all agentd crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Classify this error into one of the four documented kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Invalid(_) => ErrorKind::Invalid,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Io(_) | Error::Json(_) | Error::Http(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
            Error::Provider { .. } => ErrorKind::Internal,
        }
    }

    /// The sentinel used by the Session Service when an explicit
    /// `persist_runtime_option` write fails before a turn is dispatched.
    pub fn runtime_options_persist_failed(cause: impl std::fmt::Display) -> Self {
        Error::Unavailable(format!("RuntimeOptionsPersistFailed: {cause}"))
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Error::NotFound(format!("session '{session_id}' not found"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
