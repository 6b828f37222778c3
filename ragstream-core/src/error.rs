use thiserror::Error;

/// Core error type for ragstream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum RagStreamError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("backend unavailable: {endpoint}")]
    BackendUnavailable { endpoint: String },

    #[error("backend error: {code} {message}")]
    BackendError { code: String, message: String },

    #[error("unauthorized")]
    Unauthorized,

    /// A `citations` frame whose payload is not a JSON array.
    #[error("citation payload rejected: {0}")]
    CitationPayload(String),

    /// State machine misuse, e.g. applying an event to a finished turn.
    #[error("conversation contract violated: {0}")]
    Contract(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagStreamError {
    /// True for failures of the transport itself (as opposed to payload or usage errors).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::BackendError { .. } | Self::Unauthorized
        )
    }
}

pub type CoreResult<T> = std::result::Result<T, RagStreamError>;
