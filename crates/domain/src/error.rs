/// Shared error type used across all chatcore crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("embedding: {0}")]
    Embedding(String),

    #[error("retrieval: {0}")]
    Retrieval(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    /// The model kept requesting tools past the step budget.
    ///
    /// `side_effecting_calls` counts custom HTTP actions that already ran
    /// before the loop was aborted; a non-zero value means an external
    /// system may have been mutated.
    #[error("step limit exceeded after {max_steps} model calls ({side_effecting_calls} side-effecting tool calls ran)")]
    StepLimitExceeded {
        max_steps: usize,
        side_effecting_calls: usize,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("storage: {0}")]
    Storage(String),

    /// Part of a batch reached the store. `written` holds the message uids
    /// that were stored; every other row in the batch was not.
    #[error("partial batch ({} row(s) written): {message}", written.len())]
    PartialBatch {
        written: Vec<uuid::Uuid>,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Coarse error classification used by transports to pick a response
/// without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Provider,
    Tool,
    StepLimit,
    Cancelled,
    Persistence,
    Input,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::TenantNotFound(_) => ErrorKind::Configuration,
            Error::Provider { .. } | Error::Embedding(_) | Error::Retrieval(_) => {
                ErrorKind::Provider
            }
            Error::Http(_) | Error::Timeout(_) => ErrorKind::Provider,
            Error::UnknownTool(_) | Error::Tool { .. } => ErrorKind::Tool,
            Error::StepLimitExceeded { .. } => ErrorKind::StepLimit,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Storage(_) | Error::PartialBatch { .. } | Error::Io(_) => {
                ErrorKind::Persistence
            }
            Error::InvalidInput(_) | Error::Json(_) => ErrorKind::Input,
            Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Missing credentials or an unknown tenant: never worth retrying.
    pub fn is_fatal_config(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
