use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Server rejected command: {0}")]
    Protocol(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Bad input: {0}")]
    BadInput(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    /// Worth retrying on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Connection(_) | AppError::Timeout(_))
    }

    /// The session that produced this error can no longer be trusted and must
    /// be dropped before the worker's next command.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Authentication(_) | AppError::Connection(_) | AppError::Timeout(_)
        )
    }

    /// The mail server (or our link to it) is at fault rather than the caller.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AppError::Authentication(_)
                | AppError::Connection(_)
                | AppError::Timeout(_)
                | AppError::Protocol(_)
                | AppError::Parse(_)
        )
    }
}
