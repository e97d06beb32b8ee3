use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("No longer available: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Missing context: {0}")]
    MissingContext(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Transient failures are eligible for the single automatic retry.
    /// Validation and contract violations never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}
