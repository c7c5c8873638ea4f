use thiserror::Error;

/// Errors raised by the scheduling core and the entity store.
///
/// Unsatisfiable constraints are never errors; they come back as shortfall or
/// unresolved counts on otherwise successful results.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Wire error code used in IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Database(_) => "db_query_failed",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
