use thiserror::Error;

/// Error taxonomy for every scheduling operation. Each variant maps to one
/// wire code so the client can tell a rule violation from a retryable
/// busy signal or a missing entity.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    /// A named scheduling rule was violated (past date, weekend,
    /// self-observation, lunch period, double-booking, ...).
    #[error("{0}")]
    Validation(String),

    /// Store lock acquisition timed out. Retryable; nothing was written.
    #[error("the scheduler is busy, please try again")]
    Busy,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadParams(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Validation(_) => "validation_failed",
            ApiError::Busy => "busy",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadParams(_) => "bad_params",
            ApiError::NoWorkspace => "no_workspace",
            ApiError::Db(_) => "db_query_failed",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        ApiError::BadParams(message.into())
    }
}
