use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Webhook event already finalized")]
    AlreadyFinalized,

    #[error("Not found")]
    NotFound,

    #[error("Timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the provider should redeliver the webhook after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_) | AppError::Internal(_) | AppError::Timeout => true,
            AppError::ValidationError(_)
            | AppError::InvalidEvent(_)
            | AppError::AlreadyFinalized
            | AppError::NotFound => false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::ValidationError(_) => ErrorCode::ValidationError,
            AppError::InvalidEvent(_) => ErrorCode::InvalidEvent,
            AppError::AlreadyFinalized => ErrorCode::AlreadyFinalized,
            AppError::NotFound => ErrorCode::NotFound,
            AppError::Timeout => ErrorCode::Timeout,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status recorded on the webhook event and returned to the caller.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::ValidationError(_) => 400,
            AppError::NotFound => 404,
            AppError::AlreadyFinalized => 409,
            AppError::InvalidEvent(_) => 422,
            AppError::Timeout => 504,
            AppError::Database(_) | AppError::Internal(_) => 500,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DatabaseError,
    ValidationError,
    InvalidEvent,
    AlreadyFinalized,
    NotFound,
    Timeout,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidEvent => "INVALID_EVENT",
            ErrorCode::AlreadyFinalized => "ALREADY_FINALIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
