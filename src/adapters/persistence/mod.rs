use sqlx::PgPool;

use crate::app_error::AppError;

pub mod ledger;
pub mod webhook_event;

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                // A ledger invariant the reconciler should have caught.
                tracing::warn!(error = %db_err, "Ledger constraint rejected write");
                AppError::InvalidEvent("event violates a ledger constraint".into())
            }
            sqlx::Error::PoolTimedOut => {
                tracing::error!(error = %err, "Database pool timed out");
                AppError::Database("Database unavailable".into())
            }
            _ => {
                // Log the actual error for debugging, but don't expose details
                tracing::error!(error = ?err, "Database error");
                AppError::Database("Database operation failed".into())
            }
        }
    }
}
