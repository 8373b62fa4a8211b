//! Error types for the task queue

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested task (or its heartbeat row) does not exist.
    #[error("Task does not exist")]
    NotExist,

    /// The task is not currently running, so the requested transition is invalid.
    #[error("Task not running")]
    NotRunning,

    /// The task was canceled out from under the worker; the recorded status
    /// stays `canceled` and the operation did not mutate state.
    #[error("Task was canceled")]
    TaskCanceled,

    /// A blocked dequeue was canceled by its cancellation token.
    #[error("Dequeue canceled")]
    DequeueCanceled,

    /// An update that must affect a row affected none, even after the
    /// recovery retry.
    #[error("No rows were affected")]
    RowsNotAffected,
}
