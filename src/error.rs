use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid configuration; fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Parse failed: {0}")]
    Parse(String),

    /// A feed's write transaction was rolled back.
    #[error("Storage write failed for table {table}: {message}")]
    StorageWrite { table: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Errors that cannot be contained to a single feed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Database(tokio_rusqlite::Error::ConnectionClosed)
        )
    }
}
