//! Directory error type.

/// Errors surfaced by the bot directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure while opening the database.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for DirectoryError {
    fn from(e: rusqlite::Error) -> Self {
        DirectoryError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for DirectoryError {
    fn from(e: serde_json::Error) -> Self {
        DirectoryError::Serialization(e.to_string())
    }
}
