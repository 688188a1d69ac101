use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Unique constraint violation; the row already exists.
    #[error("Duplicate record")]
    Duplicate,

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stored value no longer parses as its domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e
            && db.is_unique_violation()
        {
            return StorageError::Duplicate;
        }
        StorageError::Database(e)
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
