use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Invalid command code: {0}")]
    InvalidCommandCode(String),

    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // Domain validation errors
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid subject ID: {0}")]
    InvalidSubjectId(String),

    #[error("Invalid auth method code: {0}")]
    InvalidAuthMethod(String),

    #[error("Invalid event kind code: {0}")]
    InvalidEventKind(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
