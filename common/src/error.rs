use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Malformed job key: {0}")]
    MalformedJobKey(String),

    #[error("Invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("Invalid language code: {0:?}")]
    InvalidLanguage(String),

    #[error("Payload is empty")]
    EmptyPayload,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tempfile::PersistError> for QueueError {
    fn from(e: tempfile::PersistError) -> Self {
        QueueError::Io(e.error)
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
