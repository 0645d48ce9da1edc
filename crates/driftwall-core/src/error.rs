use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriftwallError {
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type DriftwallResult<T> = Result<T, DriftwallError>;
