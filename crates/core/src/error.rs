use thiserror::Error;

pub type ListenResult<T> = Result<T, ListenError>;

#[derive(Error, Debug)]
pub enum ListenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for ListenError {
    fn from(err: config::ConfigError) -> Self {
        ListenError::Config(err.to_string())
    }
}
