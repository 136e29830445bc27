use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobsmithError {
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("UUID parsing error: {0}")]
    UuidParsing(#[from] uuid::Error),

    #[error("Worker error: {message}")]
    Worker { message: String },

    #[error("Scheduler error: {message}")]
    Scheduler { message: String },

    #[error("No factory registered for key: {factory_key}")]
    UnknownFactory { factory_key: String },

    #[error("Job execution error: {message}")]
    Execution { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

// Add From implementations for toml errors
impl From<toml::de::Error> for JobsmithError {
    fn from(err: toml::de::Error) -> Self {
        JobsmithError::Config(format!("TOML deserialization error: {}", err))
    }
}

impl From<toml::ser::Error> for JobsmithError {
    fn from(err: toml::ser::Error) -> Self {
        JobsmithError::Config(format!("TOML serialization error: {}", err))
    }
}
