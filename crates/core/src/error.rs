use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("unknown job mode: {0}")]
    UnknownJobMode(String),

    #[error("invalid config value for {key}: {message}")]
    Config { key: String, message: String },
}
