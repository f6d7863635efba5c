use thiserror::Error;

pub type LockboxResult<T> = Result<T, LockboxError>;

#[derive(Debug, Error)]
pub enum LockboxError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<toml::de::Error> for LockboxError {
    fn from(e: toml::de::Error) -> Self {
        LockboxError::Config(e.to_string())
    }
}
