use thiserror::Error;

#[derive(Error, Debug)]
pub enum InflightError {
  #[error("Store error: {0}")]
  Store(#[from] redis::RedisError),

  #[error("Store timed out reading queue {0}")]
  StoreTimeout(String),

  #[error("Cache error: {0}")]
  Cache(String),

  #[error("Invalid configuration: {0}")]
  Config(String),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, InflightError>;
