use thiserror::Error;

pub type CasmirResult<T> = Result<T, CasmirError>;

#[derive(Debug, Error)]
pub enum CasmirError {
    #[error("config error: {0}")]
    Config(String),

    #[error("hash error: {0}")]
    Hash(String),

    #[error("stat error: {0}")]
    Stat(String),

    #[error("metadata store error: {0}")]
    Db(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
