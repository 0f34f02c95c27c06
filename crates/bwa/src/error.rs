use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("spa has not reported its {0} yet")]
    NotReady(&'static str),
    #[error("spa does not support {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;
