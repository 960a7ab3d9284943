use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("channel '{0}' is not connected")]
    Disconnected(String),
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("channel '{name}' already exists with type {existing}, requested {requested}")]
    TypeMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("put to '{0}' rejected")]
    PutRejected(String),
    #[error("device timeout")]
    Timeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
