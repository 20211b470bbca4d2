//! Error types for the InlinkAI extension.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    /// No listener was registered on the other end of a message channel.
    #[error("Could not establish connection. Receiving end does not exist.")]
    NoReceiver,

    #[error("Content agent already present in tab {0}")]
    AlreadyInjected(u32),

    #[error("Tab not found: {0}")]
    TabNotFound(u32),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
