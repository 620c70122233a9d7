//! Error types for terminal-buddy.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TbError>;

#[derive(Error, Debug)]
pub enum TbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("model endpoint error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("command generation failed: {0}")]
    Generation(String),

    /// Another process already holds the listening socket.
    #[error("address {addr} already in use (is a server already running?)")]
    AddrInUse { addr: SocketAddr },

    /// The daemon accepted the connection but the exchange broke.
    #[error("daemon exchange failed: {0}")]
    Daemon(String),

    #[error("example set is empty: {0}")]
    EmptyExamples(String),
}
