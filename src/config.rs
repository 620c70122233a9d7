//! Configuration: TOML file with built-in defaults.
//!
//! Lookup order: explicit `--config` path, `$TB_CONFIG`,
//! `$HOME/.config/terminal-buddy/config.toml`, then defaults. Every field
//! is optional in the file.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, TbError};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "TB_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub selection: SelectionConfig,
}

/// Where the daemon listens and keeps its state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    /// Bytes accepted per query; longer queries are truncated.
    pub read_buffer: usize,
    pub connect_timeout_ms: u64,
    pub response_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 65432,
            pid_file: PathBuf::from("/tmp/tb_server.pid"),
            log_file: PathBuf::from("/tmp/tb_server.log"),
            read_buffer: 4096,
            connect_timeout_ms: 500,
            response_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    /// Resolve host/port into a socket address.
    pub fn addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                TbError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("cannot resolve {}:{}", self.host, self.port),
                ))
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub ollama_url: String,
    /// Generation model.
    pub name: String,
    /// Embedding model used for example selection.
    pub embeddings: String,
    /// Text-to-command examples; the bundled set is used when unset.
    pub examples_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            name: "qwen3:0.6b".to_string(),
            embeddings: "nomic-embed-text".to_string(),
            examples_path: None,
            request_timeout_secs: 120,
        }
    }
}

/// Max-marginal-relevance parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub k: usize,
    pub fetch_k: usize,
    pub lambda: f32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            k: 4,
            fetch_k: 20,
            lambda: 0.5,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Implicit locations are optional and
    /// fall back to defaults when missing.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        match default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text).map_err(|message| TbError::Config {
            path: path.to_path_buf(),
            message,
        })?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    fn from_toml(text: &str) -> std::result::Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Ports, buffer sizes and timeouts must be non-zero.
    fn validate(&self) -> std::result::Result<(), String> {
        let zeros = [
            ("server.port", u64::from(self.server.port)),
            ("server.read_buffer", self.server.read_buffer as u64),
            ("server.connect_timeout_ms", self.server.connect_timeout_ms),
            ("server.response_timeout_secs", self.server.response_timeout_secs),
            ("model.request_timeout_secs", self.model.request_timeout_secs),
        ];
        match zeros.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(format!("{} must be greater than zero", field)),
            None => Ok(()),
        }
    }
}

fn default_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("terminal-buddy")
            .join("config.toml"),
    )
}
