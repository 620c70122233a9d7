//! # terminal-buddy
//!
//! Turns a natural-language request into a suggested shell command.
//!
//! Answering a query needs resources that are slow to build (an embedded
//! example set used to pick few-shot examples). `tb` can build them per
//! call, or keep them warm in a local daemon that the CLI talks to over
//! TCP.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tbuddy::{CommandResolver, Config, OllamaClient, ResourceBuilder};
//!
//! let config = Config::load(None)?;
//! let ollama = Arc::new(OllamaClient::new(&config.model)?);
//! let resources = ResourceBuilder::new(
//!     config.model.examples_path.clone(),
//!     config.selection,
//!     ollama.clone(),
//! )
//! .build()?;
//!
//! let resolver = CommandResolver::new(resources, ollama);
//! println!("{}", resolver.resolve("list all files including hidden ones")?);
//! # Ok::<(), tbuddy::TbError>(())
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod ollama;
pub mod resolver;

// Re-exports for convenience
pub use config::{Config, ModelConfig, SelectionConfig, ServerConfig};
pub use error::{Result, TbError};
pub use ollama::OllamaClient;
pub use resolver::{CommandGenerator, CommandResolver, Embedder, Resources, ResourceBuilder};

use std::sync::Arc;

/// Build a resolver backed by the configured Ollama endpoint.
///
/// This is the expensive step: every example is embedded.
pub fn build_resolver(config: &Config) -> Result<CommandResolver> {
    let ollama = Arc::new(OllamaClient::new(&config.model)?);
    let resources = ResourceBuilder::new(
        config.model.examples_path.clone(),
        config.selection,
        ollama.clone(),
    )
    .build()?;
    Ok(CommandResolver::new(resources, ollama))
}

/// One-off mode: build resources, answer one query.
pub fn resolve_once(config: &Config, query: &str) -> Result<String> {
    build_resolver(config)?.resolve(query)
}
