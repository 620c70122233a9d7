//! Resolver: turns a natural-language query into a shell command.
//!
//! `ResourceBuilder` does the expensive part once (load examples, embed
//! them). `CommandResolver` holds the result and hands each query to the
//! generation collaborator. A daemon builds one resolver for its whole
//! lifetime; one-off mode builds a fresh one per call.

pub mod examples;
pub mod prompt;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::SelectionConfig;
use crate::error::{Result, TbError};

pub use examples::{load_examples, Example};
pub use prompt::PromptTemplate;

/// Text embedding capability used for example selection.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// The generation collaborator: query plus prompt template in, command out.
pub trait CommandGenerator: Send + Sync {
    fn terminal_command(&self, query: &str, prompt: &PromptTemplate) -> Result<String>;
}

/// In-memory resources needed before any query can be answered.
#[derive(Debug, Clone)]
pub struct Resources {
    pub prompt: PromptTemplate,
}

pub struct ResourceBuilder {
    examples_path: Option<PathBuf>,
    selection: SelectionConfig,
    embedder: Arc<dyn Embedder>,
}

impl ResourceBuilder {
    pub fn new(
        examples_path: Option<PathBuf>,
        selection: SelectionConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            examples_path,
            selection,
            embedder,
        }
    }

    /// Load and embed the example set.
    pub fn build(&self) -> Result<Resources> {
        info!("building resources");
        let start = Instant::now();

        let examples = load_examples(self.examples_path.as_deref())?;
        let queries: Vec<String> = examples.iter().map(|e| e.query.clone()).collect();
        let embeddings = self.embedder.embed(&queries)?;
        if embeddings.len() != examples.len() {
            return Err(TbError::Generation(format!(
                "embedder returned {} vectors for {} examples",
                embeddings.len(),
                examples.len()
            )));
        }

        let prompt = PromptTemplate::new(examples, embeddings, self.selection);
        info!(
            examples = prompt.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "resources ready"
        );
        Ok(Resources { prompt })
    }
}

/// Resources plus the generator, behind one `resolve` call.
///
/// Read-only after construction; share it across threads with `Arc`.
pub struct CommandResolver {
    resources: Resources,
    generator: Arc<dyn CommandGenerator>,
}

impl CommandResolver {
    pub fn new(resources: Resources, generator: Arc<dyn CommandGenerator>) -> Self {
        Self {
            resources,
            generator,
        }
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn resolve(&self, query: &str) -> Result<String> {
        debug!(query, "resolving");
        let command = self
            .generator
            .terminal_command(query, &self.resources.prompt)?;
        if command.trim().is_empty() {
            return Err(TbError::Generation("model returned an empty command".to_string()));
        }
        Ok(command)
    }
}
