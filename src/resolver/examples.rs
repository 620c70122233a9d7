//! Text-to-command example data.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Result, TbError};

const BUNDLED_EXAMPLES: &str = include_str!("../../data/examples.json");

/// One natural-language query paired with the command that answers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    #[serde(alias = "input", alias = "question")]
    pub query: String,
    #[serde(alias = "output")]
    pub command: String,
}

/// Load examples from `path`, or the bundled set when `None`.
pub fn load_examples(path: Option<&Path>) -> Result<Vec<Example>> {
    let (source, examples) = match path {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            (path.display().to_string(), serde_json::from_slice::<Vec<Example>>(&bytes)?)
        }
        None => (
            "bundled".to_string(),
            serde_json::from_str::<Vec<Example>>(BUNDLED_EXAMPLES)?,
        ),
    };

    if examples.is_empty() {
        return Err(TbError::EmptyExamples(source));
    }

    info!(source = %source, count = examples.len(), "examples loaded");
    Ok(examples)
}
