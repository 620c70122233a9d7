//! Ollama client: embeddings and command generation over the local
//! model-serving HTTP API.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{Result, TbError};
use crate::resolver::{CommandGenerator, Embedder, PromptTemplate};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    embeddings_model: String,
}

impl OllamaClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("terminal-buddy/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.name.clone(),
            embeddings_model: config.embeddings.clone(),
        })
    }

    fn post<T: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &T) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send()?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(TbError::Generation(format!("{} returned {}: {}", url, status, text.trim())));
        }

        Ok(response.json()?)
    }

    /// Raw completion for a fully rendered prompt.
    pub fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let reply: GenerateResponse = self.post("/api/generate", &body)?;
        Ok(reply.response)
    }
}

impl Embedder for OllamaClient {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: &self.embeddings_model,
            input: texts,
        };
        let reply: EmbedResponse = self.post("/api/embed", &body)?;
        debug!(count = reply.embeddings.len(), "embeddings received");
        Ok(reply.embeddings)
    }
}

impl CommandGenerator for OllamaClient {
    fn terminal_command(&self, query: &str, prompt: &PromptTemplate) -> Result<String> {
        let query_embedding = self
            .embed(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| TbError::Generation("no embedding for query".to_string()))?;

        let examples = prompt.select(&query_embedding);
        let rendered = prompt.render(query, &examples);
        debug!(examples = examples.len(), "prompt rendered");

        let raw = self.generate(&rendered)?;
        Ok(clean_command(&raw))
    }
}

/// Strip reasoning blocks and markdown, keep the first command line.
pub fn clean_command(raw: &str) -> String {
    let mut text = raw.to_string();
    while let Some(start) = text.find("<think>") {
        match text[start..].find("</think>") {
            Some(end) => text.replace_range(start..start + end + "</think>".len(), ""),
            None => text.truncate(start),
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(|line| line.strip_prefix("Command:").map(str::trim).unwrap_or(line))
        .map(|line| line.trim_matches('`').trim())
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_plain() {
        assert_eq!(clean_command("  ls -la \n"), "ls -la");
    }

    #[test]
    fn test_clean_think_block() {
        let raw = "<think>\nThe user wants files.\n</think>\n\nls -la";
        assert_eq!(clean_command(raw), "ls -la");
    }

    #[test]
    fn test_clean_unterminated_think() {
        assert_eq!(clean_command("<think>still thinking"), "");
    }

    #[test]
    fn test_clean_fences_and_backticks() {
        assert_eq!(clean_command("```bash\ndu -sh .\n```"), "du -sh .");
        assert_eq!(clean_command("`df -h`"), "df -h");
        assert_eq!(clean_command("Command: free -h\nexplanation"), "free -h");
    }

    #[test]
    fn test_new_trims_base_url() {
        let config = ModelConfig {
            ollama_url: "http://localhost:11434/".to_string(),
            ..ModelConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
