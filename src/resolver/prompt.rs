//! Prompt template: few-shot prompt built from the examples most
//! relevant to a query.
//!
//! Examples are picked with max marginal relevance (MMR): start from the
//! `fetch_k` examples closest to the query, then greedily add the one that
//! best trades relevance against similarity to what was already picked.

use crate::config::SelectionConfig;

use super::examples::Example;

const INSTRUCTIONS: &str = "You translate requests into a single shell command.\n\
Reply with the command only: no explanation, no markdown, one line.";

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    examples: Vec<Example>,
    /// One embedding per example, same order.
    embeddings: Vec<Vec<f32>>,
    selection: SelectionConfig,
}

impl PromptTemplate {
    /// Examples without a matching embedding are dropped.
    pub fn new(examples: Vec<Example>, embeddings: Vec<Vec<f32>>, selection: SelectionConfig) -> Self {
        let len = examples.len().min(embeddings.len());
        let mut examples = examples;
        let mut embeddings = embeddings;
        examples.truncate(len);
        embeddings.truncate(len);
        Self {
            examples,
            embeddings,
            selection,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Pick up to `k` examples for a query embedding, most relevant first.
    pub fn select(&self, query_embedding: &[f32]) -> Vec<&Example> {
        let SelectionConfig { k, fetch_k, lambda } = self.selection;
        if k == 0 || self.examples.is_empty() {
            return Vec::new();
        }

        // (index, relevance) of the fetch_k nearest examples
        let mut candidates: Vec<(usize, f32)> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine(query_embedding, e)))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(fetch_k.max(k));

        let mut picked: Vec<usize> = Vec::with_capacity(k);
        while picked.len() < k && !candidates.is_empty() {
            let mut best = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (pos, (idx, relevance)) in candidates.iter().enumerate() {
                let redundancy = picked
                    .iter()
                    .map(|p| cosine(&self.embeddings[*idx], &self.embeddings[*p]))
                    .fold(f32::NEG_INFINITY, f32::max);
                let redundancy = if picked.is_empty() { 0.0 } else { redundancy };
                let score = lambda * relevance - (1.0 - lambda) * redundancy;
                if score > best_score {
                    best_score = score;
                    best = pos;
                }
            }
            let (idx, _) = candidates.remove(best);
            picked.push(idx);
        }

        picked.into_iter().map(|i| &self.examples[i]).collect()
    }

    /// Render the few-shot prompt for `query`.
    pub fn render(&self, query: &str, examples: &[&Example]) -> String {
        let mut prompt = String::from(INSTRUCTIONS);
        prompt.push_str("\n\n");
        for example in examples {
            prompt.push_str("Request: ");
            prompt.push_str(&example.query);
            prompt.push_str("\nCommand: ");
            prompt.push_str(&example.command);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Request: ");
        prompt.push_str(query.trim());
        prompt.push_str("\nCommand:");
        prompt
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
