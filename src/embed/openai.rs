use anyhow::{Context, Result, bail};
use serde::Deserialize;

use super::ollama::truncate_bytes;
use super::{Embedder, Embedding};

const API_URL: &str = "https://api.openai.com/v1/embeddings";

pub struct OpenAiEmbedder {
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, model: &str) -> Self {
        let dimensions = match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            dimensions,
        }
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Embedding>> {
        let inputs: Vec<&str> = inputs
            .iter()
            .map(|t| if t.is_empty() { " " } else { truncate_bytes(t, 24_000) })
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let result = ureq::post(API_URL)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&body);

        let mut response = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => bail!("openai returned HTTP {code}"),
            Err(e) => return Err(anyhow::anyhow!(e).context("openai embedding request failed")),
        };

        let mut resp: EmbeddingResponse = response
            .body_mut()
            .read_json()
            .context("parsing openai response")?;
        if resp.data.len() != inputs.len() {
            bail!("openai returned {} embeddings for {} inputs", resp.data.len(), inputs.len());
        }
        resp.data.sort_by_key(|d| d.index);
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut out = self.request(&[text])?;
        out.pop().context("openai returned no embedding")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
