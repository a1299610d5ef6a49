pub mod ollama;
pub mod openai;

use anyhow::{Result, bail};

use crate::config::{EmbedBackend, EmbedConfig};
use crate::error::AnalysisError;

pub type Embedding = Vec<f32>;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Embedding>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Build the embedder named in the config.
pub fn from_config(config: &EmbedConfig) -> Result<Box<dyn Embedder>> {
    match &config.backend {
        EmbedBackend::Ollama { model, url } => Ok(Box::new(ollama::OllamaEmbedder::new(url, model)?)),
        EmbedBackend::OpenAi { model } => {
            let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            if key.is_empty() {
                bail!("embed backend is openai but OPENAI_API_KEY is not set");
            }
            Ok(Box::new(openai::OpenAiEmbedder::new(&key, model)))
        }
        EmbedBackend::None => bail!("no embedding backend configured (set [embed.backend] in polisim.toml)"),
    }
}

/// Model name the store keys embeddings by, without contacting the backend.
pub fn configured_model(config: &EmbedConfig) -> Option<&str> {
    match &config.backend {
        EmbedBackend::Ollama { model, .. } | EmbedBackend::OpenAi { model } => Some(model),
        EmbedBackend::None => None,
    }
}

/// 0 for a zero vector, and for vectors of different lengths (stored under a
/// model name whose output size later changed).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// f64 variant for averaged document vectors, where the matrix math happens.
pub fn cosine_similarity_f64(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Component-wise mean of a set of chunk embeddings.
pub fn mean_embedding(vectors: &[Embedding]) -> Result<Vec<f64>, AnalysisError> {
    let first = vectors.first().ok_or(AnalysisError::EmptyInput)?;
    let dims = first.len();
    let mut sum = vec![0.0f64; dims];
    for v in vectors {
        if v.len() != dims {
            return Err(AnalysisError::DimensionMismatch {
                expected: dims,
                got: v.len(),
            });
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += *x as f64;
        }
    }
    let n = vectors.len() as f64;
    Ok(sum.into_iter().map(|s| s / n).collect())
}
