//! Document-level vectors, the pairwise similarity matrix, and dimension scores.

use anyhow::{Context, Result};
use ndarray::Array2;
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::Dimension;
use crate::embed::{Embedder, cosine_similarity_f64, mean_embedding};
use crate::store::sqlite::Store;

/// Averaged chunk embeddings, one per policy that has any.
#[derive(Debug, Clone, Default)]
pub struct PolicyVectors {
    pub ids: Vec<String>,
    pub vectors: Vec<Vec<f64>>,
}

impl PolicyVectors {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// `policy_id -> dimension key -> cosine score`
pub type DimensionScores = BTreeMap<String, BTreeMap<String, f64>>;

/// Mean of a policy's chunk embeddings under `model`.
pub fn policy_embedding(store: &Store, policy_id: &str, model: &str) -> Result<Vec<f64>> {
    let chunks = store.policy_chunks(policy_id, model)?;
    let vectors: Vec<Vec<f32>> = chunks.into_iter().map(|c| c.embedding).collect();
    mean_embedding(&vectors).with_context(|| format!("no usable embeddings for {policy_id}"))
}

/// Policy vectors for `policy_ids`, in the given order. Policies without
/// embeddings are dropped (with a warning) and do not appear in the result.
pub fn policy_vectors(store: &Store, policy_ids: &[String], model: &str) -> Result<PolicyVectors> {
    let mut out = PolicyVectors::default();
    for id in policy_ids {
        match policy_embedding(store, id, model) {
            Ok(v) => {
                out.ids.push(id.clone());
                out.vectors.push(v);
            }
            Err(e) => warn!(policy_id = %id, "left out of analysis: {e:#}"),
        }
    }
    Ok(out)
}

/// Symmetric cosine similarity matrix with a unit diagonal.
pub fn similarity_matrix(vectors: &[Vec<f64>]) -> Array2<f64> {
    let n = vectors.len();
    let mut matrix = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        matrix[[i, i]] = 1.0;
        for j in (i + 1)..n {
            let sim = cosine_similarity_f64(&vectors[i], &vectors[j]);
            matrix[[i, j]] = sim;
            matrix[[j, i]] = sim;
        }
    }
    matrix
}

/// Embed each dimension's query text once.
pub fn dimension_vectors(embedder: &dyn Embedder, dimensions: &[Dimension]) -> Result<Vec<Vec<f64>>> {
    let queries: Vec<&str> = dimensions.iter().map(|d| d.query.as_str()).collect();
    let vectors = embedder
        .embed_batch(&queries)
        .context("embedding dimension queries")?;
    Ok(vectors
        .into_iter()
        .map(|v| v.into_iter().map(f64::from).collect())
        .collect())
}

/// Score every policy against every dimension query.
pub fn dimension_scores(
    policies: &PolicyVectors,
    dimensions: &[Dimension],
    dimension_vectors: &[Vec<f64>],
) -> DimensionScores {
    let mut scores = DimensionScores::new();
    for (id, vector) in policies.ids.iter().zip(&policies.vectors) {
        let row = scores.entry(id.clone()).or_default();
        for (dim, dim_vector) in dimensions.iter().zip(dimension_vectors) {
            row.insert(dim.key.clone(), cosine_similarity_f64(vector, dim_vector));
        }
    }
    scores
}

/// Index of the dimension whose query vector is closest to `vector`.
pub fn dominant_dimension(vector: &[f64], dimension_vectors: &[Vec<f64>]) -> Option<usize> {
    dimension_vectors
        .iter()
        .map(|d| cosine_similarity_f64(vector, d))
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}
