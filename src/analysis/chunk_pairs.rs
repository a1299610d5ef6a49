//! Passage-level evidence for strongly similar policy pairs.

use anyhow::Result;
use ndarray::Array2;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::derived::round4;
use super::similarity::dominant_dimension;
use crate::config::Dimension;
use crate::embed::cosine_similarity;
use crate::store::sqlite::{Store, StoredChunk};

#[derive(Debug, Clone)]
pub struct PairParams {
    pub threshold: f64,
    pub top_k: usize,
    pub max_chunks: usize,
    pub snippet_chars: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkRef {
    pub text: String,
    pub index: usize,
    pub dimension: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkMatch {
    pub chunk_a: ChunkRef,
    pub chunk_b: ChunkRef,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PolicyPair {
    pub doc_a: String,
    pub doc_b: String,
    pub similarity: f64,
    pub top_chunks: Vec<ChunkMatch>,
}

/// The `top_k` most similar chunk pairs between two policies, best first,
/// as `(index in a, index in b, cosine)`.
pub fn top_chunk_matches(a: &[StoredChunk], b: &[StoredChunk], top_k: usize) -> Vec<(usize, usize, f64)> {
    let mut scored = Vec::with_capacity(a.len() * b.len());
    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            scored.push((i, j, f64::from(cosine_similarity(&ca.embedding, &cb.embedding))));
        }
    }
    scored.sort_by(|x, y| y.2.total_cmp(&x.2));
    scored.truncate(top_k);
    scored
}

fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// For each policy pair at or above the threshold, find the passages that
/// drive the similarity.
pub fn chunk_pairs(
    store: &Store,
    model: &str,
    ids: &[String],
    similarity: &Array2<f64>,
    dimensions: &[Dimension],
    dimension_vectors: &[Vec<f64>],
    params: &PairParams,
) -> Result<Vec<PolicyPair>> {
    let n = ids.len().min(similarity.nrows());
    let mut candidates = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if similarity[[i, j]] >= params.threshold {
                candidates.push((i, j, similarity[[i, j]]));
            }
        }
    }
    info!(pairs = candidates.len(), threshold = params.threshold, "policy pairs above threshold");

    let mut cache: HashMap<&str, Vec<StoredChunk>> = HashMap::new();
    let dimension_of = |chunk: &StoredChunk| -> String {
        let v: Vec<f64> = chunk.embedding.iter().map(|x| f64::from(*x)).collect();
        dominant_dimension(&v, dimension_vectors)
            .and_then(|i| dimensions.get(i))
            .map(|d| d.key.clone())
            .unwrap_or_default()
    };
    let chunk_ref = |chunk: &StoredChunk| ChunkRef {
        text: snippet(&chunk.content, params.snippet_chars),
        index: chunk.index,
        dimension: dimension_of(chunk),
    };

    let mut pairs = Vec::new();
    for (i, j, sim) in candidates {
        for id in [ids[i].as_str(), ids[j].as_str()] {
            if !cache.contains_key(id) {
                let mut chunks = store.policy_chunks(id, model)?;
                chunks.truncate(params.max_chunks);
                cache.insert(id, chunks);
            }
        }
        let (a, b) = (&cache[ids[i].as_str()], &cache[ids[j].as_str()]);
        if a.is_empty() || b.is_empty() {
            debug!(doc_a = %ids[i], doc_b = %ids[j], "pair skipped, no chunks");
            continue;
        }

        let top_chunks = top_chunk_matches(a, b, params.top_k)
            .into_iter()
            .map(|(ci, cj, s)| ChunkMatch {
                chunk_a: chunk_ref(&a[ci]),
                chunk_b: chunk_ref(&b[cj]),
                similarity: round4(s),
            })
            .collect();

        pairs.push(PolicyPair {
            doc_a: ids[i].clone(),
            doc_b: ids[j].clone(),
            similarity: round4(sim),
            top_chunks,
        });
    }

    Ok(pairs)
}
