pub mod chunk_pairs;
pub mod cluster;
pub mod derived;
pub mod similarity;
pub mod tsne;
pub mod umap;

use anyhow::{Context, Result, bail};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::corpus::Metadata;
use crate::embed::Embedder;
use crate::store::sqlite::Store;
use cluster::{ClusterValidation, Clustering};
use derived::{Correlations, Dendrogram, NetworkEdge};
use similarity::DimensionScores;

/// Everything computed over the corpus in one `analyze` pass.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub model: String,
    /// Policies that made it into the matrix, in row order
    pub ids: Vec<String>,
    pub similarity: Array2<f64>,
    pub dimension_scores: DimensionScores,
    pub dimension_vectors: Vec<Vec<f64>>,
    pub clustering: Clustering,
    pub validation: BTreeMap<u32, ClusterValidation>,
    pub tsne: Option<Vec<[f64; 2]>>,
    pub umap: Option<Vec<[f64; 2]>>,
    pub dendrogram: Dendrogram,
    pub correlations: Correlations,
    pub network_edges: Vec<NetworkEdge>,
}

/// Metadata policies that have a processed text file.
pub fn candidate_ids(root: &Path, config: &Config, metadata: &Metadata) -> Vec<String> {
    metadata
        .ids()
        .into_iter()
        .filter(|id| config.processed_path(root, id).exists())
        .collect()
}

pub fn analyze(
    root: &Path,
    config: &Config,
    metadata: &Metadata,
    store: &Store,
    embedder: &dyn Embedder,
) -> Result<Analysis> {
    let model = embedder.model_name().to_string();
    let candidates = candidate_ids(root, config, metadata);
    if candidates.len() < 2 {
        bail!(
            "need at least 2 policies with processed text, found {}",
            candidates.len()
        );
    }

    let vectors = similarity::policy_vectors(store, &candidates, &model)?;
    if vectors.len() < 2 {
        bail!(
            "need at least 2 policies with embeddings under {model}, found {} (run ingest first)",
            vectors.len()
        );
    }
    let n = vectors.len();
    info!(policies = n, "computing similarity matrix");
    let sim = similarity::similarity_matrix(&vectors.vectors);

    let dimension_vectors = similarity::dimension_vectors(embedder, &config.dimensions)?;
    let scores = similarity::dimension_scores(&vectors, &config.dimensions, &dimension_vectors);
    info!(dimensions = config.dimensions.len(), "dimension scores computed");

    let ac = &config.analysis;
    let clustering = cluster::hierarchical_clustering(&sim, &vectors.ids, ac.cluster_threshold)
        .context("hierarchical clustering")?;
    let validation = cluster::validate_clusters(&clustering.groups, &config.countries);
    for (label, members) in &clustering.groups {
        let coherent = validation.get(label).is_some_and(|v| v.region_coherence);
        info!(
            cluster = label,
            members = %members.join(", "),
            coherent,
            "cluster"
        );
    }

    let distance = cluster::distance_from_similarity(&sim)?;

    let tsne = if n >= ac.tsne_min_points {
        let params = tsne::TsneParams {
            perplexity: ac.tsne_perplexity,
            seed: ac.seed,
            ..Default::default()
        };
        Some(tsne::tsne(&distance, &params)?)
    } else {
        warn!(policies = n, min = ac.tsne_min_points, "too few policies for t-SNE");
        None
    };

    let umap = if n >= 3 {
        let params = umap::UmapParams {
            n_neighbors: ac.umap_neighbors,
            min_dist: ac.umap_min_dist,
            seed: ac.seed,
            ..Default::default()
        };
        Some(umap::umap(&distance, &params)?)
    } else {
        warn!(policies = n, "too few policies for UMAP");
        None
    };

    let dendrogram = derived::dendrogram(&clustering.linkage, &vectors.ids);
    let correlations = derived::dimension_correlations(&scores, &config.dimensions);
    let network_edges = derived::network_edges(&sim, &vectors.ids, ac.network_threshold);
    info!(edges = network_edges.len(), "network edges");

    Ok(Analysis {
        model,
        ids: vectors.ids,
        similarity: sim,
        dimension_scores: scores,
        dimension_vectors,
        clustering,
        validation,
        tsne,
        umap,
        dendrogram,
        correlations,
        network_edges,
    })
}
