//! JSON artifacts consumed by the web visualizations.

use anyhow::{Context, Result, bail};
use ndarray::Array2;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analysis::Analysis;
use crate::analysis::chunk_pairs::PolicyPair;
use crate::analysis::cluster::{ClusterGroups, ClusterValidation};
use crate::analysis::derived::{self, Correlations, Dendrogram, FlowPolicy, NetworkEdge, Sankey};
use crate::analysis::similarity::DimensionScores;
use crate::config::Config;
use crate::corpus::{Metadata, PolicyMeta};

pub const RESULTS_FILE: &str = "results.json";
pub const CHUNK_PAIRS_FILE: &str = "chunk_pairs.json";

const SHORT_TITLE_CHARS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct PolicyEntry {
    pub id: String,
    pub country_id: String,
    /// Display name, disambiguated when a country has several policies
    pub country: String,
    pub region: String,
    pub region_color: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsMetadata {
    pub generated_at: String,
    pub embedding_model: String,
    pub num_policies: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Results {
    pub policies: Vec<PolicyEntry>,
    pub similarity_matrix: Vec<Vec<f64>>,
    pub policy_ids: Vec<String>,
    pub dimension_scores: DimensionScores,
    #[serde(serialize_with = "ordered_map")]
    pub dimension_labels: Vec<(String, String)>,
    pub clusters: ClusterGroups,
    pub cluster_validation: BTreeMap<u32, ClusterValidation>,
    pub region_colors: BTreeMap<String, String>,
    pub metadata: ResultsMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsne: Option<Vec<[f64; 2]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub umap: Option<Vec<[f64; 2]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dendrogram: Option<Dendrogram>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension_correlations: Option<Correlations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_edges: Option<Vec<NetworkEdge>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sankey: Option<Sankey>,
}

/// Keeps configured dimension order in the JSON object.
fn ordered_map<S: Serializer>(pairs: &[(String, String)], s: S) -> Result<S::Ok, S::Error> {
    s.collect_map(pairs.iter().map(|(k, v)| (k, v)))
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkPairsMetadata {
    pub threshold: f64,
    pub top_k: usize,
    pub num_pairs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkPairsFile {
    pub pairs: Vec<PolicyPair>,
    pub metadata: ChunkPairsMetadata,
}

/// The part of results.json that later passes read back.
#[derive(Debug, Deserialize)]
struct MatrixView {
    policy_ids: Vec<String>,
    similarity_matrix: Vec<Vec<f64>>,
}

/// Country key of a policy: its metadata `country`, else the id up to the first `_`.
pub fn country_id<'a>(policy_id: &'a str, meta: Option<&'a PolicyMeta>) -> &'a str {
    match meta {
        Some(m) if !m.country.is_empty() => &m.country,
        _ => policy_id.split('_').next().unwrap_or(policy_id),
    }
}

/// Title up to the first em dash or colon, trimmed, at most 20 characters.
pub fn short_title(title: &str) -> String {
    let head = title.split('—').next().unwrap_or(title);
    let head = head.split(':').next().unwrap_or(head);
    head.trim().chars().take(SHORT_TITLE_CHARS).collect()
}

/// Policy list for the export, in `ids` order.
pub fn policy_entries(ids: &[String], metadata: &Metadata, config: &Config) -> Vec<PolicyEntry> {
    let mut per_country: BTreeMap<&str, usize> = BTreeMap::new();
    for id in ids {
        *per_country.entry(country_id(id, metadata.get(id))).or_default() += 1;
    }

    ids.iter()
        .map(|id| {
            let meta = metadata.get(id);
            let cid = country_id(id, meta);
            let country = config.countries.get(cid);
            let mut display = country.map_or_else(|| cid.to_string(), |c| c.name.clone());
            if per_country.get(cid).copied().unwrap_or(1) > 1 {
                let title = meta.and_then(|m| m.title.as_deref()).unwrap_or(id);
                display = format!("{display} ({})", short_title(title));
            }
            let region = country.map(|c| c.region.clone()).unwrap_or_default();

            PolicyEntry {
                id: id.clone(),
                country_id: cid.to_string(),
                country: display,
                region_color: config.region_color(&region).to_string(),
                region,
                extra: meta.map(extra_fields).unwrap_or_default(),
            }
        })
        .collect()
}

fn extra_fields(meta: &PolicyMeta) -> serde_json::Map<String, serde_json::Value> {
    let mut out = meta.extra.clone();
    if let Some(year) = meta.year {
        out.insert("year".into(), year.into());
    }
    if let Some(language) = &meta.language {
        out.insert("language".into(), language.clone().into());
    }
    if let Some(title) = &meta.title {
        out.insert("title".into(), title.clone().into());
    }
    out
}

pub fn build_results(analysis: &Analysis, metadata: &Metadata, config: &Config) -> Results {
    let policies = policy_entries(&analysis.ids, metadata, config);
    let flows: Vec<FlowPolicy<'_>> = policies
        .iter()
        .map(|p| FlowPolicy {
            id: &p.id,
            region: &p.region,
            display_name: &p.country,
        })
        .collect();
    let sankey = derived::sankey(&flows, &analysis.clustering.groups, &config.region_names);

    Results {
        similarity_matrix: analysis.similarity.outer_iter().map(|row| row.to_vec()).collect(),
        policy_ids: analysis.ids.clone(),
        dimension_scores: analysis.dimension_scores.clone(),
        dimension_labels: config
            .dimensions
            .iter()
            .map(|d| (d.key.clone(), d.label.clone()))
            .collect(),
        clusters: analysis.clustering.groups.clone(),
        cluster_validation: analysis.validation.clone(),
        region_colors: config.region_colors.clone(),
        metadata: ResultsMetadata {
            generated_at: chrono::Utc::now().to_rfc3339(),
            embedding_model: analysis.model.clone(),
            num_policies: analysis.ids.len(),
        },
        tsne: analysis.tsne.clone(),
        umap: analysis.umap.clone(),
        dendrogram: Some(analysis.dendrogram.clone()),
        dimension_correlations: Some(analysis.correlations.clone()),
        network_edges: Some(analysis.network_edges.clone()),
        sankey: Some(sankey),
        policies,
    }
}

fn write_json<T: Serialize>(output_dir: &Path, file: &str, value: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output dir {}", output_dir.display()))?;
    let path = output_dir.join(file);
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "exported");
    Ok(path)
}

pub fn write_results(output_dir: &Path, results: &Results) -> Result<PathBuf> {
    write_json(output_dir, RESULTS_FILE, results)
}

pub fn write_chunk_pairs(
    output_dir: &Path,
    pairs: Vec<PolicyPair>,
    threshold: f64,
    top_k: usize,
) -> Result<PathBuf> {
    let file = ChunkPairsFile {
        metadata: ChunkPairsMetadata {
            threshold,
            top_k,
            num_pairs: pairs.len(),
        },
        pairs,
    };
    write_json(output_dir, CHUNK_PAIRS_FILE, &file)
}

/// Policy ids and similarity matrix from a previously written results.json.
pub fn read_similarity(output_dir: &Path) -> Result<(Vec<String>, Array2<f64>)> {
    let path = output_dir.join(RESULTS_FILE);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {} (run analyze first)", path.display()))?;
    let view: MatrixView =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let n = view.policy_ids.len();
    if view.similarity_matrix.len() != n || view.similarity_matrix.iter().any(|r| r.len() != n) {
        bail!("{}: similarity matrix is not {n}x{n}", path.display());
    }
    let flat: Vec<f64> = view.similarity_matrix.into_iter().flatten().collect();
    let matrix = Array2::from_shape_vec((n, n), flat)?;
    Ok((view.policy_ids, matrix))
}
