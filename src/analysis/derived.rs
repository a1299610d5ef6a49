//! Visualization artifacts derived from the core analysis results.

use ndarray::Array2;
use serde::Serialize;
use std::collections::BTreeMap;

use super::cluster::{ClusterGroups, LinkageRow};
use super::similarity::DimensionScores;
use crate::config::Dimension;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Dendrogram {
    pub linkage_matrix: Vec<LinkageRow>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Correlations {
    /// `None` where a dimension has no variance across policies
    pub matrix: Vec<Vec<Option<f64>>>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SankeyNode {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SankeyLink {
    pub source: String,
    pub target: String,
    pub value: usize,
    /// Display names of the policies flowing along this link
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Sankey {
    pub nodes: Vec<SankeyNode>,
    pub links: Vec<SankeyLink>,
}

/// What the Sankey needs to know about a policy.
#[derive(Debug, Clone)]
pub struct FlowPolicy<'a> {
    pub id: &'a str,
    pub region: &'a str,
    pub display_name: &'a str,
}

pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

pub fn dendrogram(linkage: &[LinkageRow], ids: &[String]) -> Dendrogram {
    Dendrogram {
        linkage_matrix: linkage.to_vec(),
        labels: ids.to_vec(),
    }
}

/// Pearson correlation between every pair of dimensions across policies.
pub fn dimension_correlations(scores: &DimensionScores, dimensions: &[Dimension]) -> Correlations {
    let columns: Vec<Vec<f64>> = dimensions
        .iter()
        .map(|dim| {
            scores
                .values()
                .map(|row| row.get(&dim.key).copied().unwrap_or(0.0))
                .collect()
        })
        .collect();

    let matrix = columns
        .iter()
        .map(|a| columns.iter().map(|b| pearson(a, b).map(round4)).collect())
        .collect();

    Correlations {
        matrix,
        labels: dimensions.iter().map(|d| d.label.clone()).collect(),
    }
}

fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n == 0 || n != b.len() {
        return None;
    }
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some((cov / denom).clamp(-1.0, 1.0))
}

/// Policy pairs whose similarity reaches `threshold`, strongest first.
pub fn network_edges(similarity: &Array2<f64>, ids: &[String], threshold: f64) -> Vec<NetworkEdge> {
    let n = ids.len().min(similarity.nrows());
    let mut edges = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let w = similarity[[i, j]];
            if w >= threshold {
                edges.push(NetworkEdge {
                    source: ids[i].clone(),
                    target: ids[j].clone(),
                    weight: round4(w),
                });
            }
        }
    }
    edges.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    edges
}

/// Region -> cluster flows. Nodes are the regions in use (sorted), then the
/// clusters (by label); link order follows the policy order.
pub fn sankey(
    policies: &[FlowPolicy<'_>],
    clusters: &ClusterGroups,
    region_names: &BTreeMap<String, String>,
) -> Sankey {
    let cluster_of: BTreeMap<&str, u32> = clusters
        .iter()
        .flat_map(|(label, members)| members.iter().map(move |m| (m.as_str(), *label)))
        .collect();

    let mut regions: Vec<&str> = policies.iter().map(|p| p.region).collect();
    regions.sort_unstable();
    regions.dedup();

    let mut nodes: Vec<SankeyNode> = regions
        .iter()
        .map(|r| SankeyNode {
            id: r.to_string(),
            label: region_names.get(*r).cloned().unwrap_or_else(|| r.to_string()),
        })
        .collect();
    nodes.extend(clusters.keys().map(|c| SankeyNode {
        id: format!("cluster_{c}"),
        label: format!("Cluster {c}"),
    }));

    let mut links: Vec<SankeyLink> = Vec::new();
    for policy in policies {
        let Some(cluster) = cluster_of.get(policy.id) else {
            continue;
        };
        let target = format!("cluster_{cluster}");
        match links
            .iter_mut()
            .find(|l| l.source == policy.region && l.target == target)
        {
            Some(link) => {
                link.value += 1;
                link.policies.push(policy.display_name.to_string());
            }
            None => links.push(SankeyLink {
                source: policy.region.to_string(),
                target,
                value: 1,
                policies: vec![policy.display_name.to_string()],
            }),
        }
    }

    Sankey { nodes, links }
}
