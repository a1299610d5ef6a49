//! Agglomerative (Ward) clustering over a precomputed distance matrix.

use ndarray::Array2;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Country;
use crate::error::AnalysisError;

/// One merge step: `[a, b, height, size]`.
///
/// Leaves are numbered `0..n`; the cluster created at step `k` is `n + k`.
/// `a < b` always holds.
pub type LinkageRow = [f64; 4];

/// Flat cluster label (1-based) -> member policy ids.
pub type ClusterGroups = BTreeMap<u32, Vec<String>>;

#[derive(Debug, Clone)]
pub struct Clustering {
    pub groups: ClusterGroups,
    /// Label per input position, aligned with the ids passed in
    pub labels: Vec<u32>,
    pub linkage: Vec<LinkageRow>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClusterValidation {
    pub members: Vec<String>,
    pub regions: Vec<String>,
    pub region_coherence: bool,
}

/// `1 - similarity`, zero diagonal, symmetrized, clamped at zero.
pub fn distance_from_similarity(similarity: &Array2<f64>) -> Result<Array2<f64>, AnalysisError> {
    let (rows, cols) = similarity.dim();
    if rows != cols {
        return Err(AnalysisError::NotSquare { rows, cols });
    }
    let mut dist = Array2::<f64>::zeros((rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            if i != j {
                let d = 1.0 - (similarity[[i, j]] + similarity[[j, i]]) / 2.0;
                dist[[i, j]] = d.max(0.0);
            }
        }
    }
    Ok(dist)
}

/// Ward linkage using the Lance-Williams recurrence.
///
/// Merges are emitted in non-decreasing height order. Ties go to the pair
/// found first in row-major order.
pub fn ward_linkage(distance: &Array2<f64>) -> Result<Vec<LinkageRow>, AnalysisError> {
    let (n, cols) = distance.dim();
    if n != cols {
        return Err(AnalysisError::NotSquare { rows: n, cols });
    }
    if n == 0 {
        return Err(AnalysisError::EmptyInput);
    }

    let mut d = distance.clone();
    let mut active = vec![true; n];
    let mut size = vec![1usize; n];
    let mut label: Vec<usize> = (0..n).collect();
    let mut linkage = Vec::with_capacity(n - 1);

    for step in 0..n - 1 {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..n {
            if !active[i] {
                continue;
            }
            for j in (i + 1)..n {
                if !active[j] {
                    continue;
                }
                if best.is_none_or(|(_, _, h)| d[[i, j]] < h) {
                    best = Some((i, j, d[[i, j]]));
                }
            }
        }
        let Some((i, j, height)) = best else { break };

        let (ni, nj) = (size[i] as f64, size[j] as f64);
        for k in 0..n {
            if !active[k] || k == i || k == j {
                continue;
            }
            let nk = size[k] as f64;
            let dki = d[[k, i]];
            let dkj = d[[k, j]];
            let updated = ((ni + nk) * dki * dki + (nj + nk) * dkj * dkj - nk * height * height)
                / (ni + nj + nk);
            let updated = updated.max(0.0).sqrt();
            d[[k, i]] = updated;
            d[[i, k]] = updated;
        }

        let (a, b) = (label[i].min(label[j]), label[i].max(label[j]));
        linkage.push([a as f64, b as f64, height, (size[i] + size[j]) as f64]);

        active[j] = false;
        size[i] += size[j];
        label[i] = n + step;
    }

    Ok(linkage)
}

/// Flat clusters from a linkage: every merge at or below `threshold` is joined.
/// Labels are 1-based and numbered by the lowest leaf index in each cluster.
pub fn cut_tree(linkage: &[LinkageRow], n: usize, threshold: f64) -> Vec<u32> {
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    // Representative leaf of every cluster id (leaves and merges alike).
    let mut leaf_of: Vec<usize> = (0..n).collect();
    for row in linkage {
        let (a, b, height) = (row[0] as usize, row[1] as usize, row[2]);
        let (la, lb) = (leaf_of[a], leaf_of[b]);
        if height <= threshold {
            let (ra, rb) = (find(&mut parent, la), find(&mut parent, lb));
            if ra != rb {
                parent[rb.max(ra)] = rb.min(ra);
            }
        }
        leaf_of.push(la);
    }

    let mut labels = vec![0u32; n];
    let mut assigned: BTreeMap<usize, u32> = BTreeMap::new();
    for (leaf, slot) in labels.iter_mut().enumerate() {
        let root = find(&mut parent, leaf);
        let next = assigned.len() as u32 + 1;
        *slot = *assigned.entry(root).or_insert(next);
    }
    labels
}

/// Ward clustering of a similarity matrix, cut at a distance threshold.
pub fn hierarchical_clustering(
    similarity: &Array2<f64>,
    ids: &[String],
    threshold: f64,
) -> Result<Clustering, AnalysisError> {
    if similarity.nrows() != ids.len() {
        return Err(AnalysisError::DimensionMismatch {
            expected: ids.len(),
            got: similarity.nrows(),
        });
    }
    let distance = distance_from_similarity(similarity)?;
    let linkage = ward_linkage(&distance)?;
    let labels = cut_tree(&linkage, ids.len(), threshold);

    let mut groups = ClusterGroups::new();
    for (id, label) in ids.iter().zip(&labels) {
        groups.entry(*label).or_default().push(id.clone());
    }

    Ok(Clustering {
        groups,
        labels,
        linkage,
    })
}

/// Country key a policy id belongs to: the longest key that is the id itself
/// or a `<key>_` prefix of it.
pub fn country_of<'a>(policy_id: &str, countries: &'a BTreeMap<String, Country>) -> Option<&'a str> {
    countries
        .keys()
        .filter(|key| {
            policy_id == key.as_str()
                || policy_id
                    .strip_prefix(key.as_str())
                    .is_some_and(|rest| rest.starts_with('_'))
        })
        .max_by_key(|key| key.len())
        .map(String::as_str)
}

/// Compare clusters against the known geopolitical grouping of their members.
pub fn validate_clusters(
    groups: &ClusterGroups,
    countries: &BTreeMap<String, Country>,
) -> BTreeMap<u32, ClusterValidation> {
    groups
        .iter()
        .map(|(label, members)| {
            let regions: Vec<String> = members
                .iter()
                .filter_map(|pid| country_of(pid, countries))
                .filter_map(|key| countries.get(key))
                .map(|c| c.region.clone())
                .collect();
            let region_coherence = match regions.first() {
                Some(first) => regions.iter().all(|r| r == first),
                None => false,
            };
            (
                *label,
                ClusterValidation {
                    members: members.clone(),
                    regions,
                    region_coherence,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn distance_is_zero_diagonal_and_clamped() {
        let sim = array![[1.0, 0.8, 1.2], [0.6, 1.0, 0.1], [1.2, 0.1, 1.0]];
        let d = distance_from_similarity(&sim).unwrap();
        assert_eq!(d[[0, 0]], 0.0);
        assert!((d[[0, 1]] - 0.3).abs() < 1e-12);
        assert!((d[[1, 0]] - 0.3).abs() < 1e-12);
        assert_eq!(d[[0, 2]], 0.0);
    }

    #[test]
    fn ward_matches_hand_computation() {
        // Points on a line at 0, 1, 5: d(0,1)=1, d(0,2)=5, d(1,2)=4
        let d = array![[0.0, 1.0, 5.0], [1.0, 0.0, 4.0], [5.0, 4.0, 0.0]];
        let z = ward_linkage(&d).unwrap();
        assert_eq!(z.len(), 2);
        assert_eq!(z[0], [0.0, 1.0, 1.0, 2.0]);
        // Lance-Williams: sqrt((2*25 + 2*16 - 1*1) / 3) = sqrt(27)
        assert_eq!(z[1][0], 2.0);
        assert_eq!(z[1][1], 3.0);
        assert!((z[1][2] - 27f64.sqrt()).abs() < 1e-12);
        assert_eq!(z[1][3], 3.0);
    }

    #[test]
    fn heights_never_decrease() {
        let d = array![
            [0.0, 0.2, 0.9, 0.8, 0.7],
            [0.2, 0.0, 0.85, 0.75, 0.9],
            [0.9, 0.85, 0.0, 0.1, 0.6],
            [0.8, 0.75, 0.1, 0.0, 0.65],
            [0.7, 0.9, 0.6, 0.65, 0.0]
        ];
        let z = ward_linkage(&d).unwrap();
        assert_eq!(z.len(), 4);
        for w in z.windows(2) {
            assert!(w[0][2] <= w[1][2]);
        }
        assert_eq!(z[3][3], 5.0);
    }

    #[test]
    fn cut_groups_close_pairs() {
        let sim = array![
            [1.0, 0.95, 0.1, 0.2],
            [0.95, 1.0, 0.15, 0.1],
            [0.1, 0.15, 1.0, 0.9],
            [0.2, 0.1, 0.9, 1.0]
        ];
        let names = ids(&["chile_a", "colombia_b", "japon_c", "corea_d"]);
        let c = hierarchical_clustering(&sim, &names, 0.5).unwrap();
        assert_eq!(c.labels, vec![1, 1, 2, 2]);
        assert_eq!(c.groups[&1], ids(&["chile_a", "colombia_b"]));
        assert_eq!(c.groups[&2], ids(&["japon_c", "corea_d"]));

        let all = hierarchical_clustering(&sim, &names, 10.0).unwrap();
        assert_eq!(all.groups.len(), 1);
        let none = hierarchical_clustering(&sim, &names, 0.0).unwrap();
        assert_eq!(none.labels, vec![1, 2, 3, 4]);
    }

    #[test]
    fn merge_at_exactly_the_threshold_is_joined() {
        let linkage: Vec<LinkageRow> = vec![[0.0, 1.0, 0.5, 2.0], [2.0, 3.0, 1.0, 2.0], [4.0, 5.0, 2.0, 4.0]];
        assert_eq!(cut_tree(&linkage, 4, 1.0), vec![1, 1, 2, 2]);
        assert_eq!(cut_tree(&linkage, 4, 0.999), vec![1, 1, 2, 3]);
        assert_eq!(cut_tree(&linkage, 4, 0.5), vec![1, 1, 2, 3]);
        assert_eq!(cut_tree(&linkage, 4, 2.0), vec![1, 1, 1, 1]);
        assert_eq!(cut_tree(&linkage, 4, 0.0), vec![1, 2, 3, 4]);
    }

    #[test]
    fn single_document_is_one_cluster() {
        let sim = array![[1.0]];
        let c = hierarchical_clustering(&sim, &ids(&["eu_ai_act"]), 0.5).unwrap();
        assert!(c.linkage.is_empty());
        assert_eq!(c.labels, vec![1]);
    }

    #[test]
    fn country_prefix_prefers_longest_key() {
        let mut countries = BTreeMap::new();
        for (key, region) in [("eu", "europa"), ("eeuu", "americas"), ("banco_mundial", "internacional")] {
            countries.insert(
                key.to_string(),
                Country {
                    name: key.into(),
                    region: region.into(),
                },
            );
        }
        assert_eq!(country_of("eeuu_executive_order", &countries), Some("eeuu"));
        assert_eq!(country_of("eu_ai_act", &countries), Some("eu"));
        assert_eq!(country_of("banco_mundial_2020", &countries), Some("banco_mundial"));
        assert_eq!(country_of("europe_x", &countries), None);

        let mut groups = ClusterGroups::new();
        groups.insert(1, ids(&["eu_ai_act", "eeuu_eo"]));
        groups.insert(2, ids(&["eu_deap"]));
        groups.insert(3, ids(&["mars_plan"]));
        let v = validate_clusters(&groups, &countries);
        assert!(!v[&1].region_coherence);
        assert!(v[&2].region_coherence);
        assert!(!v[&3].region_coherence);
        assert!(v[&3].regions.is_empty());
    }
}
