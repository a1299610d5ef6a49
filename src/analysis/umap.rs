//! UMAP over a precomputed distance matrix.
//!
//! Small-corpus rendition: the fuzzy graph is kept dense and the layout is
//! optimized with per-edge epoch scheduling and negative sampling.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::AnalysisError;

const SIGMA_STEPS: usize = 64;
const SIGMA_TOL: f64 = 1e-5;
const MIN_SCALE: f64 = 1e-3;
const GRAD_CLIP: f64 = 4.0;
const INIT_RANGE: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct UmapParams {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub epochs: usize,
    pub negative_samples: usize,
    pub seed: u64,
}

impl Default for UmapParams {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            min_dist: 0.3,
            spread: 1.0,
            epochs: 500,
            negative_samples: 5,
            seed: 42,
        }
    }
}

pub fn umap(distance: &Array2<f64>, params: &UmapParams) -> Result<Vec<[f64; 2]>, AnalysisError> {
    let (n, cols) = distance.dim();
    if n != cols {
        return Err(AnalysisError::NotSquare { rows: n, cols });
    }
    if n < 3 {
        return Err(AnalysisError::TooFewPoints { needed: 3, got: n });
    }

    let k = params.n_neighbors.clamp(2, n);
    let graph = fuzzy_graph(distance, k);
    let (a, b) = fit_ab(params.spread, params.min_dist);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut y: Vec<[f64; 2]> = (0..n)
        .map(|_| {
            [
                rng.gen_range(-INIT_RANGE..INIT_RANGE),
                rng.gen_range(-INIT_RANGE..INIT_RANGE),
            ]
        })
        .collect();

    let mut edges = Vec::new();
    for i in 0..n {
        for j in 0..n {
            if i != j && graph[[i, j]] > 0.0 {
                edges.push((i, j, graph[[i, j]]));
            }
        }
    }
    let max_w = edges.iter().map(|e| e.2).fold(0.0f64, f64::max);
    let floor = max_w / params.epochs as f64;
    edges.retain(|e| e.2 >= floor);

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_w / e.2).collect();
    let mut next_sample = epochs_per_sample.clone();

    for epoch in 0..params.epochs {
        let alpha = 1.0 - epoch as f64 / params.epochs as f64;
        for (e, &(i, j, _)) in edges.iter().enumerate() {
            if next_sample[e] > (epoch + 1) as f64 {
                continue;
            }

            let diff = [y[i][0] - y[j][0], y[i][1] - y[j][1]];
            let d2 = diff[0] * diff[0] + diff[1] * diff[1];
            if d2 > 0.0 {
                let coeff = -2.0 * a * b * d2.powf(b - 1.0) / (1.0 + a * d2.powf(b));
                for d in 0..2 {
                    let g = clip(coeff * diff[d]) * alpha;
                    y[i][d] += g;
                    y[j][d] -= g;
                }
            }

            for _ in 0..params.negative_samples {
                let other = rng.gen_range(0..n);
                if other == i {
                    continue;
                }
                let diff = [y[i][0] - y[other][0], y[i][1] - y[other][1]];
                let d2 = diff[0] * diff[0] + diff[1] * diff[1];
                let coeff = if d2 > 0.0 {
                    2.0 * b / ((0.001 + d2) * (1.0 + a * d2.powf(b)))
                } else {
                    0.0
                };
                for d in 0..2 {
                    let g = if coeff > 0.0 { clip(coeff * diff[d]) } else { GRAD_CLIP };
                    y[i][d] += g * alpha;
                }
            }

            next_sample[e] += epochs_per_sample[e];
        }
    }

    Ok(y)
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRAD_CLIP, GRAD_CLIP)
}

/// Symmetric fuzzy simplicial set of the k-nearest-neighbour graph.
/// `k` counts the point itself, so each point links to `k - 1` others.
fn fuzzy_graph(distance: &Array2<f64>, k: usize) -> Array2<f64> {
    let n = distance.nrows();
    let target = (k as f64).log2();
    let mean_all = distance.sum() / (n * n) as f64;
    let mut p = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        let mut others: Vec<usize> = (0..n).filter(|&j| j != i).collect();
        others.sort_by(|&x, &y| distance[[i, x]].total_cmp(&distance[[i, y]]));
        others.truncate(k - 1);
        let dists: Vec<f64> = others.iter().map(|&j| distance[[i, j]]).collect();

        let rho = dists.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

        let (mut lo, mut hi, mut sigma) = (0.0f64, f64::INFINITY, 1.0f64);
        for _ in 0..SIGMA_STEPS {
            let sum: f64 = dists
                .iter()
                .map(|&d| {
                    let shifted = d - rho;
                    if shifted > 0.0 { (-shifted / sigma).exp() } else { 1.0 }
                })
                .sum();
            if (sum - target).abs() < SIGMA_TOL {
                break;
            }
            if sum > target {
                hi = sigma;
                sigma = (lo + hi) / 2.0;
            } else {
                lo = sigma;
                sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
            }
        }

        let mean_i = dists.iter().sum::<f64>() / dists.len() as f64;
        let floor = if rho > 0.0 { MIN_SCALE * mean_i } else { MIN_SCALE * mean_all };
        let sigma = sigma.max(floor);

        for (&j, &d) in others.iter().zip(&dists) {
            let shifted = d - rho;
            p[[i, j]] = if shifted <= 0.0 { 1.0 } else { (-shifted / sigma).exp() };
        }
    }

    let pt = p.t();
    let product = &p * &pt;
    &p + &pt - &product
}

/// Fit `1 / (1 + a d^(2b))` to the target curve for `min_dist`/`spread` by
/// least squares, using a grid search that narrows around the best cell.
pub fn fit_ab(spread: f64, min_dist: f64) -> (f64, f64) {
    const SAMPLES: usize = 300;
    const GRID: usize = 40;
    const ROUNDS: usize = 6;

    let xs: Vec<f64> = (0..SAMPLES)
        .map(|i| spread * 3.0 * i as f64 / (SAMPLES - 1) as f64)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();
    let loss = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (f - y) * (f - y)
            })
            .sum()
    };

    let (mut a_lo, mut a_hi) = (0.01f64, 10.0f64);
    let (mut b_lo, mut b_hi) = (0.1f64, 3.0f64);
    let mut best = (1.0, 1.0, f64::INFINITY);
    for _ in 0..ROUNDS {
        let a_step = (a_hi - a_lo) / GRID as f64;
        let b_step = (b_hi - b_lo) / GRID as f64;
        for ia in 0..=GRID {
            for ib in 0..=GRID {
                let a = a_lo + a_step * ia as f64;
                let b = b_lo + b_step * ib as f64;
                let l = loss(a, b);
                if l < best.2 {
                    best = (a, b, l);
                }
            }
        }
        a_lo = (best.0 - 2.0 * a_step).max(1e-4);
        a_hi = best.0 + 2.0 * a_step;
        b_lo = (best.1 - 2.0 * b_step).max(1e-4);
        b_hi = best.1 + 2.0 * b_step;
    }
    (best.0, best.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_groups() -> Array2<f64> {
        Array2::from_shape_fn((10, 10), |(i, j)| {
            if i == j {
                0.0
            } else if (i < 5) == (j < 5) {
                0.05 + 0.01 * ((i + j) % 3) as f64
            } else {
                0.9
            }
        })
    }

    fn mean_distance(points: &[[f64; 2]], pairs: impl Iterator<Item = (usize, usize)>) -> f64 {
        let d: Vec<f64> = pairs
            .map(|(i, j)| ((points[i][0] - points[j][0]).powi(2) + (points[i][1] - points[j][1]).powi(2)).sqrt())
            .collect();
        d.iter().sum::<f64>() / d.len() as f64
    }

    #[test]
    fn curve_fit_matches_reference_values() {
        // umap-learn reports a=1.577, b=0.895 for min_dist=0.1, spread=1
        let (a, b) = fit_ab(1.0, 0.1);
        assert!((a - 1.577).abs() < 0.05, "a = {a}");
        assert!((b - 0.895).abs() < 0.02, "b = {b}");
    }

    #[test]
    fn graph_is_symmetric_fuzzy_set() {
        let g = fuzzy_graph(&two_groups(), 4);
        for i in 0..10 {
            for j in 0..10 {
                assert!((g[[i, j]] - g[[j, i]]).abs() < 1e-12);
                assert!((0.0..=1.0).contains(&g[[i, j]]));
            }
        }
        assert!(g[[0, 1]] > 0.0);
        assert_eq!(g[[0, 7]], 0.0);
    }

    #[test]
    fn neighbour_count_includes_the_point_itself() {
        let line = Array2::from_shape_fn((6, 6), |(i, j)| i.abs_diff(j) as f64);
        let g = fuzzy_graph(&line, 2);
        for i in 0..5 {
            assert_eq!(g[[i, i + 1]], 1.0);
        }
        for i in 0..4 {
            assert_eq!(g[[i, i + 2]], 0.0);
        }
    }

    #[test]
    fn layout_is_deterministic_and_separates_groups() {
        let params = UmapParams {
            n_neighbors: 4,
            ..Default::default()
        };
        let a = umap(&two_groups(), &params).unwrap();
        let b = umap(&two_groups(), &params).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);

        let all = (0..10).flat_map(|i| ((i + 1)..10).map(move |j| (i, j)));
        let intra = mean_distance(&a, all.clone().filter(|(i, j)| (*i < 5) == (*j < 5)));
        let inter = mean_distance(&a, all.filter(|(i, j)| (*i < 5) != (*j < 5)));
        assert!(intra < inter, "intra {intra} inter {inter}");
    }

    #[test]
    fn neighbours_clamped_for_tiny_inputs() {
        let d = Array2::from_shape_fn((3, 3), |(i, j)| if i == j { 0.0 } else { 0.5 });
        let coords = umap(&d, &UmapParams::default()).unwrap();
        assert_eq!(coords.len(), 3);
        assert!(coords.iter().all(|p| p[0].is_finite() && p[1].is_finite()));
    }

    #[test]
    fn rejects_two_points() {
        let d = Array2::<f64>::zeros((2, 2));
        assert_eq!(
            umap(&d, &UmapParams::default()),
            Err(AnalysisError::TooFewPoints { needed: 3, got: 2 })
        );
    }
}
