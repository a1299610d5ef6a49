//! Exact t-SNE over a precomputed distance matrix.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::AnalysisError;

const EARLY_EXAGGERATION: f64 = 12.0;
const MIN_GAIN: f64 = 0.01;
const PERPLEXITY_TOL: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;

#[derive(Debug, Clone)]
pub struct TsneParams {
    pub perplexity: f64,
    pub iterations: usize,
    pub exaggeration_iterations: usize,
    pub seed: u64,
}

impl Default for TsneParams {
    fn default() -> Self {
        Self {
            perplexity: 5.0,
            iterations: 1000,
            exaggeration_iterations: 250,
            seed: 42,
        }
    }
}

/// Embed `n` points into 2D. Perplexity is clamped to `n - 1`.
pub fn tsne(distance: &Array2<f64>, params: &TsneParams) -> Result<Vec<[f64; 2]>, AnalysisError> {
    let (n, cols) = distance.dim();
    if n != cols {
        return Err(AnalysisError::NotSquare { rows: n, cols });
    }
    if n < 2 {
        return Err(AnalysisError::TooFewPoints { needed: 2, got: n });
    }

    let perplexity = params.perplexity.min((n - 1) as f64).max(1.0);
    let p = joint_probabilities(distance, perplexity);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut y: Vec<[f64; 2]> = (0..n)
        .map(|_| [1e-4 * standard_normal(&mut rng), 1e-4 * standard_normal(&mut rng)])
        .collect();
    let mut update = vec![[0.0f64; 2]; n];
    let mut gains = vec![[1.0f64; 2]; n];
    let learning_rate = (n as f64 / EARLY_EXAGGERATION / 4.0).max(50.0);

    let mut num = Array2::<f64>::zeros((n, n));
    for iter in 0..params.iterations {
        let early = iter < params.exaggeration_iterations;
        let exaggeration = if early { EARLY_EXAGGERATION } else { 1.0 };
        let momentum = if early { 0.5 } else { 0.8 };

        // Student-t kernel
        let mut sum_num = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let dx = y[i][0] - y[j][0];
                let dy = y[i][1] - y[j][1];
                let q = 1.0 / (1.0 + dx * dx + dy * dy);
                num[[i, j]] = q;
                num[[j, i]] = q;
                sum_num += 2.0 * q;
            }
        }
        let sum_num = sum_num.max(f64::MIN_POSITIVE);

        for i in 0..n {
            let mut grad = [0.0f64; 2];
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = num[[i, j]] / sum_num;
                let mult = (exaggeration * p[[i, j]] - q) * num[[i, j]];
                grad[0] += 4.0 * mult * (y[i][0] - y[j][0]);
                grad[1] += 4.0 * mult * (y[i][1] - y[j][1]);
            }
            for d in 0..2 {
                let same_sign = (grad[d] > 0.0) == (update[i][d] > 0.0);
                gains[i][d] = if same_sign { gains[i][d] * 0.8 } else { gains[i][d] + 0.2 };
                gains[i][d] = gains[i][d].max(MIN_GAIN);
                update[i][d] = momentum * update[i][d] - learning_rate * gains[i][d] * grad[d];
            }
        }
        for (point, step) in y.iter_mut().zip(&update) {
            point[0] += step[0];
            point[1] += step[1];
        }
    }

    Ok(y)
}

/// Symmetrized, normalized affinities. Each row's Gaussian precision is
/// found by bisection so that its entropy matches `ln(perplexity)`.
fn joint_probabilities(distance: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = distance.nrows();
    let target = perplexity.ln();
    let mut p = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        let mut beta = 1.0f64;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;
        let mut row = vec![0.0f64; n];

        for _ in 0..PERPLEXITY_STEPS {
            let mut sum = 0.0;
            for j in 0..n {
                row[j] = if i == j { 0.0 } else { (-distance[[i, j]] * beta).exp() };
                sum += row[j];
            }
            let sum = if sum == 0.0 { 1e-8 } else { sum };
            let mut weighted = 0.0;
            for j in 0..n {
                row[j] /= sum;
                weighted += distance[[i, j]] * row[j];
            }
            let entropy = sum.ln() + beta * weighted;
            let diff = entropy - target;
            if diff.abs() <= PERPLEXITY_TOL {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
            } else {
                beta_max = beta;
                beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
            }
        }

        for j in 0..n {
            p[[i, j]] = row[j];
        }
    }

    let sym = &p + &p.t();
    let total = sym.sum().max(f64::MIN_POSITIVE);
    sym.mapv(|v| (v / total).max(f64::MIN_POSITIVE))
}

/// Box-Muller sample from N(0, 1).
pub(crate) fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight groups of four, far apart from each other.
    fn two_groups() -> Array2<f64> {
        Array2::from_shape_fn((8, 8), |(i, j)| {
            if i == j {
                0.0
            } else if (i < 4) == (j < 4) {
                0.05
            } else {
                1.0
            }
        })
    }

    fn dist(a: [f64; 2], b: [f64; 2]) -> f64 {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
    }

    #[test]
    fn output_has_one_point_per_input() {
        let coords = tsne(&two_groups(), &TsneParams::default()).unwrap();
        assert_eq!(coords.len(), 8);
        assert!(coords.iter().all(|p| p[0].is_finite() && p[1].is_finite()));
    }

    #[test]
    fn same_seed_same_layout() {
        let params = TsneParams {
            iterations: 300,
            ..Default::default()
        };
        let a = tsne(&two_groups(), &params).unwrap();
        let b = tsne(&two_groups(), &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn groups_stay_apart() {
        let coords = tsne(&two_groups(), &TsneParams::default()).unwrap();
        let mut intra = Vec::new();
        let mut inter = Vec::new();
        for i in 0..8 {
            for j in (i + 1)..8 {
                let d = dist(coords[i], coords[j]);
                if (i < 4) == (j < 4) { intra.push(d) } else { inter.push(d) }
            }
        }
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        assert!(mean(&intra) < mean(&inter));
    }

    #[test]
    fn rejects_single_point() {
        let d = Array2::<f64>::zeros((1, 1));
        assert_eq!(
            tsne(&d, &TsneParams::default()),
            Err(AnalysisError::TooFewPoints { needed: 2, got: 1 })
        );
    }

    #[test]
    fn affinities_sum_to_one() {
        let p = joint_probabilities(&two_groups(), 3.0);
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert!(p[[0, 1]] > p[[0, 5]]);
    }
}
