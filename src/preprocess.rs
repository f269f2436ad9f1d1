//! Vector preprocessing ahead of density clustering.
//!
//! Embeddings are L2-normalized so Euclidean distance ranks pairs the same way
//! cosine distance does, then (for batches of 5+) projected onto their top
//! principal components to keep density estimates stable in high dimension.
//!
//! PCA is computed exactly with a cyclic Jacobi eigen-solver on whichever of
//! the covariance (d x d) or Gram (n x n) matrix is smaller, so results are
//! deterministic for a fixed input.

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::error::PipelineError;
use crate::similarity::l2_normalize;

/// Below this many items there are too few samples to fit a stable projection.
pub const MIN_ITEMS_FOR_REDUCTION: usize = 5;

/// Upper bound on projected dimensions.
pub const MAX_COMPONENTS: usize = 10;

const MAX_SWEEPS: usize = 64;
const CONVERGENCE_EPS: f64 = 1e-12;

/// Output of [`prepare`].
#[derive(Debug, Clone)]
pub struct PreparedVectors {
    /// Unit-length copies of the input, full dimension.
    pub normalized: Vec<Vec<f32>>,
    /// Vectors handed to the clusterer (reduced when `reduced` is true).
    pub projected: Vec<Vec<f32>>,
    pub reduced: bool,
}

/// Normalize and, for large enough batches, reduce a batch of embeddings.
pub fn prepare(vectors: &[Vec<f32>]) -> Result<PreparedVectors, PipelineError> {
    let n = vectors.len();
    if n == 0 {
        return Err(PipelineError::Preprocess("no vectors to preprocess".into()));
    }

    let d = vectors[0].len();
    if d == 0 {
        return Err(PipelineError::Preprocess("vectors have zero dimension".into()));
    }
    for (i, v) in vectors.iter().enumerate() {
        if v.len() != d {
            return Err(PipelineError::Preprocess(format!(
                "vector {} has dimension {}, expected {}",
                i,
                v.len(),
                d
            )));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(PipelineError::Preprocess(format!(
                "vector {} contains a non-finite value",
                i
            )));
        }
    }

    let normalized: Vec<Vec<f32>> = vectors.iter().map(|v| l2_normalize(v)).collect();

    if n < MIN_ITEMS_FOR_REDUCTION {
        debug!(items = n, "skipping dimensionality reduction");
        return Ok(PreparedVectors {
            projected: normalized.clone(),
            normalized,
            reduced: false,
        });
    }

    let k = MAX_COMPONENTS.min(d).min(n);
    let data = to_matrix(&normalized);
    let pca = Pca::fit(&data, k);
    let projected = from_matrix(&pca.transform(&data));
    debug!(items = n, from = d, to = k, "reduced embedding dimension");

    Ok(PreparedVectors {
        normalized,
        projected,
        reduced: true,
    })
}

fn to_matrix(vectors: &[Vec<f32>]) -> Array2<f64> {
    let n = vectors.len();
    let d = vectors.first().map(|v| v.len()).unwrap_or(0);
    Array2::from_shape_fn((n, d), |(i, j)| vectors[i][j] as f64)
}

fn from_matrix(m: &Array2<f64>) -> Vec<Vec<f32>> {
    m.outer_iter()
        .map(|row| row.iter().map(|&x| x as f32).collect())
        .collect()
}

/// Principal component projection fit on one batch.
#[derive(Debug, Clone)]
pub struct Pca {
    mean: Array1<f64>,
    /// One unit-length component per row, strongest first.
    components: Array2<f64>,
}

impl Pca {
    /// Fit `n_components` principal axes to the rows of `data`.
    pub fn fit(data: &Array2<f64>, n_components: usize) -> Self {
        let (n, d) = data.dim();
        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(d));
        let centered = data - &mean;
        let k = n_components.min(d).min(n.max(1));

        let mut components = Array2::<f64>::zeros((k, d));

        if n <= d {
            // Dual form: eigenvectors of the Gram matrix map back through X^T.
            let gram = centered.dot(&centered.t());
            let (values, vectors) = symmetric_eigen(gram);
            for (row, &col) in sorted_desc(&values).iter().take(k).enumerate() {
                let axis = centered.t().dot(&vectors.column(col));
                let norm = axis.dot(&axis).sqrt();
                if norm > 1e-12 {
                    components.row_mut(row).assign(&(axis / norm));
                }
            }
        } else {
            let cov = centered.t().dot(&centered);
            let (values, vectors) = symmetric_eigen(cov);
            for (row, &col) in sorted_desc(&values).iter().take(k).enumerate() {
                components.row_mut(row).assign(&vectors.column(col));
            }
        }

        flip_signs(&mut components);
        Self { mean, components }
    }

    /// Project rows of `data` onto the fitted components.
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let centered = data - &self.mean;
        centered.dot(&self.components.t())
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }
}

/// Indices of `values` from largest to smallest; ties keep index order.
fn sorted_desc(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order
}

/// Make the largest-magnitude entry of every component positive.
fn flip_signs(components: &mut Array2<f64>) {
    for mut row in components.outer_iter_mut() {
        let pivot = row
            .iter()
            .copied()
            .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            row.mapv_inplace(|x| -x);
        }
    }
}

/// Cyclic Jacobi eigen-decomposition of a symmetric matrix.
///
/// Returns eigenvalues (unsorted) and eigenvectors as matching columns.
fn symmetric_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);

    let total: f64 = a.iter().map(|x| x * x).sum();
    if total == 0.0 {
        return (vec![0.0; n], v);
    }

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off <= CONVERGENCE_EPS * total {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values = (0..n).map(|i| a[[i, i]]).collect();
    (values, v)
}
