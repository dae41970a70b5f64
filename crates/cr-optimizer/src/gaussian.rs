//! Gaussian-process regression with an RBF kernel, solved through a Cholesky
//! factorization, plus the Expected-Improvement acquisition.

use cr_types::{internal_error, CrResult};

/// Smallest value allowed under the square root of a Cholesky pivot.
pub const PIVOT_FLOOR: f64 = 1e-12;

/// Below this posterior standard deviation EI is taken to be zero.
pub const MIN_SIGMA: f64 = 1e-9;

/// Squared-exponential covariance `variance * exp(-|x - z|^2 / (2 l^2))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbfKernel {
    pub length_scale: f64,
    pub variance: f64,
}

impl RbfKernel {
    pub fn new(length_scale: f64, variance: f64) -> Self {
        Self {
            length_scale,
            variance,
        }
    }

    pub fn eval(&self, x: &[f64], z: &[f64]) -> f64 {
        let sq_dist: f64 = x.iter().zip(z).map(|(a, b)| (a - b).powi(2)).sum();
        self.variance * (-sq_dist / (2.0 * self.length_scale.powi(2))).exp()
    }
}

/// Lower-triangular factor of a symmetric positive-definite matrix.
#[derive(Debug, Clone)]
pub struct Cholesky {
    lower: Vec<Vec<f64>>,
    /// Pivots that fell below [`PIVOT_FLOOR`] and were raised to it.
    floor_hits: usize,
}

impl Cholesky {
    /// Factor `matrix` as `L Lᵀ`. Non-positive pivots are floored rather than
    /// rejected, so the factorization always succeeds.
    pub fn factor(matrix: &[Vec<f64>]) -> Self {
        let n = matrix.len();
        let mut lower = vec![vec![0.0; n]; n];
        let mut floor_hits = 0;

        for i in 0..n {
            for j in 0..=i {
                let sum: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
                if i == j {
                    let pivot = matrix[i][i] - sum;
                    if pivot.is_nan() || pivot < PIVOT_FLOOR {
                        floor_hits += 1;
                    }
                    lower[i][i] = pivot.max(PIVOT_FLOOR).sqrt();
                } else {
                    lower[i][j] = (matrix[i][j] - sum) / lower[j][j];
                }
            }
        }

        Self { lower, floor_hits }
    }

    pub fn floor_hits(&self) -> usize {
        self.floor_hits
    }

    pub fn lower(&self) -> &[Vec<f64>] {
        &self.lower
    }

    /// Solve `L x = b` by forward substitution.
    pub fn solve_lower(&self, b: &[f64]) -> Vec<f64> {
        let l = &self.lower;
        let mut x = vec![0.0; b.len()];
        for i in 0..b.len() {
            let sum: f64 = (0..i).map(|j| l[i][j] * x[j]).sum();
            x[i] = (b[i] - sum) / l[i][i];
        }
        x
    }

    /// Solve `Lᵀ x = b` by back substitution.
    pub fn solve_upper(&self, b: &[f64]) -> Vec<f64> {
        let l = &self.lower;
        let n = b.len();
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let sum: f64 = ((i + 1)..n).map(|j| l[j][i] * x[j]).sum();
            x[i] = (b[i] - sum) / l[i][i];
        }
        x
    }

    /// Solve `L Lᵀ x = b`.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        self.solve_upper(&self.solve_lower(b))
    }
}

/// A Gaussian process conditioned on a fixed training set.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    kernel: RbfKernel,
    train_x: Vec<Vec<f64>>,
    factor: Cholesky,
    alpha: Vec<f64>,
}

impl GaussianProcess {
    /// Condition on `(xs, ys)`: build the Gram matrix with `noise` on the
    /// diagonal, factor it, and solve for `alpha = K⁻¹ y`.
    pub fn fit(kernel: RbfKernel, noise: f64, xs: &[Vec<f64>], ys: &[f64]) -> CrResult<Self> {
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(internal_error!(
                "cannot fit a Gaussian process to {} points and {} targets",
                xs.len(),
                ys.len()
            ));
        }

        let n = xs.len();
        let mut gram = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let k = kernel.eval(&xs[i], &xs[j]);
                gram[i][j] = k;
                gram[j][i] = k;
            }
            gram[i][i] += noise;
        }

        let factor = Cholesky::factor(&gram);
        let alpha = factor.solve(ys);

        Ok(Self {
            kernel,
            train_x: xs.to_vec(),
            factor,
            alpha,
        })
    }

    pub fn floor_hits(&self) -> usize {
        self.factor.floor_hits()
    }

    /// Posterior mean and standard deviation at `z`.
    pub fn posterior(&self, z: &[f64]) -> (f64, f64) {
        let k: Vec<f64> = self.train_x.iter().map(|x| self.kernel.eval(x, z)).collect();
        let mean: f64 = k.iter().zip(&self.alpha).map(|(a, b)| a * b).sum();

        let v = self.factor.solve_lower(&k);
        let variance = self.kernel.eval(z, z) - v.iter().map(|x| x * x).sum::<f64>();
        (mean, variance.max(0.0).sqrt())
    }
}

/// Standard normal density.
pub fn normal_pdf(z: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * z * z).exp()
}

/// Standard normal CDF via the Abramowitz–Stegun 7.1.26 error-function
/// approximation (absolute error below 1.5e-7).
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// Expected improvement of a maximization target over `best`, with
/// exploration margin `xi`.
pub fn expected_improvement(mean: f64, sigma: f64, best: f64, xi: f64) -> f64 {
    if sigma < MIN_SIGMA {
        return 0.0;
    }
    let gain = mean - best - xi;
    let z = gain / sigma;
    gain * normal_cdf(z) + sigma * normal_pdf(z)
}
