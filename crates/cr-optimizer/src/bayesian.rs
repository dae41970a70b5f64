//! Bayesian optimization: a Gaussian-process surrogate refit after every
//! observation, sampled where Expected Improvement is highest.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cr_types::{config_error, CrResult, Metadata, SearchResult, UniformSource, XorShift32};

use crate::gaussian::{expected_improvement, GaussianProcess, RbfKernel};
use crate::search::{EvaluationLog, Objective, Optimizer, RunControl, SearchRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BayesianConfig {
    /// Uniform random evaluations before the surrogate takes over.
    pub init_random: usize,
    pub length_scale: f64,
    pub signal_variance: f64,
    /// Jitter added to the Gram diagonal.
    pub noise: f64,
    /// Random candidates scored by EI per iteration.
    pub cand_per_iter: usize,
    /// EI exploration margin.
    pub xi: f64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            init_random: 8,
            length_scale: 0.5,
            signal_variance: 1.0,
            noise: 1e-6,
            cand_per_iter: 200,
            xi: 0.01,
        }
    }
}

impl BayesianConfig {
    pub fn with_init_random(mut self, init_random: usize) -> Self {
        self.init_random = init_random;
        self
    }

    pub fn with_candidates(mut self, cand_per_iter: usize) -> Self {
        self.cand_per_iter = cand_per_iter;
        self
    }

    pub fn validate(&self) -> CrResult<()> {
        if self.init_random == 0 {
            return Err(config_error!("at least one initial random sample is required"));
        }
        if self.cand_per_iter == 0 {
            return Err(config_error!("candidates per iteration must be positive"));
        }
        if !(self.length_scale > 0.0 && self.length_scale.is_finite()) {
            return Err(config_error!("length scale must be positive"));
        }
        if !(self.signal_variance > 0.0 && self.signal_variance.is_finite()) {
            return Err(config_error!("signal variance must be positive"));
        }
        if !(self.noise >= 0.0 && self.noise.is_finite()) {
            return Err(config_error!("noise must be non-negative"));
        }
        if !self.xi.is_finite() {
            return Err(config_error!("xi must be finite"));
        }
        Ok(())
    }
}

/// Sequential model-based search over the unit cube of the search space.
#[derive(Debug, Clone, Default)]
pub struct BayesianOptimizer {
    config: BayesianConfig,
}

impl BayesianOptimizer {
    pub fn new(config: BayesianConfig) -> Self {
        Self { config }
    }

    fn unit_sample(dims: usize, rng: &mut XorShift32) -> Vec<f64> {
        (0..dims).map(|_| rng.next_f64()).collect()
    }
}

impl Optimizer for BayesianOptimizer {
    fn name(&self) -> &str {
        "bayesian"
    }

    fn run(
        &self,
        objective: &mut dyn Objective,
        request: &SearchRequest,
        control: &RunControl,
    ) -> CrResult<SearchResult> {
        request.validate()?;
        self.config.validate()?;

        let seed = request.seed_or_default();
        let space = &request.space;
        let dims = space.len();
        let kernel = RbfKernel::new(self.config.length_scale, self.config.signal_variance);
        let mut rng = XorShift32::new(seed);
        info!(
            budget = request.budget,
            seed,
            init_random = self.config.init_random,
            "starting Bayesian optimization"
        );

        let mut log = EvaluationLog::new(objective, request, control);
        let mut xs: Vec<Vec<f64>> = Vec::new();
        let mut ys: Vec<f64> = Vec::new();

        for _ in 0..self.config.init_random.min(request.budget) {
            let u = Self::unit_sample(dims, &mut rng);
            ys.push(log.evaluate(space.point_from_unit(&u))?);
            xs.push(u);
        }

        let mut gp_fits = 0usize;
        let mut floor_hits = 0usize;
        let mut fallbacks = 0usize;

        while !log.is_exhausted() {
            let gp = GaussianProcess::fit(kernel, self.config.noise, &xs, &ys)?;
            gp_fits += 1;
            if gp.floor_hits() > 0 {
                floor_hits += gp.floor_hits();
                warn!(
                    iteration = gp_fits,
                    pivots = gp.floor_hits(),
                    "Gram matrix is near-singular; surrogate accuracy is degraded"
                );
            }

            let f_best = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mut chosen: Option<(Vec<f64>, f64)> = None;
            for _ in 0..self.config.cand_per_iter {
                let z = Self::unit_sample(dims, &mut rng);
                let (mean, sigma) = gp.posterior(&z);
                let ei = expected_improvement(mean, sigma, f_best, self.config.xi);
                if ei > chosen.as_ref().map_or(0.0, |(_, best)| *best) {
                    chosen = Some((z, ei));
                }
            }

            let z = match chosen {
                Some((z, ei)) => {
                    debug!(iteration = gp_fits, ei, "selected candidate by EI");
                    z
                }
                None => {
                    fallbacks += 1;
                    debug!(iteration = gp_fits, "no candidate improves; sampling at random");
                    Self::unit_sample(dims, &mut rng)
                }
            };

            ys.push(log.evaluate(space.point_from_unit(&z))?);
            xs.push(z);
        }

        let mut metadata = Metadata::new();
        metadata.insert("method".into(), self.name().into());
        metadata.insert("seed".into(), seed.into());
        metadata.insert("gpFits".into(), gp_fits.into());
        metadata.insert("pivotFloorHits".into(), floor_hits.into());
        metadata.insert("randomFallbacks".into(), fallbacks.into());
        metadata.insert("hyperparameters".into(), serde_json::to_value(&self.config)?);

        let result = log.finish(metadata)?;
        info!(
            evaluations = result.evaluation_count,
            gp_fits,
            best = result.best.value,
            "Bayesian optimization finished"
        );
        Ok(result)
    }
}
