//! Composes the process objective and dispatches it to the selected optimizer.

use chrono::{SecondsFormat, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use cr_model::{ModelKind, Prediction, PredictiveModel, ProcessParams, PROCESS_VARIABLES};
use cr_optimizer::{
    BayesianConfig, BayesianOptimizer, GeneticAlgorithm, GeneticConfig, GridConfig, GridSearch,
    Objective, Optimizer, RunControl, SearchRequest,
};
use cr_types::{config_error, CrResult, Point, SearchResult, SearchSpace, DEFAULT_SEED};

/// Score assigned to points that violate the quality floor.
pub const INFEASIBLE_SCORE: f64 = -1e9;

/// Energy level at which the trade-off term vanishes.
pub const ENERGY_BASELINE: f64 = 500.0;

pub const DEFAULT_QUALITY_MIN: f64 = 365.0;

/// Search strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "grid")]
    Grid,
    #[serde(rename = "genetic-algorithm")]
    GeneticAlgorithm,
    #[serde(rename = "bayesian")]
    Bayesian,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::GeneticAlgorithm => "genetic-algorithm",
            Self::Bayesian => "bayesian",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_quality_min() -> f64 {
    DEFAULT_QUALITY_MIN
}

fn default_seed() -> u32 {
    DEFAULT_SEED
}

/// Everything a caller supplies for one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    pub method: Method,
    pub budget: usize,
    /// Weight of energy above the baseline against quality.
    pub lambda: f64,
    #[serde(default)]
    pub use_quality_constraint: bool,
    #[serde(default = "default_quality_min")]
    pub quality_min: f64,
    #[serde(default = "default_seed")]
    pub seed: u32,
    #[serde(default)]
    pub model: ModelKind,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub genetic: GeneticConfig,
    #[serde(default)]
    pub bayesian: BayesianConfig,
}

impl RunParams {
    pub fn new(method: Method, budget: usize, lambda: f64) -> Self {
        Self {
            method,
            budget,
            lambda,
            use_quality_constraint: false,
            quality_min: DEFAULT_QUALITY_MIN,
            seed: DEFAULT_SEED,
            model: ModelKind::default(),
            grid: GridConfig::default(),
            genetic: GeneticConfig::default(),
            bayesian: BayesianConfig::default(),
        }
    }

    pub fn with_quality_constraint(mut self, quality_min: f64) -> Self {
        self.use_quality_constraint = true;
        self.quality_min = quality_min;
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    pub fn validate(&self) -> CrResult<()> {
        if self.budget == 0 {
            return Err(config_error!("budget must be positive"));
        }
        if !self.lambda.is_finite() {
            return Err(config_error!("lambda must be finite, got {}", self.lambda));
        }
        if self.use_quality_constraint && !self.quality_min.is_finite() {
            return Err(config_error!("quality floor must be finite"));
        }
        Ok(())
    }

    fn quality_floor(&self) -> Option<f64> {
        self.use_quality_constraint.then_some(self.quality_min)
    }

    /// The optimizer this run selects, configured from the run's hyperparameters.
    pub fn optimizer(&self) -> Box<dyn Optimizer> {
        match self.method {
            Method::Grid => Box::new(GridSearch::new(self.grid.clone())),
            Method::GeneticAlgorithm => Box::new(GeneticAlgorithm::new(self.genetic.clone())),
            Method::Bayesian => Box::new(BayesianOptimizer::new(self.bayesian.clone())),
        }
    }
}

impl Default for RunParams {
    fn default() -> Self {
        Self::new(Method::Bayesian, 40, 0.1)
    }
}

/// The process search space used when the caller supplies none.
pub fn default_bounds() -> SearchSpace {
    SearchSpace::new()
        .add_stepped("temperature", 1400.0, 1600.0, 5.0)
        .add_stepped("time", 10.0, 120.0, 5.0)
        .add_stepped("pressure", 95.0, 110.0, 1.0)
        .add_stepped("speed", 250.0, 350.0, 5.0)
}

/// Quality minus weighted excess energy, with an optional hard quality floor.
pub struct ProcessObjective {
    model: Box<dyn PredictiveModel>,
    lambda: f64,
    quality_floor: Option<f64>,
}

impl ProcessObjective {
    pub fn new(model: Box<dyn PredictiveModel>, lambda: f64) -> Self {
        Self {
            model,
            lambda,
            quality_floor: None,
        }
    }

    pub fn with_quality_floor(mut self, floor: Option<f64>) -> Self {
        self.quality_floor = floor;
        self
    }

    pub fn score(&self, prediction: &Prediction) -> f64 {
        match self.quality_floor {
            Some(floor) if prediction.quality < floor => INFEASIBLE_SCORE,
            _ => prediction.quality - self.lambda * (prediction.energy - ENERGY_BASELINE),
        }
    }
}

impl Objective for ProcessObjective {
    fn evaluate(&mut self, point: &Point) -> CrResult<f64> {
        let params = ProcessParams::from_point(point)?;
        let prediction = self.model.predict(&params);
        Ok(self.score(&prediction))
    }
}

/// Keeps the model's noise stream distinct from the optimizer's stream.
fn model_seed(seed: u32) -> u32 {
    seed ^ 0x5DEE_CE66
}

fn check_process_bounds(space: &SearchSpace) -> CrResult<()> {
    space.validate()?;
    for name in PROCESS_VARIABLES {
        if space.get(name).is_none() {
            return Err(config_error!("bounds must include the process variable '{name}'"));
        }
    }
    Ok(())
}

/// Run one optimization with the process model as objective.
pub fn run_optimization(params: &RunParams, bounds: Option<SearchSpace>) -> CrResult<SearchResult> {
    run_optimization_with(params, bounds, &RunControl::new())
}

/// [`run_optimization`] with caller-supplied cancellation and progress.
pub fn run_optimization_with(
    params: &RunParams,
    bounds: Option<SearchSpace>,
    control: &RunControl,
) -> CrResult<SearchResult> {
    params.validate()?;
    let space = bounds.unwrap_or_else(default_bounds);
    check_process_bounds(&space)?;

    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        method = %params.method,
        budget = params.budget,
        lambda = params.lambda,
        seed = params.seed,
        model = %params.model,
        "starting optimization run"
    );

    let model = params.model.build(model_seed(params.seed));
    let mut objective =
        ProcessObjective::new(model, params.lambda).with_quality_floor(params.quality_floor());
    let request = SearchRequest::new(space, params.budget).with_seed(params.seed);
    let optimizer = params.optimizer();

    let mut result = match optimizer.run(&mut objective, &request, control) {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => {
            warn!(%run_id, error = %e, "optimization run cancelled");
            return Err(e);
        }
        Err(e) => {
            error!(%run_id, error = %e, "optimization run failed");
            return Err(e);
        }
    };

    result.annotate("method", params.method.as_str());
    result.annotate("lambda", params.lambda);
    result.annotate("useQualityConstraint", params.use_quality_constraint);
    result.annotate("qualityMin", params.quality_min);
    result.annotate("seed", params.seed);
    result.annotate("model", params.model.as_str());
    result.annotate("runId", run_id.to_string());
    result.annotate(
        "completedAt",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    );

    info!(
        %run_id,
        evaluations = result.evaluation_count,
        best = result.best.value,
        "optimization run completed"
    );
    Ok(result)
}

/// One independent run per seed, executed in parallel. Results are returned in
/// seed order.
pub fn run_seeds(
    params: &RunParams,
    bounds: Option<&SearchSpace>,
    seeds: &[u32],
) -> Vec<CrResult<SearchResult>> {
    seeds
        .par_iter()
        .map(|&seed| run_optimization(&params.clone().with_seed(seed), bounds.cloned()))
        .collect()
}
