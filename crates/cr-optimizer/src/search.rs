//! The optimizer contract and the per-run bookkeeping every strategy shares.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

use cr_types::{
    config_error, internal_error, CrError, CrResult, EvaluationRecord, Metadata, Point,
    SearchResult, SearchSpace, DEFAULT_SEED,
};

/// Scalar function of a point, to be maximized.
pub trait Objective {
    fn evaluate(&mut self, point: &Point) -> CrResult<f64>;
}

impl<F> Objective for F
where
    F: FnMut(&Point) -> CrResult<f64>,
{
    fn evaluate(&mut self, point: &Point) -> CrResult<f64> {
        self(point)
    }
}

/// What to search and how much it may cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub space: SearchSpace,
    /// Maximum number of objective calls.
    pub budget: usize,
    #[serde(default)]
    pub seed: Option<u32>,
}

impl SearchRequest {
    pub fn new(space: SearchSpace, budget: usize) -> Self {
        Self {
            space,
            budget,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn seed_or_default(&self) -> u32 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    pub fn validate(&self) -> CrResult<()> {
        if self.budget == 0 {
            return Err(config_error!("budget must be positive"));
        }
        self.space.validate()
    }
}

/// Common trait for all search strategies.
///
/// Implementations never exceed the request budget, record every objective call
/// in call order, and are deterministic for a fixed seed and objective.
pub trait Optimizer: Send + Sync {
    /// Human-readable strategy name.
    fn name(&self) -> &str;

    fn run(
        &self,
        objective: &mut dyn Objective,
        request: &SearchRequest,
        control: &RunControl,
    ) -> CrResult<SearchResult>;
}

// ---------------------------------------------------------------------------
// Run control
// ---------------------------------------------------------------------------

/// Shared flag a host flips to ask a run to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Emitted after every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// 1-based index of the evaluation just completed.
    pub evaluation: usize,
    pub budget: usize,
    pub best: EvaluationRecord,
}

/// Cancellation and progress plumbing passed into [`Optimizer::run`].
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancel: CancellationToken,
    progress: Option<Sender<Progress>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, tx: Sender<Progress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report(&self, progress: Progress) {
        if let Some(tx) = &self.progress {
            // A host that stopped listening does not stop the run.
            let _ = tx.send(progress);
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation log
// ---------------------------------------------------------------------------

/// Owns the history of one run and routes every objective call through the
/// budget, progress and cancellation checks.
pub struct EvaluationLog<'a> {
    objective: &'a mut dyn Objective,
    space: &'a SearchSpace,
    control: &'a RunControl,
    budget: usize,
    history: Vec<EvaluationRecord>,
    best: Option<usize>,
}

impl<'a> EvaluationLog<'a> {
    pub fn new(
        objective: &'a mut dyn Objective,
        request: &'a SearchRequest,
        control: &'a RunControl,
    ) -> Self {
        Self {
            objective,
            space: &request.space,
            control,
            budget: request.budget,
            history: Vec::with_capacity(request.budget.min(4096)),
            best: None,
        }
    }

    pub fn count(&self) -> usize {
        self.history.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.history.len() >= self.budget
    }

    pub fn best(&self) -> Option<&EvaluationRecord> {
        self.best.map(|i| &self.history[i])
    }

    /// Clamp `point` into bounds, evaluate it, and record the outcome.
    pub fn evaluate(&mut self, point: Point) -> CrResult<f64> {
        if self.is_exhausted() {
            return Err(internal_error!(
                "evaluation requested after the budget of {} was spent",
                self.budget
            ));
        }

        let evaluation = self.history.len() + 1;
        let point = self.space.clamp(&point);
        let value = match self.objective.evaluate(&point) {
            Ok(v) if v.is_nan() => {
                return Err(CrError::Objective {
                    evaluation,
                    message: "objective returned NaN".to_string(),
                })
            }
            Ok(v) => v,
            Err(e @ CrError::Objective { .. }) => return Err(e),
            Err(e) => {
                return Err(CrError::Objective {
                    evaluation,
                    message: e.to_string(),
                })
            }
        };
        trace!(evaluation, value, "objective evaluated");

        self.history.push(EvaluationRecord::new(point, value));
        let improved = self.best().map_or(true, |b| value > b.value);
        if improved {
            self.best = Some(self.history.len() - 1);
        }

        if let Some(best) = self.best() {
            self.control.report(Progress {
                evaluation,
                budget: self.budget,
                best: best.clone(),
            });
        }

        if self.control.is_cancelled() {
            return Err(CrError::Cancelled {
                evaluations: evaluation,
                partial_history: std::mem::take(&mut self.history),
            });
        }

        Ok(value)
    }

    /// Close the run and build its result.
    pub fn finish(self, metadata: Metadata) -> CrResult<SearchResult> {
        SearchResult::from_history(self.history, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn line_request(budget: usize) -> SearchRequest {
        SearchRequest::new(SearchSpace::new().add("x", 0.0, 10.0), budget)
    }

    fn x_point(x: f64) -> Point {
        let mut p = Point::new();
        p.insert("x".into(), x);
        p
    }

    #[test]
    fn request_validation() {
        assert!(line_request(0).validate().is_err());
        assert!(line_request(1).validate().is_ok());
        assert!(SearchRequest::new(SearchSpace::new(), 5).validate().is_err());
        assert_eq!(line_request(1).seed_or_default(), DEFAULT_SEED);
        assert_eq!(line_request(1).with_seed(7).seed_or_default(), 7);
    }

    #[test]
    fn log_records_in_order_and_tracks_best() {
        let request = line_request(3);
        let control = RunControl::new();
        let mut objective = |p: &Point| -> CrResult<f64> { Ok(p["x"]) };
        let mut log = EvaluationLog::new(&mut objective, &request, &control);

        log.evaluate(x_point(2.0)).unwrap();
        log.evaluate(x_point(7.0)).unwrap();
        log.evaluate(x_point(5.0)).unwrap();
        assert!(log.is_exhausted());
        assert!(log.evaluate(x_point(1.0)).is_err());

        let result = log.finish(Metadata::new()).unwrap();
        let xs: Vec<f64> = result.history.iter().map(|r| r.point["x"]).collect();
        assert_eq!(xs, vec![2.0, 7.0, 5.0]);
        assert_eq!(result.best.value, 7.0);
        assert_eq!(result.evaluation_count, 3);
    }

    #[test]
    fn log_clamps_before_evaluating() {
        let request = line_request(1);
        let control = RunControl::new();
        let mut seen = Vec::new();
        let mut objective = |p: &Point| -> CrResult<f64> {
            seen.push(p["x"]);
            Ok(0.0)
        };
        let mut log = EvaluationLog::new(&mut objective, &request, &control);
        log.evaluate(x_point(42.0)).unwrap();
        drop(log);
        assert_eq!(seen, vec![10.0]);
    }

    #[test]
    fn progress_is_reported_per_evaluation() {
        let (tx, rx) = unbounded();
        let request = line_request(2);
        let control = RunControl::new().with_progress(tx);
        let mut objective = |p: &Point| -> CrResult<f64> { Ok(-p["x"]) };
        let mut log = EvaluationLog::new(&mut objective, &request, &control);

        log.evaluate(x_point(1.0)).unwrap();
        log.evaluate(x_point(4.0)).unwrap();

        let first = rx.try_recv().expect("expected first progress");
        let second = rx.try_recv().expect("expected second progress");
        assert_eq!(first.evaluation, 1);
        assert_eq!(second.evaluation, 2);
        assert_eq!(second.budget, 2);
        // Best is still the first point.
        assert_eq!(second.best.point["x"], 1.0);
    }

    #[test]
    fn cancellation_surfaces_partial_history() {
        let token = CancellationToken::new();
        let request = line_request(10);
        let control = RunControl::new().with_cancellation(token.clone());
        let mut calls = 0;
        let mut objective = |_: &Point| -> CrResult<f64> {
            calls += 1;
            if calls == 2 {
                token.cancel();
            }
            Ok(1.0)
        };
        let mut log = EvaluationLog::new(&mut objective, &request, &control);

        log.evaluate(x_point(1.0)).unwrap();
        let err = log.evaluate(x_point(2.0)).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.partial_history().map(<[_]>::len), Some(2));
    }

    #[test]
    fn objective_failures_are_tagged_with_evaluation() {
        let request = line_request(5);
        let control = RunControl::new();
        let mut objective = |p: &Point| -> CrResult<f64> {
            if p["x"] > 5.0 {
                Err(cr_types::validation_error!("remote model unavailable"))
            } else {
                Ok(0.0)
            }
        };
        let mut log = EvaluationLog::new(&mut objective, &request, &control);

        log.evaluate(x_point(1.0)).unwrap();
        match log.evaluate(x_point(9.0)) {
            Err(CrError::Objective {
                evaluation,
                message,
            }) => {
                assert_eq!(evaluation, 2);
                assert!(message.contains("remote model unavailable"));
            }
            other => panic!("expected objective error, got {other:?}"),
        }
    }

    #[test]
    fn nan_objective_is_rejected() {
        let request = line_request(1);
        let control = RunControl::new();
        let mut objective = |_: &Point| -> CrResult<f64> { Ok(f64::NAN) };
        let mut log = EvaluationLog::new(&mut objective, &request, &control);
        assert!(matches!(
            log.evaluate(x_point(1.0)),
            Err(CrError::Objective { .. })
        ));
    }
}
