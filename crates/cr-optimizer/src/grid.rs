//! Exhaustive lattice enumeration.

use serde::{Deserialize, Serialize};
use tracing::info;

use cr_types::{config_error, BoundedVariable, CrResult, Metadata, SearchResult};

use crate::search::{EvaluationLog, Objective, Optimizer, RunControl, SearchRequest};

/// Tolerance when deciding whether the last stepped value still lies on `max`.
const STEP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GridConfig {
    /// Equal subdivisions for variables declared without a step.
    pub divisions: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { divisions: 20 }
    }
}

impl GridConfig {
    pub fn validate(&self) -> CrResult<()> {
        if self.divisions == 0 {
            return Err(config_error!("grid divisions must be positive"));
        }
        Ok(())
    }
}

/// Exhaustive grid search over the Cartesian product of per-variable axes.
///
/// The lattice is walked depth first with the last declared variable varying
/// fastest, and the walk stops as soon as the budget is spent. A budget smaller
/// than the lattice therefore covers the leading values of the first axis
/// densely and never reaches its trailing values; the truncation is not
/// interleaved across dimensions.
#[derive(Debug, Clone, Default)]
pub struct GridSearch {
    config: GridConfig,
}

impl GridSearch {
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }

    /// Axis of one variable: `min, min + step, ...` up to `max`, or
    /// `divisions + 1` evenly spaced values when no step is given.
    pub fn axis(variable: &BoundedVariable, divisions: usize) -> Axis {
        match variable.step {
            Some(step) => Axis::stepped(variable.min, variable.max, step),
            None => Axis::divided(variable.min, variable.max, divisions),
        }
    }

    /// Lattice points in enumeration order.
    pub fn lattice(axes: &[Axis]) -> Lattice<'_> {
        Lattice::new(axes)
    }
}

/// Evenly spaced values along one variable, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    min: f64,
    max: f64,
    spacing: Spacing,
    len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Spacing {
    Step(f64),
    Divisions(usize),
}

impl Axis {
    pub fn stepped(min: f64, max: f64, step: f64) -> Self {
        let steps = ((max - min) / step + STEP_EPSILON).floor() as usize;
        Self {
            min,
            max,
            spacing: Spacing::Step(step),
            len: steps.saturating_add(1),
        }
    }

    pub fn divided(min: f64, max: f64, divisions: usize) -> Self {
        Self {
            min,
            max,
            spacing: Spacing::Divisions(divisions),
            len: divisions + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The `i`-th value, never beyond `max`.
    pub fn value(&self, i: usize) -> f64 {
        match self.spacing {
            Spacing::Step(step) => (self.min + i as f64 * step).min(self.max),
            Spacing::Divisions(d) => self.min + (self.max - self.min) * i as f64 / d as f64,
        }
    }
}

impl Optimizer for GridSearch {
    fn name(&self) -> &str {
        "grid"
    }

    fn run(
        &self,
        objective: &mut dyn Objective,
        request: &SearchRequest,
        control: &RunControl,
    ) -> CrResult<SearchResult> {
        request.validate()?;
        self.config.validate()?;

        let space = &request.space;
        let axes: Vec<Axis> = space
            .variables
            .iter()
            .map(|v| Self::axis(v, self.config.divisions))
            .collect();
        let lattice_size = axes
            .iter()
            .try_fold(1usize, |acc, axis| acc.checked_mul(axis.len()));

        info!(
            budget = request.budget,
            lattice_size = ?lattice_size,
            "starting grid search"
        );

        let mut log = EvaluationLog::new(objective, request, control);
        for values in Self::lattice(&axes).take(request.budget) {
            log.evaluate(space.point_from_values(&values))?;
        }

        let mut metadata = Metadata::new();
        metadata.insert("method".into(), self.name().into());
        metadata.insert("hyperparameters".into(), serde_json::to_value(&self.config)?);
        if let Some(size) = lattice_size {
            metadata.insert("latticeSize".into(), size.into());
        }

        let result = log.finish(metadata)?;
        info!(
            evaluations = result.evaluation_count,
            best = result.best.value,
            "grid search finished"
        );
        Ok(result)
    }
}

/// Odometer over the Cartesian product of axes, last axis fastest.
#[derive(Debug, Clone)]
pub struct Lattice<'a> {
    axes: &'a [Axis],
    cursor: Vec<usize>,
    done: bool,
}

impl<'a> Lattice<'a> {
    fn new(axes: &'a [Axis]) -> Self {
        Self {
            axes,
            cursor: vec![0; axes.len()],
            done: axes.is_empty() || axes.iter().any(Axis::is_empty),
        }
    }
}

impl Iterator for Lattice<'_> {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = self
            .cursor
            .iter()
            .zip(self.axes)
            .map(|(&i, axis)| axis.value(i))
            .collect();

        // Advance: bump the last digit, carrying leftwards.
        let mut dim = self.axes.len();
        loop {
            if dim == 0 {
                self.done = true;
                break;
            }
            dim -= 1;
            self.cursor[dim] += 1;
            if self.cursor[dim] < self.axes[dim].len() {
                break;
            }
            self.cursor[dim] = 0;
        }

        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_types::{CrResult, Point, SearchSpace};

    fn axis_values(axis: &Axis) -> Vec<f64> {
        (0..axis.len()).map(|i| axis.value(i)).collect()
    }

    fn evaluated_xs(result: &SearchResult) -> Vec<f64> {
        result.history.iter().map(|r| r.point["x"]).collect()
    }

    fn stepped_request(budget: usize) -> SearchRequest {
        SearchRequest::new(SearchSpace::new().add_stepped("x", 0.0, 10.0, 2.0), budget)
    }

    #[test]
    fn small_lattice_is_exhausted_below_budget() {
        let mut objective = |p: &Point| -> CrResult<f64> { Ok(p["x"]) };
        let result = GridSearch::default()
            .run(&mut objective, &stepped_request(100), &RunControl::new())
            .unwrap();

        assert_eq!(result.evaluation_count, 6);
        assert_eq!(evaluated_xs(&result), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(result.best.value, 10.0);
        assert_eq!(result.metadata["latticeSize"], 6);
    }

    #[test]
    fn budget_truncates_in_lattice_order() {
        let mut objective = |p: &Point| -> CrResult<f64> { Ok(-p["x"]) };
        let result = GridSearch::default()
            .run(&mut objective, &stepped_request(3), &RunControl::new())
            .unwrap();

        assert_eq!(evaluated_xs(&result), vec![0.0, 2.0, 4.0]);
        assert_eq!(result.best.point["x"], 0.0);
    }

    #[test]
    fn stepped_axis_tolerates_float_error() {
        let var = BoundedVariable::new("x", 0.0, 1.0).with_step(0.1);
        let axis = axis_values(&GridSearch::axis(&var, 20));
        assert_eq!(axis.len(), 11);
        assert_eq!(*axis.last().unwrap(), 1.0);
    }

    #[test]
    fn stepped_axis_stops_short_of_max() {
        let var = BoundedVariable::new("x", 0.0, 10.0).with_step(3.0);
        assert_eq!(axis_values(&GridSearch::axis(&var, 20)), vec![0.0, 3.0, 6.0, 9.0]);
    }

    #[test]
    fn default_axis_has_twenty_subdivisions() {
        let var = BoundedVariable::new("x", 0.0, 1.0);
        let axis = axis_values(&GridSearch::axis(&var, 20));
        assert_eq!(axis.len(), 21);
        assert_eq!(axis[0], 0.0);
        assert_eq!(axis[20], 1.0);
        assert!((axis[1] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn last_variable_varies_fastest() {
        let space = SearchSpace::new()
            .add_stepped("a", 0.0, 1.0, 1.0)
            .add_stepped("b", 0.0, 2.0, 1.0);
        let mut objective = |_: &Point| -> CrResult<f64> { Ok(0.0) };
        let result = GridSearch::default()
            .run(
                &mut objective,
                &SearchRequest::new(space, 100),
                &RunControl::new(),
            )
            .unwrap();

        let pairs: Vec<(f64, f64)> = result
            .history
            .iter()
            .map(|r| (r.point["a"], r.point["b"]))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (0.0, 0.0),
                (0.0, 1.0),
                (0.0, 2.0),
                (1.0, 0.0),
                (1.0, 1.0),
                (1.0, 2.0)
            ]
        );
    }

    #[test]
    fn truncation_favours_first_axis() {
        // Six points of a 2x3 lattice with budget 3 never leave a = 0.
        let space = SearchSpace::new()
            .add_stepped("a", 0.0, 1.0, 1.0)
            .add_stepped("b", 0.0, 2.0, 1.0);
        let mut objective = |p: &Point| -> CrResult<f64> { Ok(p["a"]) };
        let result = GridSearch::default()
            .run(
                &mut objective,
                &SearchRequest::new(space, 3),
                &RunControl::new(),
            )
            .unwrap();
        assert!(result.history.iter().all(|r| r.point["a"] == 0.0));
    }

    #[test]
    fn invalid_configuration_fails_before_evaluating() {
        let mut calls = 0;
        let mut objective = |_: &Point| -> CrResult<f64> {
            calls += 1;
            Ok(0.0)
        };
        let bad = SearchRequest::new(SearchSpace::new().add("x", 1.0, 0.0), 10);
        assert!(GridSearch::default()
            .run(&mut objective, &bad, &RunControl::new())
            .is_err());
        assert!(GridSearch::default()
            .run(&mut objective, &stepped_request(0), &RunControl::new())
            .is_err());
        assert!(GridSearch::new(GridConfig { divisions: 0 })
            .run(&mut objective, &stepped_request(5), &RunControl::new())
            .is_err());
        assert_eq!(calls, 0);
    }

    #[test]
    fn lattice_iterator_counts_product() {
        let axes = [
            Axis::stepped(1.0, 2.0, 1.0),
            Axis::stepped(3.0, 5.0, 1.0),
            Axis::stepped(6.0, 6.0, 1.0),
        ];
        assert_eq!(GridSearch::lattice(&axes).count(), 6);
        assert_eq!(GridSearch::lattice(&[]).count(), 0);
    }

    #[test]
    fn fine_step_axis_is_not_materialized() {
        let var = BoundedVariable::new("x", 0.0, 1.0).with_step(1e-10);
        let axis = GridSearch::axis(&var, 20);
        assert!(axis.len() > 9_999_999_000);
        assert_eq!(axis.value(0), 0.0);
        assert!(axis.value(axis.len() - 1) <= 1.0);

        let space = SearchSpace::new()
            .add_stepped("x", 0.0, 1.0, 1e-10)
            .add_stepped("y", 0.0, 5.0, 1.0);
        let mut objective = |p: &Point| -> CrResult<f64> { Ok(p["y"]) };
        let result = GridSearch::default()
            .run(
                &mut objective,
                &SearchRequest::new(space.clone(), 1),
                &RunControl::new(),
            )
            .unwrap();
        assert_eq!(result.evaluation_count, 1);
        assert_eq!(result.history[0].point["x"], 0.0);

        let result = GridSearch::default()
            .run(
                &mut objective,
                &SearchRequest::new(space, 3),
                &RunControl::new(),
            )
            .unwrap();
        let ys: Vec<f64> = result.history.iter().map(|r| r.point["y"]).collect();
        assert_eq!(ys, vec![0.0, 1.0, 2.0]);
        assert!(result.history.iter().all(|r| r.point["x"] == 0.0));
    }
}
