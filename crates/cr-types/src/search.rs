//! Search space definitions and the records every optimizer produces.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::errors::CrResult;
use crate::{config_error, internal_error};

/// A concrete assignment of values to variable names.
pub type Point = BTreeMap<String, f64>;

/// Open key/value bag attached to a result (method name, hyperparameters, ...).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A single continuous dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedVariable {
    /// Variable identifier (e.g. "temperature").
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Lattice spacing used by grid search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl BoundedVariable {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            step: None,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Map a coordinate in [0, 1] onto [min, max].
    pub fn scale_unit(&self, u: f64) -> f64 {
        self.clamp(self.min + u * self.range())
    }

    pub fn validate(&self) -> CrResult<()> {
        if self.name.is_empty() {
            return Err(config_error!("variable name must not be empty"));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(config_error!("bounds of '{}' must be finite", self.name));
        }
        if self.min >= self.max {
            return Err(config_error!(
                "bounds of '{}' are empty: min {} >= max {}",
                self.name,
                self.min,
                self.max
            ));
        }
        if let Some(step) = self.step {
            if step.is_nan() || step <= 0.0 || step > self.range() {
                return Err(config_error!(
                    "step of '{}' must be in (0, {}], got {}",
                    self.name,
                    self.range(),
                    step
                ));
            }
        }
        Ok(())
    }
}

/// The full search space: an ordered list of bounded variables.
///
/// Declaration order matters. Grid search varies the last variable fastest, and
/// the stochastic optimizers draw coordinates in this order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpace {
    pub variables: Vec<BoundedVariable>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.variables.push(BoundedVariable::new(name, min, max));
        self
    }

    pub fn add_stepped(mut self, name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        self.variables.push(BoundedVariable::new(name, min, max).with_step(step));
        self
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&BoundedVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn validate(&self) -> CrResult<()> {
        if self.variables.is_empty() {
            return Err(config_error!("search space has no variables"));
        }
        let mut seen = HashSet::new();
        for variable in &self.variables {
            variable.validate()?;
            if !seen.insert(variable.name.as_str()) {
                return Err(config_error!("duplicate variable '{}'", variable.name));
            }
        }
        Ok(())
    }

    /// Build a point from raw values given in declaration order, clamping each
    /// value into its bounds.
    pub fn point_from_values(&self, values: &[f64]) -> Point {
        self.variables
            .iter()
            .zip(values)
            .map(|(v, x)| (v.name.clone(), v.clamp(*x)))
            .collect()
    }

    /// Build a point from unit-cube coordinates given in declaration order.
    pub fn point_from_unit(&self, unit: &[f64]) -> Point {
        self.variables
            .iter()
            .zip(unit)
            .map(|(v, u)| (v.name.clone(), v.scale_unit(*u)))
            .collect()
    }

    /// Clamp every known coordinate of `point` into its bounds.
    pub fn clamp(&self, point: &Point) -> Point {
        point
            .iter()
            .map(|(name, value)| {
                let clamped = self.get(name).map_or(*value, |v| v.clamp(*value));
                (name.clone(), clamped)
            })
            .collect()
    }
}

/// One objective call: where it was evaluated and what it scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub point: Point,
    pub value: f64,
}

impl EvaluationRecord {
    pub fn new(point: Point, value: f64) -> Self {
        Self { point, value }
    }
}

/// Outcome of a finished optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub best: EvaluationRecord,
    /// Every evaluation in call order.
    pub history: Vec<EvaluationRecord>,
    pub evaluation_count: usize,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchResult {
    /// Assemble a result from a complete history. The first record holding the
    /// maximum value becomes `best`.
    pub fn from_history(history: Vec<EvaluationRecord>, metadata: Metadata) -> CrResult<Self> {
        let best = history
            .iter()
            .fold(None::<&EvaluationRecord>, |best, record| match best {
                Some(b) if b.value >= record.value => Some(b),
                _ => Some(record),
            })
            .cloned()
            .ok_or_else(|| internal_error!("cannot build a search result from an empty history"))?;

        Ok(Self {
            best,
            evaluation_count: history.len(),
            history,
            metadata,
        })
    }

    /// Attach or overwrite a metadata entry.
    pub fn annotate(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}
