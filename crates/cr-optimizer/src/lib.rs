//! # cr-optimizer
//!
//! Pluggable black-box search. Every strategy implements [`Optimizer`]: it is
//! handed an [`Objective`], a bounded [`SearchRequest`] and a [`RunControl`],
//! and returns the best evaluation together with the full history.
//!
//! Provided strategies: exhaustive [`GridSearch`], a real-coded
//! [`GeneticAlgorithm`], and Gaussian-process [`BayesianOptimizer`].

mod bayesian;
pub mod gaussian;
mod genetic;
mod grid;
mod search;

pub use bayesian::{BayesianConfig, BayesianOptimizer};
pub use genetic::{GeneticAlgorithm, GeneticConfig};
pub use grid::{Axis, GridConfig, GridSearch, Lattice};
pub use search::{
    CancellationToken, EvaluationLog, Objective, Optimizer, Progress, RunControl, SearchRequest,
};
