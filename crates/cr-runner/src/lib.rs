//! # cr-runner
//!
//! Ties the process model to the optimizers. [`run_optimization`] is the single
//! entry point: it scores points as `quality - lambda * (energy - 500)`, with an
//! optional hard quality floor, and annotates the result with run metadata.
//! [`OptimizationHost`] wraps that call in a background worker that speaks a
//! tagged start/cancel and progress/done/error message protocol.

pub mod host;
pub mod runner;

pub use host::{serve, HostCommand, HostEvent, OptimizationHost};
pub use runner::{
    default_bounds, run_optimization, run_optimization_with, run_seeds, Method, ProcessObjective,
    RunParams, DEFAULT_QUALITY_MIN, ENERGY_BASELINE, INFEASIBLE_SCORE,
};
