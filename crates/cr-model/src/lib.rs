//! # cr-model
//!
//! Synthetic predictive models mapping four process parameters (temperature,
//! time, pressure, speed) to a quality/energy prediction. Both variants share
//! one closed-form response surface and differ only in their noise policy.

pub mod model;
pub mod process;

pub use model::{InferenceModel, ModelKind, PredictiveModel, SimulationModel};
pub use process::{
    energy_surface, quality_surface, Prediction, ProcessParams, ENERGY_RANGE, PRESSURE,
    PROCESS_VARIABLES, QUALITY_RANGE, SPEED, TEMPERATURE, TIME,
};
