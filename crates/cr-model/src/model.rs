//! The two model variants behind [`PredictiveModel`].

use rand::rngs::ThreadRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use cr_types::{UniformSource, XorShift32};

use crate::process::{noisy_prediction, round2, Prediction, ProcessParams, ENERGY_RANGE};

/// Noise level of live inference predictions.
pub const INFERENCE_NOISE_STD: f64 = 2.0;

/// Simulation noise grows from the base level at the process center up to the
/// maximum once the weighted distance reaches [`SIM_DISTANCE_CAP`].
pub const SIM_NOISE_BASE: f64 = 2.0;
pub const SIM_NOISE_MAX: f64 = 5.0;
pub const SIM_DISTANCE_CAP: f64 = 2.0;

/// Process baseline the simulation treats as its center.
pub const SIM_CENTER: ProcessParams = ProcessParams {
    temperature: 1500.0,
    time: 65.0,
    pressure: 103.0,
    speed: 300.0,
};

/// Per-unit weights of the L1 distance from [`SIM_CENTER`].
const SIM_DISTANCE_WEIGHTS: [f64; 4] = [1.0 / 100.0, 1.0 / 55.0, 1.0 / 8.0, 1.0 / 50.0];

/// Mean-reversion target and strength applied to simulated quality.
pub const SIM_QUALITY_TARGET: f64 = 355.0;
pub const SIM_QUALITY_PULL: f64 = 0.6;
const SIM_QUALITY_JITTER: f64 = 3.2;
pub const SIM_QUALITY_BAND: (f64, f64) = (340.0, 370.0);

/// Extra energy noise, as a multiple of the local noise level.
const SIM_ENERGY_JITTER: f64 = 2.0;

/// Maps process parameters to a quality/energy prediction.
pub trait PredictiveModel: Send {
    fn predict(&mut self, params: &ProcessParams) -> Prediction;

    fn kind(&self) -> ModelKind;
}

/// Which model variant a run should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Near-deterministic point estimate, noise from the thread-local source.
    Inference,
    /// Seeded, noisier, mean-reverting emulation of measurement variance.
    #[default]
    Simulation,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Simulation => "simulation",
        }
    }

    /// Build a fresh model of this kind. `seed` only matters for simulation.
    pub fn build(self, seed: u32) -> Box<dyn PredictiveModel> {
        match self {
            Self::Inference => Box::new(InferenceModel::new()),
            Self::Simulation => Box::new(SimulationModel::new(seed)),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---- Inference ----

/// Adapter exposing the thread-local `rand` generator as a uniform source.
struct AmbientSource(ThreadRng);

impl UniformSource for AmbientSource {
    fn next_f64(&mut self) -> f64 {
        self.0.random::<f64>()
    }
}

/// Live prediction model. Not reproducible: noise comes from the ambient
/// thread-local generator.
#[derive(Debug, Clone, Default)]
pub struct InferenceModel;

impl InferenceModel {
    pub fn new() -> Self {
        Self
    }
}

impl PredictiveModel for InferenceModel {
    fn predict(&mut self, params: &ProcessParams) -> Prediction {
        let mut source = AmbientSource(rand::rng());
        noisy_prediction(params, INFERENCE_NOISE_STD, &mut source)
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Inference
    }
}

// ---- Simulation ----

/// Seeded simulation model whose noise widens away from the process center and
/// whose quality is pulled toward a baseline mean.
#[derive(Debug, Clone)]
pub struct SimulationModel {
    rng: XorShift32,
}

impl SimulationModel {
    pub fn new(seed: u32) -> Self {
        Self {
            rng: XorShift32::new(seed),
        }
    }

    /// Noise standard deviation at `params`.
    pub fn noise_std(params: &ProcessParams) -> f64 {
        let offsets = [
            params.temperature - SIM_CENTER.temperature,
            params.time - SIM_CENTER.time,
            params.pressure - SIM_CENTER.pressure,
            params.speed - SIM_CENTER.speed,
        ];
        let distance: f64 = offsets
            .iter()
            .zip(SIM_DISTANCE_WEIGHTS)
            .map(|(d, w)| d.abs() * w)
            .sum();
        let ratio = (distance / SIM_DISTANCE_CAP).min(1.0);
        SIM_NOISE_BASE + (SIM_NOISE_MAX - SIM_NOISE_BASE) * ratio
    }
}

impl PredictiveModel for SimulationModel {
    fn predict(&mut self, params: &ProcessParams) -> Prediction {
        let std = Self::noise_std(params);
        let base = noisy_prediction(params, std, &mut self.rng);

        let jitter = self.rng.normal();
        let quality = base.quality - (base.quality - SIM_QUALITY_TARGET) * SIM_QUALITY_PULL
            + jitter * SIM_QUALITY_JITTER;
        let energy = base.energy + SIM_ENERGY_JITTER * std * self.rng.normal();

        Prediction {
            quality: round2(quality).clamp(SIM_QUALITY_BAND.0, SIM_QUALITY_BAND.1),
            energy: round2(energy).clamp(ENERGY_RANGE.0, ENERGY_RANGE.1),
        }
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Simulation
    }
}
