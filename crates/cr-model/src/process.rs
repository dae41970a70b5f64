//! Process parameters and the closed-form response surface shared by every
//! model variant.

use serde::{Deserialize, Serialize};

use cr_types::{validation_error, CrResult, Point, UniformSource};

pub const TEMPERATURE: &str = "temperature";
pub const TIME: &str = "time";
pub const PRESSURE: &str = "pressure";
pub const SPEED: &str = "speed";

/// Variable names a search space must provide to drive a model.
pub const PROCESS_VARIABLES: [&str; 4] = [TEMPERATURE, TIME, PRESSURE, SPEED];

/// Fixed normalization domains, `(min, max)` per parameter.
pub const TEMPERATURE_DOMAIN: (f64, f64) = (1400.0, 1600.0);
pub const TIME_DOMAIN: (f64, f64) = (10.0, 120.0);
pub const PRESSURE_DOMAIN: (f64, f64) = (95.0, 110.0);
pub const SPEED_DOMAIN: (f64, f64) = (250.0, 350.0);

pub const QUALITY_RANGE: (f64, f64) = (300.0, 400.0);
pub const ENERGY_RANGE: (f64, f64) = (350.0, 700.0);

/// Energy noise is this multiple of the quality noise.
const ENERGY_NOISE_RATIO: f64 = 5.0;

/// The four process inputs, in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessParams {
    #[serde(alias = "temp")]
    pub temperature: f64,
    pub time: f64,
    #[serde(alias = "press")]
    pub pressure: f64,
    pub speed: f64,
}

impl ProcessParams {
    pub fn new(temperature: f64, time: f64, pressure: f64, speed: f64) -> Self {
        Self {
            temperature,
            time,
            pressure,
            speed,
        }
    }

    /// Read the process parameters out of a search point.
    pub fn from_point(point: &Point) -> CrResult<Self> {
        let get = |name: &str| {
            point
                .get(name)
                .copied()
                .ok_or_else(|| validation_error!("point is missing process variable '{name}'"))
        };
        Ok(Self::new(get(TEMPERATURE)?, get(TIME)?, get(PRESSURE)?, get(SPEED)?))
    }

    /// Each parameter min-max scaled to [0, 1] against its domain, clamped.
    pub fn normalized(&self) -> [f64; 4] {
        [
            normalize(self.temperature, TEMPERATURE_DOMAIN),
            normalize(self.time, TIME_DOMAIN),
            normalize(self.pressure, PRESSURE_DOMAIN),
            normalize(self.speed, SPEED_DOMAIN),
        ]
    }
}

/// Predicted quality and energy for one parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub quality: f64,
    pub energy: f64,
}

fn normalize(value: f64, (min, max): (f64, f64)) -> f64 {
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Noise-free quality surface over normalized inputs.
pub fn quality_surface([t, ti, pr, sp]: [f64; 4]) -> f64 {
    use std::f64::consts::PI;

    320.0
        + 45.0 * (0.3 + 0.7 * t.powf(0.8))
        + 25.0 * (-(ti - 0.65).powi(2) / 0.3).exp()
        + 20.0 * (pr + 0.3 * (2.0 * PI * pr).sin())
        + 15.0 * (sp.sqrt() + 0.2 * (PI * sp).cos())
        + 8.0 * t * ti
        + 4.0 * pr * sp
        + 3.0 * t * pr
}

/// Noise-free energy surface over normalized inputs.
pub fn energy_surface([t, ti, pr, sp]: [f64; 4]) -> f64 {
    400.0 + 120.0 * t + 40.0 * ti + 30.0 * pr + 25.0 * sp
}

/// Evaluate both surfaces with additive Gaussian noise, then round to two
/// decimals and clamp into the published output ranges.
pub(crate) fn noisy_prediction<R: UniformSource + ?Sized>(
    params: &ProcessParams,
    noise_std: f64,
    rng: &mut R,
) -> Prediction {
    let x = params.normalized();
    let quality = quality_surface(x) + noise_std * rng.normal();
    let energy = energy_surface(x) + ENERGY_NOISE_RATIO * noise_std * rng.normal();

    Prediction {
        quality: round2(quality).clamp(QUALITY_RANGE.0, QUALITY_RANGE.1),
        energy: round2(energy).clamp(ENERGY_RANGE.0, ENERGY_RANGE.1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_types::XorShift32;

    #[test]
    fn normalization_clamps_out_of_domain() {
        let p = ProcessParams::new(1200.0, 500.0, 102.5, 300.0);
        let x = p.normalized();
        assert_eq!(x[0], 0.0);
        assert_eq!(x[1], 1.0);
        assert!((x[2] - 0.5).abs() < 1e-12);
        assert!((x[3] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn surface_at_domain_corners() {
        // At the lower corner only the constant and bias terms survive.
        let low = quality_surface([0.0; 4]);
        let expected = 320.0
            + 45.0 * 0.3
            + 25.0 * (-(0.65f64.powi(2)) / 0.3).exp()
            + 15.0 * 0.2;
        assert!((low - expected).abs() < 1e-9);

        assert_eq!(energy_surface([0.0; 4]), 400.0);
        assert_eq!(energy_surface([1.0; 4]), 615.0);
    }

    #[test]
    fn quality_rises_with_temperature() {
        let cold = quality_surface([0.1, 0.5, 0.5, 0.5]);
        let hot = quality_surface([0.9, 0.5, 0.5, 0.5]);
        assert!(hot > cold);
    }

    #[test]
    fn zero_noise_is_deterministic_and_rounded() {
        let params = ProcessParams::new(1550.0, 70.0, 104.0, 320.0);
        let mut rng = XorShift32::new(1);
        let a = noisy_prediction(&params, 0.0, &mut rng);
        let b = noisy_prediction(&params, 0.0, &mut rng);
        assert_eq!(a, b);
        assert_eq!(a.quality, round2(a.quality));
        assert_eq!(a.energy, round2(a.energy));
    }

    #[test]
    fn huge_noise_is_clamped() {
        let params = ProcessParams::new(1500.0, 65.0, 103.0, 300.0);
        let mut rng = XorShift32::new(5);
        for _ in 0..500 {
            let p = noisy_prediction(&params, 1_000.0, &mut rng);
            assert!((300.0..=400.0).contains(&p.quality));
            assert!((350.0..=700.0).contains(&p.energy));
        }
    }

    #[test]
    fn from_point_requires_all_variables() {
        let mut point = Point::new();
        point.insert(TEMPERATURE.into(), 1500.0);
        point.insert(TIME.into(), 60.0);
        point.insert(PRESSURE.into(), 100.0);
        assert!(ProcessParams::from_point(&point).is_err());

        point.insert(SPEED.into(), 300.0);
        let params = ProcessParams::from_point(&point).unwrap();
        assert_eq!(params.speed, 300.0);
    }

    #[test]
    fn params_accept_short_names() {
        let json = r#"{"temp":1500,"time":60,"press":100,"speed":300}"#;
        let params: ProcessParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.temperature, 1500.0);
        assert_eq!(params.pressure, 100.0);
    }
}
