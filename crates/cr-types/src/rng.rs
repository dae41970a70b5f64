//! Seeded random streams.
//!
//! Every reproducible draw in the optimizers comes from [`XorShift32`]. The
//! generator is defined purely with 32-bit integer arithmetic, so a seed
//! reproduces the same stream bit for bit on every platform.

/// Seed used when a caller does not supply one.
pub const DEFAULT_SEED: u32 = 2025;

/// Replacement state for seed 0, which is a fixed point of xorshift.
const ZERO_SEED_STATE: u32 = 0x9E37_79B9;

/// Floor applied to the first Box–Muller draw so `ln` stays finite.
const MIN_UNIFORM: f64 = 1e-12;

/// A source of uniform floats in [0, 1) with a standard-normal sampler on top.
pub trait UniformSource {
    /// Next uniform draw in [0, 1).
    fn next_f64(&mut self) -> f64;

    /// Standard-normal draw via Box–Muller, consuming two uniforms.
    fn normal(&mut self) -> f64 {
        let u1 = self.next_f64().max(MIN_UNIFORM);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Uniform draw in [low, high).
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    /// Uniform index in [0, len). `len` must be non-zero.
    fn index(&mut self, len: usize) -> usize {
        ((self.next_f64() * len as f64) as usize).min(len - 1)
    }
}

/// 32-bit xorshift generator (shifts 13, 17, 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        let state = if seed == 0 { ZERO_SEED_STATE } else { seed };
        Self { state }
    }

    /// Advance the generator and return the raw 32-bit state.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}

impl Default for XorShift32 {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl UniformSource for XorShift32 {
    fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }
}
