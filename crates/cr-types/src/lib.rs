//! # cr-types
//!
//! Shared vocabulary for Crucible: the error hierarchy, bounded search spaces,
//! evaluation records and results, and the seeded random stream every
//! reproducible optimizer draws from.

pub mod errors;
pub mod rng;
pub mod search;

pub use errors::*;
pub use rng::*;
pub use search::*;
