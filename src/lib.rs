//! Batch merge-and-index engine for RF spectrum captures.
//!
//! This crate turns rotated binary capture chunks into per-band waterfall
//! artifacts: a random-access int16 power matrix, per-frequency summary
//! curves, a multi-resolution tier pyramid and a manifest. The query surface
//! serves arbitrary frequency/time windows from the sealed artifacts without
//! touching the build side again.

pub mod artifacts;
pub mod build;
pub mod chunk;
pub mod error;
pub mod query;
pub mod store;
