//! Dynamic range estimation and int16 quantisation.
//!
//! The dB range of a band is taken from the 0.5th / 99.5th percentiles of a
//! bounded uniform sample of all observed power values, widened by 2 dB on
//! each end. Percentiles survive impulsive interference that would collapse
//! a min/max range to uselessness.

use crate::artifacts::CODE_OFFSET;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Maximum number of power values retained for percentile estimation.
pub const RESERVOIR_CAP: usize = 1_000_000;

/// Percentile pair defining the dynamic range.
const LOW_PERCENTILE: f64 = 0.5;
const HIGH_PERCENTILE: f64 = 99.5;

/// Widening applied to each end of the percentile range, in dB.
const RANGE_MARGIN_DB: f64 = 2.0;

/// Fixed reservoir seed: identical input sequences must reproduce identical
/// artifacts.
const RESERVOIR_SEED: u64 = 0x5eed_ba5e_0000_0001;

/// Bounded uniform sample of observed power values (Algorithm R).
///
/// Below the cap the reservoir holds every value, so percentiles are exact.
pub struct Reservoir {
    samples: Vec<f32>,
    seen: u64,
    rng: StdRng,
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::new()
    }
}

impl Reservoir {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            seen: 0,
            rng: StdRng::seed_from_u64(RESERVOIR_SEED),
        }
    }

    /// Feed one row of power values into the reservoir.
    pub fn observe_row(&mut self, row: &[f32]) {
        for &value in row {
            self.seen += 1;
            if self.samples.len() < RESERVOIR_CAP {
                self.samples.push(value);
            } else {
                let slot = self.rng.gen_range(0..self.seen);
                if (slot as usize) < RESERVOIR_CAP {
                    self.samples[slot as usize] = value;
                }
            }
        }
    }

    /// Total number of values observed (not retained).
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Whether the reservoir still holds every observed value.
    pub fn is_exact(&self) -> bool {
        self.seen as usize <= RESERVOIR_CAP
    }

    /// Consume the reservoir into a quantisation range.
    ///
    /// Returns `None` when nothing was observed.
    pub fn into_range(self) -> Option<QuantRange> {
        QuantRange::from_samples(self.samples)
    }
}

/// A band's quantised dynamic range: `[db_min, db_max]` mapped across the
/// full int16 code space, `db_min` landing on `-32767` and `db_max` on
/// `+32767`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantRange {
    pub db_min: f64,
    pub db_max: f64,
    pub scale: f64,
}

impl QuantRange {
    /// Derive the range from sampled power values.
    ///
    /// This is the single place where the range-selection method lives; a
    /// strict min/max policy would replace the percentile lookup here.
    pub fn from_samples(mut samples: Vec<f32>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        samples.sort_by(f32::total_cmp);
        let db_min = percentile(&samples, LOW_PERCENTILE) - RANGE_MARGIN_DB;
        let db_max = percentile(&samples, HIGH_PERCENTILE) + RANGE_MARGIN_DB;

        // The 2 dB margins guarantee a positive span even for constant input.
        let scale = 65534.0 / (db_max - db_min);
        Some(Self {
            db_min,
            db_max,
            scale,
        })
    }

    /// Map a dB value to its int16 code, clipping outside the range.
    pub fn quantize(&self, db: f32) -> i16 {
        let code = ((db as f64 - self.db_min) * self.scale).round() - CODE_OFFSET;
        code.clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }

    /// Recover the dB value of a stored code.
    pub fn dequantize(&self, code: i16) -> f64 {
        self.db_min + (code as f64 + CODE_OFFSET) / self.scale
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[f32], pct: f64) -> f64 {
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    sorted[rank.round() as usize] as f64
}
