//! Per-frequency summary accumulation.
//!
//! Runs inside the quantisation pass on the float32 scratch rows (not on the
//! int16 codes, which would throw away resolution). The mean uses Welford's
//! running update so long captures do not accumulate float error.

use crate::artifacts::SummaryTriple;

/// Streaming per-column max / mean / min accumulator.
pub struct SummaryAccumulator {
    count: u64,
    max: Vec<f32>,
    min: Vec<f32>,
    mean: Vec<f64>,
}

impl SummaryAccumulator {
    pub fn new(n_freqs: usize) -> Self {
        Self {
            count: 0,
            max: vec![f32::NEG_INFINITY; n_freqs],
            min: vec![f32::INFINITY; n_freqs],
            mean: vec![0.0; n_freqs],
        }
    }

    /// Fold one row of dB values into the accumulator.
    pub fn observe_row(&mut self, row: &[f32]) {
        debug_assert_eq!(row.len(), self.max.len());

        self.count += 1;
        let n = self.count as f64;
        for (j, &db) in row.iter().enumerate() {
            if db > self.max[j] {
                self.max[j] = db;
            }
            if db < self.min[j] {
                self.min[j] = db;
            }
            self.mean[j] += (db as f64 - self.mean[j]) / n;
        }
    }

    /// Number of rows folded in.
    pub fn rows(&self) -> u64 {
        self.count
    }

    /// Finalise into the persisted triple.
    pub fn finish(self) -> SummaryTriple {
        SummaryTriple {
            max: self.max,
            avg: self.mean.iter().map(|&m| m as f32).collect(),
            min: self.min,
        }
    }
}
