//! Band classification by frequency-grid fingerprint.
//!
//! Each record is dispatched to a band keyed by its axis length and
//! whole-hertz endpoints. The first record with a new key opens the band and
//! freezes its canonical axis; later records either match it bit-for-bit,
//! reconcile within tolerance, or are rejected as drift. Classification is
//! streaming: one pass, rows appended as they arrive.

use crate::build::band::{BandBuilder, RecordOutcome};
use crate::chunk::TraceRecord;
use crate::error::AppError;
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Grid fingerprint: two records belong to the same band iff their keys are
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BandKey {
    /// Axis length.
    pub n_freqs: usize,
    /// First axis frequency, rounded to whole hertz.
    pub f_start_hz: i64,
    /// Last axis frequency, rounded to whole hertz.
    pub f_stop_hz: i64,
}

impl BandKey {
    pub fn of(record: &TraceRecord) -> Self {
        Self {
            n_freqs: record.freqs_hz.len(),
            f_start_hz: record.f_start().round() as i64,
            f_stop_hz: record.f_stop().round() as i64,
        }
    }
}

/// What happened to a dispatched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Opened a new band and became its first row.
    NewBand(usize),
    /// Appended to an existing band (axis matched exactly).
    Matched(usize),
    /// Appended to an existing band after grid reconciliation.
    Reconciled(usize),
    /// Rejected for drifting beyond tolerance.
    Drift(usize),
    /// Dropped because its band already failed and rolled back.
    BandFailed(usize),
}

/// Streaming classifier: the registry mapping keys to band indices plus the
/// band builders themselves, owned by the build driver.
pub struct Classifier {
    out_dir: PathBuf,
    tolerance: f64,
    registry: HashMap<BandKey, usize>,
    bands: Vec<BandBuilder>,
    failed: Vec<bool>,
}

impl Classifier {
    pub fn new(out_dir: &Path, tolerance: f64) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            tolerance,
            registry: HashMap::new(),
            bands: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Route one record to its band, opening the band if needed.
    ///
    /// An `Err` here is an I/O failure on the band's scratch; the caller
    /// rolls the band back (via [`Classifier::fail_band`]) and decides
    /// whether to continue with the remaining bands.
    pub fn dispatch(&mut self, record: TraceRecord) -> Result<Dispatch, AppError> {
        let key = BandKey::of(&record);

        if let Some(&band_id) = self.registry.get(&key) {
            if self.failed[band_id] {
                return Ok(Dispatch::BandFailed(band_id));
            }
            return match self.bands[band_id].accept(record) {
                Ok(RecordOutcome::Matched) => Ok(Dispatch::Matched(band_id)),
                Ok(RecordOutcome::Reconciled) => Ok(Dispatch::Reconciled(band_id)),
                Ok(RecordOutcome::Drift) => Ok(Dispatch::Drift(band_id)),
                Err(e) => {
                    self.fail_band(band_id);
                    Err(e)
                }
            };
        }

        let band_id = self.bands.len();
        let builder = BandBuilder::create(band_id, &self.out_dir, record, self.tolerance)?;
        info!(
            "band {}: opened for grid {}..{} Hz x {}",
            band_id, key.f_start_hz, key.f_stop_hz, key.n_freqs
        );
        self.registry.insert(key, band_id);
        self.bands.push(builder);
        self.failed.push(false);
        Ok(Dispatch::NewBand(band_id))
    }

    /// Roll a band back and stop routing records to it.
    pub fn fail_band(&mut self, band_id: usize) {
        if let Some(builder) = self.bands.get_mut(band_id) {
            builder.rollback();
        }
        if let Some(flag) = self.failed.get_mut(band_id) {
            *flag = true;
        }
    }

    /// Roll back every band (fatal decoder failure or cancellation).
    pub fn fail_all(&mut self) {
        for band_id in 0..self.bands.len() {
            if !self.failed[band_id] {
                self.fail_band(band_id);
            }
        }
    }

    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    /// Hand the surviving builders to the sealing phase.
    pub fn into_bands(self) -> Vec<BandBuilder> {
        self.bands
            .into_iter()
            .zip(self.failed)
            .filter_map(|(builder, failed)| (!failed).then_some(builder))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: f64, n: usize, f_start: f64) -> TraceRecord {
        let step = 100.0;
        TraceRecord {
            timestamp,
            freqs_hz: (0..n).map(|i| f_start + i as f64 * step).collect(),
            power_db: vec![-80.0; n],
        }
    }

    #[test]
    fn test_same_grid_shares_a_band() {
        let dir = tempfile::tempdir().unwrap();
        let mut classifier = Classifier::new(dir.path(), 1e-6);

        assert_eq!(
            classifier.dispatch(record(0.0, 64, 100e6)).unwrap(),
            Dispatch::NewBand(0)
        );
        assert_eq!(
            classifier.dispatch(record(1.0, 64, 100e6)).unwrap(),
            Dispatch::Matched(0)
        );
        assert_eq!(classifier.n_bands(), 1);
    }

    #[test]
    fn test_different_length_splits_bands() {
        let dir = tempfile::tempdir().unwrap();
        let mut classifier = Classifier::new(dir.path(), 1e-6);

        // Identical endpoints would still differ in length; both open.
        classifier.dispatch(record(0.0, 1024, 100e6)).unwrap();
        match classifier.dispatch(record(0.5, 1025, 100e6)).unwrap() {
            Dispatch::NewBand(1) => {}
            other => panic!("expected a second band, got {:?}", other),
        }
        assert_eq!(classifier.n_bands(), 2);
    }

    #[test]
    fn test_key_rounds_to_whole_hertz() {
        let a = record(0.0, 16, 100e6);
        let mut b = record(1.0, 16, 100e6);
        for f in b.freqs_hz.iter_mut() {
            *f += 0.2;
        }
        assert_eq!(BandKey::of(&a), BandKey::of(&b));

        let c = record(2.0, 16, 100e6 + 1.0);
        assert_ne!(BandKey::of(&a), BandKey::of(&c));
    }

    #[test]
    fn test_failed_band_swallows_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut classifier = Classifier::new(dir.path(), 1e-6);

        classifier.dispatch(record(0.0, 64, 100e6)).unwrap();
        classifier.fail_band(0);

        assert_eq!(
            classifier.dispatch(record(1.0, 64, 100e6)).unwrap(),
            Dispatch::BandFailed(0)
        );
        assert!(classifier.into_bands().is_empty());
    }
}
