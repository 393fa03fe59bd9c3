//! Per-band build state: row collection, quantisation pass and sealing.
//!
//! A band is created by the first record carrying its grid fingerprint and
//! owns everything band-local: the canonical axis, the scratch file, the
//! power reservoir and the row metadata. Sealing turns those into the final
//! artifact set; every artifact is written to a `.tmp` sibling and renamed
//! on completion, manifest last, so readers only ever see sealed bands.

use crate::artifacts::{self, BandManifest};
use crate::build::classifier::BandKey;
use crate::build::grid;
use crate::build::quantizer::Reservoir;
use crate::build::scratch::ScratchFile;
use crate::build::summary::SummaryAccumulator;
use crate::build::tiers;
use crate::chunk::TraceRecord;
use crate::error::AppError;
use log::{debug, warn};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Build lifecycle of a band. `Sealed` is the only state the query surface
/// ever observes; everything else is internal to the batch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandState {
    /// Created, no record accepted yet.
    Open,
    /// Canonical axis frozen; rows are streaming into scratch.
    AxisFixed,
    /// Percentile range and int16 rewrite in progress.
    Quantising,
    /// Waterfall store complete; index artifacts being written.
    Indexed,
    /// All artifacts renamed into place.
    Sealed,
    /// Rolled back; no artifacts remain.
    Failed,
}

/// Outcome of offering a record to a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Axis matched the canonical grid bit-for-bit.
    Matched,
    /// Axis drifted within tolerance and was re-interpolated.
    Reconciled,
    /// Axis drifted beyond tolerance; record rejected.
    Drift,
}

/// Row bookkeeping: where a trace landed in scratch and when it was taken.
struct RowMeta {
    timestamp: f64,
    scratch_index: usize,
}

/// Builder for a single band during the batch pass.
pub struct BandBuilder {
    band_id: usize,
    out_dir: PathBuf,
    state: BandState,
    key: BandKey,
    axis: Vec<f64>,
    rows: Vec<RowMeta>,
    scratch: Option<ScratchFile>,
    reservoir: Reservoir,
    drift_rejections: u64,
    tolerance: f64,
}

impl BandBuilder {
    /// Open a band from its first record; the record's axis becomes the
    /// canonical axis and the record itself is the first row.
    pub fn create(
        band_id: usize,
        out_dir: &Path,
        record: TraceRecord,
        tolerance: f64,
    ) -> Result<Self, AppError> {
        let scratch = ScratchFile::create(scratch_path(out_dir, band_id), record.freqs_hz.len())?;

        let mut builder = Self {
            band_id,
            out_dir: out_dir.to_path_buf(),
            state: BandState::Open,
            key: BandKey::of(&record),
            axis: record.freqs_hz.clone(),
            rows: Vec::new(),
            scratch: Some(scratch),
            reservoir: Reservoir::new(),
            drift_rejections: 0,
            tolerance,
        };

        if let Err(e) = builder.append_row(record.timestamp, &record.power_db) {
            builder.rollback();
            return Err(e);
        }
        builder.state = BandState::AxisFixed;
        Ok(builder)
    }

    pub fn band_id(&self) -> usize {
        self.band_id
    }

    pub fn key(&self) -> BandKey {
        self.key
    }

    pub fn state(&self) -> BandState {
        self.state
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn drift_rejections(&self) -> u64 {
        self.drift_rejections
    }

    /// Offer a record whose key matched this band.
    pub fn accept(&mut self, record: TraceRecord) -> Result<RecordOutcome, AppError> {
        debug_assert_eq!(self.state, BandState::AxisFixed);
        debug_assert_eq!(BandKey::of(&record), self.key);

        if record.freqs_hz == self.axis {
            self.append_row(record.timestamp, &record.power_db)?;
            return Ok(RecordOutcome::Matched);
        }

        if !grid::within_tolerance(&self.axis, &record.freqs_hz, self.tolerance) {
            self.drift_rejections += 1;
            debug!(
                "band {}: rejected drifted grid at t={} (deviation {:.3e})",
                self.band_id,
                record.timestamp,
                grid::max_relative_deviation(&self.axis, &record.freqs_hz)
            );
            return Ok(RecordOutcome::Drift);
        }

        let resampled = grid::resample_onto(&self.axis, &record.freqs_hz, &record.power_db);
        self.append_row(record.timestamp, &resampled)?;
        Ok(RecordOutcome::Reconciled)
    }

    fn append_row(&mut self, timestamp: f64, power: &[f32]) -> Result<(), AppError> {
        let scratch = self
            .scratch
            .as_mut()
            .expect("scratch lives until seal or rollback");
        let scratch_index = scratch.append_row(power)?;
        self.reservoir.observe_row(power);
        self.rows.push(RowMeta {
            timestamp,
            scratch_index,
        });
        Ok(())
    }

    /// Quantise, index and atomically publish the band's artifacts.
    ///
    /// Returns `None` (band dropped) when no rows were accepted. On error
    /// the caller must invoke [`BandBuilder::rollback`].
    pub fn seal(&mut self) -> Result<Option<BandManifest>, AppError> {
        debug_assert_eq!(self.state, BandState::AxisFixed);
        self.state = BandState::Quantising;

        if self.rows.is_empty() {
            warn!("band {}: no accepted records, dropping", self.band_id);
            if let Some(scratch) = self.scratch.take() {
                scratch.remove()?;
            }
            self.state = BandState::Failed;
            return Ok(None);
        }

        // Time order across chunks; stable sort keeps insertion order on
        // equal timestamps so rebuilds are deterministic.
        self.rows
            .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let range = std::mem::take(&mut self.reservoir)
            .into_range()
            .expect("non-empty band has observed power");

        let n_traces = self.rows.len();
        let n_freqs = self.axis.len();
        let unix0 = self.rows[0].timestamp;

        let scratch = self
            .scratch
            .take()
            .expect("scratch lives until seal or rollback")
            .into_reader()?;

        // Quantisation pass: scratch rows in time order into the mmapped
        // store, folding the float32 summary along the way.
        let waterfall_final = artifacts::waterfall_path(&self.out_dir, self.band_id);
        let waterfall_tmp = artifacts::tmp_sibling(&waterfall_final);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&waterfall_tmp)?;
        file.set_len(2 * n_traces as u64 * n_freqs as u64)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| AppError::IoError {
            message: format!(
                "failed to memory-map store '{}': {}",
                waterfall_tmp.display(),
                e
            ),
        })?;

        let mut summary_acc = SummaryAccumulator::new(n_freqs);
        let mut row = vec![0f32; n_freqs];
        for (i, meta) in self.rows.iter().enumerate() {
            scratch.read_row(meta.scratch_index, &mut row)?;
            summary_acc.observe_row(&row);

            let row_offset = i * n_freqs * 2;
            for (j, &db) in row.iter().enumerate() {
                let code = range.quantize(db);
                let offset = row_offset + j * 2;
                mmap[offset..offset + 2].copy_from_slice(&code.to_le_bytes());
            }
        }

        mmap.flush()?;
        drop(mmap);
        drop(file);
        self.state = BandState::Indexed;

        let summary = summary_acc.finish();
        let pyramid = tiers::build_pyramid(&summary);

        let rel_t: Vec<i64> = self
            .rows
            .iter()
            .map(|meta| (meta.timestamp - unix0).floor() as i64)
            .collect();

        let manifest = BandManifest {
            db_min: range.db_min,
            db_max: range.db_max,
            scale: range.scale,
            n_traces,
            n_freqs,
            f_start: self.axis[0],
            f_stop: self.axis[n_freqs - 1],
            unix0,
            levels: pyramid.bin_counts(),
        };

        let freqs_final = artifacts::freqs_path(&self.out_dir, self.band_id);
        let rel_t_final = artifacts::rel_t_path(&self.out_dir, self.band_id);
        let summary_final = artifacts::summary_path(&self.out_dir, self.band_id);
        let tiers_final = artifacts::tiers_path(&self.out_dir, self.band_id);
        let manifest_final = artifacts::manifest_path(&self.out_dir, self.band_id);

        artifacts::write_f64_vector(&artifacts::tmp_sibling(&freqs_final), &self.axis)?;
        artifacts::write_i64_vector(&artifacts::tmp_sibling(&rel_t_final), &rel_t)?;
        artifacts::write_summary(&artifacts::tmp_sibling(&summary_final), &summary)?;
        artifacts::write_tiers(&artifacts::tmp_sibling(&tiers_final), &pyramid)?;
        artifacts::write_manifest(&artifacts::tmp_sibling(&manifest_final), &manifest)?;

        // Publish. The manifest rename comes last: its presence is what
        // marks the band as sealed.
        for path in [
            &waterfall_final,
            &freqs_final,
            &rel_t_final,
            &summary_final,
            &tiers_final,
            &manifest_final,
        ] {
            std::fs::rename(artifacts::tmp_sibling(path), path)?;
        }

        scratch.remove()?;
        self.state = BandState::Sealed;
        debug!(
            "band {}: sealed ({} traces x {} freqs, {:.1}..{:.1} dB)",
            self.band_id, n_traces, n_freqs, manifest.db_min, manifest.db_max
        );
        Ok(Some(manifest))
    }

    /// Delete everything this band may have written and mark it failed.
    ///
    /// Safe to call at any point before `Sealed`; missing files are ignored.
    pub fn rollback(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let _ = scratch.remove();
        } else {
            let _ = std::fs::remove_file(scratch_path(&self.out_dir, self.band_id));
        }

        for path in [
            artifacts::waterfall_path(&self.out_dir, self.band_id),
            artifacts::freqs_path(&self.out_dir, self.band_id),
            artifacts::rel_t_path(&self.out_dir, self.band_id),
            artifacts::summary_path(&self.out_dir, self.band_id),
            artifacts::tiers_path(&self.out_dir, self.band_id),
            artifacts::manifest_path(&self.out_dir, self.band_id),
        ] {
            let _ = std::fs::remove_file(artifacts::tmp_sibling(&path));
            let _ = std::fs::remove_file(&path);
        }

        self.state = BandState::Failed;
    }
}

/// Scratch file location for a band.
fn scratch_path(dir: &Path, band_id: usize) -> PathBuf {
    dir.join(format!("band{}.scratch", band_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: f64, n: usize, offset_db: f32) -> TraceRecord {
        TraceRecord {
            timestamp,
            freqs_hz: (0..n).map(|i| 100e6 + i as f64 * 100.0).collect(),
            power_db: (0..n).map(|i| -90.0 + offset_db + (i % 7) as f32).collect(),
        }
    }

    #[test]
    fn test_seal_publishes_full_artifact_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = BandBuilder::create(0, dir.path(), record(10.0, 64, 0.0), 1e-6).unwrap();
        builder.accept(record(11.0, 64, 1.0)).unwrap();
        builder.accept(record(12.0, 64, 2.0)).unwrap();

        let manifest = builder.seal().unwrap().unwrap();
        assert_eq!(builder.state(), BandState::Sealed);
        assert_eq!(manifest.n_traces, 3);
        assert_eq!(manifest.n_freqs, 64);

        let store = artifacts::waterfall_path(dir.path(), 0);
        assert_eq!(
            std::fs::metadata(&store).unwrap().len(),
            manifest.waterfall_bytes()
        );
        assert!(artifacts::manifest_path(dir.path(), 0).exists());
        assert!(!scratch_path(dir.path(), 0).exists());
        assert!(!artifacts::tmp_sibling(&store).exists());
    }

    #[test]
    fn test_rows_are_time_sorted_across_chunk_order() {
        let dir = tempfile::tempdir().unwrap();
        // Arrival order 5, 2, 9: rel_t must come out sorted from unix0 = 2.
        let mut builder = BandBuilder::create(0, dir.path(), record(5.0, 16, 0.0), 1e-6).unwrap();
        builder.accept(record(2.0, 16, 0.0)).unwrap();
        builder.accept(record(9.5, 16, 0.0)).unwrap();

        let manifest = builder.seal().unwrap().unwrap();
        assert_eq!(manifest.unix0, 2.0);

        let rel_t = artifacts::read_i64_vector(&artifacts::rel_t_path(dir.path(), 0)).unwrap();
        assert_eq!(rel_t, vec![0, 3, 7]);
    }

    fn wide_record(timestamp: f64) -> TraceRecord {
        TraceRecord {
            timestamp,
            freqs_hz: (0..32).map(|i| 100e6 + i as f64 * 10_000.0).collect(),
            power_db: vec![-90.0; 32],
        }
    }

    #[test]
    fn test_drift_rejection_counts_but_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = BandBuilder::create(0, dir.path(), wide_record(0.0), 1e-6).unwrap();

        // Same endpoints (same key), but an interior bin displaced by 200 Hz
        // is 2e-6 relative drift: beyond tolerance.
        let mut drifted = wide_record(1.0);
        drifted.freqs_hz[16] += 200.0;

        let outcome = builder.accept(drifted).unwrap();
        assert_eq!(outcome, RecordOutcome::Drift);
        assert_eq!(builder.drift_rejections(), 1);
        assert_eq!(builder.n_rows(), 1);
    }

    #[test]
    fn test_tiny_drift_is_reconciled() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = BandBuilder::create(0, dir.path(), wide_record(0.0), 1e-6).unwrap();

        // Millihertz drift: representable at 100 MHz (unlike sub-ULP
        // offsets) yet far inside the 1e-6 relative tolerance.
        let mut drifted = wide_record(1.0);
        for f in drifted.freqs_hz.iter_mut() {
            *f += 1e-3;
        }

        let outcome = builder.accept(drifted).unwrap();
        assert_eq!(outcome, RecordOutcome::Reconciled);
        assert_eq!(builder.n_rows(), 2);
    }

    #[test]
    fn test_rollback_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = BandBuilder::create(0, dir.path(), record(0.0, 16, 0.0), 1e-6).unwrap();
        builder.accept(record(1.0, 16, 0.0)).unwrap();

        builder.rollback();
        assert_eq!(builder.state(), BandState::Failed);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "rollback left files: {:?}", leftovers);
    }
}
