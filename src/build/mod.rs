//! Batch merge-and-index driver.
//!
//! One pass over the chunk files streams records through the classifier into
//! per-band scratch stores; a second, parallel phase seals each band
//! (quantisation, summary, tiers, manifest). Per-record failures are counted
//! and skipped, band-corrupting failures roll back the band, and stream or
//! discovery failures abort the batch.

pub mod band;
pub mod classifier;
pub mod grid;
pub mod quantizer;
pub mod scratch;
pub mod summary;
pub mod tiers;

use crate::artifacts::BandManifest;
use crate::chunk::{ChunkDecoder, DecodeError};
use crate::error::AppError;
use classifier::{Classifier, Dispatch};
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default relative tolerance for grid reconciliation.
pub const GRID_TOLERANCE: f64 = 1e-6;

/// Build-side configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BuildConfig {
    /// Directory receiving the per-band artifact set.
    pub out_dir: PathBuf,
    /// Relative tolerance for accepting drifted grids onto the canonical
    /// axis.
    pub grid_tolerance: f64,
}

impl BuildConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            grid_tolerance: GRID_TOLERANCE,
        }
    }
}

/// Cooperative cancellation handle, checked between records and between
/// bands.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Manifests of sealed bands, in band-id order.
    pub manifests: Vec<BandManifest>,
    /// Records accepted into a band (including reconciled ones).
    pub records_accepted: u64,
    /// Records skipped on per-record decode failures.
    pub records_skipped: u64,
    /// Records reconciled onto a canonical axis.
    pub records_reconciled: u64,
    /// Records rejected for grid drift beyond tolerance.
    pub drift_rejections: u64,
    /// Bands dropped for having no accepted records.
    pub bands_dropped: u64,
}

/// Run the batch merge over the given chunk files.
///
/// Chunks are consumed in the given order; band ids are assigned in the
/// order bands are first seen, which makes a rerun over the same inputs
/// reproduce the same ids and the same artifacts.
pub fn run_batch(
    decoder: &dyn ChunkDecoder,
    chunks: &[PathBuf],
    config: &BuildConfig,
    cancel: &CancelFlag,
) -> Result<BuildReport, AppError> {
    if chunks.is_empty() {
        return Err(AppError::InputMissing {
            message: "no capture chunks to merge".to_string(),
        });
    }

    std::fs::create_dir_all(&config.out_dir)?;

    let mut classifier = Classifier::new(&config.out_dir, config.grid_tolerance);
    let mut report = BuildReport::default();
    let mut band_io_failure: Option<AppError> = None;

    for chunk in chunks {
        info!("reading chunk '{}'", chunk.display());
        let stream = match decoder.open(chunk) {
            Ok(stream) => stream,
            Err(e) => {
                classifier.fail_all();
                return Err(e);
            }
        };

        for item in stream {
            if cancel.is_cancelled() {
                classifier.fail_all();
                return Err(cancelled());
            }

            let record = match item {
                Ok(record) => record,
                Err(DecodeError::Record { message }) => {
                    report.records_skipped += 1;
                    warn!("skipping record in '{}': {}", chunk.display(), message);
                    continue;
                }
                Err(DecodeError::Stream { message }) => {
                    classifier.fail_all();
                    return Err(AppError::DecodeFatal {
                        message: format!("chunk '{}': {}", chunk.display(), message),
                    });
                }
            };

            match classifier.dispatch(record) {
                Ok(Dispatch::NewBand(_)) | Ok(Dispatch::Matched(_)) => {
                    report.records_accepted += 1;
                }
                Ok(Dispatch::Reconciled(_)) => {
                    report.records_accepted += 1;
                    report.records_reconciled += 1;
                }
                Ok(Dispatch::Drift(_)) => report.drift_rejections += 1,
                Ok(Dispatch::BandFailed(_)) => {}
                Err(e) => {
                    // Scratch write failure: the classifier has already
                    // rolled the band back; the others keep going, but the
                    // error still fails the batch at the end.
                    error!("band write failure, band rolled back: {}", e);
                    band_io_failure.get_or_insert(e);
                }
            }
        }
    }

    // Sealing fans out across bands; each band is owned by one worker.
    let mut builders = classifier.into_bands();
    let seal_results: Vec<Result<Option<BandManifest>, AppError>> = builders
        .par_iter_mut()
        .map(|builder| {
            if cancel.is_cancelled() {
                builder.rollback();
                return Err(cancelled());
            }
            match builder.seal() {
                Ok(manifest) => Ok(manifest),
                Err(e) => {
                    error!("band {}: seal failed: {}", builder.band_id(), e);
                    builder.rollback();
                    Err(e)
                }
            }
        })
        .collect();

    for result in seal_results {
        match result {
            Ok(Some(manifest)) => report.manifests.push(manifest),
            Ok(None) => report.bands_dropped += 1,
            Err(e) => {
                band_io_failure.get_or_insert(e);
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    if let Some(e) = band_io_failure {
        return Err(e);
    }

    info!(
        "sealed {} band(s): {} accepted, {} skipped, {} drift-rejected",
        report.manifests.len(),
        report.records_accepted,
        report.records_skipped,
        report.drift_rejections
    );
    Ok(report)
}

fn cancelled() -> AppError {
    AppError::ValidationError {
        message: "build cancelled".to_string(),
    }
}
