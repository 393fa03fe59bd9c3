//! Transport-agnostic query surface over sealed band artifacts.
//!
//! `QueryService` is what an HTTP or WebSocket gateway wraps: every
//! operation is read-only, re-entrant and safe to call concurrently because
//! sealed artifacts never change.

pub mod colormap;
pub mod peaks;
pub mod summary;
pub mod tile;

pub use colormap::ColormapType;
pub use peaks::{CurveKind, Peak, PeakParams};
pub use summary::SummaryWindow;
pub use tile::{Tile, TileBounds, TileFormat, TileRequest};

use crate::error::AppError;
use crate::store::{BandEntry, Catalog};
use std::path::PathBuf;

/// Query façade over one artifact directory.
pub struct QueryService {
    catalog: Catalog,
}

impl QueryService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog: Catalog::new(dir),
        }
    }

    /// Enumerate sealed bands with their manifests.
    pub fn list_bands(&self) -> Result<Vec<BandEntry>, AppError> {
        self.catalog.list()
    }

    /// Windowed, downsampled summary curves for a band.
    pub fn get_summary(
        &self,
        band_id: usize,
        f0: Option<f64>,
        f1: Option<f64>,
        max_pts: usize,
    ) -> Result<SummaryWindow, AppError> {
        let store = self.catalog.band(band_id)?;
        Ok(summary::get_summary(&store, f0, f1, max_pts))
    }

    /// Colormapped waterfall tile with exact axis bounds.
    pub fn get_waterfall_tile(
        &self,
        band_id: usize,
        request: &TileRequest,
    ) -> Result<Tile, AppError> {
        let store = self.catalog.band(band_id)?;
        tile::waterfall_tile(&store, request)
    }

    /// Peak detection over a summary curve.
    pub fn detect_peaks(
        &self,
        band_id: usize,
        curve: CurveKind,
        params: &PeakParams,
    ) -> Result<Vec<Peak>, AppError> {
        let store = self.catalog.band(band_id)?;
        Ok(peaks::detect_peaks(&store, curve, params))
    }
}
