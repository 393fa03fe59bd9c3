//! Read-only access to sealed band artifacts.
//!
//! `BandStore` owns the memory map of the waterfall matrix plus the decoded
//! side artifacts, cross-validated against the manifest at open time. Sealed
//! artifacts never change, so stores are freely shared across concurrent
//! queries; `Catalog` keeps one open store per band behind a read-mostly
//! lock.

use crate::artifacts::{self, BandManifest, SummaryTriple, TierPyramid};
use crate::error::AppError;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// A sealed band opened for querying.
pub struct BandStore {
    band_id: usize,
    manifest: BandManifest,
    freqs: Vec<f64>,
    rel_t: Vec<i64>,
    summary: SummaryTriple,
    tiers: TierPyramid,
    mmap: Mmap,
    // Keep the file handle alive for the mmap lifetime (notably on Windows).
    _file: File,
}

impl BandStore {
    /// Open a band's artifact set and validate its internal consistency.
    pub fn open(dir: &Path, band_id: usize) -> Result<Self, AppError> {
        let manifest_path = artifacts::manifest_path(dir, band_id);
        if !manifest_path.exists() {
            // The manifest is renamed into place last, so its absence means
            // the band is unknown or not yet sealed.
            return Err(AppError::BandNotFound { band_id });
        }
        let manifest = artifacts::read_manifest(&manifest_path)?;

        let freqs = artifacts::read_f64_vector(&artifacts::freqs_path(dir, band_id))?;
        if freqs.len() != manifest.n_freqs {
            return Err(inconsistent(band_id, "frequency axis length"));
        }

        let rel_t = artifacts::read_i64_vector(&artifacts::rel_t_path(dir, band_id))?;
        if rel_t.len() != manifest.n_traces {
            return Err(inconsistent(band_id, "relative time length"));
        }

        let summary = artifacts::read_summary(&artifacts::summary_path(dir, band_id))?;
        if summary.max.len() != manifest.n_freqs
            || summary.avg.len() != manifest.n_freqs
            || summary.min.len() != manifest.n_freqs
        {
            return Err(inconsistent(band_id, "summary vector length"));
        }

        let tiers = artifacts::read_tiers(&artifacts::tiers_path(dir, band_id))?;
        if tiers.bin_counts() != manifest.levels {
            return Err(inconsistent(band_id, "tier level layout"));
        }

        let waterfall_path = artifacts::waterfall_path(dir, band_id);
        let file = File::open(&waterfall_path).map_err(|e| AppError::IoError {
            message: format!("failed to open store '{}': {}", waterfall_path.display(), e),
        })?;
        let size = file.metadata()?.len();
        if size != manifest.waterfall_bytes() {
            return Err(AppError::ValidationError {
                message: format!(
                    "band {}: store is {} bytes, manifest says {}",
                    band_id,
                    size,
                    manifest.waterfall_bytes()
                ),
            });
        }

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| AppError::IoError {
            message: format!(
                "failed to memory-map store '{}': {}",
                waterfall_path.display(),
                e
            ),
        })?;

        Ok(Self {
            band_id,
            manifest,
            freqs,
            rel_t,
            summary,
            tiers,
            mmap,
            _file: file,
        })
    }

    pub fn band_id(&self) -> usize {
        self.band_id
    }

    pub fn manifest(&self) -> &BandManifest {
        &self.manifest
    }

    /// Canonical frequency axis in hertz.
    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    /// Per-row seconds since `unix0`, non-decreasing.
    pub fn rel_t(&self) -> &[i64] {
        &self.rel_t
    }

    pub fn summary(&self) -> &SummaryTriple {
        &self.summary
    }

    pub fn tiers(&self) -> &TierPyramid {
        &self.tiers
    }

    /// Stored int16 code at (row, col).
    pub fn sample(&self, row: usize, col: usize) -> i16 {
        debug_assert!(row < self.manifest.n_traces);
        debug_assert!(col < self.manifest.n_freqs);

        let offset = (row * self.manifest.n_freqs + col) * 2;
        i16::from_le_bytes([self.mmap[offset], self.mmap[offset + 1]])
    }
}

fn inconsistent(band_id: usize, what: &str) -> AppError {
    AppError::ValidationError {
        message: format!("band {}: {} disagrees with manifest", band_id, what),
    }
}

/// A band id paired with its manifest, as returned by [`list_bands`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct BandEntry {
    pub band_id: usize,
    pub manifest: BandManifest,
}

/// Enumerate the sealed bands in an artifact directory, ascending by id.
pub fn list_bands(dir: &Path) -> Result<Vec<BandEntry>, AppError> {
    let mut entries = Vec::new();

    for dirent in std::fs::read_dir(dir)? {
        let name = dirent?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(band_id) = parse_manifest_name(name) else {
            continue;
        };

        let manifest = artifacts::read_manifest(&artifacts::manifest_path(dir, band_id))?;
        entries.push(BandEntry { band_id, manifest });
    }

    entries.sort_by_key(|entry| entry.band_id);
    Ok(entries)
}

/// Extract `N` from `meta_bandN.json`.
fn parse_manifest_name(name: &str) -> Option<usize> {
    name.strip_prefix("meta_band")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Shared, lazily-populated collection of open band stores.
///
/// Stores are immutable once sealed, so the cache only ever grows and
/// concurrent readers share the same `Arc`.
pub struct Catalog {
    dir: PathBuf,
    stores: RwLock<HashMap<usize, Arc<BandStore>>>,
}

impl Catalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Enumerate sealed bands (always re-reads the directory: new bands may
    /// have been sealed by a later batch run).
    pub fn list(&self) -> Result<Vec<BandEntry>, AppError> {
        list_bands(&self.dir)
    }

    /// Fetch an open store for a band, opening and caching it on first use.
    pub fn band(&self, band_id: usize) -> Result<Arc<BandStore>, AppError> {
        if let Some(store) = self
            .stores
            .read()
            .expect("catalog lock poisoned")
            .get(&band_id)
        {
            return Ok(store.clone());
        }

        let store = Arc::new(BandStore::open(&self.dir, band_id)?);
        let mut guard = self.stores.write().expect("catalog lock poisoned");
        Ok(guard.entry(band_id).or_insert(store).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_name() {
        assert_eq!(parse_manifest_name("meta_band0.json"), Some(0));
        assert_eq!(parse_manifest_name("meta_band17.json"), Some(17));
        assert_eq!(parse_manifest_name("meta_band.json"), None);
        assert_eq!(parse_manifest_name("tiers_band0.json"), None);
        assert_eq!(parse_manifest_name("meta_band0.json.tmp"), None);
    }

    #[test]
    fn test_open_missing_band_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        match BandStore::open(dir.path(), 3) {
            Err(AppError::BandNotFound { band_id }) => assert_eq!(band_id, 3),
            other => panic!("expected BandNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_list_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_bands(dir.path()).unwrap().is_empty());
    }
}
