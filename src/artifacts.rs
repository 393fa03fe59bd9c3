//! On-disk artifact contract for sealed bands.
//!
//! Every band persists the same fixed set of files in the output directory:
//!
//! - `waterfall_bandN.dat`: raw little-endian int16, row-major, no header
//! - `freqs0_bandN.bin`: little-endian float64 canonical axis
//! - `rel_t_bandN.bin`: little-endian int64 relative row times
//! - `summary_bandN.arc`: named float32 vector archive (`max`, `avg`, `min`)
//! - `tiers_bandN.json`: the frequency-axis pyramid
//! - `meta_bandN.json`: the band manifest
//! - `markers_bandN.json`: externally managed, never touched here
//!
//! This module owns the file naming, the serde models and the binary codecs;
//! producing and consuming the artifacts is the job of `build` and `store`.

use crate::error::AppError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Offset centring dB codes on the int16 range: `db_min` is stored as
/// `-32767` and `db_max` as `+32767`, so the full code space carries signal.
///
/// Part of the artifact contract; the viewer needs the same constant to
/// decode `waterfall_bandN.dat`.
pub const CODE_OFFSET: f64 = 32767.0;

/// Magic bytes of the summary archive.
const SUMMARY_MAGIC: [u8; 4] = *b"SARC";

/// Summary archive layout version.
const SUMMARY_VERSION: u16 = 1;

/// Band manifest, serialized as `meta_bandN.json`.
///
/// The key set is part of the artifact contract and is consumed verbatim by
/// the remote viewer; do not add or rename fields without versioning the
/// directory layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandManifest {
    /// Lower edge of the quantised dynamic range in dB.
    pub db_min: f64,
    /// Upper edge of the quantised dynamic range in dB.
    pub db_max: f64,
    /// int16 codes per dB: `65534 / (db_max - db_min)`.
    pub scale: f64,
    /// Number of rows in the waterfall store.
    pub n_traces: usize,
    /// Number of frequency bins per row.
    pub n_freqs: usize,
    /// First canonical frequency in hertz.
    pub f_start: f64,
    /// Last canonical frequency in hertz.
    pub f_stop: f64,
    /// Unix timestamp of the earliest row; `rel_t` is seconds from here.
    pub unix0: f64,
    /// Bin count of each tier level, finest first.
    pub levels: Vec<usize>,
}

impl BandManifest {
    /// Expected byte size of the waterfall store this manifest describes.
    pub fn waterfall_bytes(&self) -> u64 {
        2 * self.n_traces as u64 * self.n_freqs as u64
    }

    /// Recover a dB value from a stored code.
    ///
    /// Takes the code as `f64` because box-averaged tiles dequantise
    /// fractional means; pass `code as f64` for a raw cell value.
    pub fn dequantize(&self, code: f64) -> f64 {
        self.db_min + (code + CODE_OFFSET) / self.scale
    }
}

/// Per-frequency max / avg / min across all rows of a band.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTriple {
    pub max: Vec<f32>,
    pub avg: Vec<f32>,
    pub min: Vec<f32>,
}

/// One level of the frequency-axis pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierLevel {
    pub n_bins: usize,
    pub min: Vec<f32>,
    pub max: Vec<f32>,
    pub mean: Vec<f32>,
}

/// The full pyramid, level 0 at native resolution, coarsest last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPyramid {
    pub levels: Vec<TierLevel>,
}

impl TierPyramid {
    /// Bin counts of all levels, finest first (the manifest `levels` field).
    pub fn bin_counts(&self) -> Vec<usize> {
        self.levels.iter().map(|level| level.n_bins).collect()
    }
}

/// File name helpers. `band_id` is the band index assigned at build time.
pub fn waterfall_path(dir: &Path, band_id: usize) -> PathBuf {
    dir.join(format!("waterfall_band{}.dat", band_id))
}

pub fn freqs_path(dir: &Path, band_id: usize) -> PathBuf {
    dir.join(format!("freqs0_band{}.bin", band_id))
}

pub fn rel_t_path(dir: &Path, band_id: usize) -> PathBuf {
    dir.join(format!("rel_t_band{}.bin", band_id))
}

pub fn summary_path(dir: &Path, band_id: usize) -> PathBuf {
    dir.join(format!("summary_band{}.arc", band_id))
}

pub fn tiers_path(dir: &Path, band_id: usize) -> PathBuf {
    dir.join(format!("tiers_band{}.json", band_id))
}

pub fn manifest_path(dir: &Path, band_id: usize) -> PathBuf {
    dir.join(format!("meta_band{}.json", band_id))
}

/// Path of the externally managed marker blob for a band.
///
/// Reserved so external tooling and the engine agree on the name; the engine
/// never reads or writes it.
pub fn markers_path(dir: &Path, band_id: usize) -> PathBuf {
    dir.join(format!("markers_band{}.json", band_id))
}

/// In-progress sibling of an artifact, renamed over the final name on seal.
pub fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write a little-endian float64 vector file.
pub fn write_f64_vector(path: &Path, values: &[f64]) -> Result<(), AppError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for &v in values {
        writer.write_f64::<LittleEndian>(v)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a little-endian float64 vector file.
pub fn read_f64_vector(path: &Path) -> Result<Vec<f64>, AppError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 8 != 0 {
        return Err(AppError::ParseError {
            message: format!("'{}' is not a float64 vector file", path.display()),
        });
    }

    let mut values = vec![0f64; bytes.len() / 8];
    std::io::Cursor::new(bytes).read_f64_into::<LittleEndian>(&mut values)?;
    Ok(values)
}

/// Write a little-endian int64 vector file.
pub fn write_i64_vector(path: &Path, values: &[i64]) -> Result<(), AppError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for &v in values {
        writer.write_i64::<LittleEndian>(v)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a little-endian int64 vector file.
pub fn read_i64_vector(path: &Path) -> Result<Vec<i64>, AppError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 8 != 0 {
        return Err(AppError::ParseError {
            message: format!("'{}' is not an int64 vector file", path.display()),
        });
    }

    let mut values = vec![0i64; bytes.len() / 8];
    std::io::Cursor::new(bytes).read_i64_into::<LittleEndian>(&mut values)?;
    Ok(values)
}

/// Write the summary archive (`max`, `avg`, `min` in that order).
pub fn write_summary(path: &Path, summary: &SummaryTriple) -> Result<(), AppError> {
    let mut writer = BufWriter::new(File::create(path)?);

    writer.write_all(&SUMMARY_MAGIC)?;
    writer.write_u16::<LittleEndian>(SUMMARY_VERSION)?;
    writer.write_u16::<LittleEndian>(3)?;

    for (name, values) in [
        ("max", &summary.max),
        ("avg", &summary.avg),
        ("min", &summary.min),
    ] {
        writer.write_u16::<LittleEndian>(name.len() as u16)?;
        writer.write_all(name.as_bytes())?;
        writer.write_u64::<LittleEndian>(values.len() as u64)?;
        for &v in values.iter() {
            writer.write_f32::<LittleEndian>(v)?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Read the summary archive back, resolving vectors by name.
pub fn read_summary(path: &Path) -> Result<SummaryTriple, AppError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != SUMMARY_MAGIC {
        return Err(AppError::ParseError {
            message: format!("'{}' is not a summary archive", path.display()),
        });
    }

    let version = reader.read_u16::<LittleEndian>()?;
    if version != SUMMARY_VERSION {
        return Err(AppError::ParseError {
            message: format!(
                "unsupported summary archive version {} in '{}'",
                version,
                path.display()
            ),
        });
    }

    let entry_count = reader.read_u16::<LittleEndian>()?;
    let mut max = None;
    let mut avg = None;
    let mut min = None;

    for _ in 0..entry_count {
        let name_len = reader.read_u16::<LittleEndian>()? as usize;
        let mut name_bytes = vec![0u8; name_len];
        reader.read_exact(&mut name_bytes)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        let len = reader.read_u64::<LittleEndian>()? as usize;
        let mut values = vec![0f32; len];
        reader.read_f32_into::<LittleEndian>(&mut values)?;

        match name.as_str() {
            "max" => max = Some(values),
            "avg" => avg = Some(values),
            "min" => min = Some(values),
            other => {
                return Err(AppError::ParseError {
                    message: format!("unknown summary vector '{}' in '{}'", other, path.display()),
                })
            }
        }
    }

    match (max, avg, min) {
        (Some(max), Some(avg), Some(min)) => Ok(SummaryTriple { max, avg, min }),
        _ => Err(AppError::ParseError {
            message: format!("summary archive '{}' is incomplete", path.display()),
        }),
    }
}

/// Write the tier pyramid as `tiers_bandN.json`.
pub fn write_tiers(path: &Path, tiers: &TierPyramid) -> Result<(), AppError> {
    let json = serde_json::to_vec(tiers)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read the tier pyramid back.
pub fn read_tiers(path: &Path) -> Result<TierPyramid, AppError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write the band manifest as `meta_bandN.json`.
pub fn write_manifest(path: &Path, manifest: &BandManifest) -> Result<(), AppError> {
    let json = serde_json::to_vec(manifest)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read a band manifest back.
pub fn read_manifest(path: &Path) -> Result<BandManifest, AppError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
