//! Waterfall tile extraction.
//!
//! A tile is a subrectangle of the int16 store, box-averaged down to the
//! requested cell budget, dequantised, colormapped through a 256-entry
//! lookup and encoded as PNG. The exact axis bounds of the delivered image
//! travel alongside the bytes so the gateway can emit them as HTTP headers.

use crate::error::AppError;
use crate::query::colormap::{Colormap, ColormapType};
use crate::store::BandStore;
use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Tile encoding format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TileFormat {
    /// PNG encoding (fast compression settings).
    #[default]
    Png,
}

/// Tile request window and budgets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TileRequest {
    /// Window start in hertz; defaults to the band start.
    pub f0: Option<f64>,
    /// Window end in hertz; defaults to the band end.
    pub f1: Option<f64>,
    /// Window start in seconds from `unix0`; defaults to the first row.
    pub t0: Option<f64>,
    /// Window end in seconds from `unix0`; defaults to the last row.
    pub t1: Option<f64>,
    /// Maximum output width in cells (frequency axis).
    pub max_width: usize,
    /// Maximum output height in cells (time axis).
    pub max_height: usize,
    /// Colormap selection.
    pub colormap: ColormapType,
    /// Encoding format.
    pub format: TileFormat,
}

impl TileRequest {
    /// Full-band request with the given cell budget.
    pub fn full(max_width: usize, max_height: usize) -> Self {
        Self {
            f0: None,
            f1: None,
            t0: None,
            t1: None,
            max_width,
            max_height,
            colormap: ColormapType::default(),
            format: TileFormat::default(),
        }
    }
}

/// Exact axis bounds of a delivered tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TileBounds {
    /// First delivered frequency in hertz.
    pub f_start: f64,
    /// Last delivered frequency in hertz.
    pub f_end: f64,
    /// First delivered row time in seconds from `unix0`.
    pub t_start: i64,
    /// Last delivered row time in seconds from `unix0`.
    pub t_end: i64,
}

impl TileBounds {
    /// Render the bounds as the HTTP headers the gateway attaches to the
    /// image response.
    pub fn http_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-Freq-Start", format!("{}", self.f_start)),
            ("X-Freq-End", format!("{}", self.f_end)),
            ("X-Time-Start", format!("{}", self.t_start)),
            ("X-Time-End", format!("{}", self.t_end)),
        ]
    }
}

/// An encoded tile.
///
/// An unsatisfiable window produces a well-formed zero-dimension tile with
/// no payload bytes rather than an error.
#[derive(Debug, Clone, Serialize)]
pub struct Tile {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: TileFormat,
    pub bounds: TileBounds,
}

/// Extract, re-bin, colormap and encode a tile from the waterfall store.
pub fn waterfall_tile(store: &BandStore, request: &TileRequest) -> Result<Tile, AppError> {
    let manifest = store.manifest();
    let freqs = store.freqs();
    let rel_t = store.rel_t();
    if freqs.is_empty() || rel_t.is_empty() {
        return Ok(empty_tile(request.format));
    }

    // Clamp the window to the canonical axis and the available rows.
    let f_lo = request.f0.unwrap_or(manifest.f_start).max(manifest.f_start);
    let f_hi = request.f1.unwrap_or(manifest.f_stop).min(manifest.f_stop);
    let t_lo = request.t0.unwrap_or(rel_t[0] as f64).max(rel_t[0] as f64);
    let t_hi = request
        .t1
        .unwrap_or(rel_t[rel_t.len() - 1] as f64)
        .min(rel_t[rel_t.len() - 1] as f64);

    let col0 = freqs.partition_point(|&f| f < f_lo);
    let col1 = freqs.partition_point(|&f| f <= f_hi);
    let row0 = rel_t.partition_point(|&t| (t as f64) < t_lo);
    let row1 = rel_t.partition_point(|&t| (t as f64) <= t_hi);

    let n_cols = col1.saturating_sub(col0);
    let n_rows = row1.saturating_sub(row0);
    if n_cols == 0 || n_rows == 0 || request.max_width == 0 || request.max_height == 0 {
        return Ok(empty_tile(request.format));
    }

    let width = request.max_width.min(n_cols);
    let height = request.max_height.min(n_rows);
    let colormap = Colormap::new(request.colormap);

    // Box-average in int16 code space; dequantisation is affine, so the
    // mean of codes dequantises to the mean power.
    let span = (manifest.db_max - manifest.db_min).max(f64::EPSILON);
    let mut img: RgbImage = ImageBuffer::new(width as u32, height as u32);
    for out_y in 0..height {
        let (r0, r1) = box_extent(n_rows, height, out_y);
        for out_x in 0..width {
            let (c0, c1) = box_extent(n_cols, width, out_x);

            let mut sum = 0f64;
            for row in r0..r1 {
                for col in c0..c1 {
                    sum += store.sample(row0 + row, col0 + col) as f64;
                }
            }
            let mean_code = sum / ((r1 - r0) * (c1 - c0)) as f64;
            let db = manifest.dequantize(mean_code);
            let normalized = ((db - manifest.db_min) / span) as f32;

            let rgb = colormap.lookup(normalized);
            img.put_pixel(out_x as u32, out_y as u32, Rgb(rgb));
        }
    }

    let bounds = TileBounds {
        f_start: freqs[col0],
        f_end: freqs[col1 - 1],
        t_start: rel_t[row0],
        t_end: rel_t[row1 - 1],
    };

    let data = match request.format {
        TileFormat::Png => encode_png_fast(img)?,
    };

    Ok(Tile {
        width: width as u32,
        height: height as u32,
        data,
        format: request.format,
        bounds,
    })
}

/// Source extent of output cell `index` along an axis of `total` samples
/// split into `cells` boxes. The first `cells - 1` boxes share the floor
/// width; the final box takes the residual.
fn box_extent(total: usize, cells: usize, index: usize) -> (usize, usize) {
    let base = total / cells;
    let start = index * base;
    let end = if index + 1 == cells {
        total
    } else {
        start + base
    };
    (start, end)
}

fn empty_tile(format: TileFormat) -> Tile {
    Tile {
        width: 0,
        height: 0,
        data: Vec::new(),
        format,
        bounds: TileBounds {
            f_start: 0.0,
            f_end: 0.0,
            t_start: 0,
            t_end: 0,
        },
    }
}

/// Encode an RGB image as PNG with fast compression settings.
fn encode_png_fast(img: RgbImage) -> Result<Vec<u8>, AppError> {
    let (width, height) = img.dimensions();
    let raw_pixels = img.into_raw();

    let mut png_bytes = Vec::with_capacity((width * height * 3) as usize);
    let mut encoder = png::Encoder::new(std::io::Cursor::new(&mut png_bytes), width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Fast);

    let mut writer = encoder.write_header().map_err(|e| AppError::IoError {
        message: format!("PNG header write failed: {}", e),
    })?;

    writer
        .write_image_data(&raw_pixels)
        .map_err(|e| AppError::IoError {
            message: format!("PNG encoding failed: {}", e),
        })?;

    // Ensure the encoder flushes before returning the bytes.
    drop(writer);

    Ok(png_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_extent_covers_axis_exactly_once() {
        for (total, cells) in [(10, 3), (7, 7), (100, 9), (5, 2)] {
            let mut covered = 0;
            for index in 0..cells {
                let (start, end) = box_extent(total, cells, index);
                assert_eq!(start, covered);
                assert!(end > start);
                covered = end;
            }
            assert_eq!(covered, total);
        }
    }

    #[test]
    fn test_final_box_takes_the_residual() {
        // 10 samples into 3 boxes: 3, 3, 4.
        assert_eq!(box_extent(10, 3, 0), (0, 3));
        assert_eq!(box_extent(10, 3, 1), (3, 6));
        assert_eq!(box_extent(10, 3, 2), (6, 10));
    }

    #[test]
    fn test_http_headers_carry_exact_bounds() {
        let bounds = TileBounds {
            f_start: 100e6,
            f_end: 100.1e6,
            t_start: 0,
            t_end: 199,
        };

        let headers = bounds.http_headers();
        assert_eq!(headers[0], ("X-Freq-Start", "100000000".to_string()));
        assert_eq!(headers[1], ("X-Freq-End", "100100000".to_string()));
        assert_eq!(headers[2], ("X-Time-Start", "0".to_string()));
        assert_eq!(headers[3], ("X-Time-End", "199".to_string()));
    }
}
