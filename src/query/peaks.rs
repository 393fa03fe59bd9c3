//! Peak detection over the summary curves.
//!
//! A peak is a strict local maximum; optional filters on absolute height,
//! topographic prominence and inter-peak distance mirror what spectrum
//! viewers expect from a "find carriers" button.

use crate::store::BandStore;
use serde::{Deserialize, Serialize};

/// Which summary curve to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CurveKind {
    Max,
    Avg,
    Min,
}

/// Filters applied to candidate peaks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PeakParams {
    /// Minimum absolute value in dB.
    pub height: Option<f32>,
    /// Minimum topographic prominence in dB.
    pub prominence: Option<f32>,
    /// Minimum spacing in bins; the lower of two close peaks is dropped.
    pub distance: Option<usize>,
    /// Window start in hertz.
    pub f0: Option<f64>,
    /// Window end in hertz.
    pub f1: Option<f64>,
}

/// One detected peak.
#[derive(Debug, Clone, Serialize)]
pub struct Peak {
    /// Peak frequency in hertz.
    pub freq: f64,
    /// Curve value at the peak in dB.
    pub value: f32,
    /// Topographic prominence in dB (reported even when unfiltered).
    pub prominence: f32,
}

/// Detect peaks on the chosen curve inside `[f0, f1]`.
///
/// Results are sorted by ascending frequency. An empty or inverted window
/// yields no peaks.
pub fn detect_peaks(store: &BandStore, curve: CurveKind, params: &PeakParams) -> Vec<Peak> {
    let summary = store.summary();
    let y: &[f32] = match curve {
        CurveKind::Max => &summary.max,
        CurveKind::Avg => &summary.avg,
        CurveKind::Min => &summary.min,
    };
    let freqs = store.freqs();

    let lo = params.f0.unwrap_or(f64::NEG_INFINITY);
    let hi = params.f1.unwrap_or(f64::INFINITY);
    let start = freqs.partition_point(|&f| f < lo);
    let end = freqs.partition_point(|&f| f <= hi);
    if end.saturating_sub(start) < 3 {
        return Vec::new();
    }

    let window = &y[start..end];

    // Strict local maxima, then the cheap filters.
    let mut candidates: Vec<(usize, f32, f32)> = Vec::new();
    for i in 1..window.len() - 1 {
        if !(window[i] > window[i - 1] && window[i] > window[i + 1]) {
            continue;
        }
        if let Some(height) = params.height {
            if window[i] < height {
                continue;
            }
        }

        let prom = prominence(window, i);
        if let Some(min_prom) = params.prominence {
            if prom < min_prom {
                continue;
            }
        }
        candidates.push((i, window[i], prom));
    }

    if let Some(distance) = params.distance {
        candidates = enforce_distance(candidates, distance);
    }

    candidates.sort_by_key(|&(i, _, _)| i);
    candidates
        .into_iter()
        .map(|(i, value, prominence)| Peak {
            freq: freqs[start + i],
            value,
            prominence,
        })
        .collect()
}

/// Topographic prominence of the peak at `i`.
///
/// Each side walks outward until a strictly higher sample, tracking the
/// lowest saddle passed; a side with no higher ground uses its overall
/// minimum. The prominence is the height above the higher of the two
/// saddles.
fn prominence(y: &[f32], i: usize) -> f32 {
    let mut left_base = y[i];
    let mut j = i;
    while j > 0 {
        j -= 1;
        if y[j] > y[i] {
            break;
        }
        left_base = left_base.min(y[j]);
    }

    let mut right_base = y[i];
    let mut j = i;
    while j + 1 < y.len() {
        j += 1;
        if y[j] > y[i] {
            break;
        }
        right_base = right_base.min(y[j]);
    }

    y[i] - left_base.max(right_base)
}

/// Drop the lower of any two accepted peaks closer than `distance` bins
/// (equal heights keep the lower index).
fn enforce_distance(
    mut candidates: Vec<(usize, f32, f32)>,
    distance: usize,
) -> Vec<(usize, f32, f32)> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut kept: Vec<(usize, f32, f32)> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|other| candidate.0.abs_diff(other.0) >= distance)
        {
            kept.push(candidate);
        }
    }
    kept
}
