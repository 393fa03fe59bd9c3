//! Windowed summary sampling over the tier pyramid.
//!
//! The viewer asks for a frequency window and a point budget; the engine
//! answers from the coarsest tier that still meets the budget inside the
//! window, then stride-decimates down to the cap. Zoomed-out requests never
//! touch the full-resolution axis.

use crate::artifacts::TierLevel;
use crate::store::BandStore;
use serde::Serialize;

/// Downsampled summary curves for one frequency window.
///
/// All four arrays have identical length and `freqs` is strictly increasing;
/// an unsatisfiable window yields empty arrays rather than an error.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryWindow {
    pub freqs: Vec<f64>,
    pub max: Vec<f32>,
    pub avg: Vec<f32>,
    pub min: Vec<f32>,
}

impl SummaryWindow {
    fn empty() -> Self {
        Self {
            freqs: Vec::new(),
            max: Vec::new(),
            avg: Vec::new(),
            min: Vec::new(),
        }
    }
}

/// Sample the summary curves within `[f0, f1]`, capped at `max_pts` points.
pub fn get_summary(
    store: &BandStore,
    f0: Option<f64>,
    f1: Option<f64>,
    max_pts: usize,
) -> SummaryWindow {
    let manifest = store.manifest();
    let lo = f0.unwrap_or(manifest.f_start).max(manifest.f_start);
    let hi = f1.unwrap_or(manifest.f_stop).min(manifest.f_stop);
    if max_pts == 0 || !(lo <= hi) {
        return SummaryWindow::empty();
    }

    // Coarsest level whose bin count inside the window still meets the
    // budget; if even full resolution cannot, serve full resolution.
    let levels = &store.tiers().levels;
    let mut chosen = 0;
    let mut range = bin_range(store, 0, lo, hi);
    for k in (1..levels.len()).rev() {
        let candidate = bin_range(store, k, lo, hi);
        if candidate.len() >= max_pts {
            chosen = k;
            range = candidate;
            break;
        }
    }

    let level = &levels[chosen];
    let bins: Vec<usize> = range.collect();
    if bins.is_empty() {
        return SummaryWindow::empty();
    }

    // Stride-decimate to the cap; index math keeps the picks strictly
    // increasing whenever bins.len() >= max_pts.
    let picks: Vec<usize> = if bins.len() <= max_pts {
        bins
    } else {
        (0..max_pts)
            .map(|i| bins[i * bins.len() / max_pts])
            .collect()
    };

    let mut window = SummaryWindow {
        freqs: Vec::with_capacity(picks.len()),
        max: Vec::with_capacity(picks.len()),
        avg: Vec::with_capacity(picks.len()),
        min: Vec::with_capacity(picks.len()),
    };
    for j in picks {
        window.freqs.push(bin_center(store, chosen, j));
        push_bin(&mut window, level, j);
    }
    window
}

fn push_bin(window: &mut SummaryWindow, level: &TierLevel, j: usize) {
    window.max.push(level.max[j]);
    window.avg.push(level.mean[j]);
    window.min.push(level.min[j]);
}

/// Center frequency of bin `j` at tier level `k`.
///
/// Level 0 bins are the canonical samples themselves; coarser bins sit at
/// the middle of their equal-width share of the linear axis.
fn bin_center(store: &BandStore, k: usize, j: usize) -> f64 {
    if k == 0 {
        return store.freqs()[j];
    }

    let manifest = store.manifest();
    let n_bins = store.tiers().levels[k].n_bins;
    let span = manifest.f_stop - manifest.f_start;
    manifest.f_start + span * (j as f64 + 0.5) / n_bins as f64
}

/// Indices of the bins at level `k` whose centers fall inside `[lo, hi]`.
fn bin_range(store: &BandStore, k: usize, lo: f64, hi: f64) -> std::ops::Range<usize> {
    let n_bins = store.tiers().levels[k].n_bins;

    // Bin centers are increasing in j, so both edges bisect.
    let first = partition(n_bins, |j| bin_center(store, k, j) < lo);
    let last = partition(n_bins, |j| bin_center(store, k, j) <= hi);
    first..last
}

/// First index in `0..n` where `pred` turns false.
fn partition(n: usize, pred: impl Fn(usize) -> bool) -> usize {
    let mut lo = 0;
    let mut hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
