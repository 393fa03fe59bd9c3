//! Frequency-axis pyramid construction.
//!
//! Level 0 is the band summary at native resolution; each coarser level
//! halves the bin count by contiguous pairwise aggregation until a level
//! fits in `MAX_COARSE_BINS`. The viewer picks the coarsest level that still
//! oversamples its window, so zoomed-out requests never touch the full axis.

use crate::artifacts::{SummaryTriple, TierLevel, TierPyramid};

/// Bin-count cap of the coarsest level; this, not a fixed level count,
/// terminates the pyramid.
pub const MAX_COARSE_BINS: usize = 256;

/// Build the pyramid for a finished band summary.
pub fn build_pyramid(summary: &SummaryTriple) -> TierPyramid {
    let mut levels = vec![TierLevel {
        n_bins: summary.max.len(),
        min: summary.min.clone(),
        max: summary.max.clone(),
        mean: summary.avg.clone(),
    }];

    while levels[levels.len() - 1].n_bins > MAX_COARSE_BINS {
        let coarser = halve(&levels[levels.len() - 1]);
        levels.push(coarser);
    }

    TierPyramid { levels }
}

/// Aggregate adjacent bin pairs; an unpaired trailing bin is copied through.
fn halve(level: &TierLevel) -> TierLevel {
    let n_bins = level.n_bins.div_ceil(2);
    let mut min = Vec::with_capacity(n_bins);
    let mut max = Vec::with_capacity(n_bins);
    let mut mean = Vec::with_capacity(n_bins);

    for j in 0..n_bins {
        let lo = 2 * j;
        let hi = 2 * j + 1;
        if hi < level.n_bins {
            min.push(level.min[lo].min(level.min[hi]));
            max.push(level.max[lo].max(level.max[hi]));
            // Bins are equal-width, so the pair mean is the bin mean.
            mean.push((level.mean[lo] + level.mean[hi]) / 2.0);
        } else {
            min.push(level.min[lo]);
            max.push(level.max[lo]);
            mean.push(level.mean[lo]);
        }
    }

    TierLevel {
        n_bins,
        min,
        max,
        mean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(n: usize) -> SummaryTriple {
        SummaryTriple {
            max: (0..n).map(|i| -40.0 + (i % 13) as f32).collect(),
            avg: (0..n).map(|i| -70.0 + (i % 13) as f32).collect(),
            min: (0..n).map(|i| -100.0 + (i % 13) as f32).collect(),
        }
    }

    #[test]
    fn test_small_summary_is_a_single_level() {
        let pyramid = build_pyramid(&summary(200));
        assert_eq!(pyramid.bin_counts(), vec![200]);
    }

    #[test]
    fn test_levels_halve_until_cap() {
        let pyramid = build_pyramid(&summary(1024));
        assert_eq!(pyramid.bin_counts(), vec![1024, 512, 256]);
    }

    #[test]
    fn test_odd_counts_ceil_divide() {
        let pyramid = build_pyramid(&summary(1025));
        assert_eq!(pyramid.bin_counts(), vec![1025, 513, 257, 129]);
    }

    #[test]
    fn test_coarser_levels_bound_finer_levels() {
        let pyramid = build_pyramid(&summary(1000));

        for k in 1..pyramid.levels.len() {
            let fine = &pyramid.levels[k - 1];
            let coarse = &pyramid.levels[k];
            assert_eq!(coarse.n_bins, fine.n_bins.div_ceil(2));

            for j in 0..coarse.n_bins {
                assert!(coarse.min[j] <= fine.min[2 * j]);
                assert!(coarse.max[j] >= fine.max[2 * j]);
                if 2 * j + 1 < fine.n_bins {
                    assert!(coarse.min[j] <= fine.min[2 * j + 1]);
                    assert!(coarse.max[j] >= fine.max[2 * j + 1]);
                }
            }
        }
    }

    #[test]
    fn test_pair_mean_is_exact() {
        let triple = SummaryTriple {
            max: vec![0.0; 512],
            avg: (0..512).map(|i| i as f32).collect(),
            min: vec![0.0; 512],
        };
        let pyramid = build_pyramid(&triple);

        let level1 = &pyramid.levels[1];
        assert_eq!(level1.mean[0], 0.5);
        assert_eq!(level1.mean[255], 510.5);
    }
}
