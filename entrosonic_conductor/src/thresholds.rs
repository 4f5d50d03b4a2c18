// Threshold partition: maps an entropy value to a target instrument count.
//
// The unit interval is cut into `k` bands (one per instrument). With
// normalization on, the cuts follow the entropy distribution (percentiles),
// so each band is visited about equally often over the run; with it off, the
// cuts are evenly spaced and ignore the data.
//
// Percentile ties are expected on skewed inputs: the duplicated band simply
// becomes unreachable. That reduces the variety of instrument counts but is
// not an error.
//
// Consumed by activation.rs (`want`) and granular.rs (`band_below`).

use crate::entropy::EntropySequence;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ascending (non-strict) cut points, one per instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thresholds {
    cuts: Vec<f64>,
}

impl Thresholds {
    /// Build `k` cut points for the sequence. The percentile step is the
    /// integer `100 / k`, so three instruments cut at the 0th, 33rd and 66th
    /// percentiles.
    pub fn partition(entropy: &EntropySequence, k: usize, normalize: bool) -> Self {
        if k == 0 {
            return Thresholds { cuts: Vec::new() };
        }
        let step = (100 / k) as f64;
        let cuts: Vec<f64> = if normalize {
            let mut sorted = entropy.values().to_vec();
            sorted.sort_by(f64::total_cmp);
            (0..k).map(|i| percentile(&sorted, i as f64 * step)).collect()
        } else {
            (0..k).map(|i| i as f64 * step / 100.0).collect()
        };

        let thresholds = Thresholds { cuts };
        let dupes = thresholds.cuts.windows(2).filter(|w| w[0] == w[1]).count();
        if dupes > 0 {
            debug!(
                cuts = ?thresholds.cuts,
                "{dupes} duplicate cut(s); those activity bands are unreachable"
            );
        }
        thresholds
    }

    /// Wrap explicit cut points (must be non-decreasing).
    pub fn from_cuts(cuts: Vec<f64>) -> Self {
        debug_assert!(cuts.windows(2).all(|w| w[0] <= w[1]));
        Thresholds { cuts }
    }

    pub fn cuts(&self) -> &[f64] {
        &self.cuts
    }

    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// Target number of active instruments for entropy `e`.
    ///
    /// Above the top cut: every instrument. Strictly inside band
    /// `(cut[i], cut[i+1])`: `i`. Anything else (below the first cut, or
    /// exactly on a cut): 0.
    pub fn want(&self, e: f64) -> usize {
        let k = self.cuts.len();
        let Some(&top) = self.cuts.last() else {
            return 0;
        };
        if e > top {
            return k;
        }
        self.cuts
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] < e && e < w[1])
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0)
            .min(k)
    }

    /// Index of the highest cut strictly below `e`, or 0 if none.
    pub fn band_below(&self, e: f64) -> usize {
        self.cuts.iter().rposition(|&c| e > c).unwrap_or(0)
    }
}

/// Percentile with linear interpolation between closest ranks over an
/// already sorted, non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
