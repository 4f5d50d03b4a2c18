// Granular parameter planner: per-tick sample pool and grain settings.
//
// Low entropy favors the melodic and vocal pools, high entropy the
// percussive and aggressive ones; grains get shorter, sparser and drier as
// entropy rises. One pool is drawn per tick and shared by every granular
// instrument, so a single series serves all granular rows.
//
// The plan is precomputed before playback. driver.rs reads the pool when a
// granular instrument rotates its sample, and pushes the grain parameters to
// the engine every few ticks.

use crate::entropy::EntropySequence;
use crate::thresholds::Thresholds;
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four sample directories a granular instrument can read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplePool {
    Melodic,
    Vocal,
    Percussive,
    Aggressive,
}

impl SamplePool {
    pub const ALL: [SamplePool; 4] = [
        SamplePool::Melodic,
        SamplePool::Vocal,
        SamplePool::Percussive,
        SamplePool::Aggressive,
    ];

    /// Pitched pools: a sample that drifts out of the current chord
    /// vocabulary must be replaced even if it is fresh.
    pub fn follows_key(self) -> bool {
        matches!(self, SamplePool::Melodic | SamplePool::Vocal)
    }

    /// Draw weights for entropy `e`, normalized to sum to 1.
    pub fn weights(e: f64) -> [f64; 4] {
        let raw = [1.0 - e, 1.0 - e, e, e];
        let total: f64 = raw.iter().sum();
        raw.map(|w| w / total)
    }

    /// Weighted draw of a pool for entropy `e`.
    pub fn draw(e: f64, rng: &mut impl Rng) -> SamplePool {
        match WeightedIndex::new(Self::weights(e)) {
            Ok(dist) => Self::ALL[dist.sample(rng)],
            // Only reachable for entropy outside [0, 1].
            Err(_) => Self::ALL[rng.random_range(0..Self::ALL.len())],
        }
    }
}

impl fmt::Display for SamplePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplePool::Melodic => "melodic",
            SamplePool::Vocal => "vocal",
            SamplePool::Percussive => "percussive",
            SamplePool::Aggressive => "aggressive",
        };
        f.write_str(name)
    }
}

/// Grain settings pushed to a granular instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrainParams {
    /// Grain duration in seconds.
    pub duration: f64,
    /// Grains per second.
    pub density: f64,
    /// Reverb wet/dry balance in [0, 1].
    pub reverb_wet: f64,
}

impl GrainParams {
    pub fn for_entropy(e: f64) -> Self {
        GrainParams {
            duration: 2.0 - e / 2.0,
            density: 150.0 - (10.0 + e) * e,
            reverb_wet: 1.0 - e,
        }
    }
}

/// One tick of the granular plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GranularStep {
    pub pool: SamplePool,
    /// Highest threshold band strictly below the tick's entropy.
    pub band: usize,
    pub params: GrainParams,
}

/// Per-tick granular targets shared by every granular instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GranularPlan {
    steps: Vec<GranularStep>,
}

impl GranularPlan {
    pub fn build(entropy: &EntropySequence, thresholds: &Thresholds, rng: &mut impl Rng) -> Self {
        let steps = entropy
            .values()
            .iter()
            .map(|&e| GranularStep {
                pool: SamplePool::draw(e, rng),
                band: thresholds.band_below(e),
                params: GrainParams::for_entropy(e),
            })
            .collect();
        GranularPlan { steps }
    }

    pub fn step(&self, tick: usize) -> &GranularStep {
        &self.steps[tick]
    }

    pub fn steps(&self) -> &[GranularStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entrosonic_prng::ConductorRng;

    #[test]
    fn test_weights_normalized() {
        let w = SamplePool::weights(0.25);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((w[0] - 0.375).abs() < 1e-12);
        assert!((w[2] - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_extreme_entropy_draws() {
        let mut rng = ConductorRng::new(3);
        for _ in 0..500 {
            assert!(SamplePool::draw(0.0, &mut rng).follows_key());
            assert!(!SamplePool::draw(1.0, &mut rng).follows_key());
        }
    }

    #[test]
    fn test_draw_follows_weights() {
        let mut rng = ConductorRng::new(17);
        let n = 20_000;
        let mut counts = [0usize; 4];
        for _ in 0..n {
            counts[SamplePool::draw(0.25, &mut rng) as usize] += 1;
        }
        let expected = SamplePool::weights(0.25);
        for (count, w) in counts.iter().zip(expected) {
            let share = *count as f64 / n as f64;
            assert!((share - w).abs() < 0.02, "{counts:?}");
        }
    }

    #[test]
    fn test_grain_params_formulas() {
        let p = GrainParams::for_entropy(0.5);
        assert!((p.duration - 1.75).abs() < 1e-12);
        assert!((p.density - (150.0 - 10.5 * 0.5)).abs() < 1e-12);
        assert!((p.reverb_wet - 0.5).abs() < 1e-12);
        let calm = GrainParams::for_entropy(0.0);
        assert_eq!(calm.duration, 2.0);
        assert_eq!(calm.density, 150.0);
        assert_eq!(calm.reverb_wet, 1.0);
    }

    #[test]
    fn test_plan_one_step_per_tick() {
        let entropy = EntropySequence::new(vec![0.1, 0.5, 0.9, 0.2]).unwrap();
        let thresholds = Thresholds::from_cuts(vec![0.0, 0.33, 0.66]);
        let plan = GranularPlan::build(&entropy, &thresholds, &mut ConductorRng::new(8));
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.step(0).band, 0);
        assert_eq!(plan.step(1).band, 1);
        assert_eq!(plan.step(2).band, 2);
        assert_eq!(plan.step(2).params, GrainParams::for_entropy(0.9));

        let again = GranularPlan::build(&entropy, &thresholds, &mut ConductorRng::new(8));
        assert_eq!(plan, again);
    }
}
