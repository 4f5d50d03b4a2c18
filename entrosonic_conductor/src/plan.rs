// The precomputed score of a performance.
//
// Everything musical is decided before the first sound: the threshold
// partition, the activation matrix, the key at every tick and the granular
// targets. The driver only reads this plan. Keeping it as one serializable
// value lets a run be inspected (`--plan-out`) or replayed.
//
// Draw order from the generator is fixed (activation, then keys, then
// granular pools), so a seed reproduces the whole plan.

use crate::activation::{ActivationMatrix, post_process};
use crate::entropy::EntropySequence;
use crate::error::{ConductorError, Result};
use crate::granular::GranularPlan;
use crate::instrument::{InstrumentId, InstrumentKind};
use crate::melodic::MelodicPlan;
use crate::thresholds::Thresholds;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformancePlan {
    pub entropy: EntropySequence,
    pub thresholds: Thresholds,
    pub activation: ActivationMatrix,
    /// Cloud that keeps a minimal presence in near-empty columns.
    pub anchor: Option<InstrumentId>,
    pub melodic: MelodicPlan,
    pub granular: GranularPlan,
}

impl PerformancePlan {
    /// Plan a performance of `entropy` for instruments of the given kinds
    /// (registry order).
    pub fn build(
        entropy: EntropySequence,
        kinds: &[InstrumentKind],
        normalize: bool,
        rng: &mut impl Rng,
    ) -> Self {
        let thresholds = Thresholds::partition(&entropy, kinds.len(), normalize);
        let mut activation = ActivationMatrix::build_raw(&entropy, &thresholds, kinds.len(), rng);
        let anchor = post_process(&mut activation, kinds, rng);
        let melodic = MelodicPlan::build(&entropy, rng);
        let granular = GranularPlan::build(&entropy, &thresholds, rng);
        info!(
            ticks = entropy.len(),
            instruments = kinds.len(),
            modulations = melodic.modulations().len(),
            "performance planned"
        );
        PerformancePlan {
            entropy,
            thresholds,
            activation,
            anchor,
            melodic,
            granular,
        }
    }

    pub fn ticks(&self) -> usize {
        self.entropy.len()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ConductorError::Encode)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(|source| ConductorError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entrosonic_prng::ConductorRng;

    fn kinds() -> Vec<InstrumentKind> {
        vec![
            InstrumentKind::Granular,
            InstrumentKind::Granular,
            InstrumentKind::Bass,
            InstrumentKind::Cloud,
        ]
    }

    fn entropy() -> EntropySequence {
        EntropySequence::new(vec![0.1, 0.7, 0.2, 0.95, 0.4, 0.05, 0.6, 0.3]).unwrap()
    }

    #[test]
    fn test_plan_dimensions() {
        let plan = PerformancePlan::build(entropy(), &kinds(), true, &mut ConductorRng::new(3));
        assert_eq!(plan.ticks(), 8);
        assert_eq!(plan.activation.instruments(), 4);
        assert_eq!(plan.activation.ticks(), 8);
        assert_eq!(plan.melodic.len(), 8);
        assert_eq!(plan.granular.len(), 8);
        assert_eq!(plan.thresholds.len(), 4);
    }

    #[test]
    fn test_same_seed_same_plan() {
        let a = PerformancePlan::build(entropy(), &kinds(), true, &mut ConductorRng::new(11));
        let b = PerformancePlan::build(entropy(), &kinds(), true, &mut ConductorRng::new(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_plan_json_roundtrip() {
        let plan = PerformancePlan::build(entropy(), &kinds(), false, &mut ConductorRng::new(5));
        let json = plan.to_json().unwrap();
        let back: PerformancePlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.melodic, plan.melodic);
        assert_eq!(back.anchor, plan.anchor);
        assert_eq!(back.ticks(), plan.ticks());
        for t in 0..plan.ticks() {
            assert_eq!(back.activation.active_ids(t), plan.activation.active_ids(t));
            assert_eq!(back.granular.step(t).pool, plan.granular.step(t).pool);
        }
    }

    #[test]
    fn test_save_reports_write_errors() {
        let plan = PerformancePlan::build(entropy(), &kinds(), true, &mut ConductorRng::new(2));
        let dir = std::env::temp_dir().join(format!(
            "entrosonic_missing_dir_{}",
            std::process::id()
        ));
        let path = dir.join("plan.json");
        let err = plan.save(&path).unwrap_err();
        assert!(matches!(err, ConductorError::Write { .. }));
        assert!(err.to_string().starts_with("failed to write"));

        let ok = std::env::temp_dir().join(format!("entrosonic_plan_{}.json", std::process::id()));
        plan.save(&ok).unwrap();
        assert!(std::fs::read_to_string(&ok).unwrap().contains("activation"));
        std::fs::remove_file(&ok).unwrap();
    }
}
