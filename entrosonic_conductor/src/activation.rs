// Activation planner: which instruments play at every tick, and how loud.
//
// The matrix is built one column at a time. Column t looks at the entropy of
// the previous tick, asks the threshold partition how many instruments
// should be playing, and moves from column t-1 toward that count by
// switching on randomly chosen silent instruments or switching off randomly
// chosen playing ones. Instruments that are not picked keep their value, so
// the texture changes gradually instead of being redrawn every tick.
//
// A post-processing pass then shapes the raw values per instrument kind
// through an ordered rule table (first match wins), and a final pass keeps a
// minimal presence: whenever a column has at most one instrument playing, the
// anchor cloud is brought in quietly.
//
// Columns depend on their predecessor, so there is no cross-tick
// parallelism. All draws come from the injected generator.

use crate::entropy::EntropySequence;
use crate::instrument::{InstrumentId, InstrumentKind};
use crate::thresholds::Thresholds;
use rand::seq::IndexedRandom;
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Volume given to an instrument when the planner switches it on.
pub const SWITCH_ON_VOLUME: f64 = 0.4;

/// Volume of the anchor cloud when it fills an almost empty column.
pub const PRESENCE_FLOOR_VOLUME: f64 = 0.1;

/// Standard deviation of the shared column-0 draw.
const OPENING_STD: f64 = 0.1;

/// Volume targets indexed `[instrument][tick]`; 0 means off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationMatrix {
    rows: Vec<Vec<f64>>,
}

impl ActivationMatrix {
    /// An all-silent matrix.
    pub fn zeros(instruments: usize, ticks: usize) -> Self {
        ActivationMatrix {
            rows: vec![vec![0.0; ticks]; instruments],
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        debug_assert!(rows.windows(2).all(|w| w[0].len() == w[1].len()));
        ActivationMatrix { rows }
    }

    pub fn instruments(&self) -> usize {
        self.rows.len()
    }

    pub fn ticks(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn value(&self, id: InstrumentId, tick: usize) -> f64 {
        self.rows[id.index()][tick]
    }

    pub fn is_active(&self, id: InstrumentId, tick: usize) -> bool {
        self.value(id, tick) > 0.0
    }

    pub fn row(&self, id: InstrumentId) -> &[f64] {
        &self.rows[id.index()]
    }

    pub fn column(&self, tick: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[tick]).collect()
    }

    /// Instruments playing at `tick`, in registry order.
    pub fn active_ids(&self, tick: usize) -> Vec<InstrumentId> {
        (0..self.rows.len())
            .map(InstrumentId)
            .filter(|&id| self.is_active(id, tick))
            .collect()
    }

    pub fn active_count(&self, tick: usize) -> usize {
        self.rows.iter().filter(|r| r[tick] > 0.0).count()
    }

    fn set(&mut self, id: InstrumentId, tick: usize, value: f64) {
        self.rows[id.index()][tick] = value;
    }

    /// Plan the full matrix: raw column walk followed by post-processing.
    pub fn plan(
        entropy: &EntropySequence,
        thresholds: &Thresholds,
        kinds: &[InstrumentKind],
        rng: &mut impl Rng,
    ) -> Self {
        let mut matrix = Self::build_raw(entropy, thresholds, kinds.len(), rng);
        post_process(&mut matrix, kinds, rng);
        matrix
    }

    /// The column walk alone, before any per-kind shaping.
    pub fn build_raw(
        entropy: &EntropySequence,
        thresholds: &Thresholds,
        instruments: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let ticks = entropy.len();
        let mut matrix = Self::zeros(instruments, ticks);
        if instruments == 0 {
            return matrix;
        }

        // One draw shared by every instrument; negative draws are silence.
        let z: f64 = rng.sample(StandardNormal);
        let opening = ((z * OPENING_STD * 100.0).round() / 100.0).max(0.0);
        for id in (0..instruments).map(InstrumentId) {
            matrix.set(id, 0, opening);
        }

        for tick in 1..ticks {
            let target = thresholds.want(entropy.get(tick - 1)).min(instruments);
            let prev = matrix.column(tick - 1);
            let next = next_column(&prev, target, rng);
            for (i, v) in next.into_iter().enumerate() {
                matrix.set(InstrumentId(i), tick, v);
            }
        }
        matrix
    }
}

/// Move one column toward `target` active entries.
pub fn next_column(prev: &[f64], target: usize, rng: &mut impl Rng) -> Vec<f64> {
    let on: Vec<usize> = (0..prev.len()).filter(|&i| prev[i] > 0.0).collect();
    let off: Vec<usize> = (0..prev.len()).filter(|&i| prev[i] <= 0.0).collect();
    let mut next = prev.to_vec();
    if target > on.len() {
        for &i in off.choose_multiple(rng, target - on.len()) {
            next[i] = SWITCH_ON_VOLUME;
        }
    } else if target < on.len() {
        for &i in on.choose_multiple(rng, on.len() - target) {
            next[i] = 0.0;
        }
    }
    next
}

// ---------------------------------------------------------------------------
// Post-processing rules
// ---------------------------------------------------------------------------

/// One (predicate, transform) entry of the post-processing table.
pub struct PostRule {
    pub name: &'static str,
    /// Does the rule claim a nonzero cell of this kind with this value?
    pub applies: fn(InstrumentKind, f64) -> bool,
    pub transform: fn(f64, &mut dyn RngCore) -> f64,
    /// Rows claimed by this rule become the anchor cloud.
    pub marks_anchor: bool,
}

/// Ordered rule table; the first rule whose predicate holds wins.
pub static POST_RULES: [PostRule; 5] = [
    PostRule {
        name: "bass",
        applies: |kind, _| kind == InstrumentKind::Bass,
        transform: |_, _| 0.2,
        marks_anchor: false,
    },
    PostRule {
        name: "secondary cloud",
        applies: |kind, _| kind == InstrumentKind::CloudSecondary,
        transform: |_, _| 0.4,
        marks_anchor: false,
    },
    PostRule {
        name: "cloud",
        applies: |kind, _| kind == InstrumentKind::Cloud,
        transform: |_, _| 0.2,
        marks_anchor: true,
    },
    PostRule {
        name: "limiter",
        applies: |_, value| value > 0.6,
        transform: |_, _| 0.4,
        marks_anchor: false,
    },
    PostRule {
        name: "jitter",
        applies: |_, _| true,
        transform: |_, rng| {
            const LEVELS: [f64; 4] = [0.1, 0.2, 0.3, 0.4];
            LEVELS[rng.random_range(0..LEVELS.len())]
        },
        marks_anchor: false,
    },
];

/// Find the rule for a nonzero cell.
pub fn matching_rule(kind: InstrumentKind, value: f64) -> Option<&'static PostRule> {
    POST_RULES.iter().find(|r| (r.applies)(kind, value))
}

/// Shape every nonzero cell by kind, then apply the presence floor.
/// Returns the anchor cloud row, if any cloud ever played.
pub fn post_process(
    matrix: &mut ActivationMatrix,
    kinds: &[InstrumentKind],
    rng: &mut impl Rng,
) -> Option<InstrumentId> {
    let mut anchor = None;
    for (row, &kind) in kinds.iter().enumerate() {
        let id = InstrumentId(row);
        for tick in 0..matrix.ticks() {
            let value = matrix.value(id, tick);
            if value <= 0.0 {
                continue;
            }
            if let Some(rule) = matching_rule(kind, value) {
                matrix.set(id, tick, (rule.transform)(value, &mut *rng));
                if rule.marks_anchor {
                    anchor = Some(id);
                }
            }
        }
    }

    match anchor {
        Some(anchor_id) => {
            let mut floored = 0;
            for tick in 0..matrix.ticks() {
                if matrix.active_count(tick) <= 1 {
                    matrix.set(anchor_id, tick, PRESENCE_FLOOR_VOLUME);
                    floored += 1;
                }
            }
            debug!(anchor = %anchor_id, floored, "presence floor applied");
        }
        None => debug!("no cloud played; presence floor skipped"),
    }
    anchor
}
