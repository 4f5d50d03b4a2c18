// Instrument registry: who plays, and the mutable state the driver keeps
// for each of them.
//
// Instruments are addressed by a stable `InstrumentId` (their row in the
// activation matrix) and tagged with an `InstrumentKind`. Static facts live
// in `InstrumentSpec`; everything the driver mutates tick by tick (volume,
// output state, sample history, reuse counter, pitch set) lives
// in a parallel `InstrumentState` array indexed by the same id.
//
// Registry order is fixed: granular instruments, then one bass, then clouds.
// Fades within a tick are serviced in this order.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Number of recently used samples a granular instrument avoids.
pub const SAMPLE_HISTORY_LEN: usize = 5;

/// Row index of an instrument in the registry and the activation matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub usize);

impl InstrumentId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Sample-reading grain cloud with rotating samples.
    Granular,
    /// Low sine voice following the chord root.
    Bass,
    /// Sustained ambient texture playing the full quantized chord.
    Cloud,
    /// Thinner delayed texture playing a single pitch of the chord.
    CloudSecondary,
}

impl InstrumentKind {
    pub fn is_cloud(self) -> bool {
        matches!(self, InstrumentKind::Cloud | InstrumentKind::CloudSecondary)
    }
}

/// Grain-engine voicing for a granular instrument. The engine decides what
/// each sounds like; the conductor only picks one per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GranularFlavor {
    /// Short filtered grains with a drifting read position.
    Particle,
    /// Long overlapping grains read by a slow phasor.
    Granule,
}

/// Static description of one instrument, handed to the engine at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub id: InstrumentId,
    pub kind: InstrumentKind,
    pub name: String,
    /// Set for granular instruments only.
    pub flavor: Option<GranularFlavor>,
}

/// Bounded FIFO of the most recent sample names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleHistory {
    names: VecDeque<String>,
}

impl SampleHistory {
    pub fn push(&mut self, name: String) {
        if self.names.len() == SAMPLE_HISTORY_LEN {
            self.names.pop_front();
        }
        self.names.push_back(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Most recently pushed name: the sample currently bound.
    pub fn current(&self) -> Option<&str> {
        self.names.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Per-instrument runtime state mutated by the driver.
#[derive(Debug, Clone, Default)]
pub struct InstrumentState {
    /// Last volume sent to the engine.
    pub volume: f64,
    /// Whether output has been started and not stopped since.
    pub sounding: bool,
    pub history: SampleHistory,
    /// Ticks since the sample was last replaced.
    pub reuse_count: u32,
    /// Last pitch set sent to the engine.
    pub pitches: Vec<u8>,
}

/// All instruments of a performance, created once at initialization.
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    specs: Vec<InstrumentSpec>,
    states: Vec<InstrumentState>,
}

impl InstrumentRegistry {
    /// Build `granular` granular instruments (each Particle or Granule with
    /// equal odds), one bass, and `clouds` clouds (Cloud with probability
    /// 0.6, CloudSecondary otherwise).
    pub fn build(granular: usize, clouds: usize, rng: &mut impl Rng) -> Self {
        let mut kinds = Vec::with_capacity(granular + clouds + 1);
        for i in 0..granular {
            let flavor = if rng.random_bool(0.5) {
                GranularFlavor::Particle
            } else {
                GranularFlavor::Granule
            };
            kinds.push((InstrumentKind::Granular, format!("grn_{i}"), Some(flavor)));
        }
        kinds.push((InstrumentKind::Bass, "bass".to_string(), None));
        for i in 0..clouds {
            if rng.random_bool(0.6) {
                kinds.push((InstrumentKind::Cloud, format!("cloud_{i}"), None));
            } else {
                kinds.push((InstrumentKind::CloudSecondary, format!("cloud_second_{i}"), None));
            }
        }
        Self::from_kinds(kinds)
    }

    /// Build a registry with explicit kinds, in the given order.
    pub fn with_kinds(kinds: &[InstrumentKind]) -> Self {
        let mut counters = [0usize; 4];
        let named = kinds
            .iter()
            .map(|&kind| {
                let slot = kind as usize;
                let n = counters[slot];
                counters[slot] += 1;
                let (name, flavor) = match kind {
                    InstrumentKind::Granular => (format!("grn_{n}"), Some(GranularFlavor::Particle)),
                    InstrumentKind::Bass => ("bass".to_string(), None),
                    InstrumentKind::Cloud => (format!("cloud_{n}"), None),
                    InstrumentKind::CloudSecondary => (format!("cloud_second_{n}"), None),
                };
                (kind, name, flavor)
            })
            .collect();
        Self::from_kinds(named)
    }

    fn from_kinds(kinds: Vec<(InstrumentKind, String, Option<GranularFlavor>)>) -> Self {
        let specs: Vec<InstrumentSpec> = kinds
            .into_iter()
            .enumerate()
            .map(|(i, (kind, name, flavor))| InstrumentSpec {
                id: InstrumentId(i),
                kind,
                name,
                flavor,
            })
            .collect();
        let states = vec![InstrumentState::default(); specs.len()];
        InstrumentRegistry { specs, states }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[InstrumentSpec] {
        &self.specs
    }

    pub fn spec(&self, id: InstrumentId) -> &InstrumentSpec {
        &self.specs[id.index()]
    }

    pub fn kind(&self, id: InstrumentId) -> InstrumentKind {
        self.specs[id.index()].kind
    }

    pub fn kinds(&self) -> Vec<InstrumentKind> {
        self.specs.iter().map(|s| s.kind).collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = InstrumentId> + use<> {
        (0..self.specs.len()).map(InstrumentId)
    }

    /// Ids of every instrument of `kind`, in registry order.
    pub fn ids_of(&self, kind: InstrumentKind) -> Vec<InstrumentId> {
        self.specs.iter().filter(|s| s.kind == kind).map(|s| s.id).collect()
    }

    pub fn bass(&self) -> Option<InstrumentId> {
        self.ids_of(InstrumentKind::Bass).first().copied()
    }

    pub fn state(&self, id: InstrumentId) -> &InstrumentState {
        &self.states[id.index()]
    }

    pub fn state_mut(&mut self, id: InstrumentId) -> &mut InstrumentState {
        &mut self.states[id.index()]
    }
}
