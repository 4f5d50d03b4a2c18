// Melodic planner: the key (and its chord vocabulary) at every tick.
//
// The performance starts in a random key of the circle of fifths and stays
// there while the entropy signal moves smoothly. A jump larger than
// `KEY_CHANGE_DELTA` between consecutive ticks modulates to a random
// neighbor on the circle. The whole sequence is precomputed once; the driver
// reads it by tick index.
//
// Vocabularies are built once per distinct key and shared by every tick in
// that key.

use crate::entropy::EntropySequence;
use crate::theory::{Chord, Key};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Entropy jump between consecutive ticks that triggers a modulation.
pub const KEY_CHANGE_DELTA: f64 = 0.4;

/// One key per tick plus the chord vocabulary of every key used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Key>", into = "Vec<Key>")]
pub struct MelodicPlan {
    keys: Vec<Key>,
    vocabularies: BTreeMap<Key, Vec<Chord>>,
}

impl MelodicPlan {
    /// Plan from a uniformly drawn starting key.
    pub fn build(entropy: &EntropySequence, rng: &mut impl Rng) -> Self {
        let all = Key::all();
        let initial = all[rng.random_range(0..all.len())];
        Self::build_from(initial, entropy, rng)
    }

    /// Plan from a given starting key.
    pub fn build_from(initial: Key, entropy: &EntropySequence, rng: &mut impl Rng) -> Self {
        let values = entropy.values();
        let mut keys = Vec::with_capacity(values.len());
        keys.push(initial);
        for t in 1..values.len() {
            let current = keys[t - 1];
            if (values[t] - values[t - 1]).abs() > KEY_CHANGE_DELTA {
                let options = current.neighbors();
                let next = options[rng.random_range(0..options.len())];
                debug!(tick = t, from = %current, to = %next, "key change");
                keys.push(next);
            } else {
                keys.push(current);
            }
        }
        Self::from(keys)
    }

    pub fn key(&self, tick: usize) -> Key {
        self.keys[tick]
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Chord vocabulary in force at `tick`.
    pub fn chords(&self, tick: usize) -> &[Chord] {
        self.vocabularies
            .get(&self.keys[tick])
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Ticks at which the key differs from the previous tick.
    pub fn modulations(&self) -> Vec<usize> {
        (1..self.keys.len())
            .filter(|&t| self.keys[t] != self.keys[t - 1])
            .collect()
    }
}

impl From<Vec<Key>> for MelodicPlan {
    fn from(keys: Vec<Key>) -> Self {
        let mut vocabularies = BTreeMap::new();
        for &key in &keys {
            vocabularies.entry(key).or_insert_with(|| key.chords());
        }
        MelodicPlan { keys, vocabularies }
    }
}

impl From<MelodicPlan> for Vec<Key> {
    fn from(plan: MelodicPlan) -> Self {
        plan.keys
    }
}
