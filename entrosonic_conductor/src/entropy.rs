// The entropy sequence: the single scalar signal driving every decision.
//
// Values come from an external producer (local image entropy averaged over
// square sub-regions) and are treated here as an opaque, finite, ordered run
// of floats in [0, 1]. The sequence is validated once on construction so the
// planners can index it without further checks; an empty run is a fatal
// configuration error raised before any audio command is issued.

use crate::error::{ConductorError, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Immutable, validated run of entropy values in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct EntropySequence {
    values: Vec<f64>,
}

impl EntropySequence {
    /// Validate and wrap already-normalized values.
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(ConductorError::EmptyEntropy);
        }
        if let Some((index, &value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || !(0.0..=1.0).contains(*v))
        {
            return Err(ConductorError::InvalidEntropy { index, value });
        }
        Ok(EntropySequence { values })
    }

    /// Normalize raw, non-negative statistics the way the image producer
    /// does: `(x - min) / max` over the whole run. A run whose maximum is not
    /// positive maps to all zeros.
    pub fn from_raw(raw: &[f64]) -> Result<Self> {
        if raw.is_empty() {
            return Err(ConductorError::EmptyEntropy);
        }
        let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
        let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let values = if max > 0.0 {
            raw.iter().map(|x| ((x - min) / max).clamp(0.0, 1.0)).collect()
        } else {
            vec![0.0; raw.len()]
        };
        Self::new(values)
    }

    /// Load a JSON array of numbers. Values are validated, not normalized.
    pub fn load_json(path: &Path) -> Result<Self> {
        Self::new(read_json_array(path)?)
    }

    /// Load a JSON array of raw statistics and normalize it with `from_raw`.
    pub fn load_raw_json(path: &Path) -> Result<Self> {
        Self::from_raw(&read_json_array(path)?)
    }

    /// A uniformly shuffled copy, drawing from the injected generator.
    pub fn shuffled(&self, rng: &mut impl Rng) -> Self {
        let mut values = self.values.clone();
        values.shuffle(rng);
        EntropySequence { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false: construction rejects empty runs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, tick: usize) -> f64 {
        self.values[tick]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

fn read_json_array(path: &Path) -> Result<Vec<f64>> {
    let data = std::fs::read_to_string(path).map_err(|source| ConductorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConductorError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl TryFrom<Vec<f64>> for EntropySequence {
    type Error = ConductorError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<EntropySequence> for Vec<f64> {
    fn from(seq: EntropySequence) -> Self {
        seq.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entrosonic_prng::ConductorRng;

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            EntropySequence::new(vec![]),
            Err(ConductorError::EmptyEntropy)
        ));
        assert!(matches!(
            EntropySequence::from_raw(&[]),
            Err(ConductorError::EmptyEntropy)
        ));
    }

    #[test]
    fn test_rejects_out_of_range_and_nan() {
        let err = EntropySequence::new(vec![0.2, 1.5]).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidEntropy { index: 1, .. }));
        assert!(EntropySequence::new(vec![f64::NAN]).is_err());
    }

    #[test]
    fn test_from_raw_normalizes_against_max() {
        let seq = EntropySequence::from_raw(&[2.0, 4.0, 6.0]).unwrap();
        let expected = [0.0, 2.0 / 6.0, 4.0 / 6.0];
        for (v, e) in seq.values().iter().zip(expected) {
            assert!((v - e).abs() < 1e-12);
        }
        let flat = EntropySequence::from_raw(&[0.0, 0.0]).unwrap();
        assert_eq!(flat.values(), &[0.0, 0.0]);
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let seq = EntropySequence::new((0..20).map(|i| i as f64 / 20.0).collect()).unwrap();
        let a = seq.shuffled(&mut ConductorRng::new(5));
        let b = seq.shuffled(&mut ConductorRng::new(5));
        assert_eq!(a, b);
        let mut sorted = a.values().to_vec();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, seq.values());
    }

    #[test]
    fn test_load_json_files() {
        let dir = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = dir.join(format!("entrosonic_entropy_test_{nanos}.json"));

        std::fs::write(&path, "[1.0, 3.0, 5.0]").unwrap();
        assert!(matches!(
            EntropySequence::load_json(&path),
            Err(ConductorError::InvalidEntropy { index: 1, .. })
        ));
        let raw = EntropySequence::load_raw_json(&path).unwrap();
        assert_eq!(raw.values()[0], 0.0);
        assert!((raw.values()[2] - 0.8).abs() < 1e-12);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            EntropySequence::load_json(&path),
            Err(ConductorError::Parse { .. })
        ));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            EntropySequence::load_json(&path),
            Err(ConductorError::Read { .. })
        ));
    }

    #[test]
    fn test_serde_validates() {
        let seq: EntropySequence = serde_json::from_str("[0.1, 0.9, 0.2]").unwrap();
        assert_eq!(seq.len(), 3);
        assert!(serde_json::from_str::<EntropySequence>("[]").is_err());
        assert!(serde_json::from_str::<EntropySequence>("[2.0]").is_err());
    }
}
