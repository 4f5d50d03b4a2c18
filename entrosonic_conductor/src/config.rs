// Data-driven performance configuration.
//
// Every tunable the conductor reads lives in `ConductorConfig`, loaded from
// JSON. Each group is its own struct with serde defaults, so a config file
// only needs the fields it changes: `{"pitch": {"middle": 55}}` is a valid
// file. The CLI applies its flags on top of a loaded config (see main.rs).
//
// Timing values are in seconds. `time_scale` multiplies every delay the
// driver sleeps, which makes sped-up dry runs possible without touching the
// musical proportions.

use crate::error::{ConductorError, Result};
use crate::samples::DirCatalog;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// How many of each instrument family to create.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentCounts {
    pub granular: usize,
    pub clouds: usize,
}

impl Default for InstrumentCounts {
    fn default() -> Self {
        Self {
            granular: 3,
            clouds: 1,
        }
    }
}

impl InstrumentCounts {
    /// Granular instruments, the bass, and clouds.
    pub fn total(&self) -> usize {
        self.granular + 1 + self.clouds
    }
}

/// Pitch windows, in MIDI note numbers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Center of the cloud window.
    pub middle: i32,
    /// Half-width of the cloud window at zero entropy.
    pub std: i32,
    /// Bass window, low bound inclusive.
    pub bass_low: i32,
    /// Bass window, high bound exclusive.
    pub bass_high: i32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            middle: 60,
            std: 8,
            bass_low: 48,
            bass_high: 64,
        }
    }
}

impl PitchConfig {
    /// Cloud window `[low, high)` for entropy `e`. It widens with entropy,
    /// twice as fast upward as downward.
    pub fn cloud_window(&self, e: f64) -> (i32, i32) {
        let spread = f64::from(self.std) * e;
        let low = self.middle - self.std - (2.0 * spread).floor() as i32;
        let high = self.middle + self.std + (4.0 * spread).floor() as i32;
        (low, high)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Per-step delay of activation fades and of the resume after a swap.
    pub reaction_secs: f64,
    /// Steps in every volume ramp.
    pub fade_steps: u32,
    /// Per-step delay of the mute before a sample swap.
    pub swap_step_secs: f64,
    /// Per-step delay of the bass mute and resume around a pitch change.
    pub retune_step_secs: f64,
    /// Multiplier applied to every sleep.
    pub time_scale: f64,
    /// Grain parameters are pushed on ticks divisible by this.
    pub grain_update_every: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reaction_secs: 0.1,
            fade_steps: 100,
            swap_step_secs: 0.01,
            retune_step_secs: 0.005,
            time_scale: 1.0,
            grain_update_every: 5,
        }
    }
}

impl TimingConfig {
    /// `secs` scaled by `time_scale`.
    pub fn scaled(&self, secs: f64) -> Duration {
        Duration::from_secs_f64((secs * self.time_scale).max(0.0))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Cut at entropy percentiles instead of evenly spaced values.
    pub normalize: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self { normalize: true }
    }
}

/// One sample directory per pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleDirs {
    pub melodic: PathBuf,
    pub vocal: PathBuf,
    pub percussive: PathBuf,
    pub aggressive: PathBuf,
}

impl Default for SampleDirs {
    fn default() -> Self {
        Self {
            melodic: PathBuf::from("Samples/Melodic/"),
            vocal: PathBuf::from("Samples/Voices/"),
            percussive: PathBuf::from("Samples/Beat/"),
            aggressive: PathBuf::from("Samples/Aggressive/"),
        }
    }
}

impl SampleDirs {
    pub fn catalog(&self) -> DirCatalog {
        DirCatalog::new(
            self.melodic.clone(),
            self.vocal.clone(),
            self.percussive.clone(),
            self.aggressive.clone(),
        )
    }
}

/// Top-level configuration of a performance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub instruments: InstrumentCounts,
    pub pitch: PitchConfig,
    pub timing: TimingConfig,
    pub thresholds: ThresholdConfig,
    pub samples: SampleDirs,
    /// Fixed generator seed; a random one is drawn when absent.
    pub seed: Option<u64>,
    /// Shuffle the entropy sequence before planning.
    pub shuffle: bool,
    /// Where to write the recording, if any.
    pub record: Option<PathBuf>,
}

impl ConductorConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConductorError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: ConductorConfig = serde_json::from_str(&text)
            .map_err(|e| ConductorError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// `load`, falling back to defaults (with a warning) on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("{err}; using default configuration");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.instruments.granular + self.instruments.clouds == 0 {
            return Err(ConductorError::Config(
                "at least one granular instrument or cloud is required".to_string(),
            ));
        }
        if self.pitch.bass_low >= self.pitch.bass_high {
            return Err(ConductorError::Config(format!(
                "empty bass window [{}, {})",
                self.pitch.bass_low, self.pitch.bass_high
            )));
        }
        if self.pitch.std < 0 {
            return Err(ConductorError::Config("pitch.std must be non-negative".to_string()));
        }
        let t = &self.timing;
        if t.fade_steps == 0 || t.grain_update_every == 0 {
            return Err(ConductorError::Config(
                "timing.fade_steps and timing.grain_update_every must be positive".to_string(),
            ));
        }
        let delays = [t.reaction_secs, t.swap_step_secs, t.retune_step_secs, t.time_scale];
        if delays.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(ConductorError::Config(
                "timing values must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            instruments: InstrumentCounts::default(),
            pitch: PitchConfig::default(),
            timing: TimingConfig::default(),
            thresholds: ThresholdConfig::default(),
            samples: SampleDirs::default(),
            seed: None,
            shuffle: true,
            record: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "entrosonic_config_test_{}_{}",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn test_default_config_serializes() {
        let config = ConductorConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored: ConductorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
        assert_eq!(restored.instruments.total(), 5);
        assert_eq!(restored.timing.fade_steps, 100);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{ "pitch": { "middle": 55 }, "instruments": { "clouds": 2 } }"#;
        let config: ConductorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pitch.middle, 55);
        assert_eq!(config.pitch.std, 8);
        assert_eq!(config.instruments.granular, 3);
        assert_eq!(config.instruments.clouds, 2);
        assert_eq!(config.timing.reaction_secs, 0.1);
        assert!(config.thresholds.normalize);
        assert!(config.shuffle);
    }

    #[test]
    fn test_cloud_window() {
        let pitch = PitchConfig::default();
        assert_eq!(pitch.cloud_window(0.0), (52, 68));
        // 2·8·0.5 = 8, 4·8·0.5 = 16
        assert_eq!(pitch.cloud_window(0.5), (44, 84));
        assert_eq!(pitch.cloud_window(1.0), (36, 100));
    }

    #[test]
    fn test_validate_rejects_zero_instruments() {
        let mut config = ConductorConfig::default();
        config.instruments.granular = 0;
        config.instruments.clouds = 0;
        assert!(matches!(config.validate(), Err(ConductorError::Config(_))));
    }

    #[test]
    fn test_load_and_fallback() {
        let path = unique_path("conductor.json");
        std::fs::write(&path, r#"{ "seed": 42, "timing": { "time_scale": 0.01 } }"#).unwrap();
        let config = ConductorConfig::load(&path).unwrap();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.timing.scaled(2.0), Duration::from_millis(20));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(ConductorConfig::load(&path), Err(ConductorError::Config(_))));
        assert_eq!(ConductorConfig::load_or_default(&path), ConductorConfig::default());
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            ConductorConfig::load_or_default(&unique_path("missing.json")),
            ConductorConfig::default()
        );
    }
}
