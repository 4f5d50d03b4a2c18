// Entrosonic Conductor
//
// An entropy-driven conductor for a multi-instrument granular performance.
// A run of entropy values (one per tick) decides how many instruments play,
// which key the piece is in, which sample pools the granular instruments read
// from and how long each tick lasts. The conductor plans all of this up front
// and then drives an external audio engine through a narrow command trait.
//
// Architecture:
// - theory.rs: Notes, keys, the circle of fifths, chord vocabularies, pitch
//   quantization
// - entropy.rs: Validated entropy sequence (load, normalize, shuffle)
// - thresholds.rs: Percentile or uniform partition of entropy into
//   instrument counts
// - instrument.rs: Instrument kinds, ids, registry and per-instrument state
// - activation.rs: Activation matrix (column walk + kind-based post rules)
// - melodic.rs: Key walk on the circle of fifths
// - granular.rs: Per-tick sample pool and grain parameters
// - samples.rs: Sample catalogs and the in-key check for sample names
// - plan.rs: The complete, serializable performance plan
// - engine.rs: `AudioEngine` trait and the command-log engine
// - fade.rs: Volume ramps, clocks and the stop flag
// - midi.rs: MIDI rendering of an engine command log
// - driver.rs: Tick-by-tick playback of a plan against an engine
// - config.rs: JSON configuration with per-field defaults
// - error.rs: Error types
//
// All randomness comes from one injected generator, so a seed reproduces a
// performance exactly (see the `entrosonic_prng` crate).

pub mod activation;
pub mod config;
pub mod driver;
pub mod engine;
pub mod entropy;
pub mod error;
pub mod fade;
pub mod granular;
pub mod instrument;
pub mod melodic;
pub mod midi;
pub mod plan;
pub mod samples;
pub mod theory;
pub mod thresholds;
