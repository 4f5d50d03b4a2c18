// Playback driver: walks the plan tick by tick and turns it into engine
// commands.
//
// The driver is the single mutator of a performance. It owns the engine, the
// clock, the sample catalog, the instrument registry and the plan, and every
// change goes through `&mut self`; there is no locking. Per tick, in order:
//
//   1. activation edges: fade out and stop instruments that fell silent, start
//      and fade in instruments that came on (skipped at tick 0);
//   2. melodic read: the chord vocabulary of the tick's key;
//   3. cloud/bass retune: one chord drawn from the vocabulary, quantized into
//      the cloud window for the clouds and into the bass window for the bass,
//      which is muted around its pitch change;
//   4. granular rotation: stale or off-key samples are swapped for fresh
//      in-key ones from the tick's pool;
//   5. grain parameters, every `grain_update_every` ticks;
//   6. wait, on the driver clock.
//
// Fades are synchronous ramps serviced in registry order, so one tick can
// take many seconds of wall time. The stop flag is checked between fade
// steps and while waiting; a set flag ends the run with `Cancelled`, after
// which `perform` issues best-effort stops.
//
// Every random draw comes from the generator passed in, in a fixed order, so
// a seeded run against `ManualClock` is fully reproducible.

use crate::config::ConductorConfig;
use crate::engine::AudioEngine;
use crate::error::{ConductorError, Result};
use crate::fade::{Clock, Fade, StopFlag, run_fade, stop_requested};
use crate::granular::SamplePool;
use crate::instrument::{InstrumentId, InstrumentKind, InstrumentRegistry};
use crate::plan::PerformancePlan;
use crate::samples::{SampleCatalog, check_still_in_key, pick_replacement};
use crate::theory::{Chord, quantize_pitches};
use rand::Rng;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Volume every instrument but the bass fades in to at start.
pub const START_VOLUME: f64 = 0.3;

/// Volume the bass fades in to at start.
pub const BASS_START_VOLUME: f64 = 0.1;

/// Longest uninterrupted sleep while waiting between ticks.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Pitches drawn for one tick.
#[derive(Debug, Clone, PartialEq)]
struct Voicing {
    clouds: Vec<u8>,
    bass: Option<u8>,
}

pub struct Driver<E: AudioEngine, C: Clock, S: SampleCatalog> {
    engine: E,
    clock: C,
    catalog: S,
    registry: InstrumentRegistry,
    plan: PerformancePlan,
    config: ConductorConfig,
    stop: StopFlag,
}

impl<E: AudioEngine, C: Clock, S: SampleCatalog> Driver<E, C, S> {
    /// Fails if `config` does not validate or the plan and registry
    /// disagree on the instrument count.
    pub fn new(
        engine: E,
        clock: C,
        catalog: S,
        registry: InstrumentRegistry,
        plan: PerformancePlan,
        config: ConductorConfig,
    ) -> Result<Self> {
        config.validate()?;
        if plan.activation.instruments() != registry.len() {
            return Err(ConductorError::Config(format!(
                "plan has {} instrument rows, registry has {} instruments",
                plan.activation.instruments(),
                registry.len()
            )));
        }
        Ok(Driver {
            engine,
            clock,
            catalog,
            registry,
            plan,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share an externally owned stop flag (e.g. set from a Ctrl-C handler).
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> StopFlag {
        Arc::clone(&self.stop)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    pub fn plan(&self) -> &PerformancePlan {
        &self.plan
    }

    /// Start, play every tick, stop. On failure or cancellation the
    /// instruments are still stopped before the error is returned.
    pub fn perform(&mut self, rng: &mut impl Rng) -> Result<()> {
        let outcome = self.start(rng).and_then(|()| self.run(rng));
        match outcome {
            Ok(()) => self.stop(),
            Err(err) => {
                if let Err(stop_err) = self.stop() {
                    warn!("stop after failed performance also failed: {stop_err}");
                }
                Err(err)
            }
        }
    }

    /// Boot the engine, bind initial samples and pitches, and fade every
    /// instrument in.
    pub fn start(&mut self, rng: &mut impl Rng) -> Result<()> {
        info!(instruments = self.registry.len(), "booting engine");
        self.engine.boot(self.registry.specs())?;
        if let Some(path) = self.config.record.clone() {
            self.engine.start_recording(&path)?;
            info!(path = %path.display(), "recording started");
        }

        let chords = self.plan.melodic.chords(0).to_vec();
        for id in self.registry.ids_of(InstrumentKind::Granular) {
            let pool = if rng.random_bool(0.5) {
                SamplePool::Melodic
            } else {
                SamplePool::Vocal
            };
            let candidates = self.catalog.candidates(pool, &chords)?;
            match candidates.choose(rng) {
                Some(name) => self.bind_sample(id, pool, name.clone())?,
                None => warn!(
                    instrument = %self.registry.spec(id).name,
                    %pool,
                    "no in-key sample to start with"
                ),
            }
        }

        let voicing = self.draw_voicing(0, &chords, rng);
        if let (Some(bass), Some(pitch)) = (self.registry.bass(), voicing.bass) {
            self.set_pitches(bass, vec![pitch])?;
        }
        for id in self.clouds() {
            let pitches = self.cloud_pitches(id, &voicing.clouds);
            if !pitches.is_empty() {
                self.set_pitches(id, pitches)?;
            }
        }

        for id in self.registry.ids() {
            let target = match self.registry.kind(id) {
                InstrumentKind::Bass => BASS_START_VOLUME,
                _ => START_VOLUME,
            };
            self.sound(id, target, self.config.timing.reaction_secs)?;
        }
        info!("performance started");
        Ok(())
    }

    /// Play every tick of the plan.
    pub fn run(&mut self, rng: &mut impl Rng) -> Result<()> {
        for t in 0..self.plan.ticks() {
            if stop_requested(&self.stop) {
                return Err(ConductorError::Cancelled);
            }
            self.tick(t, rng)?;
        }
        info!(ticks = self.plan.ticks(), "performance complete");
        Ok(())
    }

    /// Service tick `t` and wait out its duration.
    pub fn tick(&mut self, t: usize, rng: &mut impl Rng) -> Result<()> {
        let e = self.plan.entropy.get(t);
        let active = self.plan.activation.active_count(t);
        info!(tick = t, entropy = e, key = %self.plan.melodic.key(t), active, "tick");
        if tracing::enabled!(tracing::Level::DEBUG) {
            let playing: Vec<&str> = self
                .plan
                .activation
                .active_ids(t)
                .into_iter()
                .map(|id| self.registry.spec(id).name.as_str())
                .collect();
            debug!(tick = t, ?playing, "instruments playing");
        }

        if t > 0 {
            self.apply_edges(t)?;
        }
        let chords = self.plan.melodic.chords(t).to_vec();
        self.retune(t, &chords, rng)?;
        self.rotate_samples(t, &chords, rng)?;
        if t % self.config.timing.grain_update_every == 0 {
            self.push_grain_params(t)?;
        }

        let wait_secs = if rng.random_bool(0.5) {
            e * 10.0
        } else {
            2.0 + (1.0 - e) * 10.0
        };
        debug!(tick = t, wait_secs, "waiting");
        self.wait(self.config.timing.scaled(wait_secs))
    }

    /// Best-effort: stop every sounding instrument and shut the engine down.
    /// Every instrument is attempted; the first failure is returned.
    pub fn stop(&mut self) -> Result<()> {
        let mut first_err = None;
        for id in self.registry.ids() {
            if !self.registry.state(id).sounding {
                continue;
            }
            match self.engine.stop_output(id) {
                Ok(()) => {
                    let state = self.registry.state_mut(id);
                    state.sounding = false;
                    state.volume = 0.0;
                }
                Err(err) => {
                    warn!(instrument = %id, "stop failed: {err}");
                    first_err.get_or_insert(ConductorError::from(err));
                }
            }
        }
        if let Err(err) = self.engine.shutdown() {
            warn!("engine shutdown failed: {err}");
            first_err.get_or_insert(ConductorError::from(err));
        }
        info!("performance stopped");
        first_err.map_or(Ok(()), Err)
    }

    // -----------------------------------------------------------------------
    // Per-tick steps
    // -----------------------------------------------------------------------

    fn apply_edges(&mut self, t: usize) -> Result<()> {
        let reaction = self.config.timing.reaction_secs;
        for id in self.registry.ids() {
            let prev = self.plan.activation.value(id, t - 1);
            let now = self.plan.activation.value(id, t);
            if prev > 0.0 && now == 0.0 {
                debug!(tick = t, instrument = %self.registry.spec(id).name, "switching off");
                self.silence(id, reaction)?;
            } else if prev == 0.0 && now > 0.0 {
                debug!(tick = t, instrument = %self.registry.spec(id).name, volume = now, "switching on");
                self.sound(id, now, reaction)?;
            }
        }
        Ok(())
    }

    fn retune(&mut self, t: usize, chords: &[Chord], rng: &mut impl Rng) -> Result<()> {
        let voicing = self.draw_voicing(t, chords, rng);

        // Mute, retune, resume to the planned level. A planned level of 0
        // leaves the bass muted with its output stopped.
        if let (Some(bass), Some(pitch)) = (self.registry.bass(), voicing.bass) {
            let retune = self.config.timing.retune_step_secs;
            if self.registry.state(bass).sounding {
                self.silence(bass, retune)?;
            }
            self.set_pitches(bass, vec![pitch])?;
            if self.plan.activation.is_active(bass, t) {
                self.sound(bass, self.plan.activation.value(bass, t), retune)?;
            }
        }

        for id in self.clouds() {
            if !self.plan.activation.is_active(id, t) {
                continue;
            }
            let pitches = self.cloud_pitches(id, &voicing.clouds);
            if !pitches.is_empty() {
                self.set_pitches(id, pitches)?;
            }
        }
        Ok(())
    }

    fn rotate_samples(&mut self, t: usize, chords: &[Chord], rng: &mut impl Rng) -> Result<()> {
        let step = *self.plan.granular.step(t);
        for id in self.registry.ids_of(InstrumentKind::Granular) {
            // Drawn for every instrument so the stream does not depend on
            // which ones are active.
            let limit: u32 = rng.random_range(2..=6);
            if !self.plan.activation.is_active(id, t) {
                continue;
            }

            let state = self.registry.state(id);
            let stale = state.reuse_count > limit;
            let off_key =
                step.pool.follows_key() && !check_still_in_key(state.history.current(), chords);
            if !(stale || off_key) {
                self.registry.state_mut(id).reuse_count += 1;
                continue;
            }

            let replacement =
                pick_replacement(&self.catalog, step.pool, chords, &state.history, rng)?;
            let name = &self.registry.spec(id).name;
            match replacement {
                Some(sample) => {
                    debug!(tick = t, instrument = %name, pool = %step.pool, %sample, stale, off_key, "rotating sample");
                    self.silence(id, self.config.timing.swap_step_secs)?;
                    self.bind_sample(id, step.pool, sample)?;
                    self.sound(
                        id,
                        self.plan.activation.value(id, t),
                        self.config.timing.reaction_secs,
                    )?;
                }
                None => {
                    debug!(tick = t, instrument = %name, pool = %step.pool, "sample pool exhausted; keeping current sample");
                }
            }
        }
        Ok(())
    }

    fn push_grain_params(&mut self, t: usize) -> Result<()> {
        let params = self.plan.granular.step(t).params;
        for id in self.registry.ids_of(InstrumentKind::Granular) {
            if self.plan.activation.is_active(id, t) {
                self.engine.set_grain_params(id, params)?;
            }
        }
        Ok(())
    }

    fn wait(&self, duration: Duration) -> Result<()> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if stop_requested(&self.stop) {
                return Err(ConductorError::Cancelled);
            }
            let slice = remaining.min(WAIT_SLICE);
            self.clock.sleep(slice);
            remaining -= slice;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn clouds(&self) -> Vec<InstrumentId> {
        self.registry
            .specs()
            .iter()
            .filter(|s| s.kind.is_cloud())
            .map(|s| s.id)
            .collect()
    }

    /// One chord drawn from `chords`, quantized for the clouds (full window
    /// set) and for the bass (lowest pitch of one random chord note).
    fn draw_voicing(&self, t: usize, chords: &[Chord], rng: &mut impl Rng) -> Voicing {
        let Some(chord) = chords.choose(rng) else {
            return Voicing {
                clouds: Vec::new(),
                bass: None,
            };
        };
        let pitch = &self.config.pitch;
        let (low, high) = pitch.cloud_window(self.plan.entropy.get(t));
        let clouds = quantize_pitches(chord.notes(), low, high);
        let bass = chord
            .notes()
            .choose(rng)
            .and_then(|&note| quantize_pitches(&[note], pitch.bass_low, pitch.bass_high).first().copied());
        Voicing { clouds, bass }
    }

    fn cloud_pitches(&self, id: InstrumentId, full: &[u8]) -> Vec<u8> {
        match self.registry.kind(id) {
            InstrumentKind::CloudSecondary => full.iter().take(1).copied().collect(),
            _ => full.to_vec(),
        }
    }

    fn set_pitches(&mut self, id: InstrumentId, pitches: Vec<u8>) -> Result<()> {
        self.engine.set_pitches(id, &pitches)?;
        self.registry.state_mut(id).pitches = pitches;
        Ok(())
    }

    fn bind_sample(&mut self, id: InstrumentId, pool: SamplePool, name: String) -> Result<()> {
        let path = self.catalog.path(pool, &name);
        self.engine.set_sample(id, &path)?;
        let state = self.registry.state_mut(id);
        state.history.push(name);
        state.reuse_count = 0;
        Ok(())
    }

    fn ramp(&mut self, id: InstrumentId, from: f64, to: f64, step_secs: f64) -> Result<()> {
        let timing = &self.config.timing;
        let fade = Fade::new(
            from,
            to,
            self.clock.now(),
            timing.fade_steps,
            timing.scaled(step_secs),
        );
        run_fade(&mut self.engine, &self.clock, &self.stop, id, &fade)?;
        self.registry.state_mut(id).volume = to;
        Ok(())
    }

    /// Fade `id` out from its current volume, then stop its output.
    fn silence(&mut self, id: InstrumentId, step_secs: f64) -> Result<()> {
        let from = self.registry.state(id).volume;
        self.ramp(id, from, 0.0, step_secs)?;
        self.engine.stop_output(id)?;
        self.registry.state_mut(id).sounding = false;
        Ok(())
    }

    /// Start the output of `id` and fade it in from silence to `target`.
    fn sound(&mut self, id: InstrumentId, target: f64, step_secs: f64) -> Result<()> {
        self.engine.start_output(id)?;
        self.registry.state_mut(id).sounding = true;
        self.ramp(id, 0.0, target, step_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationMatrix;
    use crate::engine::{Command, CommandLogEngine};
    use crate::entropy::EntropySequence;
    use crate::fade::ManualClock;
    use crate::granular::GranularPlan;
    use crate::melodic::MelodicPlan;
    use crate::samples::MemoryCatalog;
    use crate::theory::{Key, Mode, Note};
    use crate::thresholds::Thresholds;
    use entrosonic_prng::ConductorRng;

    type TestDriver = Driver<CommandLogEngine<ManualClock>, ManualClock, MemoryCatalog>;

    fn c_major_catalog() -> MemoryCatalog {
        MemoryCatalog::new()
            .with_pool(
                SamplePool::Melodic,
                ["m-CEG-1.wav", "m-DFA-1.wav", "m-G-1.wav", "m-EGB-1.wav", "m-FACE-1.wav"],
            )
            .with_pool(SamplePool::Vocal, ["v-CEG-1.wav", "v-A-1.wav", "v-GBDF-1.wav"])
            .with_pool(SamplePool::Percussive, ["p-C-1.wav", "p-G-1.wav"])
            .with_pool(SamplePool::Aggressive, ["a-B-1.wav"])
    }

    /// A hand-built plan: one granular, the bass, one cloud, all in C major.
    fn driver(rows: Vec<Vec<f64>>, entropy: Vec<f64>, catalog: MemoryCatalog) -> TestDriver {
        let mut config = ConductorConfig::default();
        config.timing.fade_steps = 4;
        try_driver(rows, entropy, catalog, config).unwrap()
    }

    fn try_driver(
        rows: Vec<Vec<f64>>,
        entropy: Vec<f64>,
        catalog: MemoryCatalog,
        config: ConductorConfig,
    ) -> Result<TestDriver> {
        let registry = InstrumentRegistry::with_kinds(&[
            InstrumentKind::Granular,
            InstrumentKind::Bass,
            InstrumentKind::Cloud,
        ]);
        let entropy = EntropySequence::new(entropy).unwrap();
        let thresholds = Thresholds::from_cuts(vec![0.0, 0.33, 0.66]);
        let mut rng = ConductorRng::new(0);
        let c = Key::new(Note::C, Mode::Major);
        let plan = PerformancePlan {
            melodic: MelodicPlan::from(vec![c; entropy.len()]),
            granular: GranularPlan::build(&entropy, &thresholds, &mut rng),
            activation: ActivationMatrix::from_rows(rows),
            anchor: Some(InstrumentId(2)),
            thresholds,
            entropy,
        };
        let clock = ManualClock::new();
        Driver::new(
            CommandLogEngine::new(clock.clone()),
            clock,
            catalog,
            registry,
            plan,
            config,
        )
    }

    fn count(driver: &TestDriver, id: usize, name: &str) -> usize {
        driver
            .engine()
            .commands_for(InstrumentId(id))
            .filter(|c| c.name() == name)
            .count()
    }

    #[test]
    fn test_new_rejects_bad_config_and_mismatched_plan() {
        let mut config = ConductorConfig::default();
        config.timing.grain_update_every = 0;
        let err = try_driver(vec![vec![0.4; 2]; 3], vec![0.5; 2], MemoryCatalog::new(), config);
        assert!(matches!(err, Err(ConductorError::Config(_))));

        let err = try_driver(
            vec![vec![0.4; 2]; 2],
            vec![0.5; 2],
            MemoryCatalog::new(),
            ConductorConfig::default(),
        );
        assert!(matches!(err, Err(ConductorError::Config(_))));
    }

    #[test]
    fn test_start_fades_everything_in() {
        let mut d = driver(vec![vec![0.4; 3]; 3], vec![0.5; 3], c_major_catalog());
        d.start(&mut ConductorRng::new(1)).unwrap();
        assert_eq!(d.engine().volume(InstrumentId(0)), START_VOLUME);
        assert_eq!(d.engine().volume(InstrumentId(1)), BASS_START_VOLUME);
        assert_eq!(d.engine().volume(InstrumentId(2)), START_VOLUME);
        assert!(d.registry().ids().all(|id| d.registry().state(id).sounding));
        // The granular instrument got an in-key sample.
        let current = d.registry().state(InstrumentId(0)).history.current();
        assert!(check_still_in_key(current, d.plan().melodic.chords(0)));
        assert_eq!(count(&d, 0, "set_sample"), 1);
        // Bass pitch lies in its window.
        let bass = &d.registry().state(InstrumentId(1)).pitches;
        assert_eq!(bass.len(), 1);
        assert!((48..64).contains(&bass[0]));
    }

    #[test]
    fn test_start_without_samples_is_not_an_error() {
        let mut d = driver(vec![vec![0.4; 2]; 3], vec![0.5; 2], MemoryCatalog::new());
        d.start(&mut ConductorRng::new(1)).unwrap();
        assert!(d.registry().state(InstrumentId(0)).history.is_empty());
        assert_eq!(count(&d, 0, "set_sample"), 0);
    }

    #[test]
    fn test_edges_fade_out_and_in() {
        let rows = vec![
            vec![0.4, 0.0, 0.3],
            vec![0.0, 0.2, 0.2],
            vec![0.2, 0.2, 0.2],
        ];
        let mut d = driver(rows, vec![0.5; 3], c_major_catalog());
        let mut rng = ConductorRng::new(2);
        d.start(&mut rng).unwrap();
        d.tick(0, &mut rng).unwrap();
        d.tick(1, &mut rng).unwrap();
        // Granular fell silent: its output was stopped.
        assert!(!d.registry().state(InstrumentId(0)).sounding);
        assert_eq!(d.engine().volume(InstrumentId(0)), 0.0);
        // Bass came on at its planned level.
        assert_eq!(d.engine().volume(InstrumentId(1)), 0.2);
        d.tick(2, &mut rng).unwrap();
        assert!(d.registry().state(InstrumentId(0)).sounding);
        assert_eq!(d.engine().volume(InstrumentId(0)), 0.3);
    }

    #[test]
    fn test_inactive_bass_is_muted() {
        let rows = vec![vec![0.4; 6], vec![0.0; 6], vec![0.2; 6]];
        let mut d = driver(rows, vec![0.5; 6], c_major_catalog());
        let mut rng = ConductorRng::new(3);
        d.start(&mut rng).unwrap();
        // Start fades the bass in regardless of its plan.
        assert_eq!(d.engine().volume(InstrumentId(1)), BASS_START_VOLUME);
        d.run(&mut rng).unwrap();
        assert_eq!(d.engine().volume(InstrumentId(1)), 0.0);
        assert!(!d.registry().state(InstrumentId(1)).sounding);
        // Muted once, then only retuned.
        assert_eq!(count(&d, 1, "stop_output"), 1);
        assert_eq!(count(&d, 1, "start_output"), 1);
        assert_eq!(count(&d, 1, "set_pitches"), 7);
    }

    #[test]
    fn test_active_bass_is_bracketed() {
        let rows = vec![vec![0.4; 2], vec![0.2; 2], vec![0.2; 2]];
        let mut d = driver(rows, vec![0.5; 2], c_major_catalog());
        let mut rng = ConductorRng::new(3);
        d.start(&mut rng).unwrap();
        d.tick(1, &mut rng).unwrap();
        let tail: Vec<&str> = d
            .engine()
            .commands_for(InstrumentId(1))
            .map(Command::name)
            .collect();
        let stop = tail.iter().rposition(|&n| n == "stop_output").unwrap();
        assert_eq!(tail[stop + 1], "set_pitches");
        assert_eq!(tail[stop + 2], "start_output");
        assert_eq!(d.engine().volume(InstrumentId(1)), 0.2);
    }

    #[test]
    fn test_cloud_pitches_follow_window() {
        let rows = vec![vec![0.0; 1], vec![0.0; 1], vec![0.2; 1]];
        let mut d = driver(rows, vec![0.0], c_major_catalog());
        let mut rng = ConductorRng::new(4);
        d.start(&mut rng).unwrap();
        d.tick(0, &mut rng).unwrap();
        let pitches = &d.registry().state(InstrumentId(2)).pitches;
        assert!(!pitches.is_empty());
        assert!(pitches.iter().all(|p| (52..68).contains(p)));
    }

    #[test]
    fn test_grain_params_only_on_update_ticks() {
        let rows = vec![vec![0.4; 6], vec![0.2; 6], vec![0.2; 6]];
        let mut d = driver(rows, vec![0.5; 6], c_major_catalog());
        let mut rng = ConductorRng::new(5);
        d.start(&mut rng).unwrap();
        d.run(&mut rng).unwrap();
        // Ticks 0 and 5.
        assert_eq!(count(&d, 0, "set_grain_params"), 2);
        assert_eq!(count(&d, 1, "set_grain_params"), 0);
    }

    #[test]
    fn test_rotation_respects_history_and_limit() {
        let ticks = 40;
        let rows = vec![vec![0.4; ticks], vec![0.2; ticks], vec![0.2; ticks]];
        let mut d = driver(rows, vec![0.5; ticks], c_major_catalog());
        let mut rng = ConductorRng::new(6);
        d.start(&mut rng).unwrap();
        d.run(&mut rng).unwrap();
        let swaps = count(&d, 0, "set_sample");
        assert!(swaps > 2, "only {swaps} swaps in {ticks} ticks");
        // A swap never rebinds a sample still in the recent history.
        let samples: Vec<String> = d
            .engine()
            .commands_for(InstrumentId(0))
            .filter_map(|c| match c {
                Command::SetSample(p) => p.file_name().map(|n| n.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        for w in samples.windows(2) {
            assert_ne!(w[0], w[1]);
        }
        assert!(d.registry().state(InstrumentId(0)).reuse_count <= 7);
    }

    #[test]
    fn test_exhausted_pool_keeps_sample() {
        // A single in-key sample: after the first bind nothing fresh is left.
        let catalog = MemoryCatalog::new()
            .with_pool(SamplePool::Melodic, ["m-CEG-1.wav"])
            .with_pool(SamplePool::Vocal, ["v-CEG-1.wav"])
            .with_pool(SamplePool::Percussive, ["p-CEG-1.wav"])
            .with_pool(SamplePool::Aggressive, ["a-CEG-1.wav"]);
        let ticks = 30;
        let rows = vec![vec![0.4; ticks], vec![0.2; ticks], vec![0.2; ticks]];
        let mut d = driver(rows, vec![0.5; ticks], catalog);
        let mut rng = ConductorRng::new(7);
        d.perform(&mut rng).unwrap();
        // At most one bind per pool plus the initial one.
        assert!(count(&d, 0, "set_sample") <= 5);
    }

    #[test]
    fn test_cancel_stops_instruments() {
        let rows = vec![vec![0.4; 3], vec![0.2; 3], vec![0.2; 3]];
        let mut d = driver(rows, vec![0.5; 3], c_major_catalog());
        let flag = d.stop_flag();
        let mut rng = ConductorRng::new(8);
        d.start(&mut rng).unwrap();
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = d.run(&mut rng).unwrap_err();
        assert!(matches!(err, ConductorError::Cancelled));
        d.stop().unwrap();
        assert!(d.registry().ids().all(|id| !d.registry().state(id).sounding));
        let last = d.engine().log().last().unwrap();
        assert_eq!(last.command, Command::Shutdown);
    }

    #[test]
    fn test_engine_failure_propagates() {
        let rows = vec![vec![0.4; 3], vec![0.2; 3], vec![0.2; 3]];
        let mut d = driver(rows, vec![0.5; 3], c_major_catalog());
        d.engine = CommandLogEngine::new(d.clock.clone()).failing_on("set_grain_params");
        let err = d.perform(&mut ConductorRng::new(9)).unwrap_err();
        assert!(matches!(err, ConductorError::Engine(_)));
        // Stop still ran.
        assert!(d.engine().log().iter().any(|c| c.command == Command::Shutdown));
    }
}
