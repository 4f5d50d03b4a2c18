// Audio engine boundary.
//
// The conductor never synthesizes sound. It drives an external engine
// through the `AudioEngine` trait: boot the instrument graph once, then send
// volume, pitch, sample, grain-parameter and output commands addressed by
// `InstrumentId`. Every command is synchronous and assumed to take effect
// immediately; a rejected command ends the performance.
//
// `CommandLogEngine` is the in-process implementation used for dry runs and
// tests. It validates commands the way a real engine would (boot first,
// known ids, volumes in [0, 1]), stamps each one with the time of a shared
// `Clock`, and on shutdown renders the log to a MIDI file when recording was
// requested (see midi.rs).

use crate::error::EngineError;
use crate::fade::Clock;
use crate::granular::GrainParams;
use crate::instrument::{InstrumentId, InstrumentSpec};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Command surface of a sound engine.
pub trait AudioEngine {
    /// Create the synthesis graph for `instruments`. Must precede every
    /// other command.
    fn boot(&mut self, instruments: &[InstrumentSpec]) -> Result<(), EngineError>;
    fn set_volume(&mut self, id: InstrumentId, volume: f64) -> Result<(), EngineError>;
    /// Replace the MIDI pitches an oscillator instrument plays.
    fn set_pitches(&mut self, id: InstrumentId, pitches: &[u8]) -> Result<(), EngineError>;
    /// Rebind the sample a granular instrument reads.
    fn set_sample(&mut self, id: InstrumentId, path: &Path) -> Result<(), EngineError>;
    fn set_grain_params(&mut self, id: InstrumentId, params: GrainParams)
    -> Result<(), EngineError>;
    fn start_output(&mut self, id: InstrumentId) -> Result<(), EngineError>;
    fn stop_output(&mut self, id: InstrumentId) -> Result<(), EngineError>;
    /// Capture the engine's mix to `path` until shutdown.
    fn start_recording(&mut self, path: &Path) -> Result<(), EngineError>;
    fn shutdown(&mut self) -> Result<(), EngineError>;
}

// ---------------------------------------------------------------------------
// Command log
// ---------------------------------------------------------------------------

/// One engine command as received.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Boot { instruments: usize },
    SetVolume(f64),
    SetPitches(Vec<u8>),
    SetSample(PathBuf),
    SetGrainParams(GrainParams),
    StartOutput,
    StopOutput,
    StartRecording(PathBuf),
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Boot { .. } => "boot",
            Command::SetVolume(_) => "set_volume",
            Command::SetPitches(_) => "set_pitches",
            Command::SetSample(_) => "set_sample",
            Command::SetGrainParams(_) => "set_grain_params",
            Command::StartOutput => "start_output",
            Command::StopOutput => "stop_output",
            Command::StartRecording(_) => "start_recording",
            Command::Shutdown => "shutdown",
        }
    }
}

/// A command stamped with the clock time it arrived at. Engine-wide commands
/// carry no instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedCommand {
    pub at: Duration,
    pub instrument: Option<InstrumentId>,
    pub command: Command,
}

/// Engine that records every command instead of making sound.
#[derive(Debug)]
pub struct CommandLogEngine<C: Clock> {
    clock: C,
    instruments: Option<Vec<InstrumentSpec>>,
    log: Vec<LoggedCommand>,
    recording: Option<PathBuf>,
    fail_on: Option<&'static str>,
}

impl<C: Clock> CommandLogEngine<C> {
    pub fn new(clock: C) -> Self {
        CommandLogEngine {
            clock,
            instruments: None,
            log: Vec::new(),
            recording: None,
            fail_on: None,
        }
    }

    /// Reject every command named `command` (see `Command::name`).
    pub fn failing_on(mut self, command: &'static str) -> Self {
        self.fail_on = Some(command);
        self
    }

    pub fn log(&self) -> &[LoggedCommand] {
        &self.log
    }

    pub fn into_log(self) -> Vec<LoggedCommand> {
        self.log
    }

    pub fn instruments(&self) -> &[InstrumentSpec] {
        self.instruments.as_deref().unwrap_or(&[])
    }

    /// Commands addressed to `id`, in arrival order.
    pub fn commands_for(&self, id: InstrumentId) -> impl Iterator<Item = &Command> + '_ {
        self.log
            .iter()
            .filter(move |c| c.instrument == Some(id))
            .map(|c| &c.command)
    }

    /// Last volume sent to `id`, 0 if none.
    pub fn volume(&self, id: InstrumentId) -> f64 {
        self.commands_for(id)
            .filter_map(|c| match c {
                Command::SetVolume(v) => Some(*v),
                _ => None,
            })
            .last()
            .unwrap_or(0.0)
    }

    pub fn recording(&self) -> Option<&Path> {
        self.recording.as_deref()
    }

    fn record(&mut self, instrument: Option<InstrumentId>, command: Command) -> Result<(), EngineError> {
        if self.fail_on == Some(command.name()) {
            return Err(EngineError::Rejected {
                instrument: instrument.unwrap_or(InstrumentId(0)),
                command: command.name(),
                reason: "injected failure".to_string(),
            });
        }
        let Some(specs) = &self.instruments else {
            if !matches!(command, Command::Boot { .. }) {
                return Err(EngineError::NotBooted);
            }
            return self.push(instrument, command);
        };
        if let Some(id) = instrument {
            if id.index() >= specs.len() {
                return Err(EngineError::UnknownInstrument(id));
            }
        }
        if let (Some(id), Command::SetVolume(v)) = (instrument, &command) {
            if !(0.0..=1.0).contains(v) {
                return Err(EngineError::Rejected {
                    instrument: id,
                    command: "set_volume",
                    reason: format!("volume {v} outside [0, 1]"),
                });
            }
        }
        self.push(instrument, command)
    }

    fn push(&mut self, instrument: Option<InstrumentId>, command: Command) -> Result<(), EngineError> {
        self.log.push(LoggedCommand {
            at: self.clock.now(),
            instrument,
            command,
        });
        Ok(())
    }
}

impl<C: Clock> AudioEngine for CommandLogEngine<C> {
    fn boot(&mut self, instruments: &[InstrumentSpec]) -> Result<(), EngineError> {
        self.record(
            None,
            Command::Boot {
                instruments: instruments.len(),
            },
        )?;
        self.instruments = Some(instruments.to_vec());
        debug!(instruments = instruments.len(), "command log engine booted");
        Ok(())
    }

    fn set_volume(&mut self, id: InstrumentId, volume: f64) -> Result<(), EngineError> {
        self.record(Some(id), Command::SetVolume(volume))
    }

    fn set_pitches(&mut self, id: InstrumentId, pitches: &[u8]) -> Result<(), EngineError> {
        self.record(Some(id), Command::SetPitches(pitches.to_vec()))
    }

    fn set_sample(&mut self, id: InstrumentId, path: &Path) -> Result<(), EngineError> {
        self.record(Some(id), Command::SetSample(path.to_path_buf()))
    }

    fn set_grain_params(
        &mut self,
        id: InstrumentId,
        params: GrainParams,
    ) -> Result<(), EngineError> {
        self.record(Some(id), Command::SetGrainParams(params))
    }

    fn start_output(&mut self, id: InstrumentId) -> Result<(), EngineError> {
        self.record(Some(id), Command::StartOutput)
    }

    fn stop_output(&mut self, id: InstrumentId) -> Result<(), EngineError> {
        self.record(Some(id), Command::StopOutput)
    }

    fn start_recording(&mut self, path: &Path) -> Result<(), EngineError> {
        self.record(None, Command::StartRecording(path.to_path_buf()))?;
        self.recording = Some(path.to_path_buf());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.record(None, Command::Shutdown)?;
        if let Some(path) = &self.recording {
            crate::midi::write_midi(&self.log, self.instruments(), path)?;
            info!(path = %path.display(), commands = self.log.len(), "recording written");
        }
        Ok(())
    }
}
