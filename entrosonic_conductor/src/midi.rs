// MIDI rendering of an engine command log.
//
// Turns the commands a performance sent to the engine into a Standard MIDI
// File so a dry run can be auditioned in any sequencer. Each instrument gets
// its own track. Oscillator instruments (bass and clouds) become notes: every
// pitch in their current set sounds while their output is started, and a
// pitch change ends the old notes and starts the new ones. Granular
// instruments have no pitch, so their sample swaps appear as markers.
//
// Command times map to ticks at a fixed 120 BPM. Uses the `midly` crate;
// output is SMF Format 1 (multi-track).

use crate::engine::{Command, LoggedCommand};
use crate::instrument::{InstrumentKind, InstrumentSpec};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;
use std::time::Duration;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

const TEMPO_BPM: u32 = 120;

const NOTE_VELOCITY: u8 = 80;

/// General MIDI programs (0-based) per oscillator kind.
fn program(kind: InstrumentKind) -> Option<u8> {
    match kind {
        InstrumentKind::Bass => Some(32),
        InstrumentKind::Cloud => Some(89),
        InstrumentKind::CloudSecondary => Some(91),
        InstrumentKind::Granular => None,
    }
}

/// Render `log` and write it to `path`.
pub fn write_midi(
    log: &[LoggedCommand],
    instruments: &[InstrumentSpec],
    path: &Path,
) -> std::io::Result<()> {
    let smf = log_to_smf(log, instruments);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    std::fs::write(path, &buf)
}

fn to_ticks(at: Duration) -> u32 {
    let ticks_per_sec = f64::from(TICKS_PER_QUARTER) * f64::from(TEMPO_BPM) / 60.0;
    (at.as_secs_f64() * ticks_per_sec).round() as u32
}

/// Channel for the i-th instrument, skipping the percussion channel.
fn channel(i: usize) -> u4 {
    let c = (i % 15) as u8;
    u4::new(if c >= 9 { c + 1 } else { c })
}

/// Convert a command log to an in-memory SMF.
fn log_to_smf<'a>(log: &'a [LoggedCommand], instruments: &'a [InstrumentSpec]) -> Smf<'a> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo track
    let tempo_microseconds = 60_000_000 / TEMPO_BPM;
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    let end_tick = log.last().map_or(0, |c| to_ticks(c.at));
    for (i, spec) in instruments.iter().enumerate() {
        let events = instrument_events(log, spec, channel(i), end_tick);
        smf.tracks.push(to_track(events));
    }
    smf
}

/// Absolute-tick events for one instrument.
fn instrument_events<'a>(
    log: &'a [LoggedCommand],
    spec: &'a InstrumentSpec,
    channel: u4,
    end_tick: u32,
) -> Vec<(u32, TrackEventKind<'a>)> {
    let mut events = vec![(0, TrackEventKind::Meta(MetaMessage::TrackName(spec.name.as_bytes())))];
    if let Some(program) = program(spec.kind) {
        events.push((
            0,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(program),
                },
            },
        ));
    }

    let note = |key: u8, on: bool| TrackEventKind::Midi {
        channel,
        message: if on {
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(NOTE_VELOCITY),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }
        },
    };

    let mut output_on = false;
    let mut pitches: &[u8] = &[];
    let mut sounding: Vec<u8> = Vec::new();

    for entry in log.iter().filter(|c| c.instrument == Some(spec.id)) {
        let tick = to_ticks(entry.at);
        match &entry.command {
            Command::StartOutput => {
                output_on = true;
                for &p in pitches {
                    if !sounding.contains(&p) {
                        events.push((tick, note(p, true)));
                        sounding.push(p);
                    }
                }
            }
            Command::StopOutput => {
                output_on = false;
                for p in sounding.drain(..) {
                    events.push((tick, note(p, false)));
                }
            }
            Command::SetPitches(next) => {
                pitches = next.as_slice();
                if output_on {
                    for p in sounding.drain(..) {
                        events.push((tick, note(p, false)));
                    }
                    for &p in pitches {
                        if !sounding.contains(&p) {
                            events.push((tick, note(p, true)));
                            sounding.push(p);
                        }
                    }
                }
            }
            Command::SetSample(path) => {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                events.push((tick, TrackEventKind::Meta(MetaMessage::Marker(name.as_bytes()))));
            }
            _ => {}
        }
    }

    // End notes still sounding when the log stops.
    for p in sounding {
        events.push((end_tick, note(p, false)));
    }
    events
}

/// Turn absolute-tick events (in time order) into a delta-timed track.
fn to_track<'a>(events: Vec<(u32, TrackEventKind<'a>)>) -> Track<'a> {
    let mut track: Track<'a> = Vec::with_capacity(events.len() + 1);
    let mut last_tick = 0;
    for (tick, kind) in events {
        track.push(TrackEvent {
            delta: u28::new(tick.saturating_sub(last_tick)),
            kind,
        });
        last_tick = last_tick.max(tick);
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}
