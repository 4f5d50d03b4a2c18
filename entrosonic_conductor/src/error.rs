// Error types for the conductor.
//
// Two layers: `EngineError` is whatever the audio engine reports when a
// command fails, and `ConductorError` is everything that can stop a
// performance. Sample exhaustion and degenerate thresholds are not errors;
// they are logged and skipped.

use crate::instrument::InstrumentId;
use std::path::PathBuf;
use thiserror::Error;

/// A command rejected by the audio engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not booted")]
    NotBooted,
    #[error("unknown instrument {0}")]
    UnknownInstrument(InstrumentId),
    #[error("engine rejected {command} for instrument {instrument}: {reason}")]
    Rejected {
        instrument: InstrumentId,
        command: &'static str,
        reason: String,
    },
    #[error("engine i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that aborts planning or playback.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("entropy sequence is empty")]
    EmptyEntropy,
    #[error("entropy value {value} at index {index} is outside [0, 1]")]
    InvalidEntropy { index: usize, value: f64 },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode JSON: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("sample catalog error: {0}")]
    Catalog(#[source] std::io::Error),
    #[error("audio engine failure: {0}")]
    Engine(#[from] EngineError),
    #[error("performance cancelled")]
    Cancelled,
}

pub type Result<T, E = ConductorError> = std::result::Result<T, E>;
