//! Error types for the podcast audio pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::segment::SegmentStatus;

/// Run-level errors. Configuration problems and mix-plan violations abort the
/// whole run; everything that can go wrong with a single line is captured in a
/// [`SegmentError`] instead.
#[derive(Error, Debug)]
pub enum PodcastError {
    #[error("Voice already registered for speaker '{0}'")]
    DuplicateVoice(String),

    #[error("No voice registered for speaker '{0}'")]
    UnknownVoice(String),

    #[error("Invalid voice profile for '{speaker}': {reason}")]
    InvalidVoiceProfile { speaker: String, reason: String },

    #[error("Invalid dialogue script: {0}")]
    InvalidScript(String),

    #[error(
        "Incomplete mix plan: expected {expected} segments, missing indices {missing:?}, duplicate indices {duplicates:?}"
    )]
    IncompleteMixPlan {
        expected: usize,
        missing: Vec<usize>,
        duplicates: Vec<usize>,
    },

    #[error("Segment {index} is not ready for mixing (status: {status})")]
    SegmentNotReady { index: usize, status: SegmentStatus },

    #[error("Invalid state transition for segment {index}: {from} -> {to}")]
    InvalidTransition {
        index: usize,
        from: SegmentStatus,
        to: SegmentStatus,
    },

    #[error("Corrupt audio: {0}")]
    CorruptAudio(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

/// Outcome of a failed call into the external speech synthesizer.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthesisError {
    /// Timeouts, rate limits and transient provider failures.
    #[error("Retryable synthesis error: {0}")]
    Retryable(String),

    /// Bad credentials or parameters. Never retried.
    #[error("Permanent synthesis error: {0}")]
    Permanent(String),
}

impl SynthesisError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SynthesisError::Retryable(_))
    }
}

/// Classified failure recorded on a segment.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentError {
    #[error("Synthesis failed permanently: {message}")]
    PermanentSynthesis { message: String },

    #[error("Synthesis still failing after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("Corrupt audio: {message}")]
    CorruptAudio { message: String },

    #[error("Storage failure: {message}")]
    Storage { message: String },

    #[error("Worker task aborted: {message}")]
    Aborted { message: String },
}

impl From<PodcastError> for SegmentError {
    fn from(e: PodcastError) -> Self {
        match e {
            PodcastError::CorruptAudio(message) => SegmentError::CorruptAudio { message },
            PodcastError::Wav(e) => SegmentError::CorruptAudio {
                message: e.to_string(),
            },
            other => SegmentError::Storage {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T, E = PodcastError> = std::result::Result<T, E>;
