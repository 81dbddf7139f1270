//! Dialogue lines, synthesized segments and the segment state machine.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

use crate::error::{PodcastError, SegmentError};
use crate::voice::VoiceProfile;

/// One line of the dialogue script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    /// Zero-based position in the script.
    pub index: usize,
    pub speaker_name: String,
    pub text: String,
}

impl DialogueLine {
    pub fn new(index: usize, speaker_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            index,
            speaker_name: speaker_name.into(),
            text: text.into(),
        }
    }
}

/// Lifecycle of a segment.
///
/// ```text
/// Pending -> Requested -> Downloaded -> Ready
///    ^           |             |          |
///    +-----------+ (retry)     v          v
///    |      Requested -> FailedPermanent <+
///    +----------------------------------> Ready (cache hit)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    Requested,
    Downloaded,
    Ready,
    FailedPermanent,
}

impl SegmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SegmentStatus::Ready | SegmentStatus::FailedPermanent)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SegmentStatus) -> bool {
        use SegmentStatus::*;
        matches!(
            (self, next),
            (Pending, Requested)
                | (Pending, Ready)
                | (Requested, Downloaded)
                | (Requested, Pending)
                | (Requested, FailedPermanent)
                | (Downloaded, Ready)
                | (Downloaded, FailedPermanent)
                | (Ready, FailedPermanent)
        )
    }
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::Requested => "requested",
            SegmentStatus::Downloaded => "downloaded",
            SegmentStatus::Ready => "ready",
            SegmentStatus::FailedPermanent => "failed_permanent",
        };
        f.write_str(name)
    }
}

/// One synthesized dialogue line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub speaker_name: String,
    pub source_text_hash: String,
    status: SegmentStatus,
    /// Raw provider audio in the content-addressed cache.
    pub raw_audio_ref: Option<PathBuf>,
    /// Normalized, faded audio in the run's segment directory.
    pub processed_audio_ref: Option<PathBuf>,
    pub duration_ms: u64,
    /// Number of synthesis calls issued for this segment in this run.
    pub attempt: u32,
    pub last_error: Option<SegmentError>,
    /// Raw audio was served from the cache without a synthesis call.
    pub from_cache: bool,
}

impl Segment {
    pub fn new(line: &DialogueLine, profile: &VoiceProfile) -> Self {
        Self {
            index: line.index,
            speaker_name: line.speaker_name.clone(),
            source_text_hash: source_text_hash(&line.text, profile),
            status: SegmentStatus::Pending,
            raw_audio_ref: None,
            processed_audio_ref: None,
            duration_ms: 0,
            attempt: 0,
            last_error: None,
            from_cache: false,
        }
    }

    pub fn status(&self) -> SegmentStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == SegmentStatus::Ready
    }

    /// Move to `next`, refusing transitions the state machine does not allow.
    pub fn transition(&mut self, next: SegmentStatus) -> Result<(), PodcastError> {
        if !self.status.can_transition_to(next) {
            return Err(PodcastError::InvalidTransition {
                index: self.index,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record a terminal failure. Segments already failed keep their first error.
    ///
    /// Every non-terminal state and `Ready` can fail; `Pending` has no direct
    /// edge, so it passes through `Requested`.
    pub fn fail(&mut self, error: SegmentError) {
        if self.status == SegmentStatus::FailedPermanent {
            return;
        }
        let routed = if self.status == SegmentStatus::Pending {
            self.transition(SegmentStatus::Requested)
        } else {
            Ok(())
        };
        if let Err(e) = routed.and_then(|_| self.transition(SegmentStatus::FailedPermanent)) {
            warn!(index = self.index, error = %e, "forcing segment into failed state");
            self.status = SegmentStatus::FailedPermanent;
        }
        self.last_error = Some(error);
    }
}

/// Content fingerprint of a line as it would be synthesized.
///
/// Covers the text and every voice parameter that changes the audio. The
/// speaker name is not part of the key.
pub fn source_text_hash(text: &str, profile: &VoiceProfile) -> String {
    let stability = profile.stability.to_bits().to_le_bytes();
    let similarity = profile.similarity_boost.to_bits().to_le_bytes();
    let style = profile.style.to_bits().to_le_bytes();
    let boost = [profile.speaker_boost as u8];
    let fields: [&[u8]; 6] = [
        text.as_bytes(),
        profile.provider_voice_id.as_bytes(),
        &stability,
        &similarity,
        &style,
        &boost,
    ];

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    format!("{:x}", hasher.finalize())
}
