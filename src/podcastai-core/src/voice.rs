//! Voice profiles and the speaker → voice registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PodcastError;

/// Synthesis profile for one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Speaker name as it appears in the script.
    pub speaker_name: String,
    /// Provider-specific voice identifier.
    pub provider_voice_id: String,
    /// Lower values give more expressive variation.
    pub stability: f32,
    /// How closely the output should match the reference voice.
    pub similarity_boost: f32,
    /// Style exaggeration.
    pub style: f32,
    pub speaker_boost: bool,
}

impl VoiceProfile {
    /// Create a profile, rejecting tonal parameters outside `[0, 1]`.
    pub fn new(
        speaker_name: impl Into<String>,
        provider_voice_id: impl Into<String>,
        stability: f32,
        similarity_boost: f32,
        style: f32,
        speaker_boost: bool,
    ) -> Result<Self, PodcastError> {
        let profile = Self {
            speaker_name: speaker_name.into(),
            provider_voice_id: provider_voice_id.into(),
            stability,
            similarity_boost,
            style,
            speaker_boost,
        };
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<(), PodcastError> {
        let invalid = |reason: String| PodcastError::InvalidVoiceProfile {
            speaker: self.speaker_name.clone(),
            reason,
        };

        if self.speaker_name.trim().is_empty() {
            return Err(invalid("speaker name cannot be empty".to_string()));
        }
        if self.provider_voice_id.trim().is_empty() {
            return Err(invalid("voice id cannot be empty".to_string()));
        }

        for (name, value) in [
            ("stability", self.stability),
            ("similarity_boost", self.similarity_boost),
            ("style", self.style),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }

        Ok(())
    }
}

/// Speaker name → voice profile table.
///
/// Populated during setup; once wrapped in an `Arc` and handed to the
/// pipeline it is only ever read.
#[derive(Debug, Clone, Default)]
pub struct VoiceRegistry {
    voices: HashMap<String, Arc<VoiceProfile>>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile under `speaker_name`.
    pub fn register(
        &mut self,
        speaker_name: impl Into<String>,
        profile: VoiceProfile,
    ) -> Result<(), PodcastError> {
        let speaker_name = speaker_name.into();
        if self.voices.contains_key(&speaker_name) {
            return Err(PodcastError::DuplicateVoice(speaker_name));
        }
        self.voices.insert(speaker_name, Arc::new(profile));
        Ok(())
    }

    /// Look up the profile for a speaker.
    pub fn resolve(&self, speaker_name: &str) -> Result<Arc<VoiceProfile>, PodcastError> {
        self.voices
            .get(speaker_name)
            .cloned()
            .ok_or_else(|| PodcastError::UnknownVoice(speaker_name.to_string()))
    }

    /// Registered speaker names, sorted.
    pub fn speakers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.voices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}
