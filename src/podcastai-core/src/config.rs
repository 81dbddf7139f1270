//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::AudioFormat;
use crate::error::PodcastError;
use crate::tts::{
    ELEVENLABS_API_BASE, ELEVENLABS_DEFAULT_MODEL, ElevenLabsSynthesizer, SpeechSynthesizer,
    ToneSynthesizer,
};
use crate::voice::{VoiceProfile, VoiceRegistry};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,
    #[serde(default)]
    pub voices: Vec<VoiceConfig>,
}

/// Scheduling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum number of lines generated and processed at once.
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Retry policy for synthesis calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total synthesis calls allowed per line, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
            request_timeout_secs: 120,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): base, 2×base, 4×base…
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Audio post-processing and pacing policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Loudness every segment is normalized to.
    pub target_rms_dbfs: f32,
    /// Normalization never pushes a peak above this level.
    pub peak_ceiling_dbfs: f32,
    pub fade_in_ms: u32,
    pub fade_out_ms: u32,
    /// Pause when the same speaker keeps talking.
    pub same_speaker_gap_ms: u32,
    /// Pause at a change of speaker. Must exceed `same_speaker_gap_ms`.
    pub speaker_change_gap_ms: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            target_rms_dbfs: -20.0,
            peak_ceiling_dbfs: -1.0,
            fade_in_ms: 30,
            fade_out_ms: 30,
            same_speaker_gap_ms: 300,
            speaker_change_gap_ms: 700,
        }
    }
}

impl AudioSettings {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }
}

/// Which speech provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    ElevenLabs,
    Tone,
}

/// Speech provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    pub provider: ProviderKind,
    pub api_base: String,
    pub model_id: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// PCM sample rate requested from the provider.
    pub sample_rate: u32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::ElevenLabs,
            api_base: ELEVENLABS_API_BASE.to_string(),
            model_id: ELEVENLABS_DEFAULT_MODEL.to_string(),
            api_key_env: "ELEVENLABS_API_KEY".to_string(),
            sample_rate: 24_000,
        }
    }
}

impl SynthesizerConfig {
    /// Build the configured provider. `lookup` resolves environment variables.
    pub fn build<F>(
        &self,
        retry: &RetryPolicy,
        lookup: F,
    ) -> Result<Arc<dyn SpeechSynthesizer>, PodcastError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self.provider {
            ProviderKind::Tone => Ok(Arc::new(ToneSynthesizer::new(self.sample_rate))),
            ProviderKind::ElevenLabs => {
                let api_key = lookup(&self.api_key_env)
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        PodcastError::ConfigError(format!(
                            "{} is not set; it is required by the elevenlabs provider",
                            self.api_key_env
                        ))
                    })?;
                Ok(Arc::new(ElevenLabsSynthesizer::new(
                    &self.api_base,
                    api_key,
                    &self.model_id,
                    self.sample_rate,
                    retry.request_timeout(),
                )?))
            }
        }
    }
}

/// Voice configuration for one speaker.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub speaker: String,
    /// Literal provider voice id.
    #[serde(default)]
    pub voice_id: Option<String>,
    /// Environment variable holding the voice id, used when `voice_id` is absent.
    #[serde(default)]
    pub voice_id_env: Option<String>,
    pub stability: f32,
    pub similarity_boost: f32,
    #[serde(default)]
    pub style: f32,
    #[serde(default = "default_speaker_boost")]
    pub use_speaker_boost: bool,
}

fn default_speaker_boost() -> bool {
    true
}

impl VoiceConfig {
    fn resolve_voice_id<F>(&self, lookup: &F) -> Result<String, PodcastError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = self.voice_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return Ok(id.clone());
        }
        match &self.voice_id_env {
            Some(var) => lookup(var).filter(|id| !id.trim().is_empty()).ok_or_else(|| {
                PodcastError::ConfigError(format!(
                    "Voice for '{}' expects environment variable {} to be set",
                    self.speaker, var
                ))
            }),
            None => Err(PodcastError::ConfigError(format!(
                "Voice for '{}' needs either voice_id or voice_id_env",
                self.speaker
            ))),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PodcastError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| PodcastError::ConfigError(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from string content.
    pub fn parse(content: &str) -> Result<Self, PodcastError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| PodcastError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the numeric policy values.
    pub fn validate(&self) -> Result<(), PodcastError> {
        let fail = |msg: &str| Err(PodcastError::ConfigError(msg.to_string()));

        if self.pipeline.concurrency == 0 {
            return fail("pipeline.concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1");
        }
        if self.audio.sample_rate == 0 {
            return fail("audio.sample_rate must be positive");
        }
        if !matches!(self.audio.channels, 1 | 2) {
            return fail("audio.channels must be 1 or 2");
        }
        if self.audio.speaker_change_gap_ms <= self.audio.same_speaker_gap_ms {
            return fail("audio.speaker_change_gap_ms must be greater than audio.same_speaker_gap_ms");
        }
        if self.audio.peak_ceiling_dbfs > 0.0 || self.audio.target_rms_dbfs > 0.0 {
            return fail("audio loudness targets must be at or below 0 dBFS");
        }
        if self.synthesizer.sample_rate == 0 {
            return fail("synthesizer.sample_rate must be positive");
        }
        for voice in &self.voices {
            let params = [
                ("stability", voice.stability),
                ("similarity_boost", voice.similarity_boost),
                ("style", voice.style),
            ];
            if let Some((name, value)) = params.iter().find(|(_, v)| !(0.0..=1.0).contains(v)) {
                return Err(PodcastError::ConfigError(format!(
                    "voices.{} for '{}' must be within [0, 1], got {}",
                    name, voice.speaker, value
                )));
            }
        }
        Ok(())
    }

    /// Build the voice registry, resolving voice ids through `lookup`.
    pub fn build_registry_with<F>(&self, lookup: F) -> Result<VoiceRegistry, PodcastError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.voices.is_empty() {
            return Err(PodcastError::ConfigError("No voices configured".to_string()));
        }

        let mut registry = VoiceRegistry::new();
        for voice in &self.voices {
            let profile = VoiceProfile::new(
                &voice.speaker,
                voice.resolve_voice_id(&lookup)?,
                voice.stability,
                voice.similarity_boost,
                voice.style,
                voice.use_speaker_boost,
            )?;
            registry.register(&voice.speaker, profile)?;
        }
        Ok(registry)
    }

    /// Build the voice registry from the process environment.
    pub fn build_registry(&self) -> Result<VoiceRegistry, PodcastError> {
        self.build_registry_with(|name| std::env::var(name).ok())
    }
}

/// Default configuration: the two-host research review show.
pub fn default_config() -> Config {
    Config {
        voices: vec![
            // Julia: enthusiastic expert
            VoiceConfig {
                speaker: "Julia".to_string(),
                voice_id: None,
                voice_id_env: Some("CLAUDIA_VOICE_ID".to_string()),
                stability: 0.35,
                similarity_boost: 0.75,
                style: 0.65,
                use_speaker_boost: true,
            },
            // Guido: engaged and curious
            VoiceConfig {
                speaker: "Guido".to_string(),
                voice_id: None,
                voice_id_env: Some("BEN_VOICE_ID".to_string()),
                stability: 0.4,
                similarity_boost: 0.75,
                style: 0.6,
                use_speaker_boost: true,
            },
        ],
        ..Config::default()
    }
}
