//! Speech synthesis providers.
//!
//! The pipeline only sees [`SpeechSynthesizer`]; every provider returns a WAV
//! file in memory or a classified [`SynthesisError`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

use crate::audio::{AudioBuffer, AudioFormat, encode_wav, wrap_pcm16};
use crate::error::{PodcastError, SynthesisError};
use crate::voice::VoiceProfile;

/// External text-to-speech capability.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Identifies everything besides the text and voice that shapes the
    /// audio (provider, model, output format). Cached segments are only
    /// reused by a synthesizer with the same namespace.
    fn cache_namespace(&self) -> String {
        self.name().to_string()
    }

    /// Synthesize `text` with `voice`, returning WAV bytes.
    async fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<Vec<u8>, SynthesisError>;
}

pub const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io";
pub const ELEVENLABS_DEFAULT_MODEL: &str = "eleven_multilingual_v2";

#[derive(Debug, Serialize)]
struct TextToSpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

impl From<&VoiceProfile> for VoiceSettings {
    fn from(voice: &VoiceProfile) -> Self {
        Self {
            stability: voice.stability,
            similarity_boost: voice.similarity_boost,
            style: voice.style,
            use_speaker_boost: voice.speaker_boost,
        }
    }
}

/// ElevenLabs text-to-speech over HTTP.
///
/// Requests raw 16-bit mono PCM and wraps it in a WAV container.
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model_id: String,
    sample_rate: u32,
}

impl ElevenLabsSynthesizer {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model_id: impl Into<String>,
        sample_rate: u32,
        timeout: Duration,
    ) -> Result<Self, PodcastError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PodcastError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model_id: model_id.into(),
            sample_rate,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    fn cache_namespace(&self) -> String {
        format!("elevenlabs-{}-pcm_{}", self.model_id, self.sample_rate)
    }

    async fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<Vec<u8>, SynthesisError> {
        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.api_base, voice.provider_voice_id
        );
        let body = TextToSpeechRequest {
            text,
            model_id: &self.model_id,
            voice_settings: voice.into(),
        };

        let response = self
            .client
            .post(&url)
            .query(&[("output_format", format!("pcm_{}", self.sample_rate))])
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let pcm = response
            .bytes()
            .await
            .map_err(classify_transport_error)?;
        if pcm.is_empty() {
            return Err(SynthesisError::Retryable(
                "provider returned an empty audio body".to_string(),
            ));
        }

        wrap_pcm16(&pcm, AudioFormat::new(self.sample_rate, 1))
            .map_err(|e| SynthesisError::Retryable(e.to_string()))
    }
}

/// Map an HTTP status onto the retry policy.
pub fn classify_status(status: StatusCode, detail: &str) -> SynthesisError {
    let message = if detail.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, detail.trim())
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_MANY_REQUESTS => {
            SynthesisError::Retryable(message)
        }
        s if s.is_server_error() => SynthesisError::Retryable(message),
        _ => SynthesisError::Permanent(message),
    }
}

fn classify_transport_error(e: reqwest::Error) -> SynthesisError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        SynthesisError::Retryable(format!("Request failed: {}", e))
    } else {
        SynthesisError::Permanent(format!("Request failed: {}", e))
    }
}

/// Offline provider that renders a voiced tone whose length follows the
/// text. Lets the whole pipeline run without credentials.
pub struct ToneSynthesizer {
    format: AudioFormat,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            format: AudioFormat::new(sample_rate, 1),
        }
    }

    fn render(&self, text: &str, voice: &VoiceProfile) -> AudioBuffer {
        // Roughly 15 characters per second of speech.
        let ms = (text.chars().count() as u32 * 66).max(300);
        let frames = self.format.frames_for_ms(ms);
        let rate = self.format.sample_rate as f32;

        let voice_seed: u32 = voice.provider_voice_id.bytes().map(u32::from).sum();
        let pitch = 110.0 + (voice_seed % 120) as f32;
        let syllable_hz = 4.0;

        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / rate;
                let envelope = 0.5 - 0.5 * (std::f32::consts::TAU * syllable_hz * t).cos();
                let tone = (std::f32::consts::TAU * pitch * t).sin()
                    + 0.3 * (std::f32::consts::TAU * pitch * 2.0 * t).sin();
                0.25 * envelope * tone
            })
            .collect();

        AudioBuffer::new(samples, self.format)
    }
}

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    fn name(&self) -> &str {
        "tone"
    }

    fn cache_namespace(&self) -> String {
        format!("tone-{}", self.format.sample_rate)
    }

    async fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<Vec<u8>, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::Permanent("text cannot be empty".to_string()));
        }
        encode_wav(&self.render(text, voice)).map_err(|e| SynthesisError::Permanent(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode_wav;

    fn voice() -> VoiceProfile {
        VoiceProfile::new("Julia", "voice-julia", 0.35, 0.75, 0.65, true).unwrap()
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "busy").is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "bad key").is_retryable());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, "").is_retryable());
        assert!(!classify_status(StatusCode::NOT_FOUND, "voice").is_retryable());
    }

    #[test]
    fn test_voice_settings_body() {
        let body = TextToSpeechRequest {
            text: "Hello",
            model_id: ELEVENLABS_DEFAULT_MODEL,
            voice_settings: (&voice()).into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["voice_settings"]["use_speaker_boost"], true);
        assert!((json["voice_settings"]["stability"].as_f64().unwrap() - 0.35).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_tone_synthesizer_is_deterministic() {
        let synth = ToneSynthesizer::new(16_000);
        let a = synth.synthesize("Hello there", &voice()).await.unwrap();
        let b = synth.synthesize("Hello there", &voice()).await.unwrap();
        assert_eq!(a, b);

        let audio = decode_wav(&a).unwrap();
        assert_eq!(audio.format, AudioFormat::new(16_000, 1));
        assert!(audio.duration_ms() >= 300);
    }

    #[test]
    fn test_cache_namespace_tracks_provider_model_and_rate() {
        let tone = ToneSynthesizer::new(24_000);
        let eleven = |model: &str, rate| {
            ElevenLabsSynthesizer::new(
                ELEVENLABS_API_BASE,
                "key",
                model,
                rate,
                Duration::from_secs(5),
            )
            .unwrap()
            .cache_namespace()
        };

        assert_ne!(tone.cache_namespace(), eleven(ELEVENLABS_DEFAULT_MODEL, 24_000));
        assert_ne!(
            eleven(ELEVENLABS_DEFAULT_MODEL, 24_000),
            eleven(ELEVENLABS_DEFAULT_MODEL, 16_000)
        );
        assert_ne!(
            eleven(ELEVENLABS_DEFAULT_MODEL, 24_000),
            eleven("eleven_turbo_v2_5", 24_000)
        );
        assert_eq!(tone.cache_namespace(), ToneSynthesizer::new(24_000).cache_namespace());
    }

    #[tokio::test]
    async fn test_tone_synthesizer_rejects_blank_text() {
        let err = ToneSynthesizer::new(16_000)
            .synthesize("   ", &voice())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
