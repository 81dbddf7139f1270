#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use podcastai_core::audio::{AudioBuffer, AudioFormat, encode_wav};
use podcastai_core::config::{AudioSettings, Config, PipelineSettings, RetryPolicy};
use podcastai_core::{
    DialogueLine, PipelineCoordinator, SegmentStore, SpeechSynthesizer, SynthesisError,
    VoiceProfile, VoiceRegistry,
};

/// What the mock does when asked to speak a given text.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    FailPermanent,
    FailRetryable,
    /// Fail retryably this many times, then succeed.
    FailTimes(u32),
    /// Return bytes that are not audio.
    Corrupt,
}

/// In-process synthesizer with per-text scripted behavior and call counting.
pub struct MockSynthesizer {
    format: AudioFormat,
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<HashMap<String, u32>>,
    delays: Mutex<HashMap<String, Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSynthesizer {
    pub fn new() -> Arc<Self> {
        Self::with_format(AudioFormat::new(16_000, 1))
    }

    pub fn with_format(format: AudioFormat) -> Arc<Self> {
        Arc::new(Self {
            format,
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_behavior(&self, text: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(text.to_string(), behavior);
    }

    pub fn set_delay(&self, text: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(text.to_string(), delay);
    }

    pub fn calls_for(&self, text: &str) -> u32 {
        self.calls.lock().unwrap().get(text).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Deterministic audio whose length grows with the text.
    pub fn render(&self, text: &str) -> Vec<u8> {
        let ms = 200 + 40 * text.chars().count() as u32;
        let frames = self.format.frames_for_ms(ms);
        let channels = self.format.channels as usize;
        let samples = (0..frames * channels)
            .map(|i| 0.3 * ((i / channels) as f32 * 0.05).sin())
            .collect();
        encode_wav(&AudioBuffer::new(samples, self.format)).unwrap()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    fn name(&self) -> &str {
        "mock"
    }

    fn cache_namespace(&self) -> String {
        format!("mock-{}hz-{}ch", self.format.sample_rate, self.format.channels)
    }

    async fn synthesize(&self, text: &str, _voice: &VoiceProfile) -> Result<Vec<u8>, SynthesisError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(text.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(text).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Ok(self.render(text)),
            Behavior::FailPermanent => Err(SynthesisError::Permanent("HTTP 401: invalid api key".into())),
            Behavior::FailRetryable => Err(SynthesisError::Retryable("HTTP 429: slow down".into())),
            Behavior::FailTimes(n) if call <= n => {
                Err(SynthesisError::Retryable("HTTP 503: busy".into()))
            }
            Behavior::FailTimes(_) => Ok(self.render(text)),
            Behavior::Corrupt => Ok(b"RIFF....not really audio".to_vec()),
        }
    }
}

/// Fast policy values for tests.
pub fn test_config() -> Config {
    Config {
        pipeline: PipelineSettings { concurrency: 4 },
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
            request_timeout_secs: 10,
        },
        audio: AudioSettings {
            sample_rate: 16_000,
            channels: 1,
            fade_in_ms: 10,
            fade_out_ms: 10,
            same_speaker_gap_ms: 300,
            speaker_change_gap_ms: 700,
            ..AudioSettings::default()
        },
        ..Config::default()
    }
}

/// The cache store a coordinator built around `synth` reads and writes.
pub fn store_for(synth: &MockSynthesizer, cache_dir: &std::path::Path) -> SegmentStore {
    SegmentStore::namespaced(cache_dir, &synth.cache_namespace())
}

pub fn registry() -> VoiceRegistry {
    let mut registry = VoiceRegistry::new();
    registry
        .register(
            "Julia",
            VoiceProfile::new("Julia", "voice-julia", 0.35, 0.75, 0.65, true).unwrap(),
        )
        .unwrap();
    registry
        .register(
            "Guido",
            VoiceProfile::new("Guido", "voice-guido", 0.4, 0.75, 0.6, true).unwrap(),
        )
        .unwrap();
    registry
}

pub fn coordinator(
    config: &Config,
    synth: Arc<MockSynthesizer>,
    cache_dir: &std::path::Path,
) -> PipelineCoordinator {
    PipelineCoordinator::new(config, registry(), synth, cache_dir).unwrap()
}

/// The two-line exchange used by the end-to-end scenarios.
pub fn hello_script() -> Vec<DialogueLine> {
    vec![
        DialogueLine::new(0, "Julia", "Hello"),
        DialogueLine::new(1, "Guido", "Hi there"),
    ]
}

/// Alternating speakers, with some consecutive lines from the same speaker.
pub fn long_script(n: usize) -> Vec<DialogueLine> {
    (0..n)
        .map(|i| {
            let speaker = if (i / 2) % 2 == 0 { "Julia" } else { "Guido" };
            DialogueLine::new(i, speaker, format!("Line number {i} of the review."))
        })
        .collect()
}
