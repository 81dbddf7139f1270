//! PodcastAI Core Library
//!
//! Turns a speaker-tagged dialogue script into one paced, loudness-matched
//! podcast file: per-line synthesis with caching and retries, audio
//! post-processing, and an ordered mix with a manifest.

pub mod audio;
pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod mixer;
pub mod pipeline;
pub mod processor;
pub mod script;
pub mod segment;
pub mod store;
pub mod tts;
pub mod voice;

pub use audio::{AudioBuffer, AudioFormat};
pub use config::{Config, RetryPolicy, default_config};
pub use error::{PodcastError, SegmentError, SynthesisError};
pub use generator::{CancellationToken, SegmentGenerator};
pub use mixer::{Manifest, ManifestEntry, MixEntry, MixPlan, Mixer};
pub use pipeline::{PipelineCallback, PipelineCoordinator, PipelineEvent, PipelineResult, SegmentFailure};
pub use processor::AudioProcessor;
pub use segment::{DialogueLine, Segment, SegmentStatus, source_text_hash};
pub use store::{RunLayout, SegmentStore};
pub use tts::{ElevenLabsSynthesizer, SpeechSynthesizer, ToneSynthesizer};
pub use voice::{VoiceProfile, VoiceRegistry};
