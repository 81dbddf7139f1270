//! Pipeline coordination.
//!
//! Drives a dialogue script through generation, processing and mixing.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PodcastError, SegmentError};
use crate::generator::{CancellationToken, SegmentGenerator};
use crate::mixer::{Manifest, ManifestEntry, MixEntry, MixPlan, Mixer};
use crate::processor::AudioProcessor;
use crate::segment::{DialogueLine, Segment, SegmentStatus};
use crate::store::{RunLayout, SegmentStore, remove_if_exists, write_atomic};
use crate::tts::SpeechSynthesizer;
use crate::voice::{VoiceProfile, VoiceRegistry};

/// A line that never reached `Ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFailure {
    pub index: usize,
    pub speaker: String,
    pub attempts: u32,
    pub error: SegmentError,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Present only when every line made it into the mix.
    pub final_audio_path: Option<PathBuf>,
    /// Index-ordered segment metadata of the final mix.
    pub manifest: Vec<ManifestEntry>,
    pub failures: Vec<SegmentFailure>,
    /// Lines left untouched because the run was cancelled.
    pub pending: Vec<usize>,
    pub total_duration_ms: u64,
    pub manifest_path: Option<PathBuf>,
    /// Segments served from the cache without a synthesis call.
    pub cache_hits: usize,
}

impl PipelineResult {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.final_audio_path.is_some()
    }

    pub fn was_cancelled(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Events emitted while the pipeline runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Generation is starting for a line.
    SegmentStarted { index: usize, speaker: String },
    /// A line is synthesized and processed.
    SegmentReady {
        index: usize,
        speaker: String,
        duration_ms: u64,
        cached: bool,
    },
    /// A line failed for good.
    SegmentFailed { index: usize, error: SegmentError },
    /// All lines are ready; mixing begins.
    MixStarted { segments: usize },
    /// The final file has been written.
    MixFinished { path: PathBuf, duration_ms: u64 },
}

/// Callback for pipeline events. Called from worker tasks.
pub type PipelineCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Turns a dialogue script into one podcast file.
pub struct PipelineCoordinator {
    registry: Arc<VoiceRegistry>,
    generator: Arc<SegmentGenerator>,
    processor: Arc<AudioProcessor>,
    mixer: Mixer,
    concurrency: usize,
    callback: Option<PipelineCallback>,
}

impl PipelineCoordinator {
    /// Create a coordinator. `cache_dir` holds the content-addressed segment
    /// cache and may be shared by many runs and providers; each synthesizer
    /// gets its own namespace inside it.
    ///
    /// Fails with `ConfigError` when `config` does not validate.
    pub fn new(
        config: &Config,
        registry: VoiceRegistry,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self, PodcastError> {
        config.validate()?;

        let cache_dir: PathBuf = cache_dir.into();
        let store = SegmentStore::namespaced(&cache_dir, &synthesizer.cache_namespace());
        Ok(Self {
            registry: Arc::new(registry),
            generator: Arc::new(SegmentGenerator::new(
                synthesizer,
                store,
                config.retry.clone(),
            )),
            processor: Arc::new(AudioProcessor::new(config.audio.clone())),
            mixer: Mixer::new(config.audio.format()),
            concurrency: config.pipeline.concurrency,
            callback: None,
        })
    }

    /// Set a callback for pipeline events.
    pub fn with_callback(mut self, callback: PipelineCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Run the full pipeline for `lines` into `layout`.
    ///
    /// Configuration problems (unknown voices, malformed scripts) fail before
    /// any synthesis. Per-line failures come back inside the result.
    pub async fn run(
        &self,
        lines: &[DialogueLine],
        layout: &RunLayout,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PodcastError> {
        validate_script(lines)?;
        let profiles = self.resolve_voices(lines)?;

        layout.create().await?;
        tokio::fs::create_dir_all(self.generator.store().root()).await?;

        info!(
            lines = lines.len(),
            concurrency = self.concurrency,
            run_dir = %layout.root.display(),
            "starting podcast pipeline"
        );

        let segments = self.generate_all(lines, profiles, layout, cancel).await;
        self.finish(lines.len(), segments, layout).await
    }

    fn resolve_voices(&self, lines: &[DialogueLine]) -> Result<Vec<Arc<VoiceProfile>>, PodcastError> {
        lines
            .iter()
            .map(|line| self.registry.resolve(&line.speaker_name))
            .collect()
    }

    /// Generate and process every line with bounded concurrency. The result
    /// is indexed by line; completion order does not matter.
    async fn generate_all(
        &self,
        lines: &[DialogueLine],
        profiles: Vec<Arc<VoiceProfile>>,
        layout: &RunLayout,
        cancel: &CancellationToken,
    ) -> Vec<Option<Segment>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (line, profile) in lines.iter().cloned().zip(profiles) {
            let semaphore = semaphore.clone();
            let generator = self.generator.clone();
            let processor = self.processor.clone();
            let layout = layout.clone();
            let cancel = cancel.clone();
            let callback = self.callback.clone();

            tasks.spawn(async move {
                let index = line.index;
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Segment::new(&line, &profile));
                };
                if cancel.is_cancelled() {
                    return (index, Segment::new(&line, &profile));
                }

                emit(
                    &callback,
                    PipelineEvent::SegmentStarted {
                        index,
                        speaker: line.speaker_name.clone(),
                    },
                );

                let segment = generator.generate(&line, &profile, &cancel).await;
                let segment = processor.process(segment, &layout).await;

                match (segment.status(), &segment.last_error) {
                    (SegmentStatus::Ready, _) => emit(
                        &callback,
                        PipelineEvent::SegmentReady {
                            index,
                            speaker: segment.speaker_name.clone(),
                            duration_ms: segment.duration_ms,
                            cached: segment.from_cache,
                        },
                    ),
                    (SegmentStatus::FailedPermanent, Some(error)) => emit(
                        &callback,
                        PipelineEvent::SegmentFailed {
                            index,
                            error: error.clone(),
                        },
                    ),
                    _ => {}
                }

                (index, segment)
            });
        }

        let mut segments: Vec<Option<Segment>> = vec![None; lines.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, segment)) => segments[index] = Some(segment),
                Err(e) => warn!(error = %e, "segment task aborted"),
            }
        }
        segments
    }

    /// Either mix a complete set or report what is missing.
    async fn finish(
        &self,
        expected: usize,
        segments: Vec<Option<Segment>>,
        layout: &RunLayout,
    ) -> Result<PipelineResult, PodcastError> {
        let mut result = PipelineResult::default();
        let mut ready = Vec::with_capacity(expected);

        for (index, slot) in segments.into_iter().enumerate() {
            let Some(segment) = slot else {
                result.failures.push(SegmentFailure {
                    index,
                    speaker: String::new(),
                    attempts: 0,
                    error: SegmentError::Aborted {
                        message: "worker task did not return".to_string(),
                    },
                });
                continue;
            };

            match segment.status() {
                SegmentStatus::Ready => {
                    if segment.from_cache {
                        result.cache_hits += 1;
                    }
                    ready.push(segment);
                }
                SegmentStatus::FailedPermanent => result.failures.push(SegmentFailure {
                    index,
                    speaker: segment.speaker_name.clone(),
                    attempts: segment.attempt,
                    error: segment.last_error.clone().unwrap_or(SegmentError::Aborted {
                        message: "no error recorded".to_string(),
                    }),
                }),
                _ => result.pending.push(index),
            }
        }

        if !result.failures.is_empty() || !result.pending.is_empty() {
            // Drop any mix an earlier run left in this directory.
            remove_if_exists(&layout.final_audio_path()).await?;
            remove_if_exists(&layout.manifest_path()).await?;
        }
        if !result.failures.is_empty() {
            warn!(
                failed = ?result.failed_indices(),
                "some lines failed; podcast not mixed"
            );
            let report = serde_json::to_vec_pretty(&result.failures)?;
            write_atomic(&layout.failures_path(), &report).await?;
            return Ok(result);
        }
        remove_if_exists(&layout.failures_path()).await?;
        if !result.pending.is_empty() {
            info!(pending = result.pending.len(), "run cancelled; completed segments stay cached");
            return Ok(result);
        }

        let plan = self.build_plan(expected, ready)?;
        emit(
            &self.callback,
            PipelineEvent::MixStarted {
                segments: plan.len(),
            },
        );

        let output = layout.final_audio_path();
        let manifest: Manifest = self.mixer.mix(&plan, &output).await?;
        manifest.write(&layout.manifest_path()).await?;

        emit(
            &self.callback,
            PipelineEvent::MixFinished {
                path: output.clone(),
                duration_ms: manifest.total_duration_ms,
            },
        );

        result.final_audio_path = Some(output);
        result.total_duration_ms = manifest.total_duration_ms;
        result.manifest = manifest.segments;
        result.manifest_path = Some(layout.manifest_path());
        Ok(result)
    }

    /// Pair each segment with the pause that precedes it, using its
    /// predecessor in index order.
    fn build_plan(&self, expected: usize, mut ready: Vec<Segment>) -> Result<MixPlan, PodcastError> {
        ready.sort_by_key(|s| s.index);

        let mut entries = Vec::with_capacity(ready.len());
        let mut previous: Option<&Segment> = None;
        for segment in &ready {
            let gap = self.processor.compute_gap(
                previous.map(|p| p.speaker_name.as_str()),
                &segment.speaker_name,
                previous,
            );
            entries.push(MixEntry {
                segment: segment.clone(),
                leading_gap_ms: gap,
            });
            previous = Some(segment);
        }

        MixPlan::new(expected, entries)
    }
}

fn emit(callback: &Option<PipelineCallback>, event: PipelineEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

/// Indices must be exactly `0..N` in order, and no line may be blank.
fn validate_script(lines: &[DialogueLine]) -> Result<(), PodcastError> {
    if lines.is_empty() {
        return Err(PodcastError::InvalidScript(
            "script contains no dialogue".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(lines.len());
    for (position, line) in lines.iter().enumerate() {
        if line.index != position || !seen.insert(line.index) {
            return Err(PodcastError::InvalidScript(format!(
                "line at position {} has index {}; indices must run 0..{} in order",
                position,
                line.index,
                lines.len()
            )));
        }
        if line.text.trim().is_empty() {
            return Err(PodcastError::InvalidScript(format!(
                "line {} ({}) has no text",
                line.index, line.speaker_name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::ToneSynthesizer;

    #[test]
    fn test_validate_script_accepts_contiguous_lines() {
        let lines = vec![
            DialogueLine::new(0, "Julia", "Hello"),
            DialogueLine::new(1, "Guido", "Hi there"),
        ];
        assert!(validate_script(&lines).is_ok());
    }

    #[test]
    fn test_validate_script_rejects_gaps_and_blank_text() {
        let gap = vec![
            DialogueLine::new(0, "Julia", "Hello"),
            DialogueLine::new(2, "Guido", "Hi"),
        ];
        assert!(matches!(
            validate_script(&gap),
            Err(PodcastError::InvalidScript(_))
        ));

        let blank = vec![DialogueLine::new(0, "Julia", "   ")];
        assert!(matches!(
            validate_script(&blank),
            Err(PodcastError::InvalidScript(_))
        ));

        assert!(validate_script(&[]).is_err());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.audio.sample_rate = 0;
        let result = PipelineCoordinator::new(
            &config,
            VoiceRegistry::new(),
            Arc::new(ToneSynthesizer::new(16_000)),
            "/tmp/podcastai-cache",
        );
        assert!(matches!(result, Err(PodcastError::ConfigError(_))));

        config.audio.sample_rate = 16_000;
        config.pipeline.concurrency = 0;
        assert!(
            PipelineCoordinator::new(
                &config,
                VoiceRegistry::new(),
                Arc::new(ToneSynthesizer::new(16_000)),
                "/tmp/podcastai-cache",
            )
            .is_err()
        );
    }

    #[test]
    fn test_result_helpers() {
        let result = PipelineResult {
            failures: vec![SegmentFailure {
                index: 1,
                speaker: "Guido".into(),
                attempts: 1,
                error: SegmentError::PermanentSynthesis {
                    message: "401".into(),
                },
            }],
            ..PipelineResult::default()
        };
        assert_eq!(result.failed_indices(), vec![1]);
        assert!(!result.is_complete());
        assert!(!result.was_cancelled());
    }
}
