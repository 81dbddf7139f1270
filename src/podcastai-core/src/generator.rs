//! Per-line synthesis with caching and bounded retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::audio::decode_wav;
use crate::config::RetryPolicy;
use crate::error::{SegmentError, SynthesisError};
use crate::segment::{DialogueLine, Segment, SegmentStatus};
use crate::store::{CacheRecord, SegmentStore};
use crate::tts::SpeechSynthesizer;
use crate::voice::VoiceProfile;

/// Cooperative cancellation shared between the caller and pipeline tasks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Produces a `Ready` or `FailedPermanent` segment for one dialogue line.
pub struct SegmentGenerator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: SegmentStore,
    policy: RetryPolicy,
}

impl SegmentGenerator {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        store: SegmentStore,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            synthesizer,
            store,
            policy,
        }
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Generate audio for `line`.
    ///
    /// Every failure is encoded in the returned segment. A segment left in
    /// `Pending` means cancellation stopped it before any audio existed.
    pub async fn generate(
        &self,
        line: &DialogueLine,
        profile: &VoiceProfile,
        cancel: &CancellationToken,
    ) -> Segment {
        let mut segment = Segment::new(line, profile);

        match self.store.lookup(&segment.source_text_hash).await {
            Ok(Some((path, record))) => {
                debug!(index = line.index, hash = %segment.source_text_hash, "segment cache hit");
                segment.raw_audio_ref = Some(path);
                segment.duration_ms = record.duration_ms;
                segment.from_cache = true;
                advance(&mut segment, SegmentStatus::Ready);
                return segment;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(index = line.index, error = %e, "cache lookup failed, synthesizing");
            }
        }

        loop {
            if cancel.is_cancelled() {
                return segment;
            }

            advance(&mut segment, SegmentStatus::Requested);
            segment.attempt += 1;

            let error = match self.request(&line.text, profile).await {
                Ok(bytes) => {
                    self.persist(&mut segment, &bytes).await;
                    return segment;
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(index = line.index, error = %error, "synthesis failed permanently");
                segment.fail(SegmentError::PermanentSynthesis {
                    message: error.to_string(),
                });
                return segment;
            }

            if segment.attempt >= self.policy.max_attempts {
                warn!(
                    index = line.index,
                    attempts = segment.attempt,
                    error = %error,
                    "synthesis retries exhausted"
                );
                segment.fail(SegmentError::RetriesExhausted {
                    attempts: segment.attempt,
                    message: error.to_string(),
                });
                return segment;
            }

            let delay = self.policy.backoff(segment.attempt);
            warn!(
                index = line.index,
                attempt = segment.attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying synthesis"
            );
            advance(&mut segment, SegmentStatus::Pending);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return segment,
            }
        }
    }

    async fn request(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>, SynthesisError> {
        let timeout = self.policy.request_timeout();
        match tokio::time::timeout(timeout, self.synthesizer.synthesize(text, profile)).await {
            Ok(result) => result,
            Err(_) => Err(SynthesisError::Retryable(format!(
                "{} did not answer within {}s",
                self.synthesizer.name(),
                timeout.as_secs()
            ))),
        }
    }

    /// Store downloaded bytes, validate them, then publish the cache record.
    async fn persist(&self, segment: &mut Segment, bytes: &[u8]) {
        let hash = segment.source_text_hash.clone();

        let path = match self.store.put_audio(&hash, bytes).await {
            Ok(path) => path,
            Err(e) => {
                segment.fail(SegmentError::from(e));
                return;
            }
        };
        segment.raw_audio_ref = Some(path);
        advance(segment, SegmentStatus::Downloaded);

        let audio = match decode_wav(bytes) {
            Ok(audio) => audio,
            Err(e) => {
                warn!(index = segment.index, error = %e, "downloaded audio failed validation");
                self.store.discard(&hash).await;
                segment.raw_audio_ref = None;
                segment.fail(SegmentError::from(e));
                return;
            }
        };

        let record = CacheRecord {
            source_text_hash: hash,
            status: SegmentStatus::Ready,
            byte_len: bytes.len() as u64,
            format: audio.format,
            duration_ms: audio.duration_ms(),
        };
        if let Err(e) = self.store.mark_ready(&record).await {
            segment.fail(SegmentError::from(e));
            return;
        }

        segment.duration_ms = record.duration_ms;
        advance(segment, SegmentStatus::Ready);
        info!(
            index = segment.index,
            speaker = %segment.speaker_name,
            attempts = segment.attempt,
            duration_ms = segment.duration_ms,
            "segment synthesized"
        );
    }
}

/// Apply a transition the generator's control flow guarantees is legal.
fn advance(segment: &mut Segment, next: SegmentStatus) {
    if let Err(e) = segment.transition(next) {
        warn!(index = segment.index, error = %e, "unexpected segment transition");
        segment.fail(SegmentError::from(e));
    }
}
