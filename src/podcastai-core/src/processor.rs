//! Loudness normalization, fades and pacing.

use tracing::warn;

use crate::audio::{AudioBuffer, db_to_gain, decode_wav, encode_wav};
use crate::config::AudioSettings;
use crate::error::{PodcastError, SegmentError};
use crate::segment::Segment;
use crate::store::{RunLayout, write_atomic};

/// Below this RMS a buffer is treated as silence and left untouched.
const SILENCE_RMS: f32 = 1e-6;

/// Turns raw segment audio into the normalized, faded artifact that gets mixed.
#[derive(Debug, Clone)]
pub struct AudioProcessor {
    settings: AudioSettings,
}

impl AudioProcessor {
    pub fn new(settings: AudioSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    /// Scale to the target RMS level, capped so the peak stays under the ceiling.
    pub fn normalize(&self, audio: &mut AudioBuffer) {
        let rms = audio.rms();
        if rms < SILENCE_RMS {
            return;
        }

        let mut gain = db_to_gain(self.settings.target_rms_dbfs) / rms;
        let ceiling = db_to_gain(self.settings.peak_ceiling_dbfs);
        let peak = audio.peak();
        if peak * gain > ceiling {
            gain = ceiling / peak;
        }

        for sample in &mut audio.samples {
            *sample *= gain;
        }
    }

    /// Linear gain ramps at both ends. Each ramp is clamped to half the
    /// segment so the two never overlap.
    pub fn apply_fades(&self, audio: &mut AudioBuffer, fade_in_ms: u32, fade_out_ms: u32) {
        let frames = audio.frames();
        let channels = audio.format.channels as usize;
        let fade_in = audio.format.frames_for_ms(fade_in_ms).min(frames / 2);
        let fade_out = audio.format.frames_for_ms(fade_out_ms).min(frames / 2);

        for frame in 0..fade_in {
            let gain = frame as f32 / fade_in as f32;
            for sample in &mut audio.samples[frame * channels..(frame + 1) * channels] {
                *sample *= gain;
            }
        }

        for i in 0..fade_out {
            let frame = frames - 1 - i;
            let gain = i as f32 / fade_out as f32;
            for sample in &mut audio.samples[frame * channels..(frame + 1) * channels] {
                *sample *= gain;
            }
        }
    }

    /// Silence inserted before the current segment.
    ///
    /// Nothing precedes the opening line; otherwise a change of speaker
    /// always gets the longer turn-taking pause.
    pub fn compute_gap(
        &self,
        previous_speaker: Option<&str>,
        current_speaker: &str,
        previous_segment: Option<&Segment>,
    ) -> u32 {
        let previous_speaker =
            previous_speaker.or(previous_segment.map(|s| s.speaker_name.as_str()));

        match previous_speaker {
            None => 0,
            Some(prev) if prev == current_speaker => self.settings.same_speaker_gap_ms,
            Some(_) => self.settings.speaker_change_gap_ms,
        }
    }

    /// Normalize, fade and conform raw WAV bytes to the target format.
    pub fn render(&self, raw: &[u8]) -> Result<AudioBuffer, PodcastError> {
        let mut audio = decode_wav(raw)?.conform(self.settings.format());
        self.normalize(&mut audio);
        self.apply_fades(&mut audio, self.settings.fade_in_ms, self.settings.fade_out_ms);
        Ok(audio)
    }

    /// Process a ready segment into the run's segment directory.
    ///
    /// Never fails past this boundary: problems mark the segment
    /// `FailedPermanent` with the classified error.
    pub async fn process(&self, mut segment: Segment, layout: &RunLayout) -> Segment {
        if !segment.is_ready() {
            return segment;
        }

        match self.process_inner(&segment, layout).await {
            Ok((path, duration_ms)) => {
                segment.processed_audio_ref = Some(path);
                segment.duration_ms = duration_ms;
            }
            Err(e) => {
                warn!(index = segment.index, error = %e, "segment processing failed");
                segment.fail(SegmentError::from(e));
            }
        }
        segment
    }

    async fn process_inner(
        &self,
        segment: &Segment,
        layout: &RunLayout,
    ) -> Result<(std::path::PathBuf, u64), PodcastError> {
        let raw_path = segment.raw_audio_ref.as_ref().ok_or_else(|| {
            PodcastError::CorruptAudio(format!("segment {} has no raw audio", segment.index))
        })?;
        let raw = tokio::fs::read(raw_path).await?;

        let audio = self.render(&raw)?;
        let bytes = encode_wav(&audio)?;

        let path = layout.segment_path(segment.index, &segment.speaker_name);
        write_atomic(&path, &bytes).await?;
        Ok((path, audio.duration_ms()))
    }
}
