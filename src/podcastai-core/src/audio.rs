//! In-memory audio buffers and WAV encoding.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::PodcastError;

/// Sample rate and channel layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Number of frames covering `ms` milliseconds.
    pub fn frames_for_ms(&self, ms: u32) -> usize {
        (ms as u64 * self.sample_rate as u64 / 1000) as usize
    }

    /// Duration of `frames` frames, rounded down to whole milliseconds.
    pub fn ms_for_frames(&self, frames: usize) -> u64 {
        frames as u64 * 1000 / self.sample_rate as u64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(44_100, 1)
    }
}

/// Interleaved float samples in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub format: AudioFormat,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, format: AudioFormat) -> Self {
        Self { samples, format }
    }

    /// A buffer of `ms` milliseconds of digital silence.
    pub fn silence(ms: u32, format: AudioFormat) -> Self {
        let frames = format.frames_for_ms(ms);
        Self::new(vec![0.0; frames * format.channels as usize], format)
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> u64 {
        self.format.ms_for_frames(self.frames())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }

    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / self.samples.len() as f64).sqrt() as f32
    }

    /// Append another buffer of the same format.
    pub fn append(&mut self, other: &AudioBuffer) {
        debug_assert_eq!(self.format, other.format);
        self.samples.extend_from_slice(&other.samples);
    }

    /// Convert to `target`, remixing channels first and then resampling.
    pub fn conform(self, target: AudioFormat) -> AudioBuffer {
        if self.format == target {
            return self;
        }
        let remixed = remix_channels(self, target.channels);
        resample(remixed, target.sample_rate)
    }
}

/// Down-mix by averaging or up-mix by duplicating channels.
fn remix_channels(audio: AudioBuffer, channels: u16) -> AudioBuffer {
    let src = audio.format.channels as usize;
    let dst = channels as usize;
    if src == dst {
        return audio;
    }

    let format = AudioFormat::new(audio.format.sample_rate, channels);
    let mut out = Vec::with_capacity(audio.frames() * dst);

    for frame in audio.samples.chunks(src) {
        if dst == 1 {
            out.push(frame.iter().sum::<f32>() / src as f32);
        } else if src == 1 {
            out.extend(std::iter::repeat_n(frame[0], dst));
        } else {
            out.extend((0..dst).map(|c| frame[c % src]));
        }
    }

    AudioBuffer::new(out, format)
}

/// Resample each channel by linear interpolation.
fn resample(audio: AudioBuffer, sample_rate: u32) -> AudioBuffer {
    let src_rate = audio.format.sample_rate;
    if src_rate == sample_rate || audio.is_empty() {
        return AudioBuffer::new(
            audio.samples,
            AudioFormat::new(sample_rate, audio.format.channels),
        );
    }

    let channels = audio.format.channels as usize;
    let src_frames = audio.frames();
    let new_frames = (src_frames as u64 * sample_rate as u64 / src_rate as u64) as usize;
    let step = src_rate as f64 / sample_rate as f64;
    let mut out = Vec::with_capacity(new_frames * channels);

    for i in 0..new_frames {
        let src_pos = i as f64 * step;
        let src_idx = src_pos as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        for c in 0..channels {
            let a = audio.samples[src_idx * channels + c];
            let sample = if src_idx + 1 < src_frames {
                let b = audio.samples[(src_idx + 1) * channels + c];
                a * (1.0 - frac) + b * frac
            } else {
                a
            };
            out.push(sample);
        }
    }

    AudioBuffer::new(out, AudioFormat::new(sample_rate, audio.format.channels))
}

/// Decode a WAV file held in memory.
///
/// Fails with `CorruptAudio` on an unreadable header, truncated sample data
/// or a file without any samples.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, PodcastError> {
    if bytes.is_empty() {
        return Err(PodcastError::CorruptAudio("audio is empty".to_string()));
    }

    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| PodcastError::CorruptAudio(format!("invalid WAV header: {}", e)))?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(PodcastError::CorruptAudio(format!(
            "unsupported WAV layout: {} channels at {} Hz",
            spec.channels, spec.sample_rate
        )));
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PodcastError::CorruptAudio(format!("failed to read samples: {}", e)))?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    PodcastError::CorruptAudio(format!("failed to read samples: {}", e))
                })?
        }
    };

    if samples.is_empty() {
        return Err(PodcastError::CorruptAudio(
            "WAV contains no samples".to_string(),
        ));
    }

    Ok(AudioBuffer::new(
        samples,
        AudioFormat::new(spec.sample_rate, spec.channels),
    ))
}

/// Encode as 16-bit PCM WAV. Output is a pure function of the buffer.
pub fn encode_wav(audio: &AudioBuffer) -> Result<Vec<u8>, PodcastError> {
    let spec = WavSpec {
        channels: audio.format.channels,
        sample_rate: audio.format.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut bytes = Vec::with_capacity(44 + audio.samples.len() * 2);
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)?;
        for &sample in &audio.samples {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize()?;
    }
    Ok(bytes)
}

/// Wrap raw little-endian 16-bit PCM in a WAV container.
pub fn wrap_pcm16(pcm: &[u8], format: AudioFormat) -> Result<Vec<u8>, PodcastError> {
    if pcm.len() % 2 != 0 {
        return Err(PodcastError::CorruptAudio(format!(
            "PCM payload has odd length {}",
            pcm.len()
        )));
    }
    let samples = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();
    encode_wav(&AudioBuffer::new(samples, format))
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Convert decibels relative to full scale into a linear gain.
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}
