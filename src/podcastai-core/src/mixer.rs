//! Ordered reduction of processed segments into the final podcast.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::audio::{AudioBuffer, AudioFormat, decode_wav, encode_wav};
use crate::error::PodcastError;
use crate::segment::{Segment, SegmentStatus};
use crate::store::write_atomic;

/// One step of the mix: silence, then the segment.
#[derive(Debug, Clone)]
pub struct MixEntry {
    pub segment: Segment,
    pub leading_gap_ms: u32,
}

/// Complete, index-ordered plan covering `0..N` exactly once.
#[derive(Debug, Clone)]
pub struct MixPlan {
    entries: Vec<MixEntry>,
}

impl MixPlan {
    /// Build a plan for a script of `expected` lines.
    ///
    /// Entries may arrive in any order. Missing or duplicate indices fail
    /// with `IncompleteMixPlan`; entries not yet processed fail with
    /// `SegmentNotReady`.
    pub fn new(expected: usize, entries: Vec<MixEntry>) -> Result<Self, PodcastError> {
        let mut by_index: BTreeMap<usize, MixEntry> = BTreeMap::new();
        let mut duplicates = Vec::new();
        let mut out_of_range = Vec::new();

        for entry in entries {
            let index = entry.segment.index;
            if index >= expected {
                out_of_range.push(index);
            } else if by_index.contains_key(&index) {
                duplicates.push(index);
            } else {
                by_index.insert(index, entry);
            }
        }

        let missing: Vec<usize> = (0..expected).filter(|i| !by_index.contains_key(i)).collect();
        duplicates.extend(out_of_range);
        duplicates.sort_unstable();
        duplicates.dedup();

        if expected == 0 || !missing.is_empty() || !duplicates.is_empty() {
            return Err(PodcastError::IncompleteMixPlan {
                expected,
                missing,
                duplicates,
            });
        }

        let plan = Self {
            entries: by_index.into_values().collect(),
        };
        plan.check_ready()?;
        Ok(plan)
    }

    fn check_ready(&self) -> Result<(), PodcastError> {
        for (position, entry) in self.entries.iter().enumerate() {
            let segment = &entry.segment;
            if segment.index != position {
                return Err(PodcastError::IncompleteMixPlan {
                    expected: self.entries.len(),
                    missing: vec![position],
                    duplicates: Vec::new(),
                });
            }
            if segment.status() != SegmentStatus::Ready || segment.processed_audio_ref.is_none() {
                return Err(PodcastError::SegmentNotReady {
                    index: segment.index,
                    status: segment.status(),
                });
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[MixEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Manifest row for one mixed segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub speaker: String,
    /// Offset of the segment's first sample in the final file.
    pub start_ms: u64,
    pub leading_gap_ms: u32,
    pub duration_ms: u64,
    pub processed_path: PathBuf,
    pub source_text_hash: String,
    /// SHA-256 of the processed segment file.
    pub content_hash: String,
}

/// Audit record of a finished mix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub final_audio_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub total_duration_ms: u64,
    pub segments: Vec<ManifestEntry>,
}

impl Manifest {
    pub async fn write(&self, path: &Path) -> Result<(), PodcastError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes).await
    }
}

/// Concatenates processed segments in index order.
#[derive(Debug, Clone)]
pub struct Mixer {
    format: AudioFormat,
}

impl Mixer {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }

    /// Render `plan` into `output`. Same plan, same bytes.
    pub async fn mix(&self, plan: &MixPlan, output: &Path) -> Result<Manifest, PodcastError> {
        plan.check_ready()?;

        let mut timeline = AudioBuffer::new(Vec::new(), self.format);
        let mut segments = Vec::with_capacity(plan.len());

        for entry in plan.entries() {
            let segment = &entry.segment;
            let path = segment
                .processed_audio_ref
                .as_ref()
                .ok_or(PodcastError::SegmentNotReady {
                    index: segment.index,
                    status: segment.status(),
                })?;

            let bytes = tokio::fs::read(path).await?;
            let audio = decode_wav(&bytes)?.conform(self.format);

            timeline.append(&AudioBuffer::silence(entry.leading_gap_ms, self.format));
            let start_ms = timeline.duration_ms();
            timeline.append(&audio);

            segments.push(ManifestEntry {
                index: segment.index,
                speaker: segment.speaker_name.clone(),
                start_ms,
                leading_gap_ms: entry.leading_gap_ms,
                duration_ms: audio.duration_ms(),
                processed_path: path.clone(),
                source_text_hash: segment.source_text_hash.clone(),
                content_hash: sha256_hex(&bytes),
            });
        }

        let encoded = encode_wav(&timeline)?;
        write_atomic(output, &encoded).await?;

        let total_duration_ms = timeline.duration_ms();
        info!(
            path = %output.display(),
            segments = segments.len(),
            duration_ms = total_duration_ms,
            "podcast mixed"
        );

        Ok(Manifest {
            final_audio_path: output.to_path_buf(),
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            total_duration_ms,
            segments,
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::DialogueLine;
    use crate::voice::VoiceProfile;

    fn ready_segment(index: usize, speaker: &str, path: PathBuf) -> Segment {
        let profile = VoiceProfile::new(speaker, "voice", 0.5, 0.5, 0.5, true).unwrap();
        let mut segment = Segment::new(&DialogueLine::new(index, speaker, "line"), &profile);
        segment.transition(SegmentStatus::Ready).unwrap();
        segment.processed_audio_ref = Some(path);
        segment
    }

    fn entry(index: usize) -> MixEntry {
        MixEntry {
            segment: ready_segment(index, "Julia", PathBuf::from(format!("{index}.wav"))),
            leading_gap_ms: 0,
        }
    }

    #[test]
    fn test_plan_orders_entries_by_index() {
        let plan = MixPlan::new(3, vec![entry(2), entry(0), entry(1)]).unwrap();
        let order: Vec<usize> = plan.entries().iter().map(|e| e.segment.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_plan_names_missing_indices() {
        let err = MixPlan::new(4, vec![entry(0), entry(2)]).unwrap_err();
        match err {
            PodcastError::IncompleteMixPlan {
                expected, missing, ..
            } => {
                assert_eq!(expected, 4);
                assert_eq!(missing, vec![1, 3]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_plan_rejects_duplicates_and_out_of_range() {
        let err = MixPlan::new(2, vec![entry(0), entry(1), entry(1), entry(5)]).unwrap_err();
        assert!(matches!(
            err,
            PodcastError::IncompleteMixPlan { ref duplicates, .. } if duplicates == &vec![1, 5]
        ));
    }

    #[test]
    fn test_plan_rejects_empty() {
        assert!(matches!(
            MixPlan::new(0, Vec::new()),
            Err(PodcastError::IncompleteMixPlan { .. })
        ));
    }

    #[test]
    fn test_plan_rejects_unprocessed_segment() {
        let mut unprocessed = entry(1);
        unprocessed.segment.processed_audio_ref = None;
        let err = MixPlan::new(2, vec![entry(0), unprocessed]).unwrap_err();
        assert!(matches!(err, PodcastError::SegmentNotReady { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_mix_inserts_gaps_and_records_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::new(1_000, 1);

        let mut entries = Vec::new();
        for (index, speaker, gap) in [(0, "Julia", 0), (1, "Guido", 500)] {
            let path = dir.path().join(format!("{index}.wav"));
            let audio = AudioBuffer::new(vec![0.5; 200], format);
            tokio::fs::write(&path, encode_wav(&audio).unwrap()).await.unwrap();
            entries.push(MixEntry {
                segment: ready_segment(index, speaker, path),
                leading_gap_ms: gap,
            });
        }

        let plan = MixPlan::new(2, entries).unwrap();
        let output = dir.path().join("podcast.wav");
        let manifest = Mixer::new(format).mix(&plan, &output).await.unwrap();

        assert_eq!(manifest.total_duration_ms, 900);
        assert_eq!(manifest.segments[0].start_ms, 0);
        assert_eq!(manifest.segments[1].start_ms, 700);
        assert_eq!(manifest.segments[1].leading_gap_ms, 500);

        let mixed = decode_wav(&tokio::fs::read(&output).await.unwrap()).unwrap();
        assert_eq!(mixed.frames(), 900);
        assert_eq!(mixed.samples[300], 0.0);

        let again = dir.path().join("again.wav");
        Mixer::new(format).mix(&plan, &again).await.unwrap();
        assert_eq!(
            tokio::fs::read(&output).await.unwrap(),
            tokio::fs::read(&again).await.unwrap()
        );
    }
}
