//! On-disk storage: the content-addressed segment cache and the run layout.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::audio::{AudioFormat, decode_wav};
use crate::error::PodcastError;
use crate::segment::SegmentStatus;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `path` through a uniquely named temp file and a rename,
/// so readers never observe a partially written file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PodcastError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Cache record stored next to each cached audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub source_text_hash: String,
    pub status: SegmentStatus,
    pub byte_len: u64,
    pub format: AudioFormat,
    pub duration_ms: u64,
}

/// Content-addressed store of raw synthesized audio, keyed by
/// `source_text_hash`. Shared across runs and across concurrent tasks.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    root: PathBuf,
}

impl SegmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store for one synthesizer namespace below a shared cache directory.
    pub fn namespaced(cache_dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self::new(cache_dir.as_ref().join(sanitize(namespace, usize::MAX, "default")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audio_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{}.wav", hash))
    }

    fn record_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{}.json", hash))
    }

    /// Return the cached audio path if a `Ready` record exists and its audio
    /// still decodes. Anything else counts as a miss.
    pub async fn lookup(&self, hash: &str) -> Result<Option<(PathBuf, CacheRecord)>, PodcastError> {
        let record_bytes = match tokio::fs::read(self.record_path(hash)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: CacheRecord = match serde_json::from_slice(&record_bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!(hash, error = %e, "ignoring unreadable cache record");
                return Ok(None);
            }
        };
        if record.status != SegmentStatus::Ready || record.source_text_hash != hash {
            return Ok(None);
        }

        let audio_path = self.audio_path(hash);
        let audio = match tokio::fs::read(&audio_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if audio.len() as u64 != record.byte_len || decode_wav(&audio).is_err() {
            debug!(hash, "cached audio does not match its record");
            return Ok(None);
        }

        Ok(Some((audio_path, record)))
    }

    /// Persist raw audio under its hash. Same key always means same bytes,
    /// so concurrent writers racing on one key are harmless.
    pub async fn put_audio(&self, hash: &str, bytes: &[u8]) -> Result<PathBuf, PodcastError> {
        let path = self.audio_path(hash);
        write_atomic(&path, bytes).await?;
        Ok(path)
    }

    /// Mark a cached entry as validated and reusable.
    pub async fn mark_ready(&self, record: &CacheRecord) -> Result<(), PodcastError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(&record.source_text_hash), &bytes).await
    }

    /// Drop an entry whose audio failed validation.
    pub async fn discard(&self, hash: &str) {
        let _ = tokio::fs::remove_file(self.record_path(hash)).await;
        let _ = tokio::fs::remove_file(self.audio_path(hash)).await;
    }
}

/// Directories for a single pipeline run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    pub root: PathBuf,
    pub segments_dir: PathBuf,
    pub podcast_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            segments_dir: root.join("segments"),
            podcast_dir: root.join("podcast"),
            data_dir: root.join("data"),
            root,
        }
    }

    /// Create all run directories.
    pub async fn create(&self) -> Result<(), PodcastError> {
        for dir in [&self.segments_dir, &self.podcast_dir, &self.data_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Processed segment path, e.g. `segments/003_Julia.wav`.
    pub fn segment_path(&self, index: usize, speaker: &str) -> PathBuf {
        self.segments_dir
            .join(format!("{:03}_{}.wav", index, sanitize_file_component(speaker)))
    }

    pub fn final_audio_path(&self) -> PathBuf {
        self.podcast_dir.join("podcast.wav")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join("manifest.json")
    }

    pub fn failures_path(&self) -> PathBuf {
        self.data_dir.join("failures.json")
    }
}

/// Remove a file left by an earlier run. A missing file is fine.
pub async fn remove_if_exists(path: &Path) -> Result<(), PodcastError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Make a speaker name safe to embed in a file name.
pub fn sanitize_file_component(name: &str) -> String {
    sanitize(name, 40, "speaker")
}

fn sanitize(name: &str, max_len: usize, fallback: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        fallback.to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, encode_wav};

    fn wav() -> Vec<u8> {
        encode_wav(&AudioBuffer::new(vec![0.1; 160], AudioFormat::new(16_000, 1))).unwrap()
    }

    fn record(hash: &str, bytes: &[u8]) -> CacheRecord {
        CacheRecord {
            source_text_hash: hash.to_string(),
            status: SegmentStatus::Ready,
            byte_len: bytes.len() as u64,
            format: AudioFormat::new(16_000, 1),
            duration_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_lookup_requires_ready_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::new(dir.path());
        let bytes = wav();

        store.put_audio("abc", &bytes).await.unwrap();
        assert!(store.lookup("abc").await.unwrap().is_none());

        store.mark_ready(&record("abc", &bytes)).await.unwrap();
        let (path, found) = store.lookup("abc").await.unwrap().unwrap();
        assert_eq!(path, store.audio_path("abc"));
        assert_eq!(found.duration_ms, 10);
    }

    #[tokio::test]
    async fn test_lookup_misses_on_tampered_audio() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::new(dir.path());
        let bytes = wav();

        store.put_audio("abc", &bytes).await.unwrap();
        store.mark_ready(&record("abc", &bytes)).await.unwrap();
        tokio::fs::write(store.audio_path("abc"), b"RIFF garbage").await.unwrap();

        assert!(store.lookup("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_writes_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::new(dir.path());
        let bytes = wav();

        let (a, b) = tokio::join!(store.put_audio("k", &bytes), store.put_audio("k", &bytes));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(tokio::fs::read(store.audio_path("k")).await.unwrap(), bytes);
    }

    #[test]
    fn test_segment_path_format() {
        let layout = RunLayout::new("/tmp/run");
        assert_eq!(
            layout.segment_path(7, "Julia"),
            PathBuf::from("/tmp/run/segments/007_Julia.wav")
        );
        assert_eq!(
            layout.segment_path(12, "Dr. Who?"),
            PathBuf::from("/tmp/run/segments/012_Dr__Who_.wav")
        );
    }

    #[test]
    fn test_namespaces_get_separate_directories() {
        let a = SegmentStore::namespaced("/tmp/cache", "elevenlabs-eleven_multilingual_v2-pcm_24000");
        let b = SegmentStore::namespaced("/tmp/cache", "tone-24000");
        assert_eq!(
            a.root(),
            Path::new("/tmp/cache/elevenlabs-eleven_multilingual_v2-pcm_24000")
        );
        assert_ne!(a.audio_path("abc"), b.audio_path("abc"));
        assert_eq!(
            SegmentStore::namespaced("/tmp/cache", "../x").root(),
            Path::new("/tmp/cache/___x")
        );
    }

    #[tokio::test]
    async fn test_remove_if_exists_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.json");
        remove_if_exists(&path).await.unwrap();

        tokio::fs::write(&path, b"{}").await.unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_sanitize_file_component_empty() {
        assert_eq!(sanitize_file_component("   "), "speaker");
    }
}
