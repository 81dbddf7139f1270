//! Loading the upstream dialogue script.
//!
//! Accepts `{"dialogue": [{"speaker", "text"}]}`, a bare JSON array of the
//! same entries, or plain `Speaker: text` lines.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::PodcastError;
use crate::segment::DialogueLine;

/// One entry as produced by the script writer.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptEntry {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptDocument {
    Wrapped { dialogue: Vec<ScriptEntry> },
    Bare(Vec<ScriptEntry>),
}

static STAGE_DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*[^*]*\*|\[[^\]]*\]|\([^)]*\)").expect("valid regex"));
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(\w+)[^>]*>.*?</(\w+)>|</?\w+[^>]*>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static SPEAKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^:]{1,60}?)\s*:\s*(.+)$").expect("valid regex"));

/// Strip everything that should not be spoken: stage directions such as
/// `*laughs*`, `[pause]` or `(leans in)`, markup tags and stray asterisks.
pub fn sanitize_text(text: &str) -> String {
    let result = TAG.replace_all(text, " ");
    let result = STAGE_DIRECTION.replace_all(&result, " ");
    let result = result.replace('*', "");
    let result = WHITESPACE.replace_all(&result, " ");
    let result = result.trim();

    // Dropping a direction can leave "word ." behind.
    result
        .replace(" ,", ",")
        .replace(" .", ".")
        .replace(" !", "!")
        .replace(" ?", "?")
}

/// Turn script entries into indexed dialogue lines.
pub fn lines_from_entries(entries: Vec<ScriptEntry>) -> Result<Vec<DialogueLine>, PodcastError> {
    if entries.is_empty() {
        return Err(PodcastError::InvalidScript(
            "script contains no dialogue".to_string(),
        ));
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let speaker = entry.speaker.trim();
            if speaker.is_empty() {
                return Err(PodcastError::InvalidScript(format!(
                    "entry {} has no speaker",
                    index
                )));
            }
            let text = sanitize_text(&entry.text);
            if text.is_empty() {
                return Err(PodcastError::InvalidScript(format!(
                    "entry {} ({}) has no speakable text",
                    index, speaker
                )));
            }
            Ok(DialogueLine::new(index, speaker, text))
        })
        .collect()
}

/// Parse a script in any supported format.
pub fn parse_script(content: &str) -> Result<Vec<DialogueLine>, PodcastError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let document: ScriptDocument = serde_json::from_str(content)
            .map_err(|e| PodcastError::InvalidScript(format!("invalid JSON script: {}", e)))?;
        let entries = match document {
            ScriptDocument::Wrapped { dialogue } => dialogue,
            ScriptDocument::Bare(entries) => entries,
        };
        return lines_from_entries(entries);
    }

    let mut entries = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let captures = SPEAKER_LINE.captures(line).ok_or_else(|| {
            PodcastError::InvalidScript(format!(
                "line {} is not in 'Speaker: text' form",
                number + 1
            ))
        })?;
        entries.push(ScriptEntry {
            speaker: captures[1].to_string(),
            text: captures[2].to_string(),
        });
    }
    lines_from_entries(entries)
}

/// Read and parse a script file.
pub fn load_script<P: AsRef<Path>>(path: P) -> Result<Vec<DialogueLine>, PodcastError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        PodcastError::InvalidScript(format!(
            "failed to read {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    parse_script(&content)
}
