use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TranscriptError;

pub const TRANSCRIPT_DIR: [&str; 2] = [".chat", "transcripts"];
const TRANSCRIPT_EXTENSION: &str = "jsonl";

#[must_use]
pub fn transcript_root(base: &Path) -> PathBuf {
    base.join(TRANSCRIPT_DIR[0]).join(TRANSCRIPT_DIR[1])
}

#[must_use]
pub fn sanitize_timestamp_for_filename(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn transcript_file_name(created_at: &str, session_id: &str) -> String {
    format!(
        "{}_{}.{TRANSCRIPT_EXTENSION}",
        sanitize_timestamp_for_filename(created_at),
        session_id
    )
}

/// Most recent transcript under `root`. File names lead with the creation
/// timestamp, so lexical order is chronological.
pub fn latest_transcript(root: &Path) -> Result<PathBuf, TranscriptError> {
    let entries = fs::read_dir(root)
        .map_err(|source| TranscriptError::io("listing transcript directory", root, source))?;

    let mut latest: Option<PathBuf> = None;
    for entry in entries {
        let entry = entry
            .map_err(|source| TranscriptError::io("listing transcript directory", root, source))?;
        let path = entry.path();
        let is_transcript = path
            .extension()
            .is_some_and(|extension| extension == TRANSCRIPT_EXTENSION);
        if !is_transcript || !path.is_file() {
            continue;
        }
        let newer = latest
            .as_ref()
            .map_or(true, |current| path.file_name() > current.file_name());
        if newer {
            latest = Some(path);
        }
    }

    latest.ok_or_else(|| TranscriptError::NoTranscriptsFound {
        root: root.to_path_buf(),
    })
}
