use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::error::TranscriptError;
use crate::paths::transcript_file_name;
use crate::schema::{JsonLine, TranscriptEntry, TranscriptHeader, TranscriptRecord, TRANSCRIPT_VERSION};

pub struct TranscriptStore {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
    pub(crate) header: TranscriptHeader,
    pub(crate) entries: Vec<TranscriptEntry>,
    pub(crate) ids: HashSet<String>,
}

impl TranscriptStore {
    /// Creates a fresh transcript under `root`, writing its header line.
    pub fn create_new(root: &Path) -> Result<Self, TranscriptError> {
        fs::create_dir_all(root)
            .map_err(|source| TranscriptError::io("creating transcript directory", root, source))?;

        let created_at = now_rfc3339()?;
        let session_id = Uuid::new_v4().to_string();
        let path = root.join(transcript_file_name(&created_at, &session_id));
        let header = TranscriptHeader::v1(session_id, created_at);

        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| TranscriptError::io("creating transcript file", &path, source))?;
        write_line(&mut file, &path, &header)?;
        debug!(path = %path.display(), session_id = %header.session_id, "transcript created");

        Ok(Self {
            path,
            file,
            header,
            entries: Vec::new(),
            ids: HashSet::new(),
        })
    }

    /// Opens an existing transcript, validating every line before appending.
    pub fn open(path: &Path) -> Result<Self, TranscriptError> {
        let path = path.to_path_buf();
        let read_file = File::open(&path)
            .map_err(|source| TranscriptError::io("opening transcript file", &path, source))?;
        let reader = BufReader::new(read_file);

        let mut header: Option<TranscriptHeader> = None;
        let mut entries = Vec::new();
        let mut ids = HashSet::new();

        for (line_index, line_result) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line =
                line_result.map_err(|source| TranscriptError::io_line(&path, line_number, source))?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = JsonLine::parse(&line)
                .map_err(|source| TranscriptError::json_line(&path, line_number, source))?;

            if header.is_none() {
                match parsed {
                    JsonLine::Header(parsed_header) => {
                        validate_header_line(&path, line_number, &parsed_header)?;
                        header = Some(parsed_header);
                    }
                    JsonLine::Entry(_) => {
                        return Err(TranscriptError::InvalidHeaderRecord {
                            path,
                            line: line_number,
                        });
                    }
                }
                continue;
            }

            match parsed {
                JsonLine::Header(_) => {
                    return Err(TranscriptError::InvalidEntryRecord {
                        path,
                        line: line_number,
                    });
                }
                JsonLine::Entry(entry) => {
                    validate_rfc3339(&path, line_number, "ts", &entry.ts)?;
                    if !ids.insert(entry.id.clone()) {
                        return Err(TranscriptError::DuplicateEntryId {
                            path,
                            line: line_number,
                            id: entry.id,
                        });
                    }
                    entries.push(entry);
                }
            }
        }

        let header = header.ok_or_else(|| TranscriptError::MissingHeader { path: path.clone() })?;

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| TranscriptError::io("opening transcript file for append", &path, source))?;
        debug!(
            path = %path.display(),
            session_id = %header.session_id,
            entries = entries.len(),
            "transcript opened"
        );

        Ok(Self {
            path,
            file,
            header,
            entries,
            ids,
        })
    }

    /// Stamps `record` with a fresh id and the current time and appends it.
    pub fn append(&mut self, record: TranscriptRecord) -> Result<&TranscriptEntry, TranscriptError> {
        let mut id = Uuid::new_v4().to_string();
        while self.ids.contains(&id) {
            id = Uuid::new_v4().to_string();
        }
        let entry = TranscriptEntry::new(id, now_rfc3339()?, record);

        write_line(&mut self.file, &self.path, &entry)?;
        self.ids.insert(entry.id.clone());
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &TranscriptHeader {
        &self.header
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }
}

fn write_line(
    file: &mut File,
    path: &Path,
    value: &impl serde::Serialize,
) -> Result<(), TranscriptError> {
    let mut line =
        serde_json::to_string(value).map_err(|source| TranscriptError::json_serialize(path, source))?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| TranscriptError::io("appending transcript line", path, source))
}

fn now_rfc3339() -> Result<String, TranscriptError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(TranscriptError::ClockFormat)
}

pub(crate) fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &TranscriptHeader,
) -> Result<(), TranscriptError> {
    if header.version != TRANSCRIPT_VERSION {
        return Err(TranscriptError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
            expected: TRANSCRIPT_VERSION,
        });
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)
}

pub(crate) fn validate_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<(), TranscriptError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(TranscriptError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}
