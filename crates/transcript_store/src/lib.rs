//! Append-only JSONL transcript of chat sessions.
//!
//! A transcript file starts with one header line followed by entry lines,
//! one per recorded message, thought, token report or tool-call batch.
//! [`TranscriptRecorder`] adapts a store to the session's recording channel.

mod error;
mod paths;
mod recorder;
mod replay;
mod schema;
mod store;

pub use error::TranscriptError;
pub use paths::{latest_transcript, transcript_file_name, transcript_root};
pub use recorder::TranscriptRecorder;
pub use schema::{
    EntryRecordType, TranscriptEntry, TranscriptHeader, TranscriptRecord, TranscriptRecordType,
    TRANSCRIPT_VERSION,
};
pub use store::TranscriptStore;
