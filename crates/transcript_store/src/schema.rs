use chat_contract::{CompletedToolCall, MessageKind, MessageRecord, Part, ThoughtSummary, UsageMetadata};
use serde::{Deserialize, Serialize};

pub const TRANSCRIPT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRecordType {
    Transcript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRecordType {
    Entry,
}

/// First line of every transcript file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscriptHeader {
    #[serde(rename = "type")]
    pub record_type: TranscriptRecordType,
    pub version: u32,
    pub session_id: String,
    pub created_at: String,
}

impl TranscriptHeader {
    #[must_use]
    pub fn v1(session_id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            record_type: TranscriptRecordType::Transcript,
            version: TRANSCRIPT_VERSION,
            session_id: session_id.into(),
            created_at: created_at.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscriptEntry {
    #[serde(rename = "type")]
    pub record_type: EntryRecordType,
    pub id: String,
    pub ts: String,
    pub record: TranscriptRecord,
}

impl TranscriptEntry {
    #[must_use]
    pub fn new(id: impl Into<String>, ts: impl Into<String>, record: TranscriptRecord) -> Self {
        Self {
            record_type: EntryRecordType::Entry,
            id: id.into(),
            ts: ts.into(),
            record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptRecord {
    Message {
        model: String,
        role: MessageKind,
        content: Vec<Part>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_content: Option<String>,
    },
    Tokens {
        usage: UsageMetadata,
    },
    Thought {
        subject: String,
        description: String,
    },
    ToolCalls {
        model: String,
        calls: Vec<CompletedToolCall>,
    },
}

impl From<MessageRecord> for TranscriptRecord {
    fn from(record: MessageRecord) -> Self {
        Self::Message {
            model: record.model,
            role: record.kind,
            content: record.content,
            display_content: record.display_content,
        }
    }
}

impl From<ThoughtSummary> for TranscriptRecord {
    fn from(thought: ThoughtSummary) -> Self {
        Self::Thought {
            subject: thought.subject,
            description: thought.description,
        }
    }
}

/// A decoded transcript line, dispatched on its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsonLine {
    Header(TranscriptHeader),
    Entry(TranscriptEntry),
}

impl JsonLine {
    pub(crate) fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        if value.get("type").and_then(serde_json::Value::as_str) == Some("transcript") {
            serde_json::from_value(value).map(Self::Header)
        } else {
            serde_json::from_value(value).map(Self::Entry)
        }
    }
}
