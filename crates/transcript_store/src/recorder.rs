use std::sync::{Mutex, MutexGuard};

use chat_contract::{
    CompletedToolCall, MessageRecord, RecordingError, RecordingSink, ThoughtSummary,
    UsageMetadata,
};

use crate::schema::TranscriptRecord;
use crate::store::TranscriptStore;

/// Shares a [`TranscriptStore`] with a chat session.
pub struct TranscriptRecorder {
    store: Mutex<TranscriptStore>,
}

impl TranscriptRecorder {
    pub fn new(store: TranscriptStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Runs `f` against the underlying store.
    pub fn with_store<R>(&self, f: impl FnOnce(&TranscriptStore) -> R) -> R {
        f(&*lock_unpoisoned(&self.store))
    }

    fn append(&self, record: TranscriptRecord) -> Result<(), RecordingError> {
        lock_unpoisoned(&self.store).append(record)?;
        Ok(())
    }
}

impl RecordingSink for TranscriptRecorder {
    fn record_message(&self, record: MessageRecord) -> Result<(), RecordingError> {
        self.append(record.into())
    }

    fn record_message_tokens(&self, usage: &UsageMetadata) -> Result<(), RecordingError> {
        self.append(TranscriptRecord::Tokens {
            usage: usage.clone(),
        })
    }

    fn record_thought(&self, thought: ThoughtSummary) -> Result<(), RecordingError> {
        self.append(thought.into())
    }

    fn record_tool_calls(
        &self,
        model: &str,
        calls: &[CompletedToolCall],
    ) -> Result<(), RecordingError> {
        if calls.is_empty() {
            return Ok(());
        }
        self.append(TranscriptRecord::ToolCalls {
            model: model.to_string(),
            calls: calls.to_vec(),
        })
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
