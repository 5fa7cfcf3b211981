use chat_contract::{Content, MessageKind};

use crate::schema::TranscriptRecord;
use crate::store::TranscriptStore;

impl TranscriptStore {
    /// Rebuilds conversation history from recorded messages, in file order.
    /// Thoughts, token reports and tool-call batches are not history turns.
    #[must_use]
    pub fn replay_history(&self) -> Vec<Content> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.record {
                TranscriptRecord::Message { role, content, .. } if !content.is_empty() => {
                    Some(match role {
                        MessageKind::User => Content::user(content.clone()),
                        MessageKind::Model => Content::model(content.clone()),
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Model named by the most recent message, if any.
    #[must_use]
    pub fn last_model(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|entry| match &entry.record {
            TranscriptRecord::Message { model, .. } | TranscriptRecord::ToolCalls { model, .. } => {
                Some(model.as_str())
            }
            _ => None,
        })
    }
}
