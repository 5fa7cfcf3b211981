//! Pure helpers over conversation history.
//!
//! The session keeps one comprehensive history with every turn ever
//! produced. [`curate_history`] derives the view that is sent to the model:
//! runs of model turns containing empty or degenerate output are dropped as a
//! whole so a bad response never poisons the next request.

use chat_contract::{Content, Part, Role, ThoughtSummary};

use crate::error::InvalidHistoryError;

/// Placeholder accepted by preview-tier models in place of a real thought
/// signature.
pub const SYNTHETIC_THOUGHT_SIGNATURE: &str = "skip_thought_signature_validator";

/// True when a model turn holds only well-formed output.
pub fn is_valid_content(content: &Content) -> bool {
    if content.parts.is_empty() {
        return false;
    }

    content.parts.iter().all(|part| {
        if part.is_degenerate() {
            return false;
        }
        part.is_thought() || part.text.as_deref() != Some("")
    })
}

/// Keeps every user turn and each contiguous run of model turns only when
/// all turns in the run are valid. Idempotent.
pub fn curate_history(history: &[Content]) -> Vec<Content> {
    let mut curated = Vec::with_capacity(history.len());
    let mut index = 0;

    while index < history.len() {
        if history[index].role == Role::User {
            curated.push(history[index].clone());
            index += 1;
            continue;
        }

        let run_start = index;
        while index < history.len() && history[index].role == Role::Model {
            index += 1;
        }

        let run = &history[run_start..index];
        if run.iter().all(is_valid_content) {
            curated.extend_from_slice(run);
        }
    }

    curated
}

/// Checks history supplied from outside the session.
pub fn validate_history(history: &[Content]) -> Result<(), InvalidHistoryError> {
    for (index, content) in history.iter().enumerate() {
        if content.parts.is_empty() {
            return Err(InvalidHistoryError::EmptyTurn { index });
        }
        if content.parts.iter().any(Part::is_degenerate) {
            return Err(InvalidHistoryError::DegeneratePart { index });
        }
    }
    Ok(())
}

/// Merges adjacent plain-text fragments. Thought and tool-call parts stay
/// separate, and a fragment carrying a thought signature starts a new part.
pub fn consolidate_parts(parts: Vec<Part>) -> Vec<Part> {
    let mut consolidated: Vec<Part> = Vec::with_capacity(parts.len());

    for part in parts {
        let mergeable = part.is_plain_text() && part.thought_signature.is_none();
        if mergeable {
            if let Some(last) = consolidated.last_mut().filter(|last| last.is_plain_text()) {
                if let (Some(existing), Some(incoming)) = (last.text.as_mut(), part.text.as_deref()) {
                    existing.push_str(incoming);
                    continue;
                }
            }
        }
        consolidated.push(part);
    }

    consolidated
}

/// Index of the most recent user turn carrying literal text rather than a
/// tool result. Everything from there on is the active loop.
pub fn active_loop_start(history: &[Content]) -> Option<usize> {
    history.iter().rposition(|content| {
        content.role == Role::User && content.has_literal_text() && !content.has_function_response()
    })
}

/// Gives every function-call part in the active loop a thought signature,
/// injecting [`SYNTHETIC_THOUGHT_SIGNATURE`] where one is missing. Returns
/// the number of parts changed.
pub fn ensure_active_loop_signatures(contents: &mut [Content]) -> usize {
    let Some(start) = active_loop_start(contents) else {
        return 0;
    };

    let mut injected = 0;
    for content in contents[start..]
        .iter_mut()
        .filter(|content| content.role == Role::Model)
    {
        for part in content
            .parts
            .iter_mut()
            .filter(|part| part.function_call.is_some() && part.thought_signature.is_none())
        {
            part.thought_signature = Some(SYNTHETIC_THOUGHT_SIGNATURE.to_string());
            injected += 1;
        }
    }
    injected
}

/// Removes thought signatures so history can be replayed against a model
/// that did not produce them.
pub fn strip_thought_signatures(history: &mut [Content]) {
    for part in history.iter_mut().flat_map(|content| content.parts.iter_mut()) {
        part.thought_signature = None;
    }
}

/// Rough prompt size: a quarter of the serialized request length.
pub fn estimate_tokens(contents: &[Content]) -> u64 {
    let chars = serde_json::to_string(contents)
        .map(|encoded| encoded.chars().count())
        .unwrap_or_default();
    (chars / 4) as u64
}

/// Splits a reasoning fragment into a `**Subject**` header and the rest.
pub fn parse_thought(text: &str) -> ThoughtSummary {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("**") {
        if let Some(end) = rest.find("**") {
            return ThoughtSummary {
                subject: rest[..end].trim().to_string(),
                description: rest[end + 2..].trim().to_string(),
            };
        }
    }

    ThoughtSummary {
        subject: String::new(),
        description: trimmed.to_string(),
    }
}
