use chat_contract::{FinishReason, GenerateContentResponse};

use crate::error::{InvalidStreamError, InvalidStreamKind};

/// Facts about one finished model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCompletion {
    /// Concatenated non-thought text.
    pub text: String,
    pub has_tool_call: bool,
    pub finish_reason: Option<FinishReason>,
}

/// Accumulates chunks of one response stream and judges it at the end.
#[derive(Debug, Clone, Default)]
pub struct StreamValidator {
    text: String,
    has_tool_call: bool,
    finish_reason: Option<FinishReason>,
}

impl StreamValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, chunk: &GenerateContentResponse) {
        for part in chunk.parts() {
            if part.function_call.is_some() {
                self.has_tool_call = true;
            }
            if part.is_thought() {
                continue;
            }
            if let Some(text) = part.text.as_deref() {
                self.text.push_str(text);
            }
        }

        if let Some(reason) = chunk.finish_reason() {
            self.finish_reason = Some(reason);
        }
    }

    pub fn has_tool_call(&self) -> bool {
        self.has_tool_call
    }

    /// A tool call makes the response valid no matter how it ended.
    pub fn finish(self) -> Result<TurnCompletion, InvalidStreamError> {
        let completion = TurnCompletion {
            text: self.text,
            has_tool_call: self.has_tool_call,
            finish_reason: self.finish_reason,
        };

        if completion.has_tool_call {
            return Ok(completion);
        }

        match completion.finish_reason {
            None => Err(InvalidStreamError::new(InvalidStreamKind::NoFinishReason)),
            Some(FinishReason::MalformedFunctionCall) => Err(InvalidStreamError::new(
                InvalidStreamKind::MalformedFunctionCall,
            )),
            Some(_) if completion.text.trim().is_empty() => {
                Err(InvalidStreamError::new(InvalidStreamKind::NoResponseText))
            }
            Some(_) => Ok(completion),
        }
    }
}

#[cfg(test)]
mod tests {
    use chat_contract::Part;
    use serde_json::json;

    use super::*;

    fn validate(chunks: &[GenerateContentResponse]) -> Result<TurnCompletion, InvalidStreamError> {
        let mut validator = StreamValidator::new();
        for chunk in chunks {
            validator.observe(chunk);
        }
        validator.finish()
    }

    #[test]
    fn tool_call_without_finish_reason_is_valid() {
        let chunks = [GenerateContentResponse::from_parts(
            vec![Part::function_call("read_file", json!({"path": "a"}))],
            None,
        )];

        let completion = validate(&chunks).expect("tool call should be accepted");
        assert!(completion.has_tool_call);
        assert_eq!(completion.finish_reason, None);
    }

    #[test]
    fn missing_finish_reason_is_invalid() {
        let chunks = [GenerateContentResponse::from_parts(
            vec![Part::text("partial")],
            None,
        )];
        assert_eq!(
            validate(&chunks).map_err(|error| error.kind),
            Err(InvalidStreamKind::NoFinishReason)
        );
    }

    #[test]
    fn malformed_function_call_is_invalid() {
        let chunks = [GenerateContentResponse::from_parts(
            vec![Part::text("oops")],
            Some(FinishReason::MalformedFunctionCall),
        )];
        assert_eq!(
            validate(&chunks).map_err(|error| error.kind),
            Err(InvalidStreamKind::MalformedFunctionCall)
        );
    }

    #[test]
    fn whitespace_or_thought_only_text_is_invalid() {
        let chunks = [
            GenerateContentResponse::from_parts(vec![Part::thought("thinking hard")], None),
            GenerateContentResponse::from_parts(vec![Part::text("  \n")], Some(FinishReason::Stop)),
        ];
        assert_eq!(
            validate(&chunks).map_err(|error| error.kind),
            Err(InvalidStreamKind::NoResponseText)
        );
    }

    #[test]
    fn text_split_across_chunks_is_concatenated() {
        let chunks = [
            GenerateContentResponse::from_parts(vec![Part::text("Hel")], None),
            GenerateContentResponse::from_parts(vec![Part::text("lo")], Some(FinishReason::Stop)),
        ];

        let completion = validate(&chunks).expect("text response should be valid");
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn empty_stream_has_no_finish_reason() {
        assert_eq!(
            validate(&[]).map_err(|error| error.kind),
            Err(InvalidStreamKind::NoFinishReason)
        );
    }
}
