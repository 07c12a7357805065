use serde_json::Value;

use relay_core::errors::StreamError;

use crate::decode::{is_truthy, LineDecoder, LineOutcome};

/// Newline-delimited JSON chat stream (Ollama `/api/chat` with `stream: true`).
#[derive(Debug, Default)]
pub struct NdjsonDecoder;

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl LineDecoder for NdjsonDecoder {
    fn decode_line(&mut self, line: &str) -> Result<LineOutcome, StreamError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(LineOutcome::Skip);
        }
        let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
            return Ok(LineOutcome::Skip);
        };

        if let Some(error) = parsed.get("error").filter(|e| is_truthy(e)) {
            let detail = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(StreamError::Backend(detail));
        }

        if parsed["done"].as_bool() == Some(true) {
            return Ok(LineOutcome::Done(None));
        }

        match parsed["message"]["content"].as_str() {
            Some(content) if !content.is_empty() => Ok(LineOutcome::Token(content.to_string())),
            _ => Ok(LineOutcome::Skip),
        }
    }
}
