use serde_json::Value;

use relay_core::errors::StreamError;

use crate::decode::{char_suffix, is_truthy, LineDecoder, LineOutcome};

/// Claude CLI `--output-format stream-json --include-partial-messages`.
///
/// Three shapes carry text: `content_block_delta` events (bare or wrapped
/// in `stream_event`), `assistant` snapshots with the cumulative text so
/// far, and the final `result` object, which terminates the stream. All
/// lengths are counted in chars so only the unseen suffix is ever yielded.
#[derive(Debug, Default)]
pub struct ClaudeStreamDecoder {
    /// Chars handed to the consumer so far.
    emitted: usize,
    /// Chars covered by deltas so far. May trail `emitted` when a snapshot
    /// arrived first.
    delta_chars: usize,
}

impl ClaudeStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted_chars(&self) -> usize {
        self.emitted
    }

    fn on_delta(&mut self, text: &str) -> LineOutcome {
        let len = text.chars().count();
        let start = self.delta_chars;
        self.delta_chars += len;
        if self.delta_chars <= self.emitted {
            return LineOutcome::Skip;
        }
        let already = self.emitted.saturating_sub(start);
        self.emitted = self.delta_chars;
        LineOutcome::Token(char_suffix(text, already))
    }

    fn on_snapshot(&mut self, full_text: &str) -> Option<String> {
        let len = full_text.chars().count();
        if len <= self.emitted {
            return None;
        }
        let suffix = char_suffix(full_text, self.emitted);
        self.emitted = len;
        Some(suffix)
    }
}

impl LineDecoder for ClaudeStreamDecoder {
    fn decode_line(&mut self, line: &str) -> Result<LineOutcome, StreamError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(LineOutcome::Skip);
        }
        let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
            return Ok(LineOutcome::Skip);
        };

        if let Some(error) = parsed.get("error").filter(|e| is_truthy(e)) {
            return Err(StreamError::Backend(error.to_string()));
        }

        let kind = parsed["type"].as_str();
        if kind == Some("result") {
            let tail = parsed["result"].as_str().and_then(|r| self.on_snapshot(r));
            return Ok(LineOutcome::Done(tail));
        }

        let inner = if kind == Some("stream_event") {
            &parsed["event"]
        } else {
            &parsed
        };
        let inner_kind = inner["type"].as_str().or(kind);

        match inner_kind {
            Some("content_block_delta") => {
                let delta = &inner["delta"];
                match (delta["type"].as_str(), delta["text"].as_str()) {
                    (Some("text_delta"), Some(text)) if !text.is_empty() => Ok(self.on_delta(text)),
                    _ => Ok(LineOutcome::Skip),
                }
            }
            Some("assistant") | Some("message") => {
                let message = inner.get("message").unwrap_or(inner);
                let Some(blocks) = message["content"].as_array() else {
                    return Ok(LineOutcome::Skip);
                };
                let full_text: String = blocks
                    .iter()
                    .filter(|b| b["type"].as_str() == Some("text"))
                    .filter_map(|b| b["text"].as_str())
                    .collect();
                Ok(self
                    .on_snapshot(&full_text)
                    .map_or(LineOutcome::Skip, LineOutcome::Token))
            }
            _ => Ok(LineOutcome::Skip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testing::{chunks, drain};
    use crate::decode::DecodedStream;
    use serde_json::json;

    fn delta(text: &str) -> String {
        format!(
            "{}\n",
            json!({"type": "stream_event", "event": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": text}}})
        )
    }

    fn snapshot(text: &str) -> String {
        format!(
            "{}\n",
            json!({"type": "assistant", "message": {"content": [{"type": "text", "text": text}]}})
        )
    }

    fn result(text: &str) -> String {
        format!("{}\n", json!({"type": "result", "result": text}))
    }

    async fn run(lines: &[String]) -> (String, Option<StreamError>) {
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let (tokens, err) = drain(DecodedStream::new(chunks(&refs), ClaudeStreamDecoder::new())).await;
        (tokens.concat(), err)
    }

    #[tokio::test]
    async fn deltas_then_result() {
        let (text, err) = run(&[delta("Hello"), delta(" world"), result("Hello world")]).await;
        assert_eq!(text, "Hello world");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn snapshot_then_covered_delta_is_not_duplicated() {
        let (text, err) = run(&[
            snapshot("Hello"),
            delta("Hello"),
            delta(" there"),
            result("Hello there"),
        ])
        .await;
        assert_eq!(text, "Hello there");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn delta_then_snapshot_is_not_duplicated() {
        let (text, _) = run(&[
            delta("ab"),
            snapshot("abc"),
            delta("c"),
            delta("d"),
            result("abcd"),
        ])
        .await;
        assert_eq!(text, "abcd");
    }

    #[tokio::test]
    async fn bare_delta_and_top_level_assistant_content() {
        let bare = format!(
            "{}\n",
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "x"}})
        );
        let flat = format!(
            "{}\n",
            json!({"type": "assistant", "content": [{"type": "text", "text": "xy"}, {"type": "tool_use"}]})
        );
        let (text, err) = run(&[bare, flat, result("xy")]).await;
        assert_eq!(text, "xy");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn result_alone_yields_full_text() {
        let (text, err) = run(&[result("only the result")]).await;
        assert_eq!(text, "only the result");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn multibyte_lengths_counted_in_chars() {
        let (text, _) = run(&[delta("héllo"), snapshot("héllo wörld"), result("héllo wörld!")]).await;
        assert_eq!(text, "héllo wörld!");
    }

    #[tokio::test]
    async fn missing_result_is_unexpected_end() {
        let (text, err) = run(&[delta("partial")]).await;
        assert_eq!(text, "partial");
        assert_eq!(err, Some(StreamError::EndedUnexpectedly));
    }

    #[tokio::test]
    async fn error_object_is_distinct_from_truncation() {
        let line = format!("{}\n", json!({"type": "error", "error": {"message": "overloaded"}}));
        let (_, err) = run(&[delta("a"), line]).await;
        assert!(matches!(err, Some(StreamError::Backend(detail)) if detail.contains("overloaded")));
    }

    #[test]
    fn emitted_never_exceeds_true_length() {
        let mut decoder = ClaudeStreamDecoder::new();
        for line in [snapshot("abc"), delta("a"), delta("b"), snapshot("ab")] {
            decoder.decode_line(line.trim_end()).unwrap();
        }
        assert_eq!(decoder.emitted_chars(), 3);
    }
}
