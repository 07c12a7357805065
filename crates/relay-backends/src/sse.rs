use serde_json::Value;

use relay_core::errors::StreamError;

use crate::decode::{is_truthy, LineDecoder, LineOutcome};

/// Sentinel payload that ends an OpenAI-compatible event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// OpenAI-compatible server-sent events.
///
/// Only single-line `data:` payloads are understood. Comments, blank lines
/// and the `event:`/`id:`/`retry:` fields are skipped, as are payloads that
/// fail to parse as JSON.
#[derive(Debug, Default)]
pub struct EventStreamDecoder;

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl LineDecoder for EventStreamDecoder {
    fn decode_line(&mut self, line: &str) -> Result<LineOutcome, StreamError> {
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return Ok(LineOutcome::Skip);
        }
        if trimmed.starts_with("event:") || trimmed.starts_with("id:") || trimmed.starts_with("retry:") {
            return Ok(LineOutcome::Skip);
        }
        let Some(payload) = trimmed.strip_prefix("data:") else {
            return Ok(LineOutcome::Skip);
        };
        let payload = payload.trim();

        if payload == DONE_SENTINEL {
            return Ok(LineOutcome::Done(None));
        }

        let Ok(parsed) = serde_json::from_str::<Value>(payload) else {
            return Ok(LineOutcome::Skip);
        };

        if let Some(error) = parsed.get("error").filter(|e| is_truthy(e)) {
            return Err(StreamError::Backend(error.to_string()));
        }

        match parsed["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => Ok(LineOutcome::Token(content.to_string())),
            _ => Ok(LineOutcome::Skip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testing::{chunks, drain};
    use crate::decode::DecodedStream;

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    #[tokio::test]
    async fn yields_delta_content_until_done() {
        let first = delta("Hel");
        let second = delta("lo");
        let input = [
            ": connected\n",
            "event: message\nid: 1\nretry: 100\n",
            first.as_str(),
            second.as_str(),
            "data: [DONE]\n\n",
        ];
        let (tokens, err) = drain(DecodedStream::new(chunks(&input), EventStreamDecoder::new())).await;
        assert_eq!(tokens.concat(), "Hello");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn malformed_json_skipped() {
        let ok = delta("ok");
        let input = ["data: {not json\n", ok.as_str(), "data: [DONE]\n"];
        let (tokens, err) = drain(DecodedStream::new(chunks(&input), EventStreamDecoder::new())).await;
        assert_eq!(tokens, vec!["ok"]);
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn role_only_delta_yields_nothing() {
        let input = [
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n",
            "data: [DONE]\n",
        ];
        let (tokens, err) = drain(DecodedStream::new(chunks(&input), EventStreamDecoder::new())).await;
        assert!(tokens.is_empty());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn error_payload_raises() {
        let input = ["data: {\"error\":{\"message\":\"rate limited\"}}\n"];
        let (_, err) = drain(DecodedStream::new(chunks(&input), EventStreamDecoder::new())).await;
        match err {
            Some(StreamError::Backend(detail)) => assert!(detail.contains("rate limited")),
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_stream_is_not_success() {
        let partial = delta("partial");
        let (tokens, err) =
            drain(DecodedStream::new(chunks(&[partial.as_str()]), EventStreamDecoder::new())).await;
        assert_eq!(tokens, vec!["partial"]);
        assert_eq!(err, Some(StreamError::EndedUnexpectedly));
    }

    #[tokio::test]
    async fn data_line_split_mid_payload() {
        let input = ["data: {\"choices\":[{\"del", "ta\":{\"content\":\"x\"}}]}\ndata: [DO", "NE]\n"];
        let (tokens, err) = drain(DecodedStream::new(chunks(&input), EventStreamDecoder::new())).await;
        assert_eq!(tokens, vec!["x"]);
        assert!(err.is_none());
    }
}
