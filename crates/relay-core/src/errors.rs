use std::time::Duration;

/// Failures while decoding a backend's token stream.
///
/// Truncation, an explicit in-band error object, and caller cancellation
/// are separate variants so consumers can tell them apart.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The backend sent an explicit error object mid-stream.
    #[error("Stream error: {0}")]
    Backend(String),
    /// Input ended before the terminator was seen.
    #[error("Stream ended unexpectedly")]
    EndedUnexpectedly,
    /// The caller cancelled the stream.
    #[error("Stream aborted")]
    Cancelled,
    #[error("Stream timed out after {0:?}")]
    TimedOut(Duration),
    /// The underlying byte source failed (socket reset, pipe error).
    #[error("Stream transport error: {0}")]
    Transport(String),
}

impl StreamError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Backend(_) => "backend_error",
            Self::EndedUnexpectedly => "ended_unexpectedly",
            Self::Cancelled => "cancelled",
            Self::TimedOut(_) => "timeout",
            Self::Transport(_) => "transport",
        }
    }
}

/// Failure of one backend invocation. Scoped to a single agent turn.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{backend} CLI not found in PATH. Install it: {hint}")]
    NotInstalled { backend: String, hint: String },

    #[error("failed to spawn {backend}: {detail}")]
    Spawn { backend: String, detail: String },

    #[error("{backend} timed out after {}s", .timeout.as_secs())]
    Timeout { backend: String, timeout: Duration },

    #[error("{backend} exited with code {}: {detail}", exit_code(.code))]
    Exit {
        backend: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("{backend} completed without producing output")]
    EmptyOutput { backend: String },

    #[error("{backend} returned HTTP {status}{}", body_suffix(.body))]
    Http {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("{backend} returned an invalid response: {detail}")]
    InvalidResponse { backend: String, detail: String },

    #[error("{backend} server not reachable at {host}")]
    Unreachable { backend: String, host: String },

    #[error("{backend} request failed: {detail}")]
    Request { backend: String, detail: String },

    #[error("{backend} {source}")]
    Stream {
        backend: String,
        #[source]
        source: StreamError,
    },

    #[error("Unsupported relay backend: {name}. Supported: {supported}")]
    Unsupported { name: String, supported: String },

    #[error("{backend} does not support streaming")]
    StreamingUnsupported { backend: String },

    #[error("no session for agent: {0}")]
    NoSession(String),
}

fn exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {body}")
    }
}

impl BackendError {
    /// Timeouts are distinguished from crashes at every layer.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Stream {
                    source: StreamError::TimedOut(_),
                    ..
                }
        )
    }

    /// Short classification string for logging and events.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotInstalled { .. } => "not_installed",
            Self::Spawn { .. } => "spawn_failed",
            Self::Timeout { .. } => "timeout",
            Self::Exit { .. } => "exit_status",
            Self::EmptyOutput { .. } => "empty_output",
            Self::Http { .. } => "http_status",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Unreachable { .. } => "unreachable",
            Self::Request { .. } => "request_failed",
            Self::Stream { source, .. } => source.error_kind(),
            Self::Unsupported { .. } => "unsupported_backend",
            Self::StreamingUnsupported { .. } => "streaming_unsupported",
            Self::NoSession(_) => "no_session",
        }
    }

    pub fn stream(backend: impl Into<String>, source: StreamError) -> Self {
        Self::Stream {
            backend: backend.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_error_messages_are_distinct() {
        let backend = StreamError::Backend("{\"message\":\"overloaded\"}".into());
        let truncated = StreamError::EndedUnexpectedly;
        let cancelled = StreamError::Cancelled;
        assert_eq!(truncated.to_string(), "Stream ended unexpectedly");
        assert_eq!(cancelled.to_string(), "Stream aborted");
        assert!(backend.to_string().starts_with("Stream error: "));
        assert_ne!(backend.error_kind(), truncated.error_kind());
        assert_ne!(truncated.error_kind(), cancelled.error_kind());
    }

    #[test]
    fn timeout_classification() {
        let timeout = BackendError::Timeout {
            backend: "claude".into(),
            timeout: Duration::from_secs(600),
        };
        assert!(timeout.is_timeout());
        assert_eq!(timeout.to_string(), "claude timed out after 600s");

        let stream_timeout =
            BackendError::stream("ollama", StreamError::TimedOut(Duration::from_secs(5)));
        assert!(stream_timeout.is_timeout());

        let crash = BackendError::Exit {
            backend: "codex".into(),
            code: Some(2),
            detail: "boom".into(),
        };
        assert!(!crash.is_timeout());
        assert_eq!(crash.error_kind(), "exit_status");
    }

    #[test]
    fn exit_message_without_code() {
        let err = BackendError::Exit {
            backend: "gemini".into(),
            code: None,
            detail: "killed".into(),
        };
        assert_eq!(err.to_string(), "gemini exited with code signal: killed");
    }

    #[test]
    fn http_message_omits_empty_body() {
        let err = BackendError::Http {
            backend: "Ollama".into(),
            status: 500,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "Ollama returned HTTP 500");
    }

    #[test]
    fn unsupported_lists_supported() {
        let err = BackendError::Unsupported {
            name: "bard".into(),
            supported: "claude, codex".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported relay backend: bard. Supported: claude, codex"
        );
    }

    #[test]
    fn stream_kind_passes_through() {
        let err = BackendError::stream("claude", StreamError::EndedUnexpectedly);
        assert_eq!(err.error_kind(), "ended_unexpectedly");
        assert_eq!(err.to_string(), "claude Stream ended unexpectedly");
    }
}
