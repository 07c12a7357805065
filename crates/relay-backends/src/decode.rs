use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use relay_core::errors::StreamError;

/// What one complete input line contributed to the token stream.
#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    Skip,
    Token(String),
    /// Terminator seen. Carries any final text still owed to the consumer.
    Done(Option<String>),
}

/// Per-format line classifier. Stateful decoders keep their own counters.
pub trait LineDecoder: Send + Unpin + 'static {
    fn decode_line(&mut self, line: &str) -> Result<LineOutcome, StreamError>;
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;
type CancelFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Incremental line decoder over a raw byte stream.
///
/// Buffers partial lines across chunk boundaries, yields text tokens, and
/// ends with `None` only after the decoder reports its terminator. Input
/// ending early yields `StreamError::EndedUnexpectedly`. Fused after the
/// first error.
pub struct DecodedStream<D> {
    inner: ByteStream,
    decoder: D,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, StreamError>>,
    finished: bool,
    cancel: Option<CancelFuture>,
    deadline: Option<(Pin<Box<tokio::time::Sleep>>, Duration)>,
}

impl<D: LineDecoder> DecodedStream<D> {
    pub fn new<S, E>(bytes: S, decoder: D) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display,
    {
        Self {
            inner: Box::pin(bytes.map(|r| r.map_err(|e| StreamError::Transport(e.to_string())))),
            decoder,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
            cancel: None,
            deadline: None,
        }
    }

    /// Abort with `StreamError::Cancelled` once the token fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(Box::pin(async move { token.cancelled().await }));
        self
    }

    /// Abort with `StreamError::TimedOut` if the stream is still open after `timeout`.
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Box::pin(tokio::time::sleep(timeout)), timeout));
        self
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.feed(&line);
            if self.finished {
                self.buffer.clear();
                return;
            }
        }
    }

    fn feed(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\n', '\r']);
        match self.decoder.decode_line(line) {
            Ok(LineOutcome::Skip) => {}
            Ok(LineOutcome::Token(token)) => {
                if !token.is_empty() {
                    self.pending.push_back(Ok(token));
                }
            }
            Ok(LineOutcome::Done(tail)) => {
                if let Some(tail) = tail.filter(|t| !t.is_empty()) {
                    self.pending.push_back(Ok(tail));
                }
                self.finished = true;
            }
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }

    fn fail(&mut self, error: StreamError) -> Poll<Option<Result<String, StreamError>>> {
        self.finished = true;
        self.pending.clear();
        Poll::Ready(Some(Err(error)))
    }
}

impl<D: LineDecoder> Stream for DecodedStream<D> {
    type Item = Result<String, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            if let Some(cancel) = this.cancel.as_mut() {
                if cancel.as_mut().poll(cx).is_ready() {
                    return this.fail(StreamError::Cancelled);
                }
            }
            // Checked before every read so a busy input cannot outrun it.
            if let Some((sleep, timeout)) = this.deadline.as_mut() {
                if sleep.as_mut().poll(cx).is_ready() {
                    let timeout = *timeout;
                    return this.fail(StreamError::TimedOut(timeout));
                }
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    this.drain_lines();
                }
                Poll::Ready(Some(Err(e))) => return this.fail(e),
                Poll::Ready(None) => {
                    // Final line without a trailing newline.
                    if !this.buffer.is_empty() {
                        let rest = std::mem::take(&mut this.buffer);
                        this.feed(&rest);
                    }
                    if !this.finished {
                        this.pending.push_back(Err(StreamError::EndedUnexpectedly));
                        this.finished = true;
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// True for JSON values a backend uses to signal an in-band error.
pub(crate) fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

/// Characters of `text` beyond the first `already` characters.
pub(crate) fn char_suffix(text: &str, already: usize) -> String {
    text.chars().skip(already).collect()
}
