use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::errors::StreamError;

/// Lazy, finite, non-restartable sequence of text tokens from one backend call.
///
/// Terminates with `None` only after the decoder saw its terminator; every
/// other ending surfaces as an `Err` item first.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

/// Drain a token stream into the full response text.
pub async fn collect_tokens(mut stream: TokenStream) -> Result<String, StreamError> {
    let mut text = String::new();
    while let Some(token) = stream.next().await {
        text.push_str(&token?);
    }
    Ok(text)
}
