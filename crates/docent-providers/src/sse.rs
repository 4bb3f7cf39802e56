//! Server-sent-event decoding for OpenAI-style streaming completions.
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Par"}}]}
//!
//! data: {"choices":[{"delta":{"content":"is"},"finish_reason":"stop"}]}
//!
//! data: [DONE]
//! ```
//!
//! The decoder pulls one transport chunk at a time, only when its consumer
//! asks for the next delta, so a slow reader slows the socket down instead
//! of filling a buffer.

use docent_core::error::DocentError;
use docent_core::traits::TextStream;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

/// A single decoded SSE line.
#[derive(Debug, PartialEq)]
enum Frame {
    Data { delta: Option<String>, finished: bool },
    Done,
    Error(String),
    Skip,
}

fn parse_line(line: &str) -> Frame {
    let line = line.trim();
    // Blank separators, `:` comments (keep-alives), `event:`/`id:` fields
    let Some(data) = line.strip_prefix("data:") else {
        return Frame::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Frame::Done;
    }
    let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
        tracing::debug!("Skipping undecodable SSE payload: {data}");
        return Frame::Skip;
    };
    if let Some(err) = json.get("error") {
        let message = err["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| err.to_string());
        return Frame::Error(message);
    }
    let choice = &json["choices"][0];
    Frame::Data {
        delta: choice["delta"]["content"].as_str().map(String::from),
        finished: choice["finish_reason"].as_str().is_some(),
    }
}

/// Why decoding stopped early.
#[derive(Debug)]
enum Failure {
    Idle(Duration),
    Provider(String),
}

impl Failure {
    /// Before the first delta the provider never answered; after it, the
    /// answer was cut short.
    fn into_error(self, emitted: bool) -> DocentError {
        let message = match &self {
            Failure::Idle(idle) => format!("no data received for {}ms", idle.as_millis()),
            Failure::Provider(message) => message.clone(),
        };
        match (self, emitted) {
            (_, true) => DocentError::GenerationInterrupted(message),
            (Failure::Idle(_), false) => DocentError::ProviderTimeout(message),
            (Failure::Provider(_), false) => DocentError::ProviderUnavailable(message),
        }
    }
}

struct DecoderState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    error: Option<Failure>,
    emitted: bool,
    finished: bool,
    done: bool,
    idle: Duration,
}

impl<S> DecoderState<S> {
    fn feed_line(&mut self, raw: &[u8]) {
        match parse_line(&String::from_utf8_lossy(raw)) {
            Frame::Data { delta, finished } => {
                if let Some(delta) = delta.filter(|d| !d.is_empty()) {
                    self.pending.push_back(delta);
                }
                self.finished |= finished;
            }
            Frame::Done => {
                self.finished = true;
                self.done = true;
            }
            Frame::Error(message) => {
                self.error = Some(Failure::Provider(message));
                self.done = true;
            }
            Frame::Skip => {}
        }
    }

    /// Split complete lines off the byte buffer. Working on bytes keeps
    /// multi-byte characters intact when a chunk boundary falls inside one.
    fn drain_lines(&mut self) {
        while !self.done {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.feed_line(&line);
        }
    }
}

/// Decode a streaming chat-completion body into text deltas.
///
/// The resulting stream ends cleanly after `[DONE]` (or a `finish_reason`
/// followed by end of body). It fails when the provider reports an in-band
/// error, when the transport fails, when nothing arrives for `idle`, or when
/// the body closes before completion. Once a delta has been yielded the
/// failure is `GenerationInterrupted`; before that it is `ProviderTimeout`
/// for the idle case and `ProviderUnavailable` otherwise.
pub fn decode_text_stream<S, B, E>(bytes: S, idle: Duration) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecoderState {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        error: None,
        emitted: false,
        finished: false,
        done: false,
        idle,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                state.emitted = true;
                return Some((Ok(delta), state));
            }
            if let Some(failure) = state.error.take() {
                let error = failure.into_error(state.emitted);
                return Some((Err(error), state));
            }
            if state.done {
                return None;
            }

            match tokio::time::timeout(state.idle, state.inner.next()).await {
                Ok(Some(Ok(chunk))) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_lines();
                }
                Ok(Some(Err(e))) => {
                    state.done = true;
                    state.error = Some(Failure::Provider(format!("transport error: {e}")));
                }
                Ok(None) => {
                    // Body closed; a final line may lack its newline
                    if !state.buffer.is_empty() {
                        let rest = std::mem::take(&mut state.buffer);
                        state.feed_line(&rest);
                    }
                    if !state.finished && state.error.is_none() {
                        state.error = Some(Failure::Provider("stream closed before completion".into()));
                    }
                    state.done = true;
                }
                Err(_) => {
                    state.done = true;
                    state.error = Some(Failure::Idle(state.idle));
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::error::Result;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> + Send + 'static {
        let owned: Vec<_> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        futures::stream::iter(owned)
    }

    async fn collect(stream: TextStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}, "finish_reason": null}]})
        )
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line(": OPENROUTER PROCESSING"), Frame::Skip);
        assert_eq!(parse_line("data: [DONE]"), Frame::Done);
        assert_eq!(
            parse_line(r#"data: {"error":{"message":"quota exceeded"}}"#),
            Frame::Error("quota exceeded".into())
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            Frame::Data { delta: None, finished: true }
        );
    }

    #[tokio::test]
    async fn test_deltas_in_order() {
        let body = format!("{}{}{}data: [DONE]\n\n", delta("Par"), delta("is is"), delta(" the capital."));
        let stream = decode_text_stream(chunks(&[body.as_bytes()]), Duration::from_secs(5));
        let out: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(out, vec!["Par", "is is", " the capital."]);
    }

    #[tokio::test]
    async fn test_split_multibyte_character() {
        let body = format!("{}data: [DONE]\n", delta("café"));
        let bytes = body.as_bytes();
        // Split inside the two-byte 'é'
        let cut = body.find('é').unwrap() + 1;
        let stream = decode_text_stream(
            chunks(&[&bytes[..cut], &bytes[cut..]]),
            Duration::from_secs(5),
        );
        let out = collect(stream).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), "café");
    }

    #[tokio::test]
    async fn test_closed_before_done_is_interrupted() {
        let body = delta("partial");
        let stream = decode_text_stream(chunks(&[body.as_bytes()]), Duration::from_secs(5));
        let out = collect(stream).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "partial");
        assert!(matches!(out[1], Err(DocentError::GenerationInterrupted(_))));
    }

    #[tokio::test]
    async fn test_finish_reason_without_done_is_complete() {
        let body = r#"data: {"choices":[{"delta":{"content":"ok"},"finish_reason":"stop"}]}"#;
        let stream = decode_text_stream(chunks(&[body.as_bytes()]), Duration::from_secs(5));
        let out = collect(stream).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_in_band_error_after_partial_output() {
        let body = format!("{}data: {{\"error\":{{\"message\":\"upstream reset\"}}}}\n\n", delta("Hel"));
        let stream = decode_text_stream(chunks(&[body.as_bytes()]), Duration::from_secs(5));
        let out = collect(stream).await;
        assert_eq!(out[0].as_ref().unwrap(), "Hel");
        match &out[1] {
            Err(DocentError::GenerationInterrupted(msg)) => assert!(msg.contains("upstream reset")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let first = delta("slow");
        let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(first.into_bytes())])
            .chain(futures::stream::pending());
        let stream = decode_text_stream(body, Duration::from_millis(20));
        let out = collect(stream).await;
        assert_eq!(out[0].as_ref().unwrap(), "slow");
        assert!(matches!(out[1], Err(DocentError::GenerationInterrupted(_))));
    }

    #[tokio::test]
    async fn test_in_band_error_before_output_is_unavailable() {
        let body = "data: {\"error\":{\"message\":\"Rate limit exceeded\"}}\n\n";
        let stream = decode_text_stream(chunks(&[body.as_bytes()]), Duration::from_secs(5));
        let out = collect(stream).await;
        assert_eq!(out.len(), 1);
        match &out[0] {
            Err(DocentError::ProviderUnavailable(msg)) => assert_eq!(msg, "Rate limit exceeded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idle_before_first_chunk_is_timeout() {
        let body = futures::stream::pending::<std::result::Result<Vec<u8>, std::io::Error>>();
        let stream = decode_text_stream(body, Duration::from_millis(20));
        let out = collect(stream).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(DocentError::ProviderTimeout(_))));
    }

    #[tokio::test]
    async fn test_empty_body_is_unavailable() {
        let stream = decode_text_stream(chunks(&[]), Duration::from_secs(5));
        let out = collect(stream).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(DocentError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_done_without_content_is_empty_answer() {
        let stream = decode_text_stream(chunks(&[b": keep-alive\n\ndata: [DONE]\n\n".as_slice()]), Duration::from_secs(5));
        assert!(collect(stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error() {
        let body = futures::stream::iter(vec![
            Ok(delta("a").into_bytes()),
            Err(std::io::Error::other("connection reset")),
        ]);
        let stream = decode_text_stream(body, Duration::from_secs(5));
        let out = collect(stream).await;
        assert_eq!(out.len(), 2);
        assert!(out[1].as_ref().unwrap_err().to_string().contains("connection reset"));
    }
}
