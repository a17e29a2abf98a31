//! Server-sent event decoding for streamed completions.
//!
//! Network chunks do not respect line boundaries, so bytes are buffered until a
//! full line is available. Two payload formats are understood: the proxy, which
//! sends each delta as a JSON string literal, and OpenAI-compatible APIs, which
//! send `chat.completion.chunk` objects.

use crate::error::AiError;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use super::ChunkStream;

/// Reassembles complete lines from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer)
            .trim_end_matches('\r')
            .to_string();
        self.buffer.clear();
        Some(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseEvent<'a> {
    Data(&'a str),
    Done,
}

/// Interpret one SSE line. Comments, blank lines and non-data fields yield `None`.
pub fn parse_line(line: &str) -> Option<SseEvent<'_>> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == "[DONE]" {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(data))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// `data: "<json string literal>"`
    ProxyText,
    /// `data: {"choices":[{"delta":{"content":"..."}}]}`
    OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct DeltaChunk {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

impl PayloadFormat {
    /// Text carried by one data payload. Unparseable payloads are skipped.
    pub fn decode(&self, data: &str) -> Option<String> {
        let decoded = match self {
            PayloadFormat::ProxyText => serde_json::from_str::<String>(data).ok(),
            PayloadFormat::OpenAiDelta => serde_json::from_str::<DeltaChunk>(data)
                .ok()
                .and_then(|chunk| chunk.choices.into_iter().next())
                .and_then(|choice| choice.delta.content),
        };
        if decoded.is_none() {
            debug!("Skipping undecodable SSE payload: {}", data);
        }
        decoded.filter(|text| !text.is_empty())
    }
}

struct DecodeState {
    bytes: BoxStream<'static, Result<Vec<u8>, AiError>>,
    decoder: SseLineDecoder,
    format: PayloadFormat,
    ready: std::collections::VecDeque<String>,
    done: bool,
}

impl DecodeState {
    /// Decode completed lines into `ready`. Returns true once `[DONE]` is seen.
    fn absorb(&mut self, lines: Vec<String>) -> bool {
        for line in lines {
            match parse_line(&line) {
                Some(SseEvent::Done) => return true,
                Some(SseEvent::Data(data)) => {
                    if let Some(text) = self.format.decode(data) {
                        self.ready.push_back(text);
                    }
                }
                None => {}
            }
        }
        false
    }
}

/// Turn a byte stream of SSE frames into a stream of text deltas.
///
/// The stream ends at `[DONE]` or when the bytes run out. A transport error is
/// yielded once and ends the stream.
pub fn text_stream(
    bytes: BoxStream<'static, Result<Vec<u8>, AiError>>,
    format: PayloadFormat,
) -> ChunkStream {
    let state = DecodeState {
        bytes,
        decoder: SseLineDecoder::new(),
        format,
        ready: std::collections::VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(text) = state.ready.pop_front() {
                return Some((Ok(text), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.decoder.push(&chunk);
                    state.done = state.absorb(lines);
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.ready.clear();
                    return Some((Err(e), state));
                }
                None => {
                    let tail: Vec<String> = state.decoder.finish().into_iter().collect();
                    state.absorb(tail);
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(chunks: Vec<&'static str>) -> BoxStream<'static, Result<Vec<u8>, AiError>> {
        stream::iter(chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec()))).boxed()
    }

    async fn collect_ok(stream: ChunkStream) -> Vec<String> {
        stream.map(|c| c.unwrap()).collect().await
    }

    // ==================== Line Decoder Tests ====================

    #[test]
    fn test_line_decoder_reassembles_split_lines() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(b"data: \"hel").is_empty());
        assert_eq!(decoder.push(b"lo\"\r\ndata: "), vec!["data: \"hello\""]);
        assert_eq!(decoder.push(b"[DONE]\n"), vec!["data: [DONE]"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_line_decoder_handles_multibyte_split() {
        let bytes = "data: \"苹果\"\n".as_bytes();
        let mut decoder = SseLineDecoder::new();
        // Split inside the first multi-byte character
        assert!(decoder.push(&bytes[..8]).is_empty());
        assert_eq!(decoder.push(&bytes[8..]), vec!["data: \"苹果\""]);
    }

    #[test]
    fn test_line_decoder_finish_flushes_tail() {
        let mut decoder = SseLineDecoder::new();
        decoder.push(b"data: \"tail\"");
        assert_eq!(decoder.finish().as_deref(), Some("data: \"tail\""));
    }

    // ==================== Line Parsing Tests ====================

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_line("data: \"x\""), Some(SseEvent::Data("\"x\"")));
        assert_eq!(parse_line("data:{}"), Some(SseEvent::Data("{}")));
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn test_payload_decoding() {
        assert_eq!(
            PayloadFormat::ProxyText.decode(r#""{\"translation\": \"""#).as_deref(),
            Some(r#"{"translation": ""#)
        );
        assert_eq!(
            PayloadFormat::OpenAiDelta
                .decode(r#"{"choices":[{"delta":{"content":"abc"}}]}"#)
                .as_deref(),
            Some("abc")
        );
        assert_eq!(
            PayloadFormat::OpenAiDelta.decode(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(PayloadFormat::ProxyText.decode("not json"), None);
    }

    // ==================== Stream Tests ====================

    #[tokio::test]
    async fn test_text_stream_proxy_format() {
        let bytes = byte_stream(vec![
            "data: \"{\\\"correctedText\\\": \"\n\n",
            "data: \"\\\"apple\\\"}\"\n",
            "\ndata: [DONE]\n\n",
            "data: \"ignored after done\"\n\n",
        ]);
        let chunks = collect_ok(text_stream(bytes, PayloadFormat::ProxyText)).await;
        assert_eq!(chunks, vec!["{\"correctedText\": ", "\"apple\"}"]);
    }

    #[tokio::test]
    async fn test_text_stream_without_done_marker() {
        let bytes = byte_stream(vec!["data: \"one\"\n", "data: \"two\""]);
        let chunks = collect_ok(text_stream(bytes, PayloadFormat::ProxyText)).await;
        assert_eq!(chunks, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_text_stream_surfaces_transport_error() {
        let bytes: BoxStream<'static, Result<Vec<u8>, AiError>> = stream::iter(vec![
            Ok(b"data: \"first\"\n".to_vec()),
            Err(AiError::Stream("connection reset".to_string())),
            Ok(b"data: \"never\"\n".to_vec()),
        ])
        .boxed();
        let results: Vec<Result<String, AiError>> =
            text_stream(bytes, PayloadFormat::ProxyText).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "first");
        assert!(matches!(results[1], Err(AiError::Stream(_))));
    }
}
