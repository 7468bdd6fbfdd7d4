//! Incremental decoding of line-delimited streaming replies.
//!
//! Every backend streams newline-terminated frames (SSE `data:` lines or
//! bare NDJSON), but what a frame *means* differs per backend. The byte
//! plumbing lives here; each provider supplies a [`FrameDecoder`] that turns
//! one complete line into zero or more [`StreamEvent`]s.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::trace;
use webpilot_core::error::ProviderError;
use webpilot_core::provider::{StreamChunk, Usage};

/// What one decoded frame contributed to the reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Usage(Usage),
    /// The backend signalled the end of the reply.
    Done,
    /// The backend reported an error inside the stream.
    Error(String),
}

/// Turns complete lines into events. Implementations may keep state across lines.
pub trait FrameDecoder: Send + 'static {
    fn decode_line(&mut self, line: &str) -> Vec<StreamEvent>;
}

/// Accumulates raw bytes and yields complete lines.
///
/// Bytes are only decoded once a whole line has arrived, so a multibyte
/// character split across two reads is reassembled intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and drain every complete line (without its terminator).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            lines.push(decode_line(&line[..line_end]));
        }
        lines
    }

    /// Whatever is left once the stream closes.
    pub fn finish(&mut self) -> Option<String> {
        let rest = decode_line(&std::mem::take(&mut self.buffer));
        if rest.trim().is_empty() { None } else { Some(rest) }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_string()
}

/// The payload of an SSE `data:` line, or `None` for comments, `event:` lines and blanks.
pub fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data).trim();
    (!data.is_empty()).then_some(data)
}

/// Log and drop a frame that failed to decode.
pub(crate) fn skip_malformed(provider: &str, data: &str, error: &serde_json::Error) {
    trace!(provider, data, error = %error, "Ignoring unparseable stream frame");
}

/// Feed a byte stream through `decoder`, forwarding chunks on a channel.
///
/// The returned receiver always ends with exactly one `done` chunk unless
/// the transport fails or the backend sends an error frame, in which case
/// the last item is an error.
pub fn spawn_pump<S, B, E, D>(
    provider: String,
    byte_stream: S,
    mut decoder: D,
) -> mpsc::Receiver<Result<StreamChunk, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    D: FrameDecoder,
{
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut byte_stream = Box::pin(byte_stream);
        let mut lines = LineBuffer::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let bytes = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx
                        .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                        .await;
                    return;
                }
            };

            for line in lines.push(bytes.as_ref()) {
                if forward(&provider, &tx, decoder.decode_line(&line)).await {
                    return;
                }
            }
        }

        // Stream closed: flush a trailing unterminated line, then finish.
        if let Some(line) = lines.finish() {
            if forward(&provider, &tx, decoder.decode_line(&line)).await {
                return;
            }
        }
        trace!(provider = %provider, "Stream closed without an end signal");
        let _ = tx.send(Ok(StreamChunk::done())).await;
    });

    rx
}

/// Send decoded events. Returns `true` once the stream is finished (or the receiver is gone).
async fn forward(
    provider: &str,
    tx: &mpsc::Sender<Result<StreamChunk, ProviderError>>,
    events: Vec<StreamEvent>,
) -> bool {
    for event in events {
        let item = match event {
            StreamEvent::Delta(text) if text.is_empty() => continue,
            StreamEvent::Delta(text) => Ok(StreamChunk::delta(text)),
            StreamEvent::Usage(usage) => Ok(StreamChunk::usage(usage)),
            StreamEvent::Done => {
                let _ = tx.send(Ok(StreamChunk::done())).await;
                return true;
            }
            StreamEvent::Error(message) => {
                trace!(provider, message = %message, "Stream reported an error");
                let _ = tx.send(Err(ProviderError::StreamError(message))).await;
                return true;
            }
        };
        if tx.send(item).await.is_err() {
            return true; // receiver dropped
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_splits_across_pushes() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        let lines = buf.push(b":1}\r\n\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn line_buffer_keeps_unterminated_tail() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"done\":true}").is_empty());
        assert_eq!(buf.finish().as_deref(), Some("{\"done\":true}"));
    }

    #[test]
    fn line_buffer_reassembles_characters_split_across_reads() {
        let mut buf = LineBuffer::new();
        let bytes = "data: café\n".as_bytes();
        // 'é' is two bytes; cut between them.
        let cut = bytes.len() - 2;
        assert!(buf.push(&bytes[..cut]).is_empty());
        assert_eq!(buf.push(&bytes[cut..]), vec!["data: café"]);
    }

    #[test]
    fn line_buffer_tail_with_split_character_decodes_at_finish() {
        let mut buf = LineBuffer::new();
        let bytes = "{\"text\":\"日本\"}".as_bytes();
        assert!(buf.push(&bytes[..10]).is_empty());
        assert!(buf.push(&bytes[10..]).is_empty());
        assert_eq!(buf.finish().as_deref(), Some("{\"text\":\"日本\"}"));
    }

    #[test]
    fn sse_data_extraction() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data("event: message_stop"), None);
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("data: "), None);
    }

    /// Splits each line on '|' into deltas, "END" finishes, "ERR:" reports.
    struct PipeDecoder;

    impl FrameDecoder for PipeDecoder {
        fn decode_line(&mut self, line: &str) -> Vec<StreamEvent> {
            if line == "END" {
                return vec![StreamEvent::Done];
            }
            if let Some(message) = line.strip_prefix("ERR:") {
                return vec![StreamEvent::Error(message.to_string())];
            }
            line.split('|').map(|s| StreamEvent::Delta(s.to_string())).collect()
        }
    }

    async fn collect(mut rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn pump_stops_at_done_signal() {
        let parts: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"Hel|lo \n".to_vec()),
            Ok(b" world\nEND\nignored\n".to_vec()),
        ];
        let rx = spawn_pump("test".into(), futures::stream::iter(parts), PipeDecoder);
        let items = collect(rx).await;
        let text: String = items
            .iter()
            .filter_map(|i| i.as_ref().ok().and_then(|c| c.content.clone()))
            .collect();
        assert_eq!(text, "Hello  world");
        assert!(items.last().unwrap().as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn pump_finishes_on_close() {
        let parts: Vec<Result<Vec<u8>, String>> = vec![Ok(b"abc".to_vec())];
        let items = collect(spawn_pump("test".into(), futures::stream::iter(parts), PipeDecoder)).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("abc"));
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn pump_reports_transport_failure() {
        let parts: Vec<Result<Vec<u8>, String>> =
            vec![Ok(b"a\n".to_vec()), Err("connection reset".into())];
        let items = collect(spawn_pump("test".into(), futures::stream::iter(parts), PipeDecoder)).await;
        assert!(matches!(
            items.last().unwrap(),
            Err(ProviderError::StreamInterrupted(m)) if m.contains("reset")
        ));
    }

    #[tokio::test]
    async fn pump_keeps_backend_error_frames_distinct() {
        let parts: Vec<Result<Vec<u8>, String>> =
            vec![Ok(b"a\nERR:Overloaded\nnever\n".to_vec())];
        let items = collect(spawn_pump("test".into(), futures::stream::iter(parts), PipeDecoder)).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items.last().unwrap(),
            Err(ProviderError::StreamError(m)) if m == "Overloaded"
        ));
    }
}
