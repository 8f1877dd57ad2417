//! Server-sent events transport over HTTP
//!
//! Each handle owns one reader task that performs the GET request, splits the
//! body into frames and forwards them as [`TaggedEvent`]s.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ReadyState, TaggedEvent, Transport, TransportError, TransportEvent, TransportHandle};

/// Opens SSE connections against one endpoint
pub struct SseTransport {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
    events: mpsc::UnboundedSender<TaggedEvent>,
}

impl SseTransport {
    /// Create a transport and the receiver its handles report to
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            client,
            url: url.into(),
            bearer: None,
            events,
        };
        (transport, rx)
    }

    /// Send `Authorization: Bearer <token>` with every stream request
    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for SseTransport {
    type Handle = SseHandle;

    fn open(&mut self, generation: u64) -> SseHandle {
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let reader = StreamReader {
            client: self.client.clone(),
            url: self.url.clone(),
            bearer: self.bearer.clone(),
            generation,
            state: state.clone(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(reader.run());

        SseHandle {
            state,
            task: Some(task),
        }
    }
}

/// Handle to one SSE connection; closing or dropping it stops the reader
pub struct SseHandle {
    state: Arc<AtomicU8>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle for SseHandle {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn close(&mut self) {
        self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.close();
    }
}

struct StreamReader {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
    generation: u64,
    state: Arc<AtomicU8>,
    events: mpsc::UnboundedSender<TaggedEvent>,
}

impl StreamReader {
    async fn run(self) {
        let error = match self.read().await {
            Ok(()) => TransportError::EndOfStream,
            Err(e) => e,
        };
        self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
        self.emit(TransportEvent::Failed(error));
    }

    async fn read(&self) -> Result<(), TransportError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        self.state.store(ReadyState::Open as u8, Ordering::SeqCst);
        if !self.emit(TransportEvent::Opened) {
            return Ok(());
        }

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransportError::Body(e.to_string()))?;
            for frame in parser.push(&chunk) {
                if !self.emit(TransportEvent::Frame(frame)) {
                    debug!(generation = self.generation, "Event receiver dropped, stopping reader");
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Returns false once nobody is listening
    fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .send(TaggedEvent::new(self.generation, event))
            .is_ok()
    }
}

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Incremental parser for the `text/event-stream` format
///
/// Lines end in CR, LF or CRLF, and a leading byte order mark is skipped.
/// Only events without a name (or named `message`) produce frames; comment
/// lines are keep-alives and are skipped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Option<String>,
    event: String,
    /// Past the optional BOM
    started: bool,
    /// Last line ended in CR; a following LF belongs to it
    after_cr: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every frame completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        if !self.started {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Vec::new();
            }
            if self.buffer.starts_with(BOM) {
                self.buffer.drain(..BOM.len());
            }
            self.started = true;
        }

        let mut frames = Vec::new();
        let mut start = 0;
        for i in 0..self.buffer.len() {
            let byte = self.buffer[i];
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                start = i + 1;
                continue;
            }
            if byte == b'\n' || byte == b'\r' {
                let line = String::from_utf8_lossy(&self.buffer[start..i]).into_owned();
                if let Some(frame) = self.process_line(&line) {
                    frames.push(frame);
                }
                self.after_cr = byte == b'\r';
                start = i + 1;
            }
        }
        self.buffer.drain(..start);
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event = value.to_string(),
            // id and retry only matter to the browser's built-in reconnect
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        let event = std::mem::take(&mut self.event);
        let data = self.data.take()?;
        if event.is_empty() || event == "message" {
            Some(data)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: {\"type\":\"heartbeat\"}\n\n");
        assert_eq!(frames, vec![r#"{"type":"heartbeat"}"#.to_string()]);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"type\":").is_empty());
        assert!(parser.push(b"\"force_refresh\"}\r\n").is_empty());
        let frames = parser.push(b"\r\n");
        assert_eq!(frames, vec![r#"{"type":"force_refresh"}"#.to_string()]);
    }

    #[test]
    fn test_multi_line_data_is_joined() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: first\ndata:second\n\n");
        assert_eq!(frames, vec!["first\nsecond".to_string()]);
    }

    #[test]
    fn test_comments_and_named_events_are_skipped() {
        let mut parser = SseParser::new();
        let frames = parser.push(b": keep-alive\n\nevent: endpoint\ndata: /x\n\ndata: kept\n\n");
        assert_eq!(frames, vec!["kept".to_string()]);
    }

    #[test]
    fn test_blank_line_without_data_is_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"id: 4\nretry: 1000\n\n").is_empty());
    }

    #[test]
    fn test_leading_bom_is_skipped() {
        let mut parser = SseParser::new();
        let frames = parser.push("\u{FEFF}data: {\"type\":\"heartbeat\"}\n\n".as_bytes());
        assert_eq!(frames, vec![r#"{"type":"heartbeat"}"#.to_string()]);
    }

    #[test]
    fn test_bom_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(&[0xEF]).is_empty());
        assert!(parser.push(&[0xBB, 0xBF]).is_empty());
        assert_eq!(parser.push(b"data: x\n\n"), vec!["x".to_string()]);
    }

    #[test]
    fn test_bom_only_stripped_at_start() {
        let mut parser = SseParser::new();
        assert_eq!(parser.push(b"data: a\n\n"), vec!["a".to_string()]);
        // A later BOM is part of the field name, so the line is ignored
        assert!(parser.push("\u{FEFF}data: b\n\n".as_bytes()).is_empty());
    }

    #[test]
    fn test_lone_cr_ends_lines() {
        let mut parser = SseParser::new();
        assert_eq!(parser.push(b"data: x\r\r"), vec!["x".to_string()]);
        assert_eq!(
            parser.push(b"data: y\rdata: z\r\r"),
            vec!["y\nz".to_string()]
        );
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: x\r").is_empty());
        // The LF completes the CRLF above rather than ending an empty line
        assert!(parser.push(b"\n").is_empty());
        assert_eq!(parser.push(b"\r\n"), vec!["x".to_string()]);
    }

    #[test]
    fn test_several_frames_in_one_chunk() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: 1\n\ndata: 2\n\ndata: 3");
        assert_eq!(frames, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(parser.push(b"\n\n"), vec!["3".to_string()]);
    }
}
