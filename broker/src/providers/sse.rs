//! Incremental server-sent-events framing.
//!
//! Bytes arrive in arbitrary chunks; complete events are separated by a
//! blank line. Comment lines (`:`) are heartbeats and carry nothing.

use errors::ProviderError;
use futures_util::StreamExt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Raw bytes are buffered until a frame is complete, so multi-byte
/// characters split across chunks decode intact.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: Vec<u8>,
    /// Bytes already searched for a frame boundary.
    scanned: usize,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer
            .extend(bytes.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Next complete event, skipping frames that carry no data.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(pos) = self.boundary() {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.scanned = 0;
            if let Some(event) = parse_frame(&String::from_utf8_lossy(&frame)) {
                return Some(event);
            }
        }
        None
    }

    /// Position of the next `\n\n`, resuming where the last search stopped.
    fn boundary(&mut self) -> Option<usize> {
        let start = self.scanned.saturating_sub(1);
        match self.buffer[start..].windows(2).position(|w| w == b"\n\n") {
            Some(offset) => Some(start + offset),
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// Whatever is left once the stream has ended without a final blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let frame = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        parse_frame(&String::from_utf8_lossy(&frame))
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

/// Drives a streaming response body, handing each event to `on_event` until
/// it returns `false` or the body ends. A gap longer than `idle_timeout`
/// between chunks is reported as a timeout.
pub async fn for_each_event<F>(
    response: reqwest::Response,
    idle_timeout: Duration,
    mut on_event: F,
) -> Result<(), ProviderError>
where
    F: FnMut(SseEvent) -> Result<bool, ProviderError>,
{
    let mut stream = response.bytes_stream();
    let mut buffer = SseBuffer::new();

    loop {
        let next = tokio::time::timeout(idle_timeout, stream.next())
            .await
            .map_err(|_| ProviderError::Timeout {
                message: format!("stream idle for {}s", idle_timeout.as_secs()),
            })?;

        match next {
            Some(Ok(chunk)) => {
                buffer.push(&chunk);
                while let Some(event) = buffer.next_event() {
                    if !on_event(event)? {
                        return Ok(());
                    }
                }
            }
            Some(Err(e)) => return Err(super::map_transport_error(&e)),
            None => {
                if let Some(event) = buffer.finish() {
                    on_event(event)?;
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_split_across_chunks() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: {\"a\":");
        assert_eq!(buffer.next_event(), None);
        buffer.push(b"1}\n\ndata: [DONE]\n\n");

        assert_eq!(buffer.next_event().unwrap().data, "{\"a\":1}");
        assert_eq!(buffer.next_event().unwrap().data, "[DONE]");
        assert_eq!(buffer.next_event(), None);
    }

    #[test]
    fn test_named_events_and_heartbeats() {
        let mut buffer = SseBuffer::new();
        buffer.push(b": ping\n\nevent: message_delta\r\ndata: {}\r\n\r\n");

        let event = buffer.next_event().unwrap();
        assert_eq!(event.event.as_deref(), Some("message_delta"));
        assert_eq!(event.data, "{}");
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let mut buffer = SseBuffer::new();
        let bytes = "data: héllo\n\n".as_bytes();
        buffer.push(&bytes[..8]);
        buffer.push(&bytes[8..]);
        assert_eq!(buffer.next_event().unwrap().data, "héllo");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: line one\ndata: line two\n\n");
        assert_eq!(buffer.next_event().unwrap().data, "line one\nline two");
    }

    #[test]
    fn test_boundary_split_between_chunks() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: first\n");
        assert_eq!(buffer.next_event(), None);
        buffer.push(b"\ndata: second\n");
        assert_eq!(buffer.next_event().unwrap().data, "first");
        assert_eq!(buffer.next_event(), None);
        buffer.push(b"\n");
        assert_eq!(buffer.next_event().unwrap().data, "second");
    }

    #[test]
    fn test_long_frame_in_many_chunks() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: ");
        for _ in 0..1000 {
            buffer.push(b"x");
            assert_eq!(buffer.next_event(), None);
        }
        assert_eq!(buffer.scanned, buffer.buffer.len());
        buffer.push(b"\n\n");
        assert_eq!(buffer.next_event().unwrap().data.len(), 1000);
    }

    #[test]
    fn test_trailing_frame_without_blank_line() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: tail");
        assert_eq!(buffer.next_event(), None);
        assert_eq!(buffer.finish().unwrap().data, "tail");
        assert_eq!(buffer.finish(), None);
    }
}
