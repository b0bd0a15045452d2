//! Incremental `text/event-stream` decoder
//!
//! Bytes are buffered until a full line is available, so frames split across
//! network chunks (including inside a UTF-8 sequence) decode correctly.

use helpdesk_store::StreamEvent;
use tracing::debug;

use crate::error::ConsumerError;

/// One dispatched frame: event name plus joined `data:` lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    /// Decode into a protocol event; `Ok(None)` for event names it does not define
    pub fn into_event(self) -> Result<Option<StreamEvent>, ConsumerError> {
        StreamEvent::from_frame(&self.event, &self.data).map_err(|source| {
            ConsumerError::Decode {
                event: self.event.clone(),
                source,
            }
        })
    }
}

#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
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
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" | "retry" => {}
            other => debug!("Ignoring unknown event-stream field {}", other),
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(Frame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
