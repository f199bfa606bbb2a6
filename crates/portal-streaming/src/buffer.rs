//! Replayable output buffers and size-bounded capture.

use crate::event::MarkupEvent;
use crate::sink::{OutputSink, StreamError};

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Markup(MarkupEvent),
    Characters(String),
    Bytes(Vec<u8>),
}

impl OutputChunk {
    fn size(&self) -> usize {
        match self {
            Self::Markup(event) => event.serialized_len(),
            Self::Characters(text) => text.len(),
            Self::Bytes(bytes) => bytes.len(),
        }
    }
}

/// Append-only, replayable capture of a unit's output.
///
/// Content type and headers set on the buffer are replayed ahead of the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBuffer {
    chunks: Vec<OutputChunk>,
    content_type: Option<String>,
    headers: Vec<(String, String)>,
    size: usize,
}

impl OutputBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding character output.
    pub fn from_characters(text: impl Into<String>) -> Self {
        let mut buffer = Self::new();
        buffer.push(OutputChunk::Characters(text.into()));
        buffer
    }

    /// Buffer holding byte output.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let mut buffer = Self::new();
        buffer.push(OutputChunk::Bytes(bytes.into()));
        buffer
    }

    fn push(&mut self, chunk: OutputChunk) {
        self.size += chunk.size();
        self.chunks.push(chunk);
    }

    /// Recorded writes in order.
    pub fn chunks(&self) -> &[OutputChunk] {
        &self.chunks
    }

    /// Total size of the body in bytes (markup counted serialized).
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether the buffer holds structured markup.
    pub fn has_markup(&self) -> bool {
        self.chunks
            .iter()
            .any(|c| matches!(c, OutputChunk::Markup(_)))
    }

    /// Recorded content type.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Recorded headers.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Write the recorded output, headers first, into `sink`.
    pub fn replay(&self, sink: &mut dyn OutputSink) -> Result<(), StreamError> {
        if let Some(content_type) = &self.content_type {
            sink.set_content_type(content_type);
        }
        for (name, value) in &self.headers {
            sink.add_header(name, value);
        }
        for chunk in &self.chunks {
            match chunk {
                OutputChunk::Markup(event) => sink.markup(event)?,
                OutputChunk::Characters(text) => sink.characters(text)?,
                OutputChunk::Bytes(bytes) => sink.bytes(bytes)?,
            }
        }
        Ok(())
    }

    /// Body serialized as text.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.size);
        for chunk in &self.chunks {
            match chunk {
                OutputChunk::Markup(event) => event.write_to(&mut out),
                OutputChunk::Characters(text) => out.push_str(text),
                OutputChunk::Bytes(bytes) => out.push_str(&String::from_utf8_lossy(bytes)),
            }
        }
        out
    }

    /// Body as raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        for chunk in &self.chunks {
            match chunk {
                OutputChunk::Markup(event) => out.extend_from_slice(event.to_markup().as_bytes()),
                OutputChunk::Characters(text) => out.extend_from_slice(text.as_bytes()),
                OutputChunk::Bytes(bytes) => out.extend_from_slice(bytes),
            }
        }
        out
    }

    /// Drop everything recorded.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.content_type = None;
        self.headers.clear();
        self.size = 0;
    }
}

impl OutputSink for OutputBuffer {
    fn characters(&mut self, text: &str) -> Result<(), StreamError> {
        self.push(OutputChunk::Characters(text.to_string()));
        Ok(())
    }

    fn markup(&mut self, event: &MarkupEvent) -> Result<(), StreamError> {
        self.push(OutputChunk::Markup(event.clone()));
        Ok(())
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.push(OutputChunk::Bytes(bytes.to_vec()));
        Ok(())
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn is_committed(&self) -> bool {
        !self.chunks.is_empty()
    }
}

/// Capture that gives up once output exceeds a threshold.
///
/// On overflow the recorded content is discarded and later writes are
/// ignored; the capture never fails a write.
#[derive(Debug)]
pub struct LimitedCapture {
    buffer: OutputBuffer,
    limit: usize,
    exceeded: bool,
}

impl LimitedCapture {
    /// Create a capture admitting at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: OutputBuffer::new(),
            limit,
            exceeded: false,
        }
    }

    /// Whether the threshold was crossed.
    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    /// Size captured so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The captured buffer, or `None` if the threshold was crossed.
    pub fn into_buffer(self) -> Option<OutputBuffer> {
        if self.exceeded {
            None
        } else {
            Some(self.buffer)
        }
    }

    fn admit(&mut self, size: usize) -> bool {
        if self.exceeded {
            return false;
        }
        if self.buffer.len() + size > self.limit {
            self.exceeded = true;
            self.buffer.clear();
            return false;
        }
        true
    }
}

impl OutputSink for LimitedCapture {
    fn characters(&mut self, text: &str) -> Result<(), StreamError> {
        if self.admit(text.len()) {
            self.buffer.characters(text)?;
        }
        Ok(())
    }

    fn markup(&mut self, event: &MarkupEvent) -> Result<(), StreamError> {
        if self.admit(event.serialized_len()) {
            self.buffer.markup(event)?;
        }
        Ok(())
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        if self.admit(bytes.len()) {
            self.buffer.bytes(bytes)?;
        }
        Ok(())
    }

    fn set_content_type(&mut self, content_type: &str) {
        if !self.exceeded {
            self.buffer.set_content_type(content_type);
        }
    }

    fn add_header(&mut self, name: &str, value: &str) {
        if !self.exceeded {
            self.buffer.add_header(name, value);
        }
    }

    fn is_committed(&self) -> bool {
        self.exceeded || self.buffer.is_committed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ByteSink, StringSink};

    #[test]
    fn test_buffer_replays_in_order() {
        let mut buffer = OutputBuffer::new();
        buffer.markup(&MarkupEvent::start("ul")).unwrap();
        buffer.characters("x").unwrap();
        buffer.markup(&MarkupEvent::end("ul")).unwrap();
        assert!(buffer.has_markup());
        assert_eq!(buffer.len(), 10);

        let mut first = StringSink::new();
        let mut second = StringSink::new();
        buffer.replay(&mut first).unwrap();
        buffer.replay(&mut second).unwrap();
        assert_eq!(first.as_str(), "<ul>x</ul>");
        assert_eq!(first.as_str(), second.as_str());
    }

    #[test]
    fn test_buffer_replays_headers() {
        let mut buffer = OutputBuffer::from_bytes(vec![7u8; 4]);
        buffer.set_content_type("application/octet-stream");
        buffer.add_header("X-Id", "9");

        let mut sink = ByteSink::new();
        buffer.replay(&mut sink).unwrap();
        assert_eq!(sink.content_type(), Some("application/octet-stream"));
        assert_eq!(sink.header("X-Id"), Some("9"));
        assert_eq!(sink.body().len(), 4);
    }

    #[test]
    fn test_capture_under_limit() {
        let mut capture = LimitedCapture::new(10);
        capture.characters("12345").unwrap();
        capture.characters("67890").unwrap();
        assert!(!capture.is_exceeded());
        assert_eq!(capture.into_buffer().unwrap().to_text(), "1234567890");
    }

    #[test]
    fn test_capture_over_limit_is_abandoned() {
        let mut capture = LimitedCapture::new(8);
        capture.characters("12345").unwrap();
        capture.characters("67890").unwrap();
        capture.characters("x").unwrap();
        assert!(capture.is_exceeded());
        assert!(capture.is_empty());
        assert!(capture.into_buffer().is_none());
    }
}
