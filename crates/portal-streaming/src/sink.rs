//! Output sinks that unit logic writes into.

use thiserror::Error;

use crate::event::MarkupEvent;

/// Errors writing to a sink.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream write failed: {0}")]
    Write(String),

    #[error("stream already completed")]
    Completed,

    #[error("sink does not accept {0} output")]
    Unsupported(&'static str),
}

/// Destination for a unit's produced output.
///
/// Markup defaults to its serialized text; bytes default to lossy text.
pub trait OutputSink: Send {
    /// Write character output.
    fn characters(&mut self, text: &str) -> Result<(), StreamError>;

    /// Write a structured markup event.
    fn markup(&mut self, event: &MarkupEvent) -> Result<(), StreamError> {
        self.characters(&event.to_markup())
    }

    /// Write raw bytes.
    fn bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.characters(&String::from_utf8_lossy(bytes))
    }

    /// Set the response content type.
    fn set_content_type(&mut self, _content_type: &str) {}

    /// Add a response header value.
    fn add_header(&mut self, _name: &str, _value: &str) {}

    /// Whether any body content has been written.
    fn is_committed(&self) -> bool {
        false
    }
}

/// Sink collecting everything as text.
#[derive(Debug, Default, Clone)]
pub struct StringSink {
    content: String,
}

impl StringSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected text.
    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Consume and return the collected text.
    pub fn into_string(self) -> String {
        self.content
    }
}

impl OutputSink for StringSink {
    fn characters(&mut self, text: &str) -> Result<(), StreamError> {
        self.content.push_str(text);
        Ok(())
    }

    fn markup(&mut self, event: &MarkupEvent) -> Result<(), StreamError> {
        event.write_to(&mut self.content);
        Ok(())
    }

    fn is_committed(&self) -> bool {
        !self.content.is_empty()
    }
}

/// Sink collecting a byte response with its content type and headers.
#[derive(Debug, Default, Clone)]
pub struct ByteSink {
    body: Vec<u8>,
    content_type: Option<String>,
    headers: Vec<(String, String)>,
}

impl ByteSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Content type, if set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Headers in the order they were added.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Consume and return the body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

impl OutputSink for ByteSink {
    fn characters(&mut self, text: &str) -> Result<(), StreamError> {
        self.body.extend_from_slice(text.as_bytes());
        Ok(())
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.body.extend_from_slice(bytes);
        Ok(())
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn is_committed(&self) -> bool {
        !self.body.is_empty()
    }
}

/// Sink writing every call to two sinks.
///
/// The primary receives output first; a primary failure stops the write.
pub struct TeeSink<'a> {
    primary: &'a mut dyn OutputSink,
    secondary: &'a mut dyn OutputSink,
}

impl<'a> TeeSink<'a> {
    /// Create a tee over two sinks.
    pub fn new(primary: &'a mut dyn OutputSink, secondary: &'a mut dyn OutputSink) -> Self {
        Self { primary, secondary }
    }
}

impl OutputSink for TeeSink<'_> {
    fn characters(&mut self, text: &str) -> Result<(), StreamError> {
        self.primary.characters(text)?;
        self.secondary.characters(text)
    }

    fn markup(&mut self, event: &MarkupEvent) -> Result<(), StreamError> {
        self.primary.markup(event)?;
        self.secondary.markup(event)
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.primary.bytes(bytes)?;
        self.secondary.bytes(bytes)
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.primary.set_content_type(content_type);
        self.secondary.set_content_type(content_type);
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.primary.add_header(name, value);
        self.secondary.add_header(name, value);
    }

    fn is_committed(&self) -> bool {
        self.primary.is_committed()
    }
}
