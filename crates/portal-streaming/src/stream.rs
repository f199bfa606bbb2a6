//! Async page stream over any `Sink<Vec<u8>>`.

use std::fmt::Display;

use futures::{Sink, SinkExt};
use portal_core::TimingContext;

use crate::buffer::OutputBuffer;
use crate::sink::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Completed,
}

/// Streams rendered fragments to the client in page order.
pub struct StreamingSink<S, E>
where
    S: Sink<Vec<u8>, Error = E> + Unpin,
    E: Display,
{
    inner: S,
    state: StreamState,
    timing: TimingContext,
    fragments_sent: Vec<String>,
    bytes_sent: usize,
}

impl<S, E> StreamingSink<S, E>
where
    S: Sink<Vec<u8>, Error = E> + Unpin,
    E: Display,
{
    /// Create a new streaming sink.
    pub fn new(sink: S, timing: TimingContext) -> Self {
        Self {
            inner: sink,
            state: StreamState::Open,
            timing,
            fragments_sent: Vec::new(),
            bytes_sent: 0,
        }
    }

    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), StreamError> {
        if self.state == StreamState::Completed {
            return Err(StreamError::Completed);
        }
        self.bytes_sent += bytes.len();
        self.inner
            .send(bytes)
            .await
            .map_err(|e| StreamError::Write(e.to_string()))
    }

    /// Send one unit's rendered fragment.
    pub async fn send_fragment(&mut self, name: &str, html: &str) -> Result<(), StreamError> {
        self.timing.mark(&format!("fragment_{}_start", name));
        self.send(html.as_bytes().to_vec()).await?;
        self.timing.mark(&format!("fragment_{}_sent", name));
        self.fragments_sent.push(name.to_string());
        Ok(())
    }

    /// Send a buffered fragment serialized as text.
    pub async fn send_buffer(&mut self, name: &str, buffer: &OutputBuffer) -> Result<(), StreamError> {
        self.send_fragment(name, &buffer.to_text()).await
    }

    /// Send raw bytes outside any fragment.
    pub async fn send_raw(&mut self, bytes: Vec<u8>) -> Result<(), StreamError> {
        self.send(bytes).await
    }

    /// Flush and close the stream.
    pub async fn complete(&mut self) -> Result<(), StreamError> {
        if self.state == StreamState::Completed {
            return Ok(());
        }
        self.inner
            .close()
            .await
            .map_err(|e| StreamError::Write(e.to_string()))?;
        self.state = StreamState::Completed;
        self.timing.mark("complete");
        Ok(())
    }

    /// Names of fragments sent, in order.
    pub fn fragments_sent(&self) -> &[String] {
        &self.fragments_sent
    }

    /// Total bytes sent.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Whether the stream was completed.
    pub fn is_completed(&self) -> bool {
        self.state == StreamState::Completed
    }

    /// Get timing context reference.
    pub fn timing(&self) -> &TimingContext {
        &self.timing
    }

    /// Consume the sink and return the inner value.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_fragments_stream_in_order() {
        let (tx, rx) = mpsc::unbounded::<Vec<u8>>();
        let mut sink = StreamingSink::new(tx, TimingContext::new());

        sink.send_fragment("a", "<p>a</p>").await.unwrap();
        sink.send_buffer("b", &OutputBuffer::from_characters("<p>b</p>"))
            .await
            .unwrap();
        sink.complete().await.unwrap();

        assert_eq!(sink.fragments_sent(), &["a".to_string(), "b".to_string()]);
        assert_eq!(sink.bytes_sent(), 16);
        assert!(sink.timing().since_start("fragment_a_sent").is_some());

        let chunks: Vec<Vec<u8>> = rx.collect().await;
        assert_eq!(chunks.concat(), b"<p>a</p><p>b</p>".to_vec());
    }

    #[tokio::test]
    async fn test_send_after_complete_fails() {
        let (tx, _rx) = mpsc::unbounded::<Vec<u8>>();
        let mut sink = StreamingSink::new(tx, TimingContext::new());
        sink.complete().await.unwrap();
        assert!(matches!(
            sink.send_fragment("late", "x").await,
            Err(StreamError::Completed)
        ));
    }
}
