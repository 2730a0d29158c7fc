//! Pull-based iterator over a streamed response
//!
//! A [`StreamIterator`] owns one open [`FrameSource`] and turns its raw frames
//! into typed values with a decoder. The source is closed exactly once, on the
//! first of: end-of-stream marker, explicit [`StreamIterator::close`], terminal
//! failure, or drop.

use super::QianfanError;
use super::TransportError;
use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use tracing::{debug, warn};

/// A raw, framed byte stream owned by exactly one reader.
#[async_trait]
pub trait FrameSource: Send {
    /// Next complete frame. `Ok(None)` means the peer closed the stream.
    async fn next_frame(&mut self) -> Result<Option<String>, QianfanError>;

    /// Release the underlying connection.
    fn close(&mut self);
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Chunk(T),
    /// Keep-alive or empty frame
    Skip,
    /// End-of-stream marker
    End,
}

pub type Decoder<T> = Box<dyn Fn(&str) -> Result<Decoded<T>, QianfanError> + Send>;

#[derive(Debug, Clone)]
pub enum StreamState {
    NotStarted,
    Producing,
    Exhausted,
    Failed(QianfanError),
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Exhausted | StreamState::Failed(_))
    }
}

pub struct StreamIterator<T> {
    source: Option<Box<dyn FrameSource>>,
    decode: Decoder<T>,
    state: StreamState,
    peeked: Option<T>,
    frames_read: u64,
    chunks_emitted: u64,
}

impl<T> StreamIterator<T> {
    /// Wrap an open source. Performs no I/O.
    pub fn new<F>(source: Box<dyn FrameSource>, decode: F) -> Self
    where
        F: Fn(&str) -> Result<Decoded<T>, QianfanError> + Send + 'static,
    {
        Self {
            source: Some(source),
            decode: Box::new(decode),
            state: StreamState::NotStarted,
            peeked: None,
            frames_read: 0,
            chunks_emitted: 0,
        }
    }

    /// Whether the next call to [`next`](Self::next) will return a value.
    ///
    /// A value pulled here is buffered and handed out by the following `next`.
    /// `Ok(false)` means exhausted; an error means the stream failed.
    pub async fn has_next(&mut self) -> Result<bool, QianfanError> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        match self.advance().await? {
            Some(value) => {
                self.peeked = Some(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pull the next value.
    ///
    /// `Ok(None)` once the stream is exhausted; after a failure every call
    /// returns the same error. Neither case touches the transport again.
    pub async fn next(&mut self) -> Result<Option<T>, QianfanError> {
        if let Some(value) = self.peeked.take() {
            self.chunks_emitted += 1;
            return Ok(Some(value));
        }
        let value = self.advance().await?;
        if value.is_some() {
            self.chunks_emitted += 1;
        }
        Ok(value)
    }

    /// Stop early and release the connection now.
    pub fn close(&mut self) {
        self.peeked = None;
        if !self.state.is_terminal() {
            debug!(
                frames = self.frames_read,
                chunks = self.chunks_emitted,
                "Stream closed by caller"
            );
            self.state = StreamState::Exhausted;
        }
        self.release();
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Raw frames consumed from the source, keep-alives included
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted
    }

    async fn advance(&mut self) -> Result<Option<T>, QianfanError> {
        match &self.state {
            StreamState::Exhausted => return Ok(None),
            StreamState::Failed(e) => return Err(e.clone()),
            StreamState::NotStarted => {
                debug!("Stream started");
                self.state = StreamState::Producing;
            }
            StreamState::Producing => {}
        }

        loop {
            let next = match self.source.as_mut() {
                Some(source) => source.next_frame().await,
                None => Err(TransportError::closed("stream source already released").into()),
            };
            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    return Err(self.fail(
                        TransportError::closed("connection closed before end-of-stream marker")
                            .into(),
                    ))
                }
                Err(e) => return Err(self.fail(e)),
            };
            self.frames_read += 1;

            match (self.decode)(&frame) {
                Ok(Decoded::Chunk(value)) => return Ok(Some(value)),
                Ok(Decoded::Skip) => continue,
                Ok(Decoded::End) => {
                    debug!(
                        frames = self.frames_read,
                        chunks = self.chunks_emitted,
                        "Stream finished"
                    );
                    self.state = StreamState::Exhausted;
                    self.release();
                    return Ok(None);
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn fail(&mut self, err: QianfanError) -> QianfanError {
        warn!(frame = self.frames_read, "Stream failed: {}", err);
        self.release();
        self.state = StreamState::Failed(err.clone());
        err
    }

    fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

impl<T: Send + 'static> StreamIterator<T> {
    /// Adapt into a [`Stream`] that ends after exhaustion or the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, QianfanError>> + Send {
        stream::unfold(Some(self), |iter| async move {
            let mut iter = iter?;
            match iter.next().await {
                Ok(Some(value)) => Some((Ok(value), Some(iter))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl<T> Drop for StreamIterator<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> std::fmt::Debug for StreamIterator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIterator")
            .field("state", &self.state)
            .field("frames_read", &self.frames_read)
            .field("chunks_emitted", &self.chunks_emitted)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::{ErrorKind, TransportErrorKind};
    use futures_util::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    /// Scripted source that records reads and closes
    pub(crate) struct ScriptedSource {
        frames: VecDeque<Result<Option<String>, QianfanError>>,
        pub(crate) reads: Arc<AtomicUsize>,
        pub(crate) closes: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        pub(crate) fn new(frames: &[&str]) -> Self {
            Self::from_results(frames.iter().map(|f| Ok(Some(f.to_string()))).collect())
        }

        pub(crate) fn from_results(frames: Vec<Result<Option<String>, QianfanError>>) -> Self {
            Self {
                frames: frames.into(),
                reads: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
            (self.reads.clone(), self.closes.clone())
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Result<Option<String>, QianfanError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.frames.pop_front().unwrap_or(Ok(None))
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Frames are plain words; "END" terminates, "" is a keep-alive,
    /// "!bad" fails decoding, "!app" is a server error
    fn decode_word(frame: &str) -> Result<Decoded<String>, QianfanError> {
        match frame {
            "" => Ok(Decoded::Skip),
            "END" => Ok(Decoded::End),
            "!bad" => Err(QianfanError::decode("truncated payload")),
            "!app" => Err(crate::api::ApplicationError::new("336100", "server high load").into()),
            word => Ok(Decoded::Chunk(word.to_string())),
        }
    }

    fn iterator(frames: &[&str]) -> (StreamIterator<String>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let source = ScriptedSource::new(frames);
        let (reads, closes) = source.counters();
        (StreamIterator::new(Box::new(source), decode_word), reads, closes)
    }

    async fn collect(iter: &mut StreamIterator<String>) -> Result<Vec<String>, QianfanError> {
        let mut out = Vec::new();
        while let Some(word) = iter.next().await? {
            out.push(word);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_yields_chunks_in_order_then_exhausts() {
        let (mut iter, _, closes) = iterator(&["A", "B", "C", "END"]);
        assert!(matches!(iter.state(), StreamState::NotStarted));

        let words = assert_ok!(collect(&mut iter).await);
        assert_eq!(words, vec!["A", "B", "C"]);
        assert!(matches!(iter.state(), StreamState::Exhausted));
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        for _ in 0..3 {
            assert_eq!(assert_ok!(iter.next().await), None);
            assert!(!assert_ok!(iter.has_next().await));
        }
        assert_eq!(iter.chunks_emitted(), 3);
    }

    #[tokio::test]
    async fn test_keep_alive_frames_are_skipped() {
        let (mut iter, _, _) = iterator(&["A", "", "B", "END"]);
        let words = assert_ok!(collect(&mut iter).await);
        assert_eq!(words, vec!["A", "B"]);
        assert_eq!(iter.frames_read(), 4);
    }

    #[tokio::test]
    async fn test_construction_performs_no_io() {
        let (iter, reads, closes) = iterator(&["A", "END"]);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        drop(iter);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_has_next_does_not_lose_frames() {
        let (mut iter, reads, _) = iterator(&["A", "B", "END"]);

        assert!(assert_ok!(iter.has_next().await));
        assert!(assert_ok!(iter.has_next().await));
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        assert_eq!(assert_ok!(iter.next().await).as_deref(), Some("A"));
        assert_eq!(assert_ok!(iter.next().await).as_deref(), Some("B"));
        assert!(!assert_ok!(iter.has_next().await));
    }

    #[tokio::test]
    async fn test_abrupt_close_is_a_transport_failure() {
        let (mut iter, _, closes) = iterator(&["A", "B"]);

        assert_eq!(assert_ok!(iter.next().await).as_deref(), Some("A"));
        assert_eq!(assert_ok!(iter.next().await).as_deref(), Some("B"));
        let err = assert_err!(iter.next().await);
        match &err {
            QianfanError::Transport(e) => assert_eq!(e.kind, TransportErrorKind::Closed),
            other => panic!("Expected Transport, got {:?}", other),
        }
        assert!(matches!(iter.state(), StreamState::Failed(_)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_stops_reading() {
        let (mut iter, reads, closes) = iterator(&["A", "!bad", "B", "END"]);

        assert_eq!(assert_ok!(iter.next().await).as_deref(), Some("A"));
        let err = assert_err!(iter.next().await);
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        // terminal failure repeats without further reads
        for _ in 0..3 {
            let again = assert_err!(iter.next().await);
            assert_eq!(again.kind(), ErrorKind::Decode);
            assert_eq!(assert_err!(iter.has_next().await).kind(), ErrorKind::Decode);
        }
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_application_error_is_distinct_from_decode() {
        let (mut iter, _, _) = iterator(&["!app", "END"]);
        let err = assert_err!(iter.next().await);
        assert_eq!(err.kind(), ErrorKind::Application);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_from_next() {
        let source = ScriptedSource::from_results(vec![
            Ok(Some("A".to_string())),
            Err(TransportError::timeout("no data for 60s").into()),
        ]);
        let closes = source.closes.clone();
        let mut iter = StreamIterator::new(Box::new(source), decode_word);

        assert_eq!(assert_ok!(iter.next().await).as_deref(), Some("A"));
        match assert_err!(iter.next().await) {
            QianfanError::Transport(e) => assert_eq!(e.kind, TransportErrorKind::Timeout),
            other => panic!("Expected Transport, got {:?}", other),
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_early_abandon_releases_once() {
        let (mut iter, reads, closes) = iterator(&["A", "B", "C", "END"]);
        assert_eq!(assert_ok!(iter.next().await).as_deref(), Some("A"));
        drop(iter);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_close_then_drop_releases_once() {
        let (mut iter, reads, closes) = iterator(&["A", "B", "END"]);
        assert!(assert_ok!(iter.has_next().await));
        iter.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        assert_eq!(assert_ok!(iter.next().await), None);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        drop(iter);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_then_drop_releases_once() {
        let (mut iter, _, closes) = iterator(&["A", "END"]);
        assert_ok!(collect(&mut iter).await);
        iter.close();
        drop(iter);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_into_stream_ends_after_error() {
        let (iter, _, closes) = iterator(&["A", "!bad", "B"]);
        let items: Vec<_> = iter.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().ok().map(String::as_str), Some("A"));
        assert!(items[1].is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
