//! Pull-based request body reader.
//!
//! The body of an inbound request is a single-pass source: call
//! [`BodyReader::read_chunk`] until it returns an empty chunk, and you have
//! seen every byte exactly once, in arrival order. There is no rewind and no
//! hidden buffering — a gigabyte upload flows through a handler-sized chunk
//! at a time unless the application explicitly opts into draining it with
//! [`BodyReader::read_to_end`].
//!
//! The reader is exclusively owned: it hangs off the [`Request`](crate::Request)
//! and one consumer drains it for the lifetime of the request.

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use tokio::sync::mpsc;

use crate::error::Error;

enum Source {
    Empty,
    Full(Option<Bytes>),
    Channel(mpsc::Receiver<Result<Bytes, Error>>),
    Incoming(hyper::body::Incoming),
}

/// Forward-only reader over a request body.
pub struct BodyReader {
    source: Source,
    exhausted: bool,
}

impl BodyReader {
    /// A reader over no bytes at all. `read_chunk` returns empty immediately.
    pub fn empty() -> Self {
        Self { source: Source::Empty, exhausted: false }
    }

    /// A reader over an already-buffered body. Yields one chunk, then empty.
    pub fn full(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self { source: Source::Full(Some(body)), exhausted: false }
    }

    /// A reader fed through a bounded channel — the transport-facing
    /// constructor. The [`BodySender`] half lives with the handler; dropping
    /// it ends the body.
    pub fn channel(capacity: usize) -> (BodySender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let reader = Self { source: Source::Channel(rx), exhausted: false };
        (BodySender { tx }, reader)
    }

    /// Adapter over a hyper request body, used by the bundled listener.
    pub(crate) fn incoming(body: hyper::body::Incoming) -> Self {
        Self { source: Source::Incoming(body), exhausted: false }
    }

    /// Returns the next non-empty chunk of the body, or an empty [`Bytes`]
    /// once the body is exhausted.
    ///
    /// Exhaustion is idempotent: every call after the first empty return
    /// yields empty again, without error. Transport failures mid-body
    /// surface as [`Error::ConnectionClosed`] or [`Error::Io`].
    pub async fn read_chunk(&mut self) -> Result<Bytes, Error> {
        if self.exhausted {
            return Ok(Bytes::new());
        }

        loop {
            match &mut self.source {
                Source::Empty => return Ok(self.finish()),
                Source::Full(body) => match body.take() {
                    Some(chunk) if !chunk.is_empty() => return Ok(chunk),
                    _ => return Ok(self.finish()),
                },
                Source::Channel(rx) => match rx.recv().await {
                    Some(Ok(chunk)) if chunk.is_empty() => continue,
                    Some(Ok(chunk)) => return Ok(chunk),
                    Some(Err(e)) => {
                        self.exhausted = true;
                        return Err(e);
                    }
                    None => return Ok(self.finish()),
                },
                Source::Incoming(body) => match body.frame().await {
                    Some(Ok(frame)) => match frame.into_data() {
                        Ok(chunk) if chunk.is_empty() => continue,
                        Ok(chunk) => return Ok(chunk),
                        // Trailers are not part of the body byte sequence.
                        Err(_) => continue,
                    },
                    Some(Err(_)) => {
                        self.exhausted = true;
                        return Err(Error::ConnectionClosed);
                    }
                    None => return Ok(self.finish()),
                },
            }
        }
    }

    /// Drains the remaining body into one contiguous buffer.
    ///
    /// This is the explicit opt-in to holding the whole body in memory; the
    /// reader itself never buffers more than one chunk.
    pub async fn read_to_end(&mut self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        loop {
            let chunk = self.read_chunk().await?;
            if chunk.is_empty() {
                return Ok(buf.freeze());
            }
            buf.extend_from_slice(&chunk);
        }
    }

    fn finish(&mut self) -> Bytes {
        self.exhausted = true;
        Bytes::new()
    }
}

/// The feeding half of [`BodyReader::channel`], held by the handler.
pub struct BodySender {
    tx: mpsc::Sender<Result<Bytes, Error>>,
}

impl BodySender {
    /// Feeds one chunk to the reader, awaiting channel capacity if the
    /// consumer is behind. Empty chunks are discarded — only exhaustion
    /// produces an empty read. Fails once the reader is gone.
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<(), Error> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(Ok(chunk)).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Reports a transport failure to the reader and closes the body.
    pub async fn fail(self, error: Error) {
        let _ = self.tx.send(Err(error)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_body_then_idempotent_exhaustion() {
        let mut reader = BodyReader::full("payload");

        assert_eq!(reader.read_chunk().await.unwrap(), "payload");
        assert!(reader.read_chunk().await.unwrap().is_empty());
        assert!(reader.read_chunk().await.unwrap().is_empty());
        assert!(reader.read_chunk().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_body_is_immediately_exhausted() {
        let mut reader = BodyReader::empty();

        assert!(reader.read_chunk().await.unwrap().is_empty());
        assert!(reader.read_chunk().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_preserves_chunk_order() {
        let (sender, mut reader) = BodyReader::channel(4);

        tokio::spawn(async move {
            for chunk in ["first", "", "second", "third"] {
                sender.send(chunk).await.unwrap();
            }
        });

        assert_eq!(reader.read_chunk().await.unwrap(), "first");
        assert_eq!(reader.read_chunk().await.unwrap(), "second");
        assert_eq!(reader.read_chunk().await.unwrap(), "third");
        assert!(reader.read_chunk().await.unwrap().is_empty());
        assert!(reader.read_chunk().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_to_end_collects_everything() {
        let (sender, mut reader) = BodyReader::channel(2);

        tokio::spawn(async move {
            sender.send("a").await.unwrap();
            sender.send("bc").await.unwrap();
        });

        assert_eq!(reader.read_to_end().await.unwrap(), "abc");
        assert!(reader.read_chunk().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_surfaces_once() {
        let (sender, mut reader) = BodyReader::channel(2);

        tokio::spawn(async move {
            sender.send("partial").await.unwrap();
        });

        // A sender dropped without `fail` ends the body cleanly.
        assert_eq!(reader.read_chunk().await.unwrap(), "partial");
        assert!(reader.read_chunk().await.unwrap().is_empty());

        let (sender, mut reader) = BodyReader::channel(2);
        tokio::spawn(async move {
            sender.fail(Error::ConnectionClosed).await;
        });
        assert!(matches!(reader.read_chunk().await, Err(Error::ConnectionClosed)));
        assert!(reader.read_chunk().await.unwrap().is_empty());
    }
}
