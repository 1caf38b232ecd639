//! Outgoing response model: the four delivery strategies.
//!
//! A [`Response`] describes how its bytes are to be produced, and nothing
//! else. The application picks a variant; the handler owns the wire:
//!
//! - [`Response::Buffered`] — the whole body exists up front as a
//!   [`Builder`]; the handler computes `content-length` and writes it out in
//!   one pass.
//! - [`Response::Streamed`] — the body is produced incrementally by an async
//!   producer given a [`StreamWriter`]; the handler frames it (chunked,
//!   HTTP/2 DATA) and performs an implicit final flush after the producer
//!   returns.
//! - [`Response::FileBacked`] — a region of a file. A handler may splice it
//!   to the socket zero-copy; one that cannot must degrade to an ordinary
//!   chunked read, silently.
//! - [`Response::Raw`] — full protocol takeover: the handler steps out of
//!   the way and hands the application the raw byte stream. Handlers that
//!   cannot honor takeover send the bundled fallback response instead;
//!   support is a documented per-handler capability, never a runtime
//!   surprise.
//!
//! The set is closed on purpose. Every handler matches all four variants
//! exhaustively, so adding a fifth is a breaking change that forces each
//! handler to make an explicit compatibility decision rather than silently
//! ignoring what it does not recognize.
//!
//! Framing headers (`content-length`, `transfer-encoding`) are computed by
//! the handler from the variant; constructors strip them from application
//! headers so the two can never disagree.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::mpsc;

use crate::builder::Builder;
use crate::delivery::BoxFuture;
use crate::error::Error;

/// The streamed-response producer: an async function over the writer the
/// handler wired to its transport.
pub type Producer = Box<dyn FnOnce(StreamWriter) -> BoxFuture<Result<(), Error>> + Send + 'static>;

/// The raw-takeover callback: an async function over the connection's byte
/// stream once HTTP framing has been dropped.
pub type Upgrade = Box<dyn FnOnce(RawStream) -> BoxFuture<Result<(), Error>> + Send + 'static>;

/// An outgoing HTTP response.
///
/// Constructed once per request, immutable after construction, and consumed
/// by [`Responder::deliver`](crate::Responder::deliver).
///
/// # Shortcuts (200 OK)
///
/// ```rust
/// use gantry::Response;
///
/// Response::text("hello");
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::status(http::StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use gantry::Response;
///
/// Response::builder()
///     .status(http::StatusCode::CREATED)
///     .header("location", "/users/42")
///     .buffered(r#"{"id":42}"#.to_owned());
/// ```
pub enum Response {
    /// Fully-buffered body; the handler writes it in one pass.
    Buffered {
        status: StatusCode,
        headers: HeaderMap,
        body: Builder,
    },
    /// Incrementally-produced body; the handler drives the producer and
    /// flushes whatever it left unflushed when it returns.
    Streamed {
        status: StatusCode,
        headers: HeaderMap,
        producer: Producer,
    },
    /// `length` bytes of `path` starting at `offset`. Zero-copy transfer is
    /// permitted, ordinary read+write is required as the fallback.
    FileBacked {
        status: StatusCode,
        headers: HeaderMap,
        path: PathBuf,
        offset: u64,
        length: u64,
    },
    /// Protocol takeover. `fallback` is what a handler without takeover
    /// support delivers instead; it must not itself be `Raw`.
    Raw {
        upgrade: Upgrade,
        fallback: Box<Response>,
    },
}

impl Response {
    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `application/json`. Pass bytes from your serializer.
    pub fn json(body: impl Into<Builder>) -> Self {
        Self::builder().json(body)
    }

    /// A status with no body.
    pub fn status(status: StatusCode) -> Self {
        Self::builder().status(status).buffered(Builder::new())
    }

    /// `200 OK` streamed body. Use [`Response::builder`] when the stream
    /// needs headers.
    pub fn streamed<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(StreamWriter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self::builder().streamed(producer)
    }

    /// Protocol takeover with a fallback for handlers that cannot honor it.
    pub fn raw<F, Fut>(upgrade: F, fallback: Response) -> Self
    where
        F: FnOnce(RawStream) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self::Raw {
            upgrade: Box::new(move |stream| Box::pin(upgrade(stream))),
            fallback: Box::new(fallback),
        }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { status: StatusCode::OK, headers: HeaderMap::new() }
    }

    /// The response status. For `Raw`, the fallback's status.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Buffered { status, .. }
            | Self::Streamed { status, .. }
            | Self::FileBacked { status, .. } => *status,
            Self::Raw { fallback, .. } => fallback.status_code(),
        }
    }

    /// The application-set headers. For `Raw`, the fallback's headers.
    pub fn headers(&self) -> &HeaderMap {
        match self {
            Self::Buffered { headers, .. }
            | Self::Streamed { headers, .. }
            | Self::FileBacked { headers, .. } => headers,
            Self::Raw { fallback, .. } => fallback.headers(),
        }
    }

    /// Appends a header, preserving existing values. On `Raw` the header
    /// lands on the fallback — the takeover path has no HTTP headers to
    /// carry it.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `value` is not a valid header token.
    pub fn with_header(self, name: &str, value: &str) -> Self {
        match self {
            Self::Raw { upgrade, fallback } => Self::Raw {
                upgrade,
                fallback: Box::new(fallback.with_header(name, value)),
            },
            mut headed => {
                let name: HeaderName = name.parse().expect("invalid header name");
                let value: HeaderValue = value.parse().expect("invalid header value");
                match &mut headed {
                    Self::Buffered { headers, .. }
                    | Self::Streamed { headers, .. }
                    | Self::FileBacked { headers, .. } => headers.append(name, value),
                    // Raw is handled by the arm above.
                    Self::Raw { .. } => false,
                };
                headed
            }
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered { status, body, .. } => f
                .debug_struct("Buffered")
                .field("status", status)
                .field("len", &body.len())
                .finish_non_exhaustive(),
            Self::Streamed { status, .. } => f
                .debug_struct("Streamed")
                .field("status", status)
                .finish_non_exhaustive(),
            Self::FileBacked { status, path, offset, length, .. } => f
                .debug_struct("FileBacked")
                .field("status", status)
                .field("path", path)
                .field("offset", offset)
                .field("length", length)
                .finish_non_exhaustive(),
            Self::Raw { fallback, .. } => {
                f.debug_struct("Raw").field("fallback", fallback).finish_non_exhaustive()
            }
        }
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder`]. Defaults to `200 OK`. Terminated by a
/// variant method — you always know which delivery strategy you chose.
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Appends a header; call repeatedly for duplicates. Framing headers
    /// (`content-length`, `transfer-encoding`) are the handler's and are
    /// stripped when the response is finished.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `value` is not a valid header token.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name: HeaderName = name.parse().expect("invalid header name");
        let value: HeaderValue = value.parse().expect("invalid header value");
        self.headers.append(name, value);
        self
    }

    /// Terminate with a fully-buffered body.
    pub fn buffered(self, body: impl Into<Builder>) -> Response {
        Response::Buffered {
            status: self.status,
            headers: sanitize(self.headers),
            body: body.into(),
        }
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        let body: String = body.into();
        self.content_type("text/plain; charset=utf-8").buffered(body)
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Builder>) -> Response {
        self.content_type("application/json").buffered(body)
    }

    /// Terminate with an incrementally-produced body.
    pub fn streamed<F, Fut>(self, producer: F) -> Response
    where
        F: FnOnce(StreamWriter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Response::Streamed {
            status: self.status,
            headers: sanitize(self.headers),
            producer: Box::new(move |writer| Box::pin(producer(writer))),
        }
    }

    /// Terminate with a file region.
    pub fn file(self, path: impl Into<PathBuf>, offset: u64, length: u64) -> Response {
        Response::FileBacked {
            status: self.status,
            headers: sanitize(self.headers),
            path: path.into(),
            offset,
            length,
        }
    }

    fn content_type(mut self, value: &'static str) -> Self {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
        }
        self
    }
}

/// Framing belongs to the handler; application copies are dropped.
fn sanitize(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);
    headers
}

// ── Streaming ─────────────────────────────────────────────────────────────────

/// One event on a streamed response's path to the transport.
#[derive(Debug)]
pub enum StreamEvent {
    /// Body bytes, enqueued in call order.
    Chunk(Builder),
    /// Force everything enqueued so far onto the wire.
    Flush,
}

/// The writing half handed to a [`Response::Streamed`] producer.
///
/// `send` enqueues bytes and may suspend awaiting transport capacity;
/// `flush` forces enqueued bytes out now. Both fail fast with
/// [`Error::ConnectionClosed`] once the peer is gone, so producers can stop
/// doing work nobody will receive.
pub struct StreamWriter {
    tx: mpsc::Sender<StreamEvent>,
}

impl StreamWriter {
    /// A writer and the matching event stream a handler drains into its
    /// transport. `capacity` bounds how far the producer can run ahead.
    pub fn channel(capacity: usize) -> (StreamWriter, StreamEvents) {
        let (tx, rx) = mpsc::channel(capacity);
        (StreamWriter { tx }, StreamEvents { rx })
    }

    /// Enqueues one chunk of body bytes.
    pub async fn send(&self, chunk: impl Into<Builder>) -> Result<(), Error> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(StreamEvent::Chunk(chunk))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Flushes everything enqueued so far to the transport.
    ///
    /// The handler flushes once more after the producer returns, so a final
    /// explicit flush is never required.
    pub async fn flush(&self) -> Result<(), Error> {
        self.tx
            .send(StreamEvent::Flush)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// The handler-side half of [`StreamWriter::channel`].
pub struct StreamEvents {
    rx: mpsc::Receiver<StreamEvent>,
}

impl StreamEvents {
    /// The next event, or `None` once the producer is done and every event
    /// has been drained.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

// ── Raw takeover ──────────────────────────────────────────────────────────────

/// One half of a raw bidirectional byte stream.
///
/// Handed to a [`Response::Raw`] upgrade callback once the handler has
/// dropped HTTP framing; the other half belongs to the transport (or, in the
/// in-process harness, to the test). Sends and receives are unbuffered at
/// this layer and ordered per direction.
pub struct RawStream {
    rx: mpsc::Receiver<Bytes>,
    tx: mpsc::Sender<Bytes>,
    closed: bool,
}

impl RawStream {
    /// Two connected halves. Bytes sent on one are received on the other.
    pub fn pair(capacity: usize) -> (RawStream, RawStream) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            RawStream { rx: a_rx, tx: b_tx, closed: false },
            RawStream { rx: b_rx, tx: a_tx, closed: false },
        )
    }

    /// The next run of bytes from the peer, or empty once the peer's write
    /// half is gone. Exhaustion is idempotent, as with a request body.
    pub async fn receive(&mut self) -> Result<Bytes, Error> {
        if self.closed {
            return Ok(Bytes::new());
        }
        loop {
            match self.rx.recv().await {
                Some(bytes) if bytes.is_empty() => continue,
                Some(bytes) => return Ok(bytes),
                None => {
                    self.closed = true;
                    return Ok(Bytes::new());
                }
            }
        }
    }

    /// Sends bytes to the peer. Fails fast once the peer is gone.
    pub async fn send(&self, bytes: impl Into<Bytes>) -> Result<(), Error> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx.send(bytes).await.map_err(|_| Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_headers_are_stripped() {
        let resp = Response::builder()
            .header("content-length", "999")
            .header("transfer-encoding", "chunked")
            .header("x-kept", "yes")
            .buffered("body");

        assert!(!resp.headers().contains_key(CONTENT_LENGTH));
        assert!(!resp.headers().contains_key(TRANSFER_ENCODING));
        assert_eq!(resp.headers().get("x-kept").unwrap(), "yes");
    }

    #[test]
    fn shortcut_constructors_set_content_type() {
        let cases = [
            (Response::text("hi"), "text/plain; charset=utf-8"),
            (Response::json(b"{}".to_vec()), "application/json"),
        ];

        for (resp, want) in cases {
            assert_eq!(resp.status_code(), StatusCode::OK);
            assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), want);
        }
    }

    #[test]
    fn explicit_content_type_wins_over_shortcut() {
        let resp = Response::builder()
            .header("content-type", "application/problem+json")
            .json(b"{}".to_vec());

        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn with_header_on_raw_lands_on_fallback() {
        let resp = Response::raw(
            |_stream| async { Ok(()) },
            Response::status(StatusCode::NOT_IMPLEMENTED),
        )
        .with_header("x-mark", "here");

        assert_eq!(resp.status_code(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(resp.headers().get("x-mark").unwrap(), "here");
    }

    #[tokio::test]
    async fn raw_pair_is_a_duplex() {
        let (mut app, mut peer) = RawStream::pair(4);

        peer.send("ping").await.unwrap();
        assert_eq!(app.receive().await.unwrap(), "ping");

        app.send("pong").await.unwrap();
        assert_eq!(peer.receive().await.unwrap(), "pong");

        drop(peer);
        assert!(app.receive().await.unwrap().is_empty());
        assert!(app.receive().await.unwrap().is_empty());
        assert!(matches!(app.send("late").await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn stream_writer_orders_events() {
        let (writer, mut events) = StreamWriter::channel(8);

        writer.send("A").await.unwrap();
        writer.flush().await.unwrap();
        writer.send("B").await.unwrap();
        drop(writer);

        assert!(matches!(events.next().await, Some(StreamEvent::Chunk(_))));
        assert!(matches!(events.next().await, Some(StreamEvent::Flush)));
        assert!(matches!(events.next().await, Some(StreamEvent::Chunk(_))));
        assert!(events.next().await.is_none());
    }
}
