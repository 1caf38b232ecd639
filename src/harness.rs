//! In-process handler for exercising applications without a socket.
//!
//! The interface's whole claim is that an application runs unmodified under
//! any handler. [`Harness`] is the smallest handler that makes the claim
//! testable: it runs an [`App`] against a [`Request`] entirely in memory and
//! records what a transport would have seen — status, headers, and the
//! ordered data/flush [`Frame`]s, including the implicit final flush after a
//! streamed producer returns.
//!
//! All four response variants are honored. Raw takeover is wired through
//! in-memory stream halves: construct with [`Harness::raw`] and the test
//! holds the peer end of the connection. [`Harness::failing`] simulates a
//! peer that vanished before the response went out, for exercising
//! resource-release paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::oneshot;
use tracing::debug;

use crate::delivery::{App, BoxFuture, Responder, Transport};
use crate::error::Error;
use crate::request::Request;
use crate::response::{RawStream, Response, StreamEvent, StreamWriter};

/// One recorded wire event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Body bytes as the transport would write them.
    Data(Bytes),
    /// A flush boundary — explicit from the producer, or the implicit final
    /// flush the handler performs itself.
    Flush,
}

/// Everything the harness's pretend transport observed for one request.
#[derive(Debug)]
pub struct Exchange {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Data and flush events in wire order.
    pub frames: Vec<Frame>,
    /// True when the connection was handed over to a raw upgrade callback;
    /// `status`/`headers`/`frames` then describe only the handshake.
    pub upgraded: bool,
}

impl Exchange {
    /// The concatenated body bytes, flush boundaries ignored.
    pub fn body(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for frame in &self.frames {
            if let Frame::Data(data) = frame {
                buf.extend_from_slice(data);
            }
        }
        buf.freeze()
    }
}

/// An in-process handler.
pub struct Harness {
    deliveries: Arc<AtomicUsize>,
    fail_delivery: bool,
    raw_wiring: Mutex<Option<RawStream>>,
}

impl Harness {
    /// A harness without raw-takeover support: `Raw` responses degrade to
    /// their fallback, as the contract requires of such handlers.
    pub fn new() -> Self {
        Self {
            deliveries: Arc::new(AtomicUsize::new(0)),
            fail_delivery: false,
            raw_wiring: Mutex::new(None),
        }
    }

    /// A harness whose transport rejects every delivery with
    /// [`Error::ConnectionClosed`] — the peer hung up first.
    pub fn failing() -> Self {
        Self { fail_delivery: true, ..Self::new() }
    }

    /// A harness with raw-takeover support, plus the test's half of the
    /// taken-over connection.
    pub fn raw(capacity: usize) -> (Self, RawStream) {
        let (handler_half, peer_half) = RawStream::pair(capacity);
        let harness = Self {
            raw_wiring: Mutex::new(Some(handler_half)),
            ..Self::new()
        };
        (harness, peer_half)
    }

    /// How many times an application delivered through this harness.
    ///
    /// The type system already guarantees exactly one delivery per
    /// conforming application; this is the independent, handler-side count
    /// that lets tests assert it.
    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Runs `app` against `request` and returns the recorded exchange.
    pub async fn run(&self, app: &App, request: Request) -> Result<Exchange, Error> {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let transport = HarnessTransport {
            reply: reply_tx,
            deliveries: Arc::clone(&self.deliveries),
            fail_delivery: self.fail_delivery,
            raw_wiring: self.raw_wiring.lock().map(|mut slot| slot.take()).unwrap_or(None),
        };

        app.call(request, Responder::new(transport)).await?;

        reply_rx.try_recv().map_err(|_| {
            Error::ProtocolViolation("application completed without delivering through this handler")
        })
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ── The pretend transport ─────────────────────────────────────────────────────

struct HarnessTransport {
    reply: oneshot::Sender<Exchange>,
    deliveries: Arc<AtomicUsize>,
    fail_delivery: bool,
    raw_wiring: Option<RawStream>,
}

impl Transport for HarnessTransport {
    fn send(self: Box<Self>, response: Response) -> BoxFuture<Result<(), Error>> {
        Box::pin(async move {
            self.deliveries.fetch_add(1, Ordering::SeqCst);

            if self.fail_delivery {
                return Err(Error::ConnectionClosed);
            }

            let exchange = record(response, self.raw_wiring).await?;
            let _ = self.reply.send(exchange);
            Ok(())
        })
    }
}

async fn record(response: Response, raw_wiring: Option<RawStream>) -> Result<Exchange, Error> {
    // Unwrap at most one level of `Raw`: either this handler supports
    // takeover (it was constructed with wiring), or the documented fallback
    // applies. A fallback that is itself `Raw` has no further fallback.
    let response = match response {
        Response::Raw { upgrade, fallback } => match raw_wiring {
            Some(stream) => {
                upgrade(stream).await?;
                return Ok(Exchange {
                    status: StatusCode::SWITCHING_PROTOCOLS,
                    headers: HeaderMap::new(),
                    frames: Vec::new(),
                    upgraded: true,
                });
            }
            None => {
                debug!("raw takeover unsupported by this harness, delivering fallback");
                match *fallback {
                    Response::Raw { .. } => {
                        return Err(Error::ProtocolViolation(
                            "raw fallback must not itself be raw",
                        ));
                    }
                    other => other,
                }
            }
        },
        other => other,
    };

    match response {
        Response::Buffered { status, headers, body } => {
            let mut frames = Vec::new();
            let bytes = body.into_bytes();
            if !bytes.is_empty() {
                frames.push(Frame::Data(bytes));
            }
            frames.push(Frame::Flush);
            Ok(Exchange { status, headers, frames, upgraded: false })
        }

        Response::Streamed { status, headers, producer } => {
            let (writer, mut events) = StreamWriter::channel(16);
            let producing = producer(writer);
            let collecting = async {
                let mut frames = Vec::new();
                while let Some(event) = events.next().await {
                    match event {
                        StreamEvent::Chunk(chunk) => frames.push(Frame::Data(chunk.into_bytes())),
                        StreamEvent::Flush => frames.push(Frame::Flush),
                    }
                }
                frames
            };
            let (produced, mut frames) = tokio::join!(producing, collecting);
            produced?;

            // The implicit final flush: the stream is not complete until it.
            frames.push(Frame::Flush);
            Ok(Exchange { status, headers, frames, upgraded: false })
        }

        Response::FileBacked { status, headers, path, offset, length } => {
            let mut file = tokio::fs::File::open(&path).await?;
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            let mut body = Vec::with_capacity(length.min(1 << 20) as usize);
            file.take(length).read_to_end(&mut body).await?;

            let mut frames = Vec::new();
            if !body.is_empty() {
                frames.push(Frame::Data(Bytes::from(body)));
            }
            frames.push(Frame::Flush);
            Ok(Exchange { status, headers, frames, upgraded: false })
        }

        Response::Raw { .. } => Err(Error::UnsupportedVariant("raw takeover")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::delivery::Application;

    fn buffered_app() -> App {
        (|_req: Request, responder: Responder| async move {
            responder.deliver(Response::text("buffered")).await
        })
        .into_app()
    }

    #[tokio::test]
    async fn buffered_exchange() {
        let harness = Harness::new();
        let exchange = harness
            .run(&buffered_app(), Request::builder().build())
            .await
            .unwrap();

        assert_eq!(exchange.status, StatusCode::OK);
        assert_eq!(exchange.body(), "buffered");
        assert_eq!(exchange.frames.last(), Some(&Frame::Flush));
        assert_eq!(harness.deliveries(), 1);
    }

    #[tokio::test]
    async fn streamed_flush_ordering() {
        let app = (|_req: Request, responder: Responder| async move {
            let resp = Response::streamed(|writer| async move {
                writer.send("A").await?;
                writer.flush().await?;
                writer.send("B").await?;
                // No final flush here: the handler owes us one.
                Ok(())
            });
            responder.deliver(resp).await
        })
        .into_app();

        let harness = Harness::new();
        let exchange = harness.run(&app, Request::builder().build()).await.unwrap();

        assert_eq!(
            exchange.frames,
            [
                Frame::Data(Bytes::from_static(b"A")),
                Frame::Flush,
                Frame::Data(Bytes::from_static(b"B")),
                Frame::Flush,
            ]
        );
        assert_eq!(harness.deliveries(), 1);
    }

    #[tokio::test]
    async fn file_backed_reads_the_requested_region() {
        let path = std::env::temp_dir().join(format!("gantry-harness-{}.txt", std::process::id()));
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let file_path = path.clone();
        let app = (move |_req: Request, responder: Responder| {
            let file_path = file_path.clone();
            async move {
                let resp = Response::builder().file(file_path, 2, 5);
                responder.deliver(resp).await
            }
        })
        .into_app();

        let harness = Harness::new();
        let exchange = harness.run(&app, Request::builder().build()).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(exchange.body(), "23456");
        assert_eq!(harness.deliveries(), 1);
    }

    #[tokio::test]
    async fn raw_fallback_without_takeover_support() {
        let app = (|_req: Request, responder: Responder| async move {
            let resp = Response::raw(
                |_stream| async { panic!("upgrade must not run on a fallback path") },
                Response::builder()
                    .status(StatusCode::NOT_IMPLEMENTED)
                    .text("takeover unavailable"),
            );
            responder.deliver(resp).await
        })
        .into_app();

        let harness = Harness::new();
        let exchange = harness.run(&app, Request::builder().build()).await.unwrap();

        assert!(!exchange.upgraded);
        assert_eq!(exchange.status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(exchange.body(), "takeover unavailable");
        assert_eq!(harness.deliveries(), 1);
    }

    #[tokio::test]
    async fn raw_takeover_echoes_through_the_peer() {
        let app = (|_req: Request, responder: Responder| async move {
            let resp = Response::raw(
                |mut stream| async move {
                    loop {
                        let bytes = stream.receive().await?;
                        if bytes.is_empty() {
                            return Ok(());
                        }
                        stream.send(bytes.to_ascii_uppercase()).await?;
                    }
                },
                Response::status(StatusCode::NOT_IMPLEMENTED),
            );
            responder.deliver(resp).await
        })
        .into_app();

        let (harness, mut peer) = Harness::raw(4);

        let drive = async {
            peer.send("ping").await.unwrap();
            let echoed = peer.receive().await.unwrap();
            drop(peer);
            echoed
        };
        let (ran, echoed) = tokio::join!(harness.run(&app, Request::builder().build()), drive);

        let exchange = ran.unwrap();
        assert!(exchange.upgraded);
        assert_eq!(echoed, "PING");
        assert_eq!(harness.deliveries(), 1);
    }

    #[tokio::test]
    async fn delivery_failure_releases_held_locks() {
        let counter = Arc::new(tokio::sync::Mutex::new(0u64));

        let shared = Arc::clone(&counter);
        let app = (move |_req: Request, responder: Responder| {
            let counter = Arc::clone(&shared);
            async move {
                let mut visits = counter.lock().await;
                *visits += 1;
                // The guard wraps the deliver call; a transport failure
                // propagates through `?` and still releases it.
                responder.deliver(Response::text("counted")).await
            }
        })
        .into_app();

        let harness = Harness::failing();
        let result = harness.run(&app, Request::builder().build()).await;

        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(harness.deliveries(), 1);

        // No deadlock: the lock is free for the next request.
        assert_eq!(*counter.try_lock().expect("lock must be released"), 1);
    }

    #[tokio::test]
    async fn one_delivery_per_request_across_variants() {
        let harness = Harness::new();

        for _ in 0..3 {
            harness
                .run(&buffered_app(), Request::builder().build())
                .await
                .unwrap();
        }

        assert_eq!(harness.deliveries(), 3);
    }
}
