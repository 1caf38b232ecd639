//! The bundled production handler: a hyper-backed listener.
//!
//! One handler implementation, included so applications have somewhere real
//! to run. hyper owns the wire — parsing, framing, HTTP/1.1 vs HTTP/2 —
//! and this module adapts its service model onto the delivery protocol.
//! Nothing an application or middleware does depends on being under this
//! handler rather than the in-process [`Harness`](crate::Harness).
//!
//! # Capabilities
//!
//! | Variant | Behavior |
//! |---|---|
//! | `Buffered` | exact `content-length`, one write |
//! | `Streamed` | chunked / DATA framing, implicit final flush |
//! | `FileBacked` | chunked read+write fallback (no zero-copy path through hyper) |
//! | `Raw` | **unsupported** — the fallback response is delivered, `upgrade` never runs |
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()` — no new connections.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! A hung application never times out here: the recommended place for a
//! request time budget is a middleware or the deployment's proxy, not this
//! handler.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::StatusCode;
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::body::BodyReader;
use crate::delivery::{App, BoxFuture, Responder, Transport};
use crate::error::Error;
use crate::request::Request;
use crate::response::{Response, StreamEvent, StreamWriter};

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use gantry::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    /// Starts accepting connections and running `app` against each request.
    ///
    /// Takes the erased [`App`] — what
    /// [`Application::into_app`](crate::Application::into_app) and middleware
    /// composition both produce — and shares it across connection tasks via
    /// its `Arc`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "gantry listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        // Pin the shutdown future so we can poll it in a loop.
        // Futures in Rust must not move in memory after the first poll — that
        // is what `Pin` enforces. `tokio::pin!` pins the future on the stack.
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` makes select! check arms top-to-bottom instead of
                // randomly. We check shutdown first so a SIGTERM immediately
                // stops accepting new connections, even if more are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    // TokioIo adapts tokio's AsyncRead/AsyncWrite to the hyper
                    // IO traits.
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // `service_fn` turns a plain async function into a
                        // hyper `Service`. The closure is called once per
                        // request on the connection, not once per connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        // `auto::Builder` transparently handles both HTTP/1.1
                        // and HTTP/2 — whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: wait for every in-flight connection to finish before we return.
        while tasks.join_next().await.is_some() {}

        info!("gantry stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Core hot path: runs the application for one request.
///
/// The error type is [`Infallible`] — delivery failures are handled inside
/// the delivery protocol (and logged), so hyper never sees an error.
///
/// The application runs in its own task: a `Streamed` producer keeps
/// producing after the response head has been returned to hyper, while
/// hyper concurrently polls the body channel below.
async fn dispatch(
    app: App,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<OutBody>, Infallible> {
    let (parts, body) = req.into_parts();
    let request = Request::from_parts(
        parts.method,
        parts.uri,
        parts.version,
        parts.headers,
        remote_addr,
        BodyReader::incoming(body),
    );

    let (head_tx, head_rx) = oneshot::channel();
    let responder = Responder::new(HyperTransport { reply: head_tx });

    tokio::spawn(async move {
        if let Err(e) = app.call(request, responder).await {
            error!(peer = %remote_addr, "application error: {e}");
        }
    });

    let response = match head_rx.await {
        Ok(head) => head,
        // The application died before the head went out; all we can still
        // do for this peer is a bare 500.
        Err(_) => {
            let mut resp = http::Response::new(OutBody::empty());
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        }
    };

    Ok(response)
}

// ── The hyper transport ───────────────────────────────────────────────────────

struct HyperTransport {
    reply: oneshot::Sender<http::Response<OutBody>>,
}

impl HyperTransport {
    fn respond(
        reply: oneshot::Sender<http::Response<OutBody>>,
        status: StatusCode,
        headers: http::HeaderMap,
        body: OutBody,
    ) -> Result<(), Error> {
        let mut resp = http::Response::new(body);
        *resp.status_mut() = status;
        *resp.headers_mut() = headers;
        reply.send(resp).map_err(|_| Error::ConnectionClosed)
    }
}

impl Transport for HyperTransport {
    fn send(self: Box<Self>, response: Response) -> BoxFuture<Result<(), Error>> {
        Box::pin(async move {
            // This handler cannot honor takeover: hand hyper the documented
            // fallback and never invoke the upgrade callback.
            let response = match response {
                Response::Raw { upgrade: _, fallback } => {
                    debug!("raw takeover unsupported by this handler, delivering fallback");
                    match *fallback {
                        Response::Raw { .. } => {
                            return Err(Error::ProtocolViolation(
                                "raw fallback must not itself be raw",
                            ));
                        }
                        other => other,
                    }
                }
                other => other,
            };

            match response {
                Response::Buffered { status, headers, body } => {
                    // Exact size hint below lets hyper emit content-length.
                    Self::respond(self.reply, status, headers, OutBody::full(body.into_bytes()))
                }

                Response::Streamed { status, headers, producer } => {
                    let (frame_tx, frame_rx) = mpsc::channel(16);
                    Self::respond(self.reply, status, headers, OutBody::channel(frame_rx))?;

                    let (writer, mut events) = StreamWriter::channel(16);
                    let forwarding = async {
                        while let Some(event) = events.next().await {
                            match event {
                                StreamEvent::Chunk(chunk) => {
                                    frame_tx
                                        .send(chunk.into_bytes())
                                        .await
                                        .map_err(|_| Error::ConnectionClosed)?;
                                }
                                // hyper writes frames through as they
                                // arrive; an explicit flush boundary has
                                // nothing extra to push here.
                                StreamEvent::Flush => {}
                            }
                        }
                        Ok::<(), Error>(())
                    };
                    let (produced, forwarded) = tokio::join!(producer(writer), forwarding);
                    // Dropping frame_tx ends the body stream: hyper writes
                    // the terminating frame and flushes — the implicit
                    // final flush.
                    produced.and(forwarded)
                }

                Response::FileBacked { status, headers, path, offset, length } => {
                    debug!(path = %path.display(), "zero-copy unavailable here, chunked read fallback");
                    let mut file = tokio::fs::File::open(&path).await?;
                    file.seek(std::io::SeekFrom::Start(offset)).await?;

                    let (frame_tx, frame_rx) = mpsc::channel(16);
                    Self::respond(self.reply, status, headers, OutBody::channel(frame_rx))?;

                    let mut reader = file.take(length);
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        let n = reader.read(&mut buf).await?;
                        if n == 0 {
                            return Ok(());
                        }
                        frame_tx
                            .send(Bytes::copy_from_slice(&buf[..n]))
                            .await
                            .map_err(|_| Error::ConnectionClosed)?;
                    }
                }

                // Unreachable for conforming flows: takeover was unwrapped
                // to its fallback above.
                Response::Raw { .. } => Err(Error::UnsupportedVariant("raw takeover")),
            }
        })
    }
}

// ── Response body ─────────────────────────────────────────────────────────────

/// The one body type this handler hands hyper: a fully-buffered payload or
/// a channel fed by a streamed producer / file reader.
enum OutBodyKind {
    Full(Option<Bytes>),
    Channel(mpsc::Receiver<Bytes>),
}

struct OutBody {
    kind: OutBodyKind,
}

impl OutBody {
    fn empty() -> Self {
        Self { kind: OutBodyKind::Full(None) }
    }

    fn full(bytes: Bytes) -> Self {
        let bytes = (!bytes.is_empty()).then_some(bytes);
        Self { kind: OutBodyKind::Full(bytes) }
    }

    fn channel(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { kind: OutBodyKind::Channel(rx) }
    }
}

impl Body for OutBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        match &mut self.get_mut().kind {
            OutBodyKind::Full(bytes) => Poll::Ready(bytes.take().map(|b| Ok(Frame::data(b)))),
            OutBodyKind::Channel(rx) => match rx.poll_recv(cx) {
                Poll::Ready(Some(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, OutBodyKind::Full(None))
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            // Exact: hyper emits content-length instead of chunking.
            OutBodyKind::Full(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            OutBodyKind::Full(None) => SizeHint::with_exact(0),
            // Unknown: hyper picks chunked (or open-ended DATA frames).
            OutBodyKind::Channel(_) => SizeHint::default(),
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` is a future that never resolves — on non-Unix platforms
    // the SIGTERM arm is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
