//! Conditional gzip response compression.
//!
//! The reference middleware: it exercises every part of the composition
//! contract — request inspection, response interception, streamed-body
//! transformation — through the public interface alone.
//!
//! # What gets compressed
//!
//! A response is recompressed only when all of these hold:
//!
//! - the request's `accept-encoding` lists `gzip` (with a nonzero q-value);
//! - the response carries no `content-encoding` of its own — an
//!   already-encoded response passes through untouched, which also makes
//!   applying this middleware twice a no-op;
//! - the response is not a `content-range` partial — recompressing a byte
//!   range corrupts it;
//! - the response is `Buffered` (with a non-empty body) or `Streamed`.
//!   `FileBacked` and `Raw` pass through unmodified: compressing a
//!   zero-copy file region or a taken-over byte stream is outside this
//!   middleware's scope. A documented limitation, not a bug.
//!
//! Compressed responses gain `content-encoding: gzip` and
//! `vary: accept-encoding`. Framing is the handler's: a compressed buffered
//! body gets an exact `content-length` from its compressed size, a
//! compressed stream is chunked because its final size is unknowable in
//! advance.

use std::io::Write as _;

use bytes::Bytes;
use flate2::Compression as Level;
use flate2::write::GzEncoder;
use http::HeaderMap;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_RANGE, VARY};
use tracing::trace;

use crate::builder::Builder;
use crate::delivery::{App, Application, Responder};
use crate::error::Error;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::{Response, StreamEvent, StreamWriter};

/// Gzip response compression, negotiated per request.
///
/// ```rust
/// use gantry::Application;
/// use gantry::middleware::{Compression, Middleware};
///
/// # let app = (|_req: gantry::Request, r: gantry::Responder| async move {
/// #     r.deliver(gantry::Response::text("hi")).await
/// # }).into_app();
/// let app = Compression::gzip().wrap(app);
/// ```
pub struct Compression {
    level: Level,
}

impl Compression {
    /// Default compression level.
    pub fn gzip() -> Self {
        Self { level: Level::default() }
    }

    /// Override the deflate effort, `0` (store) through `9` (best).
    pub fn level(mut self, level: u32) -> Self {
        self.level = Level::new(level);
        self
    }
}

impl Middleware for Compression {
    fn wrap(&self, inner: App) -> App {
        let level = self.level;
        (move |req: Request, responder: Responder| {
            let responder = if accepts_gzip(req.headers()) {
                responder.map(move |resp| compress(resp, level))
            } else {
                responder
            };
            inner.call(req, responder)
        })
        .into_app()
    }
}

// ── Negotiation ───────────────────────────────────────────────────────────────

/// True when any `accept-encoding` value lists `gzip` with a nonzero
/// q-value.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|entry| {
            let mut parts = entry.split(';');
            let coding = parts.next().unwrap_or("").trim();
            if !coding.eq_ignore_ascii_case("gzip") {
                return false;
            }
            !parts.any(|param| {
                let param = param.trim();
                param.eq_ignore_ascii_case("q=0") || param.eq_ignore_ascii_case("q=0.0")
            })
        })
}

fn skip(headers: &HeaderMap) -> bool {
    headers.contains_key(CONTENT_ENCODING) || headers.contains_key(CONTENT_RANGE)
}

fn mark_compressed(headers: &mut HeaderMap) {
    headers.insert(CONTENT_ENCODING, http::HeaderValue::from_static("gzip"));
    headers.append(VARY, http::HeaderValue::from_static("accept-encoding"));
}

// ── Response transformation ───────────────────────────────────────────────────

fn compress(response: Response, level: Level) -> Response {
    match response {
        Response::Buffered { status, mut headers, body } => {
            if skip(&headers) || body.is_empty() {
                trace!("gzip: buffered response passed through");
                return Response::Buffered { status, headers, body };
            }
            let raw = body.into_bytes();
            match gzip_whole(&raw, level) {
                Ok(encoded) => {
                    mark_compressed(&mut headers);
                    Response::Buffered { status, headers, body: Builder::from_bytes(encoded) }
                }
                // In-memory encoding failed; deliver the original bytes.
                Err(_) => Response::Buffered { status, headers, body: Builder::from_bytes(raw) },
            }
        }

        Response::Streamed { status, mut headers, producer } => {
            if skip(&headers) {
                trace!("gzip: streamed response passed through");
                return Response::Streamed { status, headers, producer };
            }
            mark_compressed(&mut headers);
            let producer: crate::response::Producer = Box::new(move |writer: StreamWriter| {
                Box::pin(async move {
                    let (inner_writer, mut events) = StreamWriter::channel(16);
                    let producing = producer(inner_writer);
                    let encoding = async {
                        let mut encoder = GzEncoder::new(Vec::new(), level);
                        while let Some(event) = events.next().await {
                            match event {
                                StreamEvent::Chunk(chunk) => {
                                    for fragment in chunk.chunks() {
                                        encoder.write_all(fragment)?;
                                    }
                                    drain(&mut encoder, &writer).await?;
                                }
                                StreamEvent::Flush => {
                                    encoder.flush()?;
                                    drain(&mut encoder, &writer).await?;
                                    writer.flush().await?;
                                }
                            }
                        }
                        let tail = encoder.finish()?;
                        if !tail.is_empty() {
                            writer.send(Bytes::from(tail)).await?;
                        }
                        Ok::<(), Error>(())
                    };
                    let (produced, encoded) = tokio::join!(producing, encoding);
                    produced.and(encoded)
                })
            });
            Response::Streamed { status, headers, producer }
        }

        passthrough @ (Response::FileBacked { .. } | Response::Raw { .. }) => {
            trace!("gzip: file-backed/raw response passed through");
            passthrough
        }
    }
}

fn gzip_whole(raw: &[u8], level: Level) -> Result<Bytes, Error> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2 + 32), level);
    encoder.write_all(raw)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Moves whatever the encoder has emitted so far onto the outgoing stream.
async fn drain(encoder: &mut GzEncoder<Vec<u8>>, writer: &StreamWriter) -> Result<(), Error> {
    if encoder.get_ref().is_empty() {
        return Ok(());
    }
    let emitted = std::mem::take(encoder.get_mut());
    writer.send(Bytes::from(emitted)).await
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use flate2::read::GzDecoder;

    use super::*;
    use crate::harness::Harness;

    fn gunzip(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    fn hello_app() -> App {
        (|_req: Request, responder: Responder| async move {
            responder.deliver(Response::text("Hello World")).await
        })
        .into_app()
    }

    fn gzip_request() -> Request {
        Request::builder().header("accept-encoding", "gzip").build()
    }

    #[tokio::test]
    async fn buffered_body_round_trips() {
        let app = Compression::gzip().wrap(hello_app());
        let exchange = Harness::new().run(&app, gzip_request()).await.unwrap();

        assert_eq!(exchange.headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(exchange.headers.get(VARY).unwrap(), "accept-encoding");
        assert_eq!(gunzip(&exchange.body()), b"Hello World");
    }

    #[tokio::test]
    async fn without_accept_encoding_nothing_changes() {
        let app = Compression::gzip().wrap(hello_app());
        let exchange = Harness::new()
            .run(&app, Request::builder().build())
            .await
            .unwrap();

        assert!(exchange.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(exchange.body(), "Hello World");
    }

    #[tokio::test]
    async fn q_zero_disables_gzip() {
        let app = Compression::gzip().wrap(hello_app());
        let exchange = Harness::new()
            .run(&app, Request::builder().header("accept-encoding", "gzip;q=0, identity").build())
            .await
            .unwrap();

        assert!(exchange.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(exchange.body(), "Hello World");
    }

    #[tokio::test]
    async fn double_application_does_not_double_encode() {
        let once = Compression::gzip().wrap(hello_app());
        let twice = Compression::gzip().wrap(once);

        let exchange = Harness::new().run(&twice, gzip_request()).await.unwrap();

        let encodings: Vec<_> = exchange.headers.get_all(CONTENT_ENCODING).iter().collect();
        assert_eq!(encodings.len(), 1);
        assert_eq!(gunzip(&exchange.body()), b"Hello World");
    }

    #[tokio::test]
    async fn pre_encoded_responses_pass_through() {
        let app = (|_req: Request, responder: Responder| async move {
            let resp = Response::builder()
                .header("content-encoding", "br")
                .buffered("already encoded");
            responder.deliver(resp).await
        })
        .into_app();
        let app = Compression::gzip().wrap(app);

        let exchange = Harness::new().run(&app, gzip_request()).await.unwrap();

        assert_eq!(exchange.headers.get(CONTENT_ENCODING).unwrap(), "br");
        assert_eq!(exchange.body(), "already encoded");
    }

    #[tokio::test]
    async fn streamed_body_round_trips() {
        let app = (|_req: Request, responder: Responder| async move {
            let resp = Response::streamed(|writer| async move {
                writer.send("chunk one, ").await?;
                writer.flush().await?;
                writer.send("chunk two").await?;
                Ok(())
            });
            responder.deliver(resp).await
        })
        .into_app();
        let app = Compression::gzip().wrap(app);

        let exchange = Harness::new().run(&app, gzip_request()).await.unwrap();

        assert_eq!(exchange.headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(gunzip(&exchange.body()), b"chunk one, chunk two");
    }

    #[tokio::test]
    async fn file_backed_passes_through() {
        let app = (|_req: Request, responder: Responder| async move {
            let resp = Response::builder().file("/nonexistent/fixture", 0, 64);
            responder.deliver(resp).await
        })
        .into_app();
        let app = Compression::gzip().wrap(app);

        // The harness will fail to open the file; what matters is that the
        // middleware forwarded the variant untouched instead of buffering it.
        let result = Harness::new().run(&app, gzip_request()).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn application_must_deliver_exactly_once_under_compression() {
        let app = Compression::gzip().wrap(hello_app());
        let harness = Harness::new();
        harness.run(&app, gzip_request()).await.unwrap();

        assert_eq!(harness.deliveries(), 1);
    }
}
