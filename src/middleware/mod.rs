//! Middleware: pure transformations of one application into another.
//!
//! A middleware holds no per-request state and performs no I/O of its own at
//! composition time — it is a function from [`App`] to [`App`], applied once
//! at startup. Cross-cutting behavior (compression, auth inspection,
//! error-to-response translation, request-id injection) lives here rather
//! than in handlers, so it runs identically under every handler.
//!
//! # Ordering
//!
//! [`compose`] is right-associative: the middleware textually closest to the
//! application is applied first and sits innermost, and outer middleware
//! observes the transformed behavior. Composition is associative — grouping
//! never changes the result — but it is **not** commutative, and ordering is
//! the author's responsibility. The canonical trap: a middleware that
//! inspects response bodies placed *outside* [`Compression`] sees gzip
//! bytes, not text, and must not reinterpret them.

use crate::delivery::App;

pub mod compression;

pub use compression::Compression;

/// A transformation from one application to another.
///
/// Automatically implemented for any `Fn(App) -> App`, which is the usual
/// way to write one:
///
/// ```rust
/// use gantry::{App, Application, Request, Responder};
/// use gantry::middleware::Middleware;
///
/// fn request_counter(inner: App) -> App {
///     (move |req: Request, responder: Responder| {
///         tracing::debug!(path = req.path(), "request");
///         inner.call(req, responder)
///     })
///     .into_app()
/// }
///
/// # fn assert_middleware(_m: impl Middleware) {}
/// # assert_middleware(request_counter);
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Wraps `inner`, returning the transformed application.
    fn wrap(&self, inner: App) -> App;
}

impl<F> Middleware for F
where
    F: Fn(App) -> App + Send + Sync + 'static,
{
    fn wrap(&self, inner: App) -> App {
        self(inner)
    }
}

/// Composes two middleware into one: `compose(outer, inner)` applies
/// `inner` first, so `inner` sits closer to the application.
///
/// Associative: `compose(compose(a, b), c)` and `compose(a, compose(b, c))`
/// produce applications with identical observable behavior for every
/// request/response pair.
pub fn compose(outer: impl Middleware, inner: impl Middleware) -> impl Middleware {
    move |app: App| outer.wrap(inner.wrap(app))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{App, Application, Responder};
    use crate::harness::Harness;
    use crate::request::Request;
    use crate::response::Response;

    /// Appends `name` to the `x-trace` header on the way out.
    fn marker(name: &'static str) -> impl Middleware {
        move |inner: App| {
            (move |req: Request, responder: Responder| {
                inner.call(req, responder.map(move |resp| resp.with_header("x-trace", name)))
            })
            .into_app()
        }
    }

    fn hello() -> App {
        (|_req: Request, responder: Responder| async move {
            responder.deliver(Response::text("hello")).await
        })
        .into_app()
    }

    async fn trace_of(app: App) -> Vec<String> {
        let exchange = Harness::new()
            .run(&app, Request::builder().build())
            .await
            .unwrap();
        exchange
            .headers
            .get_all("x-trace")
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn composition_is_associative() {
        let left = compose(compose(marker("a"), marker("b")), marker("c")).wrap(hello());
        let right = compose(marker("a"), compose(marker("b"), marker("c"))).wrap(hello());

        let left_trace = trace_of(left).await;
        let right_trace = trace_of(right).await;

        // Innermost middleware (textually closest to the application)
        // transforms the response first, regardless of grouping.
        assert_eq!(left_trace, ["c", "b", "a"]);
        assert_eq!(right_trace, ["c", "b", "a"]);
    }

    #[tokio::test]
    async fn wrap_order_matches_nesting() {
        let app = marker("outer").wrap(marker("inner").wrap(hello()));
        assert_eq!(trace_of(app).await, ["inner", "outer"]);
    }
}
