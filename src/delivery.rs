//! The delivery protocol: applications, responders, and proof of delivery.
//!
//! # Exactly one response, by construction
//!
//! The classic interface bug is a handler that returns without sending a
//! response — or sends two. Both are unrepresentable here, at the type
//! level rather than by runtime bookkeeping:
//!
//! - [`Delivered`] has no public constructor. The only way to obtain one is
//!   [`Responder::deliver`], which hands the response to the handler. An
//!   application must return `Result<Delivered, Error>`, so every successful
//!   control-flow path has provably called `deliver`.
//! - `deliver` consumes the [`Responder`]. A second call does not fail at
//!   runtime; it fails to compile.
//!
//! The chain from user code to vtable call mirrors how handlers are erased
//! everywhere in this ecosystem:
//!
//! ```text
//! async fn app(req: Request, responder: Responder) -> Result<Delivered, Error>
//!        ↓ app.into_app()
//! Arc::new(FnApplication(app))       ← heap-allocated wrapper
//!        ↓ stored as App = Arc<dyn ErasedApplication>
//! app.call(req, responder)           ← one vtable dispatch per request
//! ```
//!
//! # Scoped acquisition
//!
//! A resource held for the duration of response production is acquired
//! *before* the `deliver` call and released by its RAII guard on every exit
//! path — including the path where delivery itself fails:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use gantry::{Delivered, Error, Request, Responder, Response};
//! # use tokio::sync::Mutex;
//! # async fn app(counter: Arc<Mutex<u64>>, _req: Request, responder: Responder)
//! #     -> Result<Delivered, Error> {
//! let mut visits = counter.lock().await;      // acquire
//! *visits += 1;
//! let body = format!("visitor number {visits}");
//! responder.deliver(Response::text(body)).await
//! // guard drops here — on success *and* when deliver fails
//! # }
//! ```
//!
//! The guard wraps the `deliver` call, not the other way around: a transport
//! error inside delivery propagates through `?` and the guard still drops,
//! so the next request never deadlocks on an orphaned lock.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` because the runtime polls the future in place; `Send +
/// 'static` so it can move across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

// ── Delivery ──────────────────────────────────────────────────────────────────

/// Proof that a response was handed to the handler.
///
/// There is no public constructor; the only source is
/// [`Responder::deliver`]. Possessing one is the capability "this request's
/// response left through the handler" — it carries no data.
pub struct Delivered {
    _proof: (),
}

/// The handler side of response acceptance.
///
/// A handler implements this once per transport: `send` receives the
/// application's [`Response`], writes it out however the transport requires
/// (all four variants, or documented fallbacks), and resolves when the
/// response has been accepted. `send` consumes the transport — a transport
/// serves exactly one response.
pub trait Transport: Send {
    fn send(self: Box<Self>, response: Response) -> BoxFuture<Result<(), Error>>;
}

/// The application's single-use capability to respond.
///
/// Bound by the handler to the current request. Consumed by
/// [`deliver`](Responder::deliver); since it is neither `Clone` nor
/// re-obtainable, an application delivers exactly once per request.
pub struct Responder {
    transport: Box<dyn Transport>,
}

impl Responder {
    /// Wraps a handler's transport. Called by handlers, once per request.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self { transport: Box::new(transport) }
    }

    /// Hands `response` to the handler and returns the proof of delivery.
    ///
    /// This is the one legal transition from pending to delivered. Errors
    /// are the transport's ([`Error::ConnectionClosed`], [`Error::Io`]) or
    /// the contract's ([`Error::ProtocolViolation`] for an unhonorable
    /// variant); either way the responder is spent and the application can
    /// only propagate.
    pub async fn deliver(self, response: Response) -> Result<Delivered, Error> {
        self.transport.send(response).await?;
        Ok(Delivered { _proof: () })
    }

    /// Interposes a response transformation ahead of the transport.
    ///
    /// This is the middleware hook: the returned responder behaves
    /// identically, except every delivered response passes through `f`
    /// first. Transformations compose innermost-first — the `map` closest
    /// to the application runs before the ones wrapped around it.
    pub fn map(self, f: impl FnOnce(Response) -> Response + Send + 'static) -> Responder {
        struct Mapped {
            transport: Box<dyn Transport>,
            f: Box<dyn FnOnce(Response) -> Response + Send>,
        }

        impl Transport for Mapped {
            fn send(self: Box<Self>, response: Response) -> BoxFuture<Result<(), Error>> {
                let this = *self;
                this.transport.send((this.f)(response))
            }
        }

        Responder::new(Mapped { transport: self.transport, f: Box::new(f) })
    }
}

// ── Application ───────────────────────────────────────────────────────────────

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// [`App`] alias. External crates interact through [`Application`] instead.
#[doc(hidden)]
pub trait ErasedApplication {
    fn call(&self, request: Request, responder: Responder) -> BoxFuture<Result<Delivered, Error>>;
}

/// A type-erased application, shared across concurrent requests.
///
/// This is the unit middleware transforms and handlers run: one `Arc` clone
/// (an atomic increment) plus one virtual call per request.
pub type App = Arc<dyn ErasedApplication + Send + Sync + 'static>;

/// Implemented for every valid application.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` (or capturing closure) with the signature:
///
/// ```text
/// async fn name(req: Request, responder: Responder) -> Result<Delivered, Error>
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it,
/// which keeps the application shape — and with it the delivery contract —
/// stable for every handler and middleware in existence.
pub trait Application: private::Sealed + Send + Sync + 'static {
    /// Erases the concrete type. Middleware composition and handlers both
    /// operate on the resulting [`App`].
    fn into_app(self) -> App;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Delivered, Error>> + Send + 'static,
{
}

impl<F, Fut> Application for F
where
    F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Delivered, Error>> + Send + 'static,
{
    fn into_app(self) -> App {
        Arc::new(FnApplication(self))
    }
}

/// Newtype bridging the typed world to the trait-object world.
struct FnApplication<F>(F);

impl<F, Fut> ErasedApplication for FnApplication<F>
where
    F: Fn(Request, Responder) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Delivered, Error>> + Send + 'static,
{
    fn call(&self, request: Request, responder: Responder) -> BoxFuture<Result<Delivered, Error>> {
        Box::pin((self.0)(request, responder))
    }
}
