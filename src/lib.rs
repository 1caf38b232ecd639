//! # gantry
//!
//! A server-agnostic interface between HTTP handlers and the applications
//! they run. Nothing more. Nothing less.
//!
//! ## The contract
//!
//! An application is a function from a request and a single-use
//! [`Responder`] to proof that a response was delivered. A handler is
//! whatever turns real connections — a production listener, a gateway
//! translator, an in-process test harness — into those calls. Write the
//! application once and it runs, unmodified, under any of them:
//!
//! - **Exactly one response per request**, enforced by types, not by
//!   convention: [`Delivered`] has no public constructor and the
//!   [`Responder`] is consumed by [`deliver`](Responder::deliver). Zero
//!   deliveries doesn't type-check; two don't compile.
//! - **Four ways to produce bytes**, one closed [`Response`] enum: fully
//!   buffered, incrementally streamed, file-backed, or raw protocol
//!   takeover. Handlers match all four exhaustively; a handler that cannot
//!   honor one degrades along its documented path.
//! - **Middleware is function composition** over applications —
//!   associative, orderable, free of per-request state — so cross-cutting
//!   behavior composes the same way under every handler.
//!
//! What gantry intentionally does not do: routing, TLS, wire parsing,
//! connection management policy. Those belong to routers built on top and
//! to the handlers underneath.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gantry::{Application, Request, Responder, Response, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = (|req: Request, responder: Responder| async move {
//!         let body = format!("hello, {}", req.path());
//!         responder.deliver(Response::text(body)).await
//!     })
//!     .into_app();
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//! ```
//!
//! The same application under the in-process harness, no socket involved:
//!
//! ```rust
//! use gantry::{Application, Harness, Request, Responder, Response};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let app = (|_req: Request, responder: Responder| async move {
//!     responder.deliver(Response::text("hello")).await
//! })
//! .into_app();
//!
//! let exchange = Harness::new()
//!     .run(&app, Request::builder().uri("/greet").build())
//!     .await
//!     .unwrap();
//! assert_eq!(exchange.body(), "hello");
//! # }
//! ```

mod body;
mod builder;
mod delivery;
mod error;
mod harness;
mod request;
mod response;
mod server;

pub mod middleware;

pub use body::{BodyReader, BodySender};
pub use builder::Builder;
pub use delivery::{App, Application, BoxFuture, Delivered, ErasedApplication, Responder, Transport};
pub use error::Error;
pub use harness::{Exchange, Frame, Harness};
pub use request::{Request, RequestBuilder};
pub use response::{
    Producer, RawStream, Response, ResponseBuilder, StreamEvent, StreamEvents, StreamWriter,
    Upgrade,
};
pub use server::Server;
