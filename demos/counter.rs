//! Shared state across requests: a visitor counter behind a lock.
//!
//! The lock guard is acquired before `deliver` and dropped after it returns
//! — on the success path and on the error path alike. That scoping is the
//! whole resource-safety discipline: if delivery fails mid-write, the guard
//! still drops and the next request does not deadlock.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example counter

use std::sync::Arc;

use gantry::{Application, Request, Responder, Response, Server};
use tokio::sync::Mutex;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let counter = Arc::new(Mutex::new(0u64));

    let app = (move |_req: Request, responder: Responder| {
        let counter = Arc::clone(&counter);
        async move {
            let mut visits = counter.lock().await;
            *visits += 1;
            let body = format!("you are visitor number {visits}\n");
            responder.deliver(Response::text(body)).await
        }
    })
    .into_app();

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}
