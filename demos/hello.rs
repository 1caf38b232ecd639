//! Minimal gantry application on the bundled listener.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example hello
//!
//! Try:
//!   curl http://localhost:3000/anything

use gantry::{Application, Request, Responder, Response, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = (|req: Request, responder: Responder| async move {
        let body = format!("you asked for {}\n", req.path());
        responder.deliver(Response::text(body)).await
    })
    .into_app();

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}
