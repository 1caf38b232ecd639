//! Incremental streaming under the compression middleware.
//!
//! The application produces the body chunk by chunk, flushing after each
//! one; the gzip middleware recompresses the stream in flight when the
//! client advertises `accept-encoding: gzip`. The application does not know
//! or care which happened.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example stream
//!
//! Try:
//!   curl --compressed http://localhost:3000/
//!   curl http://localhost:3000/

use std::time::Duration;

use gantry::middleware::{Compression, Middleware};
use gantry::{Application, Request, Responder, Response, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = (|_req: Request, responder: Responder| async move {
        let resp = Response::builder()
            .header("content-type", "text/plain; charset=utf-8")
            .streamed(|writer| async move {
                for i in 1..=5 {
                    writer.send(format!("tick {i}\n")).await?;
                    writer.flush().await?;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                writer.send("done\n").await?;
                // No final flush needed: the handler flushes after we return.
                Ok(())
            });
        responder.deliver(resp).await
    })
    .into_app();

    let app = Compression::gzip().wrap(app);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}
