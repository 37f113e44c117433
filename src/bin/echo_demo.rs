//! Hand-runnable version of the echo round-trip scenario (spec §8 scenario
//! 1): boots two in-process connectors over the in-memory transport double,
//! subscribes `POST /echo` on one, and issues a request from the other.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use connector::correlator::RpcResult;
use connector::handler::HandlerResponse;
use connector::publisher::PublishRequest;
use connector::transport::InMemoryBus;
use connector::{Connector, ConnectorOptions};

#[derive(Debug, Parser)]
#[command(name = "echo_demo")]
#[command(about = "Round-trips a request body through a subscribed /echo handler")]
struct Cli {
    /// Body to send to the echo handler.
    #[arg(long, default_value = "Hello")]
    body: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let bus = Arc::new(InMemoryBus::new(1024 * 1024, Duration::from_millis(5)));

    let beta = Connector::new(ConnectorOptions::new("beta", bus.clone()));
    beta.subscribe(
        "POST",
        "/echo",
        Arc::new(|ctx| Box::pin(async move { Ok(HandlerResponse::ok(ctx.body)) })),
        Default::default(),
    )
    .await
    .expect("declare /echo");
    beta.startup().await.expect("beta startup");

    let alpha = Connector::new(ConnectorOptions::new("alpha", bus));
    alpha.startup().await.expect("alpha startup");

    let mut request = PublishRequest::new("POST", "beta", "/echo");
    request.body = cli.body.clone().into_bytes();

    let mut rx = alpha.publish(request).await.expect("publish /echo");
    match rx.recv().await {
        Some(RpcResult::Response(frame)) => {
            println!(
                "status={} body={:?}",
                frame.status.unwrap_or(0),
                String::from_utf8_lossy(&frame.body)
            );
        }
        Some(RpcResult::Error(err)) => eprintln!("handler error: {err}"),
        None => eprintln!("no response received"),
    }

    alpha.shutdown().await.expect("alpha shutdown");
    beta.shutdown().await.expect("beta shutdown");
}
