/// Example demonstrating a cancellable measurement run.
///
/// This example shows how runs can be cancelled gracefully mid-execution
/// using the cancellation token; the cut-short round still reports the
/// statistics it gathered.
///
/// Run a server: cargo run --example cancellable_probe server
/// Run a client: cargo run --example cancellable_probe client
use std::time::Duration;
use udprobe::{Client, Config, ProgressEvent, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("client");

    match mode {
        "server" => run_server().await?,
        "client" => run_client().await?,
        _ => {
            eprintln!("Usage: {} [server|client]", args[0]);
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting echo server on port 8888...");
    println!("Press Ctrl+C to stop the server and print its statistics.\n");

    let config = Config::server(8888).with_echo(true);
    let server = Server::new(config);

    // Clone the cancellation token to handle CTRL+C
    let cancel_token = server.cancellation_token().clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for CTRL+C");
        println!("\nReceived CTRL+C, shutting down server gracefully...");
        cancel_token.cancel();
    });

    server.run().await?;
    println!("Server stopped.");
    Ok(())
}

async fn run_client() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting round-trip test (50000 probes with 5-second auto-cancel)...");
    println!("The run will be cancelled long before the burst completes.\n");

    let config = Config::client("127.0.0.1", 8888)
        .with_packet_count(50_000)
        .with_payload_len(64)
        .with_echo(true);

    let client = Client::new(config)?.with_callback(|event: ProgressEvent| match event {
        ProgressEvent::TestStarted => {
            println!("Test started");
        }
        ProgressEvent::Progress { sent, total, .. } => {
            println!("[progress] {}/{} probes out", sent, total);
        }
        ProgressEvent::IterationCompleted(record) => {
            println!("\nPartial round finalized:");
            println!("  Probes sent: {}", record.packets_sent);
            println!("  Echoes back: {}", record.packets_received);
            println!("  Lost: {} ({:.2}%)", record.packets_lost, record.loss_pct);
            println!("  Avg RTT: {:.3} ms", record.avg_latency_ms);
        }
        ProgressEvent::TestCompleted { .. } => {
            println!("\nRun finished.");
        }
        ProgressEvent::Error(msg) => {
            eprintln!("Error: {}", msg);
        }
    });

    // Spawn a task to cancel the run after 5 seconds
    let cancel_token = client.cancellation_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        println!("\n*** Cancelling run after 5 seconds ***\n");
        cancel_token.cancel();
    });

    // Also set up CTRL+C handler for manual cancellation
    let cancel_token_ctrl_c = client.cancellation_token().clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for CTRL+C");
        println!("\nReceived CTRL+C, cancelling run...");
        cancel_token_ctrl_c.cancel();
    });

    client.run().await?;
    println!("Client run stopped (cancelled after ~5 seconds).");
    Ok(())
}
