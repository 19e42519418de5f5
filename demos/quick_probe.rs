/// Minimal in-process round-trip measurement.
///
/// Starts an echoing server on a spare port, fires one round of probes at
/// it over loopback, and prints the aggregate numbers.
///
/// Run with: cargo run --example quick_probe
use std::sync::Arc;
use std::time::Duration;
use udprobe::{Client, Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let server = Arc::new(Server::new(Config::server(18899).with_echo(true)));
    let runner = server.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server a moment to bind.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let config = Config::client("127.0.0.1", 18899)
        .with_packet_count(200)
        .with_payload_len(64)
        .with_echo(true);

    let client = Client::new(config)?;
    client.run().await?;

    if let Some(summary) = client.summary() {
        println!("\nMeasured over loopback:");
        println!("  Avg RTT: {:.3} ms", summary.avg_latency_ms);
        println!("  Throughput: {:.2} Mbps", summary.avg_throughput_mbps);
        println!("  Loss: {:.2}%", summary.avg_loss_pct);
    }

    server.cancellation_token().cancel();
    let _ = server_task.await;
    Ok(())
}
