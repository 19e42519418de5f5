use clap::{Parser, Subcommand};
use std::time::Duration;
use udprobe::{Client, Config, Server};

#[derive(Parser)]
#[command(name = "udprobe")]
#[command(about = "UDP packet loss, latency and throughput measurement tool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in server mode
    Server {
        /// Port to listen on
        #[arg(short, long, default_value = "8888")]
        port: u16,

        /// Bind to specific address
        #[arg(short, long)]
        bind: Option<String>,

        /// Echo every probe back to its source
        #[arg(short, long)]
        echo: bool,

        /// Output in JSON format
        #[arg(short = 'J', long)]
        json: bool,
    },

    /// Run in client mode
    Client {
        /// Server address to send probes to
        server: String,

        /// Port to send to
        #[arg(short, long, default_value = "8888")]
        port: u16,

        /// Number of probe packets per round
        #[arg(short = 'n', long, default_value = "1000")]
        count: u32,

        /// Payload bytes per probe (0 = largest that fits a datagram)
        #[arg(short = 's', long, default_value = "0")]
        size: usize,

        /// Number of test iterations to run and aggregate
        #[arg(short = 'r', long, default_value = "1")]
        iterations: u32,

        /// Pause between probes in milliseconds
        #[arg(long, default_value = "1")]
        spacing_ms: u64,

        /// How long to wait for outstanding echoes after the last probe
        #[arg(long, default_value = "2")]
        grace_secs: u64,

        /// Expect echoes back and measure round-trip time
        #[arg(short, long)]
        echo: bool,

        /// Output in JSON format
        #[arg(short = 'J', long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            bind,
            echo,
            json,
        } => {
            let mut config = Config::server(port).with_echo(echo).with_json(json);

            if let Some(bind_addr) = bind {
                config.bind_addr = Some(bind_addr.parse()?);
            }

            let server = Server::new(config);

            let token = server.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });

            server.run().await?;
        }

        Commands::Client {
            server,
            port,
            count,
            size,
            iterations,
            spacing_ms,
            grace_secs,
            echo,
            json,
        } => {
            let config = Config::client(server, port)
                .with_packet_count(count)
                .with_payload_len(size)
                .with_iterations(iterations)
                .with_spacing(Duration::from_millis(spacing_ms))
                .with_grace(Duration::from_secs(grace_secs))
                .with_echo(echo)
                .with_json(json);

            let client = Client::new(config)?;

            let token = client.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });

            client.run().await?;
        }
    }

    Ok(())
}
