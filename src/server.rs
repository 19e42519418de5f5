use crate::config::Config;
use crate::engine::{ProbeEngine, ProbeMode};
use crate::packet::{self, MAX_DATAGRAM};
use crate::socket::tune_buffers;
use crate::stats::IterationRecord;
use crate::summary::{RunAggregator, RunReport};
use crate::Result;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Engine plus aggregator behind one lock, shared between the receive loop
/// and accessor methods.
#[derive(Debug)]
struct ServerState {
    engine: ProbeEngine,
    aggregator: RunAggregator,
}

/// UDP probe server.
///
/// Binds a port and accounts every arriving probe: sequence gaps become the
/// loss estimate, embedded send stamps become one-way latency samples. With
/// echo enabled, each datagram is also sent straight back to its source so
/// a round-trip client can measure RTT against it.
///
/// The receive loop runs until the cancellation token fires; shutdown
/// finalizes the statistics and prints the report.
///
/// # Examples
///
/// ## Accounting-only server
///
/// ```no_run
/// use udprobe::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new(Config::server(8888));
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Echoing server for round-trip tests
///
/// ```no_run
/// use udprobe::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new(Config::server(8888).with_echo(true));
///
/// let token = server.cancellation_token().clone();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     token.cancel();
/// });
///
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    state: Arc<Mutex<ServerState>>,
    cancellation_token: CancellationToken,
}

impl Server {
    /// Creates a new server with the given configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::{Config, Server};
    ///
    /// let server = Server::new(Config::server(8888));
    /// ```
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ServerState {
                engine: ProbeEngine::new(ProbeMode::Receive),
                aggregator: RunAggregator::new(),
            })),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Returns a reference to the cancellation token. Cancelling it stops
    /// the receive loop and triggers the final report.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Records finalized at shutdown; empty while the server is running.
    pub fn records(&self) -> Vec<IterationRecord> {
        self.state.lock().aggregator.records().to_vec()
    }

    /// Packets accounted so far, for liveness checks while running.
    pub fn packets_received(&self) -> u64 {
        self.state.lock().engine.stats().packets_received()
    }

    /// Binds the configured address and runs the receive loop until
    /// cancellation.
    ///
    /// Malformed datagrams are discarded with a debug log; receive and echo
    /// errors are logged and the loop keeps going. Only failing to bind the
    /// socket is fatal.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use udprobe::{Config, Server};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let server = Server::new(Config::server(8888).with_echo(true));
    /// server.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self) -> Result<()> {
        let bind_addr = self.config.bind_endpoint();
        let socket = UdpSocket::bind(bind_addr).await?;
        tune_buffers(&socket);

        info!("UDP server listening on {}", bind_addr);
        if !self.config.json {
            println!("UDP server started on {}", bind_addr);
            if self.config.echo {
                println!("Echo mode: every probe is sent back to its source");
            } else {
                println!("Receive mode: accounting only, no echo");
            }
            println!("Press Ctrl+C to stop\n");
        }

        self.state
            .lock()
            .engine
            .begin_iteration(packet::wall_micros());

        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            self.handle_datagram(&socket, &buf[..len], addr).await;
                        }
                        Err(e) => {
                            error!("Error receiving datagram: {}", e);
                        }
                    }
                }
                _ = self.cancellation_token.cancelled() => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        self.finish_run()
    }

    async fn handle_datagram(&self, socket: &UdpSocket, datagram: &[u8], addr: SocketAddr) {
        let (header, _payload) = match packet::decode(datagram) {
            Ok(parts) => parts,
            Err(e) => {
                debug!("Discarding datagram from {}: {}", addr, e);
                return;
            }
        };

        // Return the datagram before accounting so the probe's round trip
        // does not pay for our bookkeeping.
        if self.config.echo {
            if let Err(e) = socket.send_to(datagram, addr).await {
                error!("Error echoing to {}: {}", addr, e);
            }
        }

        let (received, lost, avg_latency) = {
            let mut state = self.state.lock();
            state
                .engine
                .record_received(&header, datagram.len(), packet::wall_micros());
            let stats = state.engine.stats();
            (
                stats.packets_received(),
                stats.packets_lost(),
                stats.running_avg_latency_ms(),
            )
        };

        if received % 100 == 0 && !self.config.json {
            println!(
                "[RECV] From {}, Packet #{}, Size: {} bytes, Loss: {}, Avg Latency: {:.3} ms",
                addr,
                header.sequence,
                datagram.len(),
                lost,
                avg_latency
            );
        }
    }

    /// Finalizes the implicit iteration and prints the shutdown report.
    fn finish_run(&self) -> Result<()> {
        let (record, report) = {
            let mut state = self.state.lock();
            let record = state.engine.finish(packet::wall_micros());
            state.aggregator.add_iteration(record.clone());
            let report = self
                .config
                .json
                .then(|| RunReport::new(&self.config, &state.aggregator));
            (record, report)
        };

        if let Some(report) = report {
            println!("{}", report.to_json()?);
        } else {
            println!("\nServer shutting down...");
            println!("{record}");
        }

        Ok(())
    }
}
