use crate::config::Config;
use crate::engine::{ProbeEngine, ProbeMode};
use crate::packet::{self, ProbeHeader, MAX_DATAGRAM};
use crate::socket::tune_buffers;
use crate::stats::IterationRecord;
use crate::summary::{RunAggregator, RunReport, RunSummary};
use crate::{Error, Result};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Progress event types reported during a measurement run.
///
/// These events allow monitoring of run progress in real-time through
/// callbacks, alongside (or instead of) the printed output.
///
/// # Examples
///
/// ```no_run
/// use udprobe::{Client, Config, ProgressEvent};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("127.0.0.1", 8888).with_echo(true);
///
/// let client = Client::new(config)?
///     .with_callback(|event: ProgressEvent| {
///         match event {
///             ProgressEvent::TestStarted => println!("Starting..."),
///             ProgressEvent::Progress { sent, total, .. } => {
///                 println!("{sent}/{total} probes out");
///             }
///             ProgressEvent::IterationCompleted(record) => {
///                 println!("Round {}: {:.3} ms avg", record.round, record.avg_latency_ms);
///             }
///             ProgressEvent::TestCompleted { .. } => println!("Done"),
///             ProgressEvent::Error(msg) => eprintln!("Error: {msg}"),
///         }
///     });
///
/// client.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The run is starting.
    TestStarted,
    /// Periodic update within an iteration, every 100 probes and at the
    /// end of the burst.
    Progress { round: u32, sent: u32, total: u32 },
    /// One iteration finished; carries its full record.
    IterationCompleted(IterationRecord),
    /// The whole run finished. `summary` is `None` only when no iteration
    /// got far enough to finalize.
    TestCompleted { summary: Option<RunSummary> },
    /// Error occurred during the run.
    Error(String),
}

/// Callback trait for receiving progress updates during a run.
///
/// The trait is automatically implemented for any function or closure with
/// the right signature.
///
/// # Examples
///
/// ```
/// use udprobe::{ProgressCallback, ProgressEvent};
///
/// struct LogEverything;
///
/// impl ProgressCallback for LogEverything {
///     fn on_progress(&self, event: ProgressEvent) {
///         eprintln!("{event:?}");
///     }
/// }
/// ```
pub trait ProgressCallback: Send + Sync {
    /// Called when a progress event occurs.
    fn on_progress(&self, event: ProgressEvent);
}

/// Simple function-based callback
impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

type CallbackRef = Arc<dyn ProgressCallback>;

/// Engine plus aggregator behind one lock, so the running loop can record
/// while accessor methods read.
#[derive(Debug)]
struct RunState {
    engine: ProbeEngine,
    aggregator: RunAggregator,
}

/// UDP probe client.
///
/// Sends the configured burst of sequence-numbered, timestamped probes each
/// iteration, optionally collecting echoes for round-trip measurement, and
/// aggregates per-iteration statistics across the run.
///
/// # Examples
///
/// ## Round-trip test against an echoing server
///
/// ```no_run
/// use udprobe::{Client, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100", 8888)
///     .with_packet_count(1000)
///     .with_echo(true);
///
/// let client = Client::new(config)?;
/// client.run().await?;
///
/// if let Some(summary) = client.summary() {
///     println!("Avg RTT: {:.3} ms", summary.avg_latency_ms);
/// }
/// # Ok(())
/// # }
/// ```
///
/// ## Ten aggregated rounds of small probes
///
/// ```no_run
/// use udprobe::{Client, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100", 8888)
///     .with_payload_len(64)
///     .with_iterations(10)
///     .with_echo(true);
///
/// let client = Client::new(config)?;
/// client.run().await?;
///
/// for record in client.records() {
///     println!("Round {}: loss {:.2}%", record.round, record.loss_pct);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    state: Arc<Mutex<RunState>>,
    callback: Option<CallbackRef>,
    cancellation_token: CancellationToken,
}

impl Client {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration has no server address.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::{Client, Config};
    ///
    /// let config = Config::client("127.0.0.1", 8888);
    /// let client = Client::new(config).expect("Failed to create client");
    /// ```
    pub fn new(config: Config) -> Result<Self> {
        if config.server_addr.is_none() {
            return Err(Error::Config(
                "Server address is required for client mode".to_string(),
            ));
        }

        let mode = if config.echo {
            ProbeMode::RoundTrip
        } else {
            ProbeMode::SendOnly
        };

        Ok(Self {
            config,
            state: Arc::new(Mutex::new(RunState {
                engine: ProbeEngine::new(mode),
                aggregator: RunAggregator::new(),
            })),
            callback: None,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Attaches a progress callback to receive real-time run updates.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use udprobe::{Client, Config, ProgressEvent};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = Config::client("127.0.0.1", 8888);
    /// let client = Client::new(config)?
    ///     .with_callback(|event: ProgressEvent| {
    ///         println!("Progress: {event:?}");
    ///     });
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Notify callback of progress event
    fn notify(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback.on_progress(event);
        }
    }

    /// Returns a reference to the cancellation token.
    ///
    /// Cancelling it stops the run at the next loop boundary; the current
    /// iteration finalizes with whatever it measured so far.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use udprobe::{Client, Config};
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new(Config::client("127.0.0.1", 8888))?;
    ///
    /// let cancel_token = client.cancellation_token().clone();
    /// tokio::spawn(async move {
    ///     tokio::time::sleep(Duration::from_secs(5)).await;
    ///     cancel_token.cancel();
    /// });
    ///
    /// client.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Per-iteration records completed so far.
    pub fn records(&self) -> Vec<IterationRecord> {
        self.state.lock().aggregator.records().to_vec()
    }

    /// Aggregate summary across completed iterations, or `None` when no
    /// iteration has finalized yet.
    pub fn summary(&self) -> Option<RunSummary> {
        self.state.lock().aggregator.summarize()
    }

    /// Runs the measurement.
    ///
    /// Sends the configured number of iterations, printing per-round and
    /// aggregate results (or one JSON report when configured). Send
    /// failures are logged and skipped; the run keeps going. Blocks until
    /// the run completes, is cancelled, or hits a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be set up or the in-flight
    /// table cannot grow. Partial results are flushed and reported first.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use udprobe::{Client, Config};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new(Config::client("127.0.0.1", 8888).with_echo(true))?;
    /// client.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self) -> Result<()> {
        let endpoint = self.config.server_endpoint()?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&endpoint).await?;
        tune_buffers(&socket);

        info!("UDP client connected to {}", endpoint);

        let payload_len = self.config.effective_payload_len();
        // Cycling byte pattern instead of zero fill, so probes are easy to
        // spot in a capture.
        let payload: Vec<u8> = (0..payload_len).map(|i| (i % 256) as u8).collect();

        if !self.config.json {
            println!("UDP client sending to {}", endpoint);
            if self.config.echo {
                println!("Round-trip mode: every probe should be echoed back");
            } else {
                println!("Send-only mode: no echo expected");
            }
            println!("Packet count per iteration: {}", self.config.packet_count);
            println!("Packet size: {} bytes", ProbeHeader::SIZE + payload_len);
            println!("Number of iterations: {}", self.config.iterations);
        }

        self.notify(ProgressEvent::TestStarted);

        let mut wire = Vec::with_capacity(ProbeHeader::SIZE + payload_len);
        let mut recv_buf = vec![0u8; MAX_DATAGRAM];

        for round in 1..=self.config.iterations {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if !self.config.json {
                println!("\n========== Round {}/{} ==========", round, self.config.iterations);
            }

            match self
                .run_iteration(&socket, round, &payload, &mut wire, &mut recv_buf)
                .await
            {
                Ok(record) => {
                    if !self.config.json {
                        println!("\n{record}");
                    }
                    self.notify(ProgressEvent::IterationCompleted(record));
                }
                Err(e) => {
                    // Fatal; the partial iteration is already folded in.
                    self.notify(ProgressEvent::Error(e.to_string()));
                    self.finish_run()?;
                    return Err(e);
                }
            }

            if round < self.config.iterations && !self.cancellation_token.is_cancelled() {
                if !self.config.json {
                    println!("\nWaiting 1 second before the next round...");
                }
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(1)) => {}
                    _ = self.cancellation_token.cancelled() => {}
                }
            }
        }

        self.finish_run()
    }

    /// One full iteration: burst, drain, finalize. Always finalizes and
    /// folds the record into the aggregator, even on the error path.
    async fn run_iteration(
        &self,
        socket: &UdpSocket,
        round: u32,
        payload: &[u8],
        wire: &mut Vec<u8>,
        recv_buf: &mut [u8],
    ) -> Result<IterationRecord> {
        let total = self.config.packet_count;
        self.state.lock().engine.begin_iteration(packet::wall_micros());

        let mut fatal: Option<Error> = None;

        for i in 0..total {
            if self.cancellation_token.is_cancelled() {
                info!("Test cancelled by user");
                break;
            }

            let header = ProbeHeader::new(i, payload.len() as u32);
            header.encode_into(payload, wire);

            match socket.send(wire).await {
                Ok(n) => {
                    if let Err(e) =
                        self.state.lock().engine.record_sent(i, n, packet::wall_micros())
                    {
                        error!("Aborting run: {}", e);
                        fatal = Some(e);
                        break;
                    }
                }
                Err(e) => {
                    error!("Error sending probe {}: {}", i, e);
                    continue;
                }
            }

            // Pick up any echoes already queued before the next send.
            if self.config.echo {
                self.drain_ready_echoes(socket, recv_buf);
            }

            if (i + 1) % 100 == 0 || i + 1 == total {
                self.notify(ProgressEvent::Progress {
                    round,
                    sent: i + 1,
                    total,
                });
                if !self.config.json {
                    println!(
                        "Progress: {}/{} packets ({:.1}%)",
                        i + 1,
                        total,
                        (i + 1) as f64 * 100.0 / total as f64
                    );
                }
            }

            if !self.config.spacing.is_zero() {
                time::sleep(self.config.spacing).await;
            }
        }

        // The send window closes here; drain waiting is measured separately.
        self.state.lock().engine.start_drain(packet::wall_micros());

        if self.config.echo && fatal.is_none() {
            self.drain_echoes(socket, recv_buf).await;
        }

        let record = {
            let mut state = self.state.lock();
            let record = state.engine.finish(packet::wall_micros());
            state.aggregator.add_iteration(record.clone());
            record
        };

        match fatal {
            Some(e) => Err(e),
            None => Ok(record),
        }
    }

    /// Consumes every echo the socket already has, without blocking.
    fn drain_ready_echoes(&self, socket: &UdpSocket, buf: &mut [u8]) {
        loop {
            match socket.try_recv(buf) {
                Ok(n) => self.account_echo(&buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Error receiving echo: {}", e);
                    break;
                }
            }
        }
    }

    /// Polls for stragglers until the grace deadline, the in-flight table
    /// empties, or cancellation.
    async fn drain_echoes(&self, socket: &UdpSocket, buf: &mut [u8]) {
        let deadline = Instant::now() + self.config.grace;

        while Instant::now() < deadline {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            let outstanding = self.state.lock().engine.pending_len();
            if outstanding == 0 {
                break;
            }

            match time::timeout(Duration::from_millis(100), socket.recv(buf)).await {
                Ok(Ok(n)) => self.account_echo(&buf[..n]),
                Ok(Err(e)) => {
                    error!("Error receiving echo: {}", e);
                }
                Err(_) => {
                    // Timeout: nothing arrived in this poll, keep waiting.
                }
            }
        }

        let outstanding = self.state.lock().engine.pending_len();
        if outstanding > 0 {
            debug!("{} probes still unanswered at grace expiry", outstanding);
        }
    }

    fn account_echo(&self, datagram: &[u8]) {
        match packet::decode(datagram) {
            Ok((header, _payload)) => {
                self.state.lock().engine.record_received(
                    &header,
                    datagram.len(),
                    packet::wall_micros(),
                );
            }
            Err(e) => debug!("Discarding malformed datagram: {}", e),
        }
    }

    /// Emits the end-of-run report: JSON envelope, or the aggregate text
    /// block for multi-round runs.
    fn finish_run(&self) -> Result<()> {
        let (summary, report, multi_text) = {
            let state = self.state.lock();
            let summary = state.aggregator.summarize();
            let report = self
                .config
                .json
                .then(|| RunReport::new(&self.config, &state.aggregator));
            let multi_text = (!self.config.json && state.aggregator.iterations() > 1)
                .then(|| state.aggregator.render_text())
                .flatten();
            (summary, report, multi_text)
        };

        self.notify(ProgressEvent::TestCompleted { summary });

        if let Some(report) = report {
            println!("{}", report.to_json()?);
        } else {
            if let Some(text) = multi_text {
                println!("\n{text}");
            }
            println!("\nPerformance test completed.");
        }

        Ok(())
    }
}
