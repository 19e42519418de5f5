use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::packet::MAX_PAYLOAD;

/// Default UDP port for probe traffic.
pub const DEFAULT_PORT: u16 = 8888;

/// Default number of probe packets per iteration.
pub const DEFAULT_PACKET_COUNT: u32 = 1000;

/// Run mode: client or server.
///
/// Determines whether this instance emits probe packets (client) or
/// receives them (server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Server mode - binds a port and accounts incoming probes
    Server,
    /// Client mode - sends probe bursts to a server
    Client,
}

/// Configuration for udprobe measurement runs.
///
/// Holds all parameters for both client and server modes. Use the builder
/// pattern methods to customize the configuration.
///
/// # Examples
///
/// ## Round-trip latency test
///
/// ```
/// use udprobe::Config;
///
/// let config = Config::client("192.168.1.100", 8888)
///     .with_packet_count(1000)
///     .with_echo(true);
/// ```
///
/// ## Small-packet burst over ten rounds
///
/// ```
/// use udprobe::Config;
/// use std::time::Duration;
///
/// let config = Config::client("192.168.1.100", 8888)
///     .with_payload_len(64)
///     .with_iterations(10)
///     .with_spacing(Duration::from_micros(500));
/// ```
///
/// ## Echoing server
///
/// ```
/// use udprobe::Config;
///
/// let config = Config::server(8888).with_echo(true);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server mode or client mode
    pub mode: Mode,

    /// Port number to use
    pub port: u16,

    /// Server address (for client mode)
    pub server_addr: Option<String>,

    /// Bind address (for server mode)
    pub bind_addr: Option<IpAddr>,

    /// Probe packets per iteration
    pub packet_count: u32,

    /// Payload bytes per probe; 0 means the largest payload a UDP
    /// datagram can carry
    pub payload_len: usize,

    /// Number of test iterations to run and aggregate
    pub iterations: u32,

    /// Fixed pause between consecutive sends
    pub spacing: Duration,

    /// How long to keep waiting for echoes after the send loop ends
    pub grace: Duration,

    /// Whether echoes are expected (client) or produced (server)
    pub echo: bool,

    /// Output results in JSON format
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            port: DEFAULT_PORT,
            server_addr: None,
            bind_addr: None,
            packet_count: DEFAULT_PACKET_COUNT,
            payload_len: 0,
            iterations: 1,
            spacing: Duration::from_millis(1),
            grace: Duration::from_secs(2),
            echo: false,
            json: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::Config;
    ///
    /// let config = Config::new();
    /// assert_eq!(config.port, 8888);
    /// assert_eq!(config.packet_count, 1000);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new server configuration listening on `port`.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::Config;
    ///
    /// let config = Config::server(8888);
    /// ```
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Default::default()
        }
    }

    /// Creates a new client configuration targeting `server_addr:port`.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::Config;
    ///
    /// let config = Config::client("192.168.1.100", 8888);
    /// ```
    pub fn client(server_addr: impl Into<String>, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr.into()),
            port,
            ..Default::default()
        }
    }

    /// Sets how many probe packets each iteration sends.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::Config;
    ///
    /// let config = Config::client("127.0.0.1", 8888).with_packet_count(5000);
    /// ```
    pub fn with_packet_count(mut self, count: u32) -> Self {
        self.packet_count = count;
        self
    }

    /// Sets the payload size per probe in bytes.
    ///
    /// `0` selects the largest payload a single UDP datagram can carry;
    /// oversized values are clamped to that same limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::Config;
    /// use udprobe::packet::MAX_PAYLOAD;
    ///
    /// let config = Config::client("127.0.0.1", 8888).with_payload_len(0);
    /// assert_eq!(config.effective_payload_len(), MAX_PAYLOAD);
    /// ```
    pub fn with_payload_len(mut self, len: usize) -> Self {
        self.payload_len = len.min(MAX_PAYLOAD);
        self
    }

    /// Sets how many iterations to run. Values below 1 are raised to 1.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::Config;
    ///
    /// let config = Config::client("127.0.0.1", 8888).with_iterations(10);
    /// assert_eq!(config.iterations, 10);
    /// ```
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Sets the fixed pause between consecutive sends.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::Config;
    /// use std::time::Duration;
    ///
    /// let config = Config::client("127.0.0.1", 8888)
    ///     .with_spacing(Duration::from_micros(500));
    /// ```
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    /// Sets the drain window: how long the client keeps polling for echoes
    /// after its send loop finishes.
    ///
    /// # Examples
    ///
    /// ```
    /// use udprobe::Config;
    /// use std::time::Duration;
    ///
    /// let config = Config::client("127.0.0.1", 8888)
    ///     .with_grace(Duration::from_secs(5));
    /// ```
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Enables or disables echo. A client with echo expects the server to
    /// return every probe and measures round-trip time; a server with echo
    /// sends each received datagram back to its source.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Enables or disables JSON output format.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Sets the address a server binds to. Defaults to all interfaces.
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// The payload size probes are actually built with, after resolving the
    /// `0` sentinel and the datagram limit.
    pub fn effective_payload_len(&self) -> usize {
        if self.payload_len == 0 {
            MAX_PAYLOAD
        } else {
            self.payload_len.min(MAX_PAYLOAD)
        }
    }

    /// The `host:port` string a client sends to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no server address was set.
    pub fn server_endpoint(&self) -> Result<String> {
        let host = self
            .server_addr
            .as_deref()
            .ok_or_else(|| Error::Config("server address required in client mode".to_string()))?;
        Ok(format!("{host}:{}", self.port))
    }

    /// The socket address a server binds to.
    pub fn bind_endpoint(&self) -> SocketAddr {
        SocketAddr::new(
            self.bind_addr
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            self.port,
        )
    }
}
