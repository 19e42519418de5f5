//! udprobe - UDP network performance measurement
//!
//! This library measures packet loss, latency and throughput over UDP by
//! sending bursts of timestamped, sequence-numbered probe packets. It
//! supports a send-only firehose mode, a round-trip mode against an echoing
//! server, and the receiving server itself.
//!
//! # Features
//!
//! - Packet loss detection from sequence gaps and unanswered probes
//! - Round-trip and one-way latency measurement
//! - Multi-round runs with aggregate statistics
//! - JSON output format
//! - Cooperative cancellation with partial results
//! - Asynchronous I/O using tokio

pub mod packet;
pub mod pending;
pub mod loss;
pub mod stats;
pub mod summary;
pub mod engine;
pub mod client;
pub mod server;
pub mod config;
pub mod socket;
pub mod error;

pub use error::{Error, Result};
pub use config::{Config, Mode};
pub use packet::{ProbeHeader, MAX_DATAGRAM, MAX_PAYLOAD};
pub use engine::{Phase, ProbeEngine, ProbeMode};
pub use stats::{IterationRecord, IterationStats};
pub use summary::{RunAggregator, RunReport, RunSummary};
pub use client::{Client, ProgressCallback, ProgressEvent};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
