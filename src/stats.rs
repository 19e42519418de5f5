//! Per-iteration measurement accumulation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Running counters for one measurement iteration.
///
/// Fed raw packet events while the iteration runs; [`IterationStats::finalize`]
/// derives the reported metrics into an immutable [`IterationRecord`] and the
/// accumulator is reset for the next iteration.
#[derive(Debug, Clone, Default)]
pub struct IterationStats {
    packets_sent: u64,
    packets_received: u64,
    packets_lost: u64,
    bytes_sent: u64,
    bytes_received: u64,
    duplicates: u64,
    out_of_order: u64,
    min_latency_ms: Option<f64>,
    max_latency_ms: Option<f64>,
    total_latency_ms: f64,
}

impl IterationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every counter for a fresh iteration.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record_sent(&mut self, bytes: u64) {
        self.packets_sent += 1;
        self.bytes_sent += bytes;
    }

    /// Records a received packet and its latency sample in milliseconds.
    ///
    /// The latency folds into min/max/total only when strictly positive:
    /// clock skew between unsynchronized hosts can drive a one-way delta to
    /// zero or below, and such samples would poison the averages. The
    /// received count and byte total always advance.
    pub fn record_received(&mut self, bytes: u64, latency_ms: f64) {
        self.packets_received += 1;
        self.bytes_received += bytes;

        if latency_ms > 0.0 {
            self.min_latency_ms = Some(self.min_latency_ms.map_or(latency_ms, |m| m.min(latency_ms)));
            self.max_latency_ms = Some(self.max_latency_ms.map_or(latency_ms, |m| m.max(latency_ms)));
            self.total_latency_ms += latency_ms;
        }
    }

    pub fn charge_lost(&mut self, count: u64) {
        self.packets_lost += count;
    }

    pub fn note_duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn note_out_of_order(&mut self) {
        self.out_of_order += 1;
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn packets_lost(&self) -> u64 {
        self.packets_lost
    }

    /// Average latency over what has arrived so far, for progress lines.
    pub fn running_avg_latency_ms(&self) -> f64 {
        if self.packets_received > 0 {
            self.total_latency_ms / self.packets_received as f64
        } else {
            0.0
        }
    }

    /// Derives the iteration's reported metrics.
    ///
    /// `round` is the 1-based iteration number. `elapsed_micros` is the
    /// measurement window; for senders that window closes when the send loop
    /// ends, so drain waiting never dilutes throughput. `sender` picks which
    /// byte counter throughput is computed from.
    ///
    /// Every derived metric is zero-guarded: no packets means an average of
    /// 0.0 (never NaN) and an empty window means a throughput of 0.0.
    pub fn finalize(&self, round: u32, elapsed_micros: u64, sender: bool) -> IterationRecord {
        let duration_secs = elapsed_micros as f64 / 1_000_000.0;

        let avg_latency_ms = self.running_avg_latency_ms();

        let throughput_bytes = if sender {
            self.bytes_sent
        } else {
            self.bytes_received
        };
        let throughput_mbps = if duration_secs > 0.0 {
            (throughput_bytes as f64 * 8.0) / duration_secs / 1_000_000.0
        } else {
            0.0
        };

        let loss_pct = if self.packets_sent > 0 {
            self.packets_lost as f64 / self.packets_sent as f64 * 100.0
        } else if self.packets_received + self.packets_lost > 0 {
            self.packets_lost as f64 / (self.packets_received + self.packets_lost) as f64 * 100.0
        } else {
            0.0
        };

        IterationRecord {
            round,
            duration_secs,
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            packets_lost: self.packets_lost,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            duplicates: self.duplicates,
            out_of_order: self.out_of_order,
            min_latency_ms: self.min_latency_ms,
            max_latency_ms: self.max_latency_ms,
            avg_latency_ms,
            throughput_mbps,
            loss_pct,
            sender,
        }
    }
}

/// Finalized metrics for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub round: u32,
    pub duration_secs: f64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<f64>,
    pub avg_latency_ms: f64,
    pub throughput_mbps: f64,
    pub loss_pct: f64,
    pub sender: bool,
}

impl fmt::Display for IterationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========== Round {} Statistics ==========", self.round)?;
        writeln!(f, "Duration: {:.3} s", self.duration_secs)?;
        writeln!(f, "Packets sent: {}", self.packets_sent)?;
        writeln!(f, "Packets received: {}", self.packets_received)?;
        writeln!(f, "Packets lost: {}", self.packets_lost)?;
        writeln!(
            f,
            "Bytes sent: {} ({:.2} MB)",
            self.bytes_sent,
            self.bytes_sent as f64 / 1024.0 / 1024.0
        )?;
        writeln!(
            f,
            "Bytes received: {} ({:.2} MB)",
            self.bytes_received,
            self.bytes_received as f64 / 1024.0 / 1024.0
        )?;
        writeln!(f, "Loss rate: {:.2}%", self.loss_pct)?;
        writeln!(f, "Throughput: {:.2} Mbps", self.throughput_mbps)?;
        if let (Some(min), Some(max)) = (self.min_latency_ms, self.max_latency_ms) {
            writeln!(f, "Min latency: {min:.3} ms")?;
            writeln!(f, "Max latency: {max:.3} ms")?;
            writeln!(f, "Avg latency: {:.3} ms", self.avg_latency_ms)?;
        }
        if self.duplicates > 0 {
            writeln!(f, "Duplicates: {}", self.duplicates)?;
        }
        if self.out_of_order > 0 {
            writeln!(f, "Out of order: {}", self.out_of_order)?;
        }
        write!(f, "=========================================")
    }
}
