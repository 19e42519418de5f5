//! Cross-iteration aggregation and run reports.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::stats::IterationRecord;

/// Collects finalized iteration records and derives run-level aggregates.
#[derive(Debug, Clone, Default)]
pub struct RunAggregator {
    records: Vec<IterationRecord>,
}

impl RunAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_iteration(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn iterations(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Derives the cross-iteration aggregates, or `None` when no iteration
    /// completed. Latency and throughput get a mean and a population
    /// standard deviation (divide by N; the records are the whole run, not
    /// a sample of one); loss rate and duration get an arithmetic mean.
    pub fn summarize(&self) -> Option<RunSummary> {
        if self.records.is_empty() {
            return None;
        }

        let n = self.records.len() as f64;
        let latencies: Vec<f64> = self.records.iter().map(|r| r.avg_latency_ms).collect();
        let throughputs: Vec<f64> = self.records.iter().map(|r| r.throughput_mbps).collect();

        let avg_latency_ms = latencies.iter().sum::<f64>() / n;
        let avg_throughput_mbps = throughputs.iter().sum::<f64>() / n;

        Some(RunSummary {
            iterations: self.records.len() as u32,
            avg_latency_ms,
            latency_stddev_ms: population_stddev(&latencies, avg_latency_ms),
            avg_throughput_mbps,
            throughput_stddev_mbps: population_stddev(&throughputs, avg_throughput_mbps),
            avg_loss_pct: self.records.iter().map(|r| r.loss_pct).sum::<f64>() / n,
            avg_duration_secs: self.records.iter().map(|r| r.duration_secs).sum::<f64>() / n,
            total_packets_sent: self.records.iter().map(|r| r.packets_sent).sum(),
            total_packets_received: self.records.iter().map(|r| r.packets_received).sum(),
        })
    }

    /// Renders the full multi-round text report: the aggregate block
    /// followed by one detail line per round.
    pub fn render_text(&self) -> Option<String> {
        let summary = self.summarize()?;

        let mut out = String::new();
        let _ = writeln!(out, "{summary}");
        let _ = writeln!(out, "--- Per-round results ---");
        for record in &self.records {
            let _ = writeln!(
                out,
                "Round {}: latency={:.3} ms, throughput={:.2} Mbps, loss={:.2}%, duration={:.3} s",
                record.round,
                record.avg_latency_ms,
                record.throughput_mbps,
                record.loss_pct,
                record.duration_secs
            );
        }
        out.push_str("=============================================");
        Some(out)
    }
}

fn population_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

/// Aggregates across every completed iteration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub iterations: u32,
    pub avg_latency_ms: f64,
    pub latency_stddev_ms: f64,
    pub avg_throughput_mbps: f64,
    pub throughput_stddev_mbps: f64,
    pub avg_loss_pct: f64,
    pub avg_duration_secs: f64,
    pub total_packets_sent: u64,
    pub total_packets_received: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========== Multi-Round Test Summary ==========")?;
        writeln!(f, "Rounds completed: {}", self.iterations)?;
        writeln!(f)?;
        writeln!(f, "--- Averages ---")?;
        writeln!(
            f,
            "Avg latency: {:.3} ms (stddev: {:.3} ms)",
            self.avg_latency_ms, self.latency_stddev_ms
        )?;
        writeln!(
            f,
            "Avg throughput: {:.2} Mbps (stddev: {:.2} Mbps)",
            self.avg_throughput_mbps, self.throughput_stddev_mbps
        )?;
        writeln!(f, "Avg loss rate: {:.2}%", self.avg_loss_pct)?;
        writeln!(f, "Avg duration: {:.3} s", self.avg_duration_secs)?;
        writeln!(f, "Total packets sent: {}", self.total_packets_sent)?;
        write!(f, "Total packets received: {}", self.total_packets_received)
    }
}

/// Complete run results in JSON form: metadata envelope, the per-round
/// records and (for multi-round runs) the aggregate summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub version: String,
    pub system_info: String,
    pub timestamp: String,
    pub timestamp_secs: i64,
    pub cookie: String,
    pub config: Config,
    pub rounds: Vec<IterationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl RunReport {
    pub fn new(config: &Config, aggregator: &RunAggregator) -> Self {
        let now = chrono::Utc::now();
        Self {
            version: format!("udprobe {}", env!("CARGO_PKG_VERSION")),
            system_info: system_info(),
            timestamp: now.to_rfc2822(),
            timestamp_secs: now.timestamp(),
            cookie: format!("{:x}", rand::random::<u128>()),
            config: config.clone(),
            rounds: aggregator.records().to_vec(),
            summary: aggregator.summarize(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// OS, architecture and hostname of the machine running the test.
pub fn system_info() -> String {
    format!(
        "{} {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::IterationStats;

    fn record_with(round: u32, latency_ms: f64, throughput_mbps: f64) -> IterationRecord {
        IterationRecord {
            round,
            duration_secs: 1.0,
            packets_sent: 1000,
            packets_received: 990,
            packets_lost: 10,
            bytes_sent: 1_000_000,
            bytes_received: 990_000,
            duplicates: 0,
            out_of_order: 0,
            min_latency_ms: Some(latency_ms / 2.0),
            max_latency_ms: Some(latency_ms * 2.0),
            avg_latency_ms: latency_ms,
            throughput_mbps,
            loss_pct: 1.0,
            sender: true,
        }
    }

    #[test]
    fn test_empty_run_has_no_summary() {
        let aggregator = RunAggregator::new();
        assert!(aggregator.summarize().is_none());
        assert!(aggregator.render_text().is_none());
    }

    #[test]
    fn test_population_stddev_over_three_rounds() {
        let mut aggregator = RunAggregator::new();
        aggregator.add_iteration(record_with(1, 1.0, 10.0));
        aggregator.add_iteration(record_with(2, 2.0, 20.0));
        aggregator.add_iteration(record_with(3, 3.0, 30.0));

        let summary = aggregator.summarize().unwrap();
        assert!((summary.avg_throughput_mbps - 20.0).abs() < 1e-9);
        // Population stddev of {10, 20, 30} is sqrt(200/3).
        assert!((summary.throughput_stddev_mbps - 8.164_965_809).abs() < 1e-6);
        assert!((summary.avg_latency_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_round_summary_has_zero_spread() {
        let mut aggregator = RunAggregator::new();
        aggregator.add_iteration(record_with(1, 1.5, 42.0));

        let summary = aggregator.summarize().unwrap();
        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.latency_stddev_ms, 0.0);
        assert_eq!(summary.throughput_stddev_mbps, 0.0);
        assert!((summary.avg_throughput_mbps - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_totals_sum_over_rounds() {
        let mut aggregator = RunAggregator::new();
        aggregator.add_iteration(record_with(1, 1.0, 10.0));
        aggregator.add_iteration(record_with(2, 1.0, 10.0));

        let summary = aggregator.summarize().unwrap();
        assert_eq!(summary.total_packets_sent, 2000);
        assert_eq!(summary.total_packets_received, 1980);
    }

    #[test]
    fn test_render_text_lists_every_round() {
        let mut aggregator = RunAggregator::new();
        aggregator.add_iteration(record_with(1, 1.0, 10.0));
        aggregator.add_iteration(record_with(2, 2.0, 20.0));

        let text = aggregator.render_text().unwrap();
        assert!(text.contains("Rounds completed: 2"));
        assert!(text.contains("Round 1:"));
        assert!(text.contains("Round 2:"));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let config = Config::client("127.0.0.1", 8888);
        let mut aggregator = RunAggregator::new();
        let stats = IterationStats::new();
        aggregator.add_iteration(stats.finalize(1, 1_000_000, true));

        let report = RunReport::new(&config, &aggregator);
        let json = report.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["version"].as_str().unwrap().starts_with("udprobe"));
        assert_eq!(value["rounds"].as_array().unwrap().len(), 1);
        assert!(value["summary"].is_object());
        assert!(!value["cookie"].as_str().unwrap().is_empty());
    }
}
