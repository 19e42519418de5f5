//! The per-iteration measurement engine.
//!
//! [`ProbeEngine`] is the synchronous core the async client and server
//! loops drive with raw packet events. It owns the in-flight table, the
//! gap detector and the statistics accumulator, and walks each iteration
//! through `Idle -> Sending -> Draining -> Finalized`. Every entry point
//! returns immediately; all waiting (socket polls, pacing sleeps, drain
//! deadlines) belongs to the caller, which also decides when cancellation
//! cuts an iteration short.

use crate::error::Result;
use crate::loss::{GapDetector, SeqOutcome};
use crate::packet::ProbeHeader;
use crate::pending::PendingTable;
use crate::stats::{IterationRecord, IterationStats};

/// What kind of traffic the engine is accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Fire-and-forget burst; loss is measured at the far end.
    SendOnly,
    /// Every probe should come back. Round-trip time per matched echo;
    /// probes that never return are the loss count.
    RoundTrip,
    /// Receiving side: loss from sequence gaps, latency as the one-way
    /// delta against the embedded send stamps.
    Receive,
}

/// Where the engine is in an iteration's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
    Draining,
    Finalized,
}

/// Single-iteration measurement state machine.
///
/// All timestamps are microseconds since the UNIX epoch, from the same
/// clock as [`crate::packet::wall_micros`]. Feeding them in explicitly
/// keeps the engine deterministic under test.
#[derive(Debug)]
pub struct ProbeEngine {
    mode: ProbeMode,
    phase: Phase,
    round: u32,
    started_micros: u64,
    window_closed_micros: Option<u64>,
    pending: PendingTable,
    detector: GapDetector,
    stats: IterationStats,
}

impl ProbeEngine {
    pub fn new(mode: ProbeMode) -> Self {
        Self {
            mode,
            phase: Phase::Idle,
            round: 0,
            started_micros: 0,
            window_closed_micros: None,
            pending: PendingTable::new(),
            detector: GapDetector::new(),
            stats: IterationStats::new(),
        }
    }

    pub fn mode(&self) -> ProbeMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 1-based number of the current (or last finalized) iteration.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Probes still waiting for their echo.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Live view of the current iteration's counters, for progress lines.
    pub fn stats(&self) -> &IterationStats {
        &self.stats
    }

    /// Starts a fresh iteration at `now_micros`. Whatever an earlier
    /// iteration left behind - pending probes, the gap cursor, counters -
    /// is discarded, never carried over.
    pub fn begin_iteration(&mut self, now_micros: u64) {
        self.pending.clear();
        self.detector.reset();
        self.stats.reset();
        self.round += 1;
        self.started_micros = now_micros;
        self.window_closed_micros = None;
        self.phase = Phase::Sending;
    }

    /// Accounts one transmitted probe. In [`ProbeMode::RoundTrip`] the send
    /// time also lands in the in-flight table so a later echo can resolve
    /// its round-trip.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Allocation`] when the in-flight table
    /// cannot grow; the run should end cleanly with whatever was measured.
    pub fn record_sent(&mut self, sequence: u32, wire_len: usize, now_micros: u64) -> Result<()> {
        debug_assert_eq!(self.phase, Phase::Sending);

        if self.mode == ProbeMode::RoundTrip {
            self.pending.record(sequence, now_micros)?;
        }
        self.stats.record_sent(wire_len as u64);
        Ok(())
    }

    /// Accounts one received datagram and returns the latency sample it
    /// resolved to, in milliseconds, if any.
    ///
    /// - `RoundTrip`: an echo whose sequence is still in flight resolves to
    ///   its round-trip time against the recorded send stamp; the header's
    ///   own timestamp is peer-controlled and never trusted. A sequence
    ///   matches at most once; anything unmatched counts as a duplicate and
    ///   resolves to `None`.
    /// - `Receive`: every probe counts as received with its one-way delta;
    ///   sequence jumps charge the skipped count as lost, reordered
    ///   arrivals are noted but never charged.
    /// - `SendOnly`: no echoes are expected; the event is ignored.
    ///
    /// Events arriving after [`ProbeEngine::finish`] are ignored.
    pub fn record_received(
        &mut self,
        header: &ProbeHeader,
        wire_len: usize,
        now_micros: u64,
    ) -> Option<f64> {
        if matches!(self.phase, Phase::Idle | Phase::Finalized) {
            return None;
        }

        match self.mode {
            ProbeMode::SendOnly => None,
            ProbeMode::RoundTrip => match self.pending.take_matching(header.sequence) {
                Some(send_micros) => {
                    let rtt_ms = (now_micros as i64 - send_micros as i64) as f64 / 1000.0;
                    self.stats.record_received(wire_len as u64, rtt_ms);
                    if self.detector.observe(header.sequence) == SeqOutcome::Late {
                        self.stats.note_out_of_order();
                    }
                    Some(rtt_ms)
                }
                None => {
                    self.stats.note_duplicate();
                    None
                }
            },
            ProbeMode::Receive => {
                match self.detector.observe(header.sequence) {
                    SeqOutcome::InOrder => {}
                    SeqOutcome::Gap(missing) => self.stats.charge_lost(missing as u64),
                    SeqOutcome::Late => self.stats.note_out_of_order(),
                }
                let one_way_ms =
                    (now_micros as i64 - header.timestamp_micros() as i64) as f64 / 1000.0;
                self.stats.record_received(wire_len as u64, one_way_ms);
                Some(one_way_ms)
            }
        }
    }

    /// Closes the send window at `now_micros` and enters the drain phase.
    /// Throughput and duration are computed against this close, so drain
    /// waiting never dilutes them. Calling it again is a no-op.
    pub fn start_drain(&mut self, now_micros: u64) {
        if self.phase == Phase::Sending {
            self.window_closed_micros = Some(now_micros);
            self.phase = Phase::Draining;
        }
    }

    /// Finalizes the iteration and returns its record.
    ///
    /// Every probe still in flight is charged as lost. Reachable from any
    /// phase: a cancelled iteration finalizes here with whatever partial
    /// counters it accumulated, and the send window closes at `now_micros`
    /// if [`ProbeEngine::start_drain`] never ran.
    pub fn finish(&mut self, now_micros: u64) -> IterationRecord {
        let never_returned = self.pending.drain_remaining();
        if never_returned > 0 {
            self.stats.charge_lost(never_returned);
        }

        let window_end = self.window_closed_micros.unwrap_or(now_micros);
        let elapsed = window_end.saturating_sub(self.started_micros);
        let sender = self.mode != ProbeMode::Receive;

        self.phase = Phase::Finalized;
        self.stats.finalize(self.round, elapsed, sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000_000;

    fn echo_header(sequence: u32, send_micros: u64) -> ProbeHeader {
        ProbeHeader::with_timestamp(sequence, send_micros, 100)
    }

    #[test]
    fn test_round_trip_iteration() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);
        assert_eq!(engine.phase(), Phase::Idle);

        engine.begin_iteration(T0);
        assert_eq!(engine.phase(), Phase::Sending);

        for seq in 0..10u32 {
            let sent_at = T0 + seq as u64 * 1000;
            engine.record_sent(seq, 116, sent_at).unwrap();
            // Echo lands 2ms later.
            let rtt = engine
                .record_received(&echo_header(seq, sent_at), 116, sent_at + 2000)
                .unwrap();
            assert!((rtt - 2.0).abs() < 1e-9);
        }

        engine.start_drain(T0 + 20_000);
        assert_eq!(engine.phase(), Phase::Draining);
        assert_eq!(engine.pending_len(), 0);

        let record = engine.finish(T0 + 25_000);
        assert_eq!(engine.phase(), Phase::Finalized);
        assert_eq!(record.round, 1);
        assert_eq!(record.packets_sent, 10);
        assert_eq!(record.packets_received, 10);
        assert_eq!(record.packets_lost, 0);
        assert!((record.avg_latency_ms - 2.0).abs() < 1e-9);
        // Window closed at drain start, not at finish.
        assert!((record.duration_secs - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_silent_peer_loses_everything() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);
        engine.begin_iteration(T0);
        for seq in 0..50u32 {
            engine.record_sent(seq, 64, T0 + seq as u64).unwrap();
        }
        engine.start_drain(T0 + 1_000_000);

        let record = engine.finish(T0 + 3_000_000);
        assert_eq!(record.packets_sent, 50);
        assert_eq!(record.packets_received, 0);
        assert_eq!(record.packets_lost, 50);
        assert_eq!(record.avg_latency_ms, 0.0);
        assert!((record.loss_pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_echoes() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);
        engine.begin_iteration(T0);
        for seq in 0..10u32 {
            engine.record_sent(seq, 64, T0).unwrap();
        }
        for seq in [0u32, 2, 4, 6] {
            engine.record_received(&echo_header(seq, T0), 64, T0 + 1500);
        }

        engine.start_drain(T0 + 10_000);
        let record = engine.finish(T0 + 10_000);
        assert_eq!(record.packets_received, 4);
        assert_eq!(record.packets_lost, 6);
        assert!((record.loss_pct - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_echo_matches_once() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);
        engine.begin_iteration(T0);
        engine.record_sent(0, 64, T0).unwrap();

        assert!(engine
            .record_received(&echo_header(0, T0), 64, T0 + 1000)
            .is_some());
        assert!(engine
            .record_received(&echo_header(0, T0), 64, T0 + 2000)
            .is_none());

        engine.start_drain(T0 + 5000);
        let record = engine.finish(T0 + 5000);
        assert_eq!(record.packets_received, 1);
        assert_eq!(record.duplicates, 1);
        assert_eq!(record.packets_lost, 0);
    }

    #[test]
    fn test_reordered_echoes_are_not_loss() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);
        engine.begin_iteration(T0);
        for seq in 0..4u32 {
            engine.record_sent(seq, 64, T0).unwrap();
        }
        // Echoes come back 0, 3, 1, 2; all four made it.
        for seq in [0u32, 3, 1, 2] {
            assert!(engine
                .record_received(&echo_header(seq, T0), 64, T0 + 1000)
                .is_some());
        }

        engine.start_drain(T0 + 5000);
        let record = engine.finish(T0 + 5000);
        assert_eq!(record.packets_received, 4);
        assert_eq!(record.packets_lost, 0);
        assert_eq!(record.out_of_order, 2);
    }

    #[test]
    fn test_cancel_mid_send_keeps_partial_counters() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);
        engine.begin_iteration(T0);
        for seq in 0..3u32 {
            engine.record_sent(seq, 64, T0 + seq as u64 * 1000).unwrap();
        }

        // Cancelled before the send loop finished; no drain phase ran.
        let record = engine.finish(T0 + 3000);
        assert_eq!(record.packets_sent, 3);
        assert_eq!(record.packets_lost, 3);
        assert!((record.duration_secs - 0.003).abs() < 1e-9);
        assert_eq!(engine.phase(), Phase::Finalized);
    }

    #[test]
    fn test_receive_mode_gap_accounting() {
        let mut engine = ProbeEngine::new(ProbeMode::Receive);
        engine.begin_iteration(T0);

        // Sequences 0, 1, 3, 4 with a 5ms one-way delay: exactly one lost.
        for seq in [0u32, 1, 3, 4] {
            let sample = engine
                .record_received(&echo_header(seq, T0), 1400, T0 + 5000)
                .unwrap();
            assert!((sample - 5.0).abs() < 1e-9);
        }

        let record = engine.finish(T0 + 1_000_000);
        assert_eq!(record.packets_received, 4);
        assert_eq!(record.packets_lost, 1);
        assert_eq!(record.packets_sent, 0);
        // Receiver loss rate over received + lost.
        assert!((record.loss_pct - 20.0).abs() < 1e-9);
        assert!(!record.sender);
    }

    #[test]
    fn test_receive_mode_late_packet_never_credits_loss() {
        let mut engine = ProbeEngine::new(ProbeMode::Receive);
        engine.begin_iteration(T0);

        engine.record_received(&echo_header(0, T0), 100, T0 + 1000);
        engine.record_received(&echo_header(4, T0), 100, T0 + 2000); // charges 1..=3
        engine.record_received(&echo_header(2, T0), 100, T0 + 3000); // late, stays charged

        let record = engine.finish(T0 + 10_000);
        assert_eq!(record.packets_lost, 3);
        assert_eq!(record.packets_received, 3);
        assert_eq!(record.out_of_order, 1);
    }

    #[test]
    fn test_send_only_ignores_receives() {
        let mut engine = ProbeEngine::new(ProbeMode::SendOnly);
        engine.begin_iteration(T0);
        engine.record_sent(0, 64, T0).unwrap();

        assert!(engine
            .record_received(&echo_header(0, T0), 64, T0 + 1000)
            .is_none());

        engine.start_drain(T0 + 2000);
        let record = engine.finish(T0 + 2000);
        assert_eq!(record.packets_sent, 1);
        assert_eq!(record.packets_received, 0);
        assert_eq!(record.packets_lost, 0);
    }

    #[test]
    fn test_events_after_finalize_are_ignored() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);
        engine.begin_iteration(T0);
        engine.record_sent(0, 64, T0).unwrap();
        engine.finish(T0 + 1000);

        assert!(engine
            .record_received(&echo_header(0, T0), 64, T0 + 2000)
            .is_none());
    }

    #[test]
    fn test_begin_iteration_discards_stale_state() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);

        engine.begin_iteration(T0);
        for seq in 0..5u32 {
            engine.record_sent(seq, 64, T0).unwrap();
        }
        let first = engine.finish(T0 + 1000);
        assert_eq!(first.packets_lost, 5);

        // Nothing from round 1 leaks into round 2.
        engine.begin_iteration(T0 + 2000);
        assert_eq!(engine.pending_len(), 0);
        engine.record_sent(0, 64, T0 + 2000).unwrap();
        engine.record_received(&echo_header(0, T0), 64, T0 + 3000);

        let second = engine.finish(T0 + 4000);
        assert_eq!(second.round, 2);
        assert_eq!(second.packets_sent, 1);
        assert_eq!(second.packets_received, 1);
        assert_eq!(second.packets_lost, 0);
    }

    #[test]
    fn test_start_drain_is_idempotent() {
        let mut engine = ProbeEngine::new(ProbeMode::RoundTrip);
        engine.begin_iteration(T0);
        engine.start_drain(T0 + 1_000_000);
        engine.start_drain(T0 + 9_000_000);

        let record = engine.finish(T0 + 9_000_000);
        assert!((record.duration_secs - 1.0).abs() < 1e-9);
    }
}
