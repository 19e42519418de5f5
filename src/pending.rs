//! In-flight probe tracking for round-trip measurement.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Send times of probes that have not come back yet, keyed by sequence.
///
/// The sender records every transmit here; a matching echo takes its entry
/// out exactly once, and whatever is left when the receive window closes is
/// counted as lost. Lookup and removal are amortized O(1), so per-packet
/// bookkeeping stays flat as the in-flight window grows.
#[derive(Debug, Default)]
pub struct PendingTable {
    in_flight: HashMap<u32, u64>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the send time (microseconds since the UNIX epoch) for a
    /// sequence number. Re-recording a sequence overwrites the stamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] when the table cannot grow; the caller
    /// is expected to abort the run cleanly rather than drop tracking.
    pub fn record(&mut self, sequence: u32, send_micros: u64) -> Result<()> {
        self.in_flight
            .try_reserve(1)
            .map_err(|e| Error::Allocation(format!("pending table: {e}")))?;
        self.in_flight.insert(sequence, send_micros);
        Ok(())
    }

    /// Removes and returns the recorded send time for `sequence`.
    ///
    /// A sequence matches at most once; a second echo for the same sequence
    /// gets `None` and is the caller's duplicate to count.
    pub fn take_matching(&mut self, sequence: u32) -> Option<u64> {
        self.in_flight.remove(&sequence)
    }

    /// Counts and discards every entry still in flight. Called once when an
    /// iteration's receive window closes; the count is the lost-packet
    /// charge for that iteration.
    pub fn drain_remaining(&mut self) -> u64 {
        let lost = self.in_flight.len() as u64;
        self.in_flight.clear();
        lost
    }

    /// Drops all entries without counting them. Runs at every iteration
    /// start so stale sequences never leak across iterations.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
