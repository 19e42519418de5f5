//! Sequence-gap loss detection.

/// Classification of one observed sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqOutcome {
    /// Exactly the sequence the detector was waiting for.
    InOrder,
    /// The stream jumped ahead; this many packets in between are presumed
    /// lost.
    Gap(u32),
    /// A sequence the cursor already passed: a late or duplicate arrival.
    Late,
}

/// Detects packet loss from gaps in the observed sequence stream.
///
/// Keeps a single cursor for the next sequence it expects, starting at 0.
/// A jump past the cursor charges the skipped count as lost and continues
/// from the jump. Late arrivals never rewind the cursor and never refund a
/// loss already charged, so under reordering the estimate is a conservative
/// upper bound rather than an exact count.
#[derive(Debug, Default)]
pub struct GapDetector {
    expected_next: u32,
}

impl GapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `sequence` and advances the cursor.
    pub fn observe(&mut self, sequence: u32) -> SeqOutcome {
        if sequence == self.expected_next {
            self.expected_next = sequence.wrapping_add(1);
            SeqOutcome::InOrder
        } else if sequence > self.expected_next {
            let gap = sequence - self.expected_next;
            self.expected_next = sequence.wrapping_add(1);
            SeqOutcome::Gap(gap)
        } else {
            SeqOutcome::Late
        }
    }

    /// The next sequence the detector expects.
    pub fn expected_next(&self) -> u32 {
        self.expected_next
    }

    /// Rewinds the cursor to 0 for a new iteration.
    pub fn reset(&mut self) {
        self.expected_next = 0;
    }
}
