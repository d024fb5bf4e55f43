//! Sequence number checks
//!
//! Sequence numbers let a receiver notice gaps, replays and resets. They
//! carry no delivery guarantee; callers only log or de-duplicate on them.

/// Classification of an observed sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// First sequence seen on this stream
    First,
    /// Strictly greater than every previous sequence, no gap
    Next,
    /// Greater than the previous sequence but skips `missing` numbers
    Gap { missing: u64 },
    /// Not greater than the highest seen (duplicate, reorder or sender reset)
    Replay { highest: u64 },
}

/// Tracks the highest sequence seen on one stream
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    highest: Option<u64>,
}

impl SequenceTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sequence` and classify it against what was seen before
    pub fn observe(&mut self, sequence: u64) -> SequenceCheck {
        match self.highest {
            None => {
                self.highest = Some(sequence);
                SequenceCheck::First
            }
            Some(highest) if sequence <= highest => SequenceCheck::Replay { highest },
            Some(highest) => {
                self.highest = Some(sequence);
                match sequence - highest - 1 {
                    0 => SequenceCheck::Next,
                    missing => SequenceCheck::Gap { missing },
                }
            }
        }
    }
}
