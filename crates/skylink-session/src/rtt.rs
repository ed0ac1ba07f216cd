//! Round-trip time histogram.
//!
//! Endpoints report how long their last ping took to come back. The relay
//! keeps a coarse per-session histogram of those reports so operators can
//! see link quality without storing individual samples.

/// Bucket counts for reported round trips, in milliseconds. Each bucket
/// holds samples below its bound and at or above the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundTripHistogram {
    pub under_50ms: u64,
    pub under_100ms: u64,
    pub under_250ms: u64,
    pub under_500ms: u64,
    pub under_1000ms: u64,
    pub from_1000ms: u64,
}

impl RoundTripHistogram {
    /// Counts one sample. Negative and non-finite samples are refused.
    pub fn record(&mut self, ms: f64) -> bool {
        if !ms.is_finite() || ms < 0.0 {
            return false;
        }
        let bucket = if ms < 50.0 {
            &mut self.under_50ms
        } else if ms < 100.0 {
            &mut self.under_100ms
        } else if ms < 250.0 {
            &mut self.under_250ms
        } else if ms < 500.0 {
            &mut self.under_500ms
        } else if ms < 1000.0 {
            &mut self.under_1000ms
        } else {
            &mut self.from_1000ms
        };
        *bucket += 1;
        true
    }

    /// Adds every bucket of `other` into `self`.
    pub fn merge(&mut self, other: &RoundTripHistogram) {
        self.under_50ms += other.under_50ms;
        self.under_100ms += other.under_100ms;
        self.under_250ms += other.under_250ms;
        self.under_500ms += other.under_500ms;
        self.under_1000ms += other.under_1000ms;
        self.from_1000ms += other.from_1000ms;
    }

    /// Total samples recorded.
    pub fn total(&self) -> u64 {
        self.under_50ms
            + self.under_100ms
            + self.under_250ms
            + self.under_500ms
            + self.under_1000ms
            + self.from_1000ms
    }
}
