//! Time source for handshake timestamps

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current Unix time, truncated to 32 bits
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch, modulo 2^32
    fn unix_time(&self) -> u32;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// A clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn unix_time(&self) -> u32 {
        self.0
    }
}
