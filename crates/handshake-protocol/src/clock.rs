//! Monotonic `sentAt` timestamps.

use std::sync::atomic::{AtomicU64, Ordering};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Issues strictly increasing `sentAt` values.
///
/// Two messages emitted within the same millisecond would otherwise collide
/// in the receiver's dedup log, so each value is `max(now, last + 1)`.
#[derive(Debug, Default)]
pub struct SentAtClock {
    last: AtomicU64,
}

impl SentAtClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = now_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}
