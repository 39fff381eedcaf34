use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Byte counters shared by every RPC connection.
#[derive(Debug)]
pub struct BandwidthStats {
    sent: AtomicU64,
    received: AtomicU64,
    started: Instant,
    interval: Duration,
    last_log: Mutex<Option<Instant>>,
}

impl BandwidthStats {
    pub fn new(interval: Duration) -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            started: Instant::now(),
            interval,
            last_log: Mutex::new(None),
        }
    }

    pub fn record_sent(&self, bytes: usize) {
        self.sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Logs totals and per-minute averages at most once per interval.
    /// Returns whether anything was logged.
    pub fn maybe_log(&self) -> bool {
        let now = Instant::now();
        {
            let mut last = self.last_log.lock();
            if matches!(*last, Some(at) if now.duration_since(at) <= self.interval) {
                return false;
            }
            *last = Some(now);
        }

        let sent = self.sent();
        let received = self.received();
        let minutes = now.duration_since(self.started).as_secs_f64() / 60.0;
        let (sent_per_min, received_per_min) = if minutes > 0.0 {
            (sent as f64 / minutes, received as f64 / minutes)
        } else {
            (0.0, 0.0)
        };
        tracing::info!(
            target: "tracon::server",
            sent,
            received,
            "bandwidth.total"
        );
        tracing::info!(
            target: "tracon::server",
            sent_per_min = sent_per_min as u64,
            received_per_min = received_per_min as u64,
            "bandwidth.per_minute"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_once_per_interval() {
        let stats = BandwidthStats::new(Duration::from_secs(3600));
        stats.record_sent(10);
        stats.record_received(4);
        assert!(stats.maybe_log());
        assert!(!stats.maybe_log());
        assert_eq!((stats.sent(), stats.received()), (10, 4));
    }
}
