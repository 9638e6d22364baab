//! Message counters and uptime shared by transports and health reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonically increasing send/receive counters plus a fixed start time.
///
/// Increments take exclusive access at the atomic level only; reads are
/// wait-free and never observe torn values. Lifetime matches the owning
/// transport instance.
#[derive(Debug)]
pub struct TransportMetrics {
    received: AtomicU64,
    sent: AtomicU64,
    started_at: Instant,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Elapsed time since this transport instance was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = TransportMetrics::new();
        assert_eq!(metrics.received(), 0);
        assert_eq!(metrics.sent(), 0);
    }

    #[test]
    fn test_increments_are_visible() {
        let metrics = TransportMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_sent();
        assert_eq!(metrics.received(), 2);
        assert_eq!(metrics.sent(), 1);
    }

    #[test]
    fn test_concurrent_increments_never_lose_counts() {
        let metrics = Arc::new(TransportMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    m.record_received();
                    m.record_sent();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.received(), 8000);
        assert_eq!(metrics.sent(), 8000);
    }

    #[test]
    fn test_uptime_advances() {
        let metrics = TransportMetrics::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime() >= Duration::from_millis(10));
    }
}
