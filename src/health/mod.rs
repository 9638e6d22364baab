//! Health monitoring — concurrent probes, tri-state aggregation, and an
//! optional repeating check loop.
//!
//! Only the most recent snapshot is retained; a cycle excludes readers
//! for the pointer swap alone, never while the checks run, so a timer
//! cycle and an interactive probe can overlap without partial snapshots.

pub mod checks;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::QuillError;
use crate::metrics::TransportMetrics;

/// Response-time samples retained for the rolling average.
const SAMPLE_WINDOW: usize = 1000;

/// Per-check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    Warning,
    Unhealthy,
}

/// Aggregate tri-state status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// One probe's recorded result within a snapshot.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub outcome: CheckOutcome,
    pub message: String,
    pub duration: Duration,
    pub checked_at: SystemTime,
}

/// Rolling performance counters attached to each snapshot.
#[derive(Debug, Clone)]
pub struct PerfCounters {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub check_cycles: u64,
    pub avg_check_duration: Duration,
}

/// Point-in-time health report. Overwritten, never accumulated.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
    pub uptime: Duration,
    pub counters: PerfCounters,
}

/// A nullary probe tagged with a name. Probes report outcomes rather than
/// failing, so one bad probe can never halt a cycle.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> (CheckOutcome, String);
}

/// Fold per-check outcomes into the aggregate status: any unhealthy check
/// wins, then any warning, then healthy.
pub fn aggregate(results: &[CheckResult]) -> HealthStatus {
    let mut status = HealthStatus::Healthy;
    for result in results {
        match result.outcome {
            CheckOutcome::Unhealthy => return HealthStatus::Unhealthy,
            CheckOutcome::Warning => status = HealthStatus::Degraded,
            CheckOutcome::Healthy => {}
        }
    }
    status
}

struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs registered probes and retains the latest snapshot.
pub struct HealthMonitor {
    checks: Vec<Arc<dyn HealthCheck>>,
    metrics: Option<Arc<TransportMetrics>>,
    started_at: Instant,
    last: RwLock<Option<Arc<HealthSnapshot>>>,
    samples: Mutex<VecDeque<Duration>>,
    cycles: AtomicU64,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl HealthMonitor {
    pub fn new(checks: Vec<Arc<dyn HealthCheck>>) -> Self {
        Self {
            checks,
            metrics: None,
            started_at: Instant::now(),
            last: RwLock::new(None),
            samples: Mutex::new(VecDeque::new()),
            cycles: AtomicU64::new(0),
            monitor: Mutex::new(None),
        }
    }

    /// Attach transport counters so snapshots carry traffic numbers.
    pub fn with_metrics(mut self, metrics: Arc<TransportMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run every registered check concurrently, aggregate, and retain the
    /// snapshot.
    pub async fn check_health(&self) -> Arc<HealthSnapshot> {
        let probes = self.checks.iter().map(|check| {
            let check = check.clone();
            async move {
                let checked_at = SystemTime::now();
                let started = Instant::now();
                let (outcome, message) = check.run().await;
                CheckResult {
                    name: check.name().to_string(),
                    outcome,
                    message,
                    duration: started.elapsed(),
                    checked_at,
                }
            }
        });
        // All checks for one snapshot are joined before finalizing.
        let results = join_all(probes).await;

        {
            let mut samples = self.samples.lock().await;
            for result in &results {
                samples.push_back(result.duration);
                if samples.len() > SAMPLE_WINDOW {
                    samples.pop_front();
                }
            }
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let status = aggregate(&results);
        let snapshot = Arc::new(HealthSnapshot {
            status,
            checks: results,
            uptime: self.started_at.elapsed(),
            counters: self.perf_counters().await,
        });

        // Writers exclude readers only for this swap.
        *self.last.write().await = Some(snapshot.clone());
        snapshot
    }

    /// Most recent snapshot, if any cycle has completed.
    pub async fn last_snapshot(&self) -> Option<Arc<HealthSnapshot>> {
        self.last.read().await.clone()
    }

    async fn perf_counters(&self) -> PerfCounters {
        let avg = {
            let samples = self.samples.lock().await;
            if samples.is_empty() {
                Duration::ZERO
            } else {
                samples.iter().sum::<Duration>() / samples.len() as u32
            }
        };
        PerfCounters {
            messages_received: self.metrics.as_ref().map(|m| m.received()).unwrap_or(0),
            messages_sent: self.metrics.as_ref().map(|m| m.sent()).unwrap_or(0),
            check_cycles: self.cycles.load(Ordering::Relaxed),
            avg_check_duration: avg,
        }
    }

    /// Begin a repeating check cycle: one immediately, then one per
    /// interval until `stop_monitoring`.
    pub async fn start_monitoring(self: &Arc<Self>, interval: Duration) -> crate::Result<()> {
        let mut guard = self.monitor.lock().await;
        if guard.is_some() {
            return Err(QuillError::MonitorAlreadyActive);
        }

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let snapshot = monitor.check_health().await;
                tracing::debug!(
                    status = ?snapshot.status,
                    checks = snapshot.checks.len(),
                    "health check cycle complete"
                );
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = loop_cancel.cancelled() => break,
                }
            }
        });

        *guard = Some(MonitorHandle { cancel, task });
        tracing::info!(interval_secs = interval.as_secs(), "health monitoring started");
        Ok(())
    }

    /// Stop the repeating cycle started by `start_monitoring`.
    pub async fn stop_monitoring(&self) -> crate::Result<()> {
        let handle = self
            .monitor
            .lock()
            .await
            .take()
            .ok_or(QuillError::MonitorNotActive)?;
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            tracing::warn!(error = %e, "health monitor task join failed");
        }
        tracing::info!("health monitoring stopped");
        Ok(())
    }

    #[cfg(test)]
    async fn sample_count(&self) -> usize {
        self.samples.lock().await.len()
    }
}
