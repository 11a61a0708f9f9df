//! Periodic refresh scheduler
//!
//! Runs one refresh immediately, then one per interval until the shutdown
//! token fires. A failed cycle is logged and the loop keeps going.

use super::refresher::Refresher;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_INTERVAL_MINUTES: u64 = 120;
pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 10_080;

/// Clamp a configured interval to the allowed range, falling back to the default
pub fn interval_from_minutes(minutes: Option<u64>) -> Duration {
    let minutes = match minutes {
        Some(m) if (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&m) => m,
        Some(m) => {
            log::warn!(
                "⚠️  Refresh interval {} min outside {}..={}, using {} min",
                m,
                MIN_INTERVAL_MINUTES,
                MAX_INTERVAL_MINUTES,
                DEFAULT_INTERVAL_MINUTES
            );
            DEFAULT_INTERVAL_MINUTES
        }
        None => DEFAULT_INTERVAL_MINUTES,
    };
    Duration::from_secs(minutes * 60)
}

pub struct RefreshScheduler {
    refresher: Arc<Refresher>,
    period: Duration,
}

impl RefreshScheduler {
    pub fn new(refresher: Arc<Refresher>, period: Duration) -> Self {
        Self { refresher, period }
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Scheduler loop; returns once `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        self.run_once(&shutdown).await;

        log::info!(
            "⏰ Refresh scheduler started (interval: {} min)",
            self.period.as_secs() / 60
        );

        let mut timer = interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => self.run_once(&shutdown).await,
            }
        }

        log::info!("⏹️  Refresh scheduler stopped");
    }

    /// One cycle; never propagates a failure
    async fn run_once(&self, shutdown: &CancellationToken) {
        if shutdown.is_cancelled() {
            return;
        }

        match self.refresher.refresh(shutdown).await {
            Ok(at) => log::debug!("Scheduled refresh committed generation {}", at),
            Err(e) if e.is_cancelled() && shutdown.is_cancelled() => {
                log::debug!("Scheduled refresh interrupted by shutdown");
            }
            Err(e) => log::error!("❌ Scheduled demographics refresh failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::arcgis::PopulationSource;
    use crate::pipeline::error::RefreshError;
    use crate::pipeline::db::{SnapshotStore, SqliteSnapshotStore};
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails on every odd call, succeeds on even calls
    struct FlakySource {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PopulationSource for FlakySource {
        async fn fetch_aggregated_totals(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<BTreeMap<String, i64>, RefreshError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(RefreshError::Transport("503".to_string()))
            } else {
                Ok(BTreeMap::from([("Ohio".to_string(), n as i64)]))
            }
        }
    }

    /// Blocks until cancelled
    struct HangingSource;

    #[async_trait]
    impl PopulationSource for HangingSource {
        async fn fetch_aggregated_totals(
            &self,
            cancel: &CancellationToken,
        ) -> Result<BTreeMap<String, i64>, RefreshError> {
            cancel.cancelled().await;
            Err(RefreshError::Cancelled)
        }
    }

    fn memory_store() -> Arc<SqliteSnapshotStore> {
        Arc::new(SqliteSnapshotStore::from_connection(Connection::open_in_memory().unwrap()).unwrap())
    }

    #[test]
    fn test_interval_fallback() {
        assert_eq!(interval_from_minutes(None), Duration::from_secs(120 * 60));
        assert_eq!(interval_from_minutes(Some(0)), Duration::from_secs(120 * 60));
        assert_eq!(interval_from_minutes(Some(10_081)), Duration::from_secs(120 * 60));
        assert_eq!(interval_from_minutes(Some(1)), Duration::from_secs(60));
        assert_eq!(interval_from_minutes(Some(10_080)), Duration::from_secs(10_080 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = memory_store();
        let refresher = Arc::new(Refresher::new(
            Arc::new(FlakySource { calls: calls.clone() }),
            store.clone(),
        ));

        let shutdown = CancellationToken::new();
        let handle = RefreshScheduler::new(refresher, Duration::from_secs(60)).spawn(shutdown.clone());

        // startup run (fails) + two ticks (succeeds, fails)
        tokio::time::sleep(Duration::from_secs(125)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let rows = store.list(None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].population, 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_running_refresh() {
        let refresher = Arc::new(Refresher::new(Arc::new(HangingSource), memory_store()));
        let shutdown = CancellationToken::new();
        let handle = RefreshScheduler::new(refresher, Duration::from_secs(3600)).spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
