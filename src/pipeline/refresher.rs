//! Refresh orchestration - fetch, aggregate, replace
//!
//! One refresh produces one snapshot generation:
//! 1. Fetch all pages and aggregate per state (`PopulationSource`)
//! 2. Capture a single UTC timestamp (millisecond precision)
//! 3. Replace the stored generation in one transaction (`SnapshotStore`)
//!
//! Overlapping refreshes are not serialized against each other; the last
//! commit wins.

use super::arcgis::PopulationSource;
use super::db::SnapshotStore;
use super::error::RefreshError;
use super::types::StatePopulationSnapshot;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct Refresher {
    source: Arc<dyn PopulationSource>,
    store: Arc<dyn SnapshotStore>,
}

impl Refresher {
    pub fn new(source: Arc<dyn PopulationSource>, store: Arc<dyn SnapshotStore>) -> Self {
        Self { source, store }
    }

    /// Run one refresh cycle and return the generation timestamp
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<DateTime<Utc>, RefreshError> {
        log::info!("🔄 Starting demographics refresh...");
        let started = Instant::now();

        match self.run(cancel).await {
            Ok((at, states)) => {
                log::info!(
                    "✅ Demographics refresh finished: {} states in {}ms",
                    states,
                    started.elapsed().as_millis()
                );
                Ok(at)
            }
            Err(e) if e.is_cancelled() => {
                log::debug!("Demographics refresh cancelled");
                Err(e)
            }
            Err(e) => {
                log::error!("❌ Failed to refresh demographics data ({}): {}", e.kind(), e);
                Err(e)
            }
        }
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<(DateTime<Utc>, usize), RefreshError> {
        let totals = self.source.fetch_aggregated_totals(cancel).await?;
        let now = generation_timestamp();

        // BTreeMap iteration keeps rows ordered by state name
        let rows: Vec<StatePopulationSnapshot> = totals
            .into_iter()
            .map(|(state_name, population)| StatePopulationSnapshot {
                state_name,
                population,
                retrieved_at_utc: now,
            })
            .collect();

        let written = self.store.replace_all(&rows, cancel).await?;
        Ok((now, written))
    }
}

/// Current UTC time truncated to what the store persists
fn generation_timestamp() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::SqliteSnapshotStore;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        totals: BTreeMap<String, i64>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(entries: &[(&str, i64)]) -> Self {
            Self {
                totals: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PopulationSource for FixedSource {
        async fn fetch_aggregated_totals(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<BTreeMap<String, i64>, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.totals.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PopulationSource for FailingSource {
        async fn fetch_aggregated_totals(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<BTreeMap<String, i64>, RefreshError> {
            Err(RefreshError::Transport("connection refused".to_string()))
        }
    }

    fn memory_store() -> Arc<SqliteSnapshotStore> {
        Arc::new(SqliteSnapshotStore::from_connection(Connection::open_in_memory().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn test_refresh_writes_one_generation() {
        let store = memory_store();
        let source = Arc::new(FixedSource::new(&[("Texas", 200), ("California", 150)]));
        let refresher = Refresher::new(source.clone(), store.clone());

        let at = refresher.refresh(&CancellationToken::new()).await.unwrap();

        let rows = store.list(None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.retrieved_at_utc == at));
        assert_eq!(rows[0].state_name, "California");
        assert_eq!(rows[0].population, 150);
        assert_eq!(rows[1].state_name, "Texas");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_store_untouched() {
        let store = memory_store();
        let good = Refresher::new(Arc::new(FixedSource::new(&[("Ohio", 5)])), store.clone());
        let first = good.refresh(&CancellationToken::new()).await.unwrap();

        let bad = Refresher::new(Arc::new(FailingSource), store.clone());
        let result = bad.refresh(&CancellationToken::new()).await;
        assert!(matches!(result, Err(RefreshError::Transport(_))));

        let rows = store.list(None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].retrieved_at_utc, first);
    }

    #[tokio::test]
    async fn test_cancelled_refresh_does_not_commit() {
        let store = memory_store();
        let refresher = Refresher::new(Arc::new(FixedSource::new(&[("Ohio", 5)])), store.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = refresher.refresh(&cancel).await;

        assert!(matches!(result, Err(RefreshError::Cancelled)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_aggregate_clears_generation() {
        let store = memory_store();
        Refresher::new(Arc::new(FixedSource::new(&[("Ohio", 5)])), store.clone())
            .refresh(&CancellationToken::new())
            .await
            .unwrap();

        Refresher::new(Arc::new(FixedSource::new(&[])), store.clone())
            .refresh(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
    }
}
