//! Active Metric Request Lock
//!
//! Store-backed marker preventing two concurrent telemetry fetches of the
//! same resource path anywhere in the fleet.

use crate::domain::ports::ResourceStoreRef;
use crate::error::Result;
use crate::store::tables;
use std::future::Future;
use tracing::{debug, error};

/// Lock keyed by resource path in the `ActiveMetricRequest` table
#[derive(Clone)]
pub struct MetricRequestLock {
    store: ResourceStoreRef,
}

impl MetricRequestLock {
    pub fn new(store: ResourceStoreRef) -> Self {
        Self { store }
    }

    /// Whether a fetch of `path` is in flight
    pub async fn is_held(&self, path: &str) -> Result<bool> {
        self.store.exists(tables::ACTIVE_METRIC_REQUEST, path).await
    }

    /// Run `work` while holding the lock for `path`.
    ///
    /// Returns `None` without running `work` when the lock is already held.
    /// The lock is released after `work` completes, whatever its outcome.
    pub async fn run_exclusive<F, T>(&self, path: &str, work: F) -> Result<Option<T>>
    where
        F: Future<Output = T> + Send,
    {
        if !self
            .store
            .create_if_absent(tables::ACTIVE_METRIC_REQUEST, path, b"")
            .await?
        {
            debug!(path = %path, "An active request already exists for metric request");
            return Ok(None);
        }

        let output = work.await;

        if let Err(e) = self.store.delete(tables::ACTIVE_METRIC_REQUEST, path).await {
            error!(path = %path, error = %e, "Unable to release active metric request");
        }
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_attempt_skipped_while_held() {
        let store = Arc::new(MemoryStore::new());
        let lock = MetricRequestLock::new(store.clone());
        let path = "/redfish/v1/TelemetryService/MetricDefinitions/CPU";

        let outer = lock
            .run_exclusive(path, async {
                assert!(lock.is_held(path).await.unwrap());
                lock.run_exclusive(path, async { "inner" }).await.unwrap()
            })
            .await
            .unwrap();

        assert_eq!(outer, Some(None));
        assert!(!lock.is_held(path).await.unwrap());
    }

    #[tokio::test]
    async fn test_released_after_failed_work() {
        let store = Arc::new(MemoryStore::new());
        let lock = MetricRequestLock::new(store.clone());
        let path = "/redfish/v1/TelemetryService/Triggers/T1";

        let result: Option<std::result::Result<(), &str>> =
            lock.run_exclusive(path, async { Err("plugin down") }).await.unwrap();
        assert_eq!(result, Some(Err("plugin down")));
        assert!(!lock.is_held(path).await.unwrap());
        assert_eq!(store.table_len(tables::ACTIVE_METRIC_REQUEST), 0);
    }
}
