//! Process-wide monitoring registry.
//!
//! The management-bean analog: when the `enableJMX` environment variable is
//! set to `true`, each running crawler registers a [`CrawlerMonitor`] exposing
//! its processed, queued and active counts, keyed by crawler id. Handles are
//! removed when the crawler cleans up. Everything here is advisory.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use crate::stats::StatCollector;
use crate::store::CrawlStore;

/// Name of the environment variable that turns monitoring on.
pub const ENABLE_FLAG: &str = "enableJMX";

/// Live counters of one crawler, readable from anywhere in the process.
pub struct CrawlerMonitor {
    id: String,
    store: Arc<dyn CrawlStore>,
    stats: Arc<StatCollector>,
}

/// Point-in-time view of a crawler's counters.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub crawler_id: String,
    pub processed: usize,
    pub queued: usize,
    pub active: usize,
}

impl CrawlerMonitor {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn CrawlStore>,
        stats: Arc<StatCollector>,
    ) -> Self {
        CrawlerMonitor {
            id: id.into(),
            store,
            stats,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn processed_count(&self) -> usize {
        self.stats.processed_count()
    }

    pub fn queued_count(&self) -> usize {
        self.store.queue_size()
    }

    pub fn active_count(&self) -> usize {
        self.store.active_count()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            crawler_id: self.id.clone(),
            processed: self.processed_count(),
            queued: self.queued_count(),
            active: self.active_count(),
        }
    }
}

fn registry() -> &'static DashMap<String, Arc<CrawlerMonitor>> {
    static REGISTRY: OnceLock<DashMap<String, Arc<CrawlerMonitor>>> =
        OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// Whether the process-wide monitoring flag is set.
pub fn monitoring_enabled() -> bool {
    std::env::var(ENABLE_FLAG)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn register(monitor: Arc<CrawlerMonitor>) {
    info!("registering monitor for crawler: {}", monitor.id());
    registry().insert(monitor.id().to_string(), monitor);
}

pub fn deregister(crawler_id: &str) {
    registry().remove(crawler_id);
}

pub fn get(crawler_id: &str) -> Option<Arc<CrawlerMonitor>> {
    registry().get(crawler_id).map(|entry| Arc::clone(&entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CrawlRecord;
    use crate::store::MemoryCrawlStore;

    #[test]
    fn snapshot_reflects_store_and_stats() {
        let store = Arc::new(MemoryCrawlStore::new());
        store.queue(CrawlRecord::new("a")).unwrap();
        store.queue(CrawlRecord::new("b")).unwrap();
        let _claimed = store.next_queued().unwrap().unwrap();
        let stats = Arc::new(StatCollector::new());
        stats.increment_processed();

        let monitor = Arc::new(CrawlerMonitor::new(
            "snapshot-test",
            store as Arc<dyn CrawlStore>,
            stats,
        ));
        register(Arc::clone(&monitor));

        let snap = get("snapshot-test").unwrap().snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.active, 1);

        deregister("snapshot-test");
        assert!(get("snapshot-test").is_none());
    }
}
