//! Tracker entry writes and team-scoped cached reads.

use crate::models::{stamp_entries, CreateEntriesRequest, TrackerEntry};
use crate::services::cache::{cache_tag_for_team, TagCache};
use crate::services::entry_store::EntryStore;
use crate::services::metrics;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct EntryService {
    store: Arc<dyn EntryStore>,
    cache: Arc<dyn TagCache>,
    cache_ttl_seconds: u64,
}

impl EntryService {
    pub fn new(store: Arc<dyn EntryStore>, cache: Arc<dyn TagCache>, cache_ttl_seconds: u64) -> Self {
        Self {
            store,
            cache,
            cache_ttl_seconds,
        }
    }

    /// Stamp every entry with `team_id`, write the batch, and invalidate the
    /// team's cached tracker data.
    ///
    /// The invalidation is issued exactly once per call, after the write and
    /// whatever its outcome. The write outcome is returned as is.
    #[instrument(skip(self, request), fields(team_id = %team_id, count = request.entries.len()))]
    pub async fn create_entries(
        &self,
        team_id: &str,
        request: CreateEntriesRequest,
    ) -> Result<Vec<TrackerEntry>, AppError> {
        let stamped = stamp_entries(request.entries, team_id);

        let result = self.store.insert_entries(&stamped).await;
        match &result {
            Ok(inserted) => {
                metrics::record_entries_inserted(team_id, inserted.len());
                tracing::info!(inserted = inserted.len(), "Tracker entries created");
            }
            Err(e) => {
                metrics::record_entry_write_failure(team_id);
                tracing::error!(error = %e, "Failed to write tracker entries");
            }
        }

        self.invalidate_team(team_id).await;
        result
    }

    /// Entries of `team_id`, served from cache when possible.
    ///
    /// A cache fill is dropped if the team's tag was invalidated while the
    /// rows were being loaded.
    #[instrument(skip(self), fields(team_id = %team_id))]
    pub async fn list_entries(&self, team_id: &str) -> Result<Vec<TrackerEntry>, AppError> {
        let key = format!("tracker_entries:{}", team_id);
        let tag = cache_tag_for_team(team_id);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str(&cached) {
                Ok(entries) => {
                    tracing::debug!("Serving tracker entries from cache");
                    return Ok(entries);
                }
                Err(e) => tracing::warn!(error = %e, "Discarding unreadable cache value"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Cache read failed, falling back to store"),
        }

        let generation = match self.cache.tag_generation(&tag).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                tracing::warn!(error = %e, "Cache generation read failed, skipping cache fill");
                None
            }
        };

        let entries = self.store.list_entries(team_id).await?;

        if let Some(generation) = generation {
            self.fill_cache(&key, &tag, generation, &entries).await;
        }
        Ok(entries)
    }

    async fn fill_cache(&self, key: &str, tag: &str, generation: u64, entries: &[TrackerEntry]) {
        let value = match serde_json::to_string(entries) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize tracker entries for cache");
                return;
            }
        };

        match self
            .cache
            .set_tagged(key, &value, tag, generation, self.cache_ttl_seconds)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!(tag, "Tag invalidated during load, not caching"),
            Err(e) => tracing::warn!(error = %e, "Failed to cache tracker entries"),
        }
    }

    async fn invalidate_team(&self, team_id: &str) {
        let tag = cache_tag_for_team(team_id);
        match self.cache.invalidate_tag(&tag).await {
            Ok(()) => {
                metrics::record_cache_invalidation(true);
                tracing::debug!(tag = %tag, "Cache invalidated");
            }
            Err(e) => {
                metrics::record_cache_invalidation(false);
                tracing::warn!(tag = %tag, error = %e, "Cache invalidation failed");
            }
        }
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.store.health_check().await
    }

    pub async fn cache_health_check(&self) -> Result<(), AppError> {
        self.cache.health_check().await.map_err(|e| {
            tracing::warn!(error = %e, "Cache health check failed");
            AppError::ServiceUnavailable
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewEntry;
    use crate::services::cache::InMemoryTagCache;
    use crate::services::entry_store::InMemoryEntryStore;
    use crate::models::StampedEntry;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn entry(description: &str) -> NewEntry {
        NewEntry {
            project_id: Uuid::new_v4(),
            assigned_id: None,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            start: None,
            stop: None,
            duration: 1800,
            description: Some(description.to_string()),
        }
    }

    fn service(
        store: &Arc<InMemoryEntryStore>,
        cache: &Arc<InMemoryTagCache>,
    ) -> EntryService {
        EntryService::new(store.clone(), cache.clone(), 60)
    }

    #[tokio::test]
    async fn create_stamps_writes_once_and_invalidates_once() {
        let store = Arc::new(InMemoryEntryStore::new());
        let cache = Arc::new(InMemoryTagCache::new());
        let service = service(&store, &cache);

        let inserted = service
            .create_entries("org_1", vec![entry("a"), entry("b")].into())
            .await
            .unwrap();

        assert_eq!(inserted.len(), 2);
        assert!(store.rows().iter().all(|r| r.team_id == "org_1"));
        assert_eq!(store.insert_calls(), 1);
        assert_eq!(cache.invalidations(), vec!["tracker_projects_org_1".to_string()]);
    }

    #[tokio::test]
    async fn failed_write_is_returned_and_still_invalidates_once() {
        let store = Arc::new(InMemoryEntryStore::new());
        store.fail_writes(true);
        let cache = Arc::new(InMemoryTagCache::new());
        let service = service(&store, &cache);

        let result = service.create_entries("org_1", vec![entry("a")].into()).await;

        assert!(matches!(result, Err(AppError::DatabaseError(_))));
        assert_eq!(cache.invalidations(), vec!["tracker_projects_org_1".to_string()]);
    }

    #[tokio::test]
    async fn invalidation_failure_does_not_mask_a_successful_write() {
        let store = Arc::new(InMemoryEntryStore::new());
        let cache = Arc::new(InMemoryTagCache::failing_invalidations());
        let service = service(&store, &cache);

        let inserted = service
            .create_entries("org_1", vec![entry("a")].into())
            .await
            .unwrap();

        assert_eq!(inserted.len(), 1);
        assert_eq!(cache.invalidations().len(), 1);
    }

    #[tokio::test]
    async fn reads_observe_new_rows_after_a_write() {
        let store = Arc::new(InMemoryEntryStore::new());
        let cache = Arc::new(InMemoryTagCache::new());
        let service = service(&store, &cache);

        service
            .create_entries("org_1", vec![entry("a")].into())
            .await
            .unwrap();
        assert_eq!(service.list_entries("org_1").await.unwrap().len(), 1);

        service
            .create_entries("org_1", vec![entry("b")].into())
            .await
            .unwrap();
        assert_eq!(service.list_entries("org_1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cached_reads_are_scoped_per_team() {
        let store = Arc::new(InMemoryEntryStore::new());
        let cache = Arc::new(InMemoryTagCache::new());
        let service = service(&store, &cache);

        service
            .create_entries("org_1", vec![entry("a")].into())
            .await
            .unwrap();
        assert_eq!(service.list_entries("org_2").await.unwrap().len(), 0);

        service
            .create_entries("org_1", vec![entry("b")].into())
            .await
            .unwrap();
        assert_eq!(service.list_entries("org_2").await.unwrap().len(), 0);
        assert_eq!(service.list_entries("org_1").await.unwrap().len(), 2);
    }

    /// Store whose first read returns the rows as they were, while a write
    /// for the same team lands and invalidates the tag before the reader
    /// gets back to the cache.
    struct WriteDuringReadStore {
        inner: Arc<InMemoryEntryStore>,
        cache: Arc<InMemoryTagCache>,
        pending: std::sync::Mutex<Option<StampedEntry>>,
    }

    #[async_trait]
    impl EntryStore for WriteDuringReadStore {
        async fn insert_entries(
            &self,
            entries: &[StampedEntry],
        ) -> Result<Vec<TrackerEntry>, AppError> {
            self.inner.insert_entries(entries).await
        }

        async fn list_entries(&self, team_id: &str) -> Result<Vec<TrackerEntry>, AppError> {
            let rows = self.inner.list_entries(team_id).await?;
            let pending = self.pending.lock().unwrap().take();
            if let Some(entry) = pending {
                self.inner.insert_entries(&[entry]).await?;
                self.cache
                    .invalidate_tag(&cache_tag_for_team(team_id))
                    .await
                    .unwrap();
            }
            Ok(rows)
        }

        async fn health_check(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn read_racing_a_write_does_not_cache_stale_rows() {
        let inner = Arc::new(InMemoryEntryStore::new());
        let cache = Arc::new(InMemoryTagCache::new());
        let pending = stamp_entries(vec![entry("late")], "org_1").pop();
        let store = Arc::new(WriteDuringReadStore {
            inner: inner.clone(),
            cache: cache.clone(),
            pending: std::sync::Mutex::new(pending),
        });
        let service = EntryService::new(store, cache.clone(), 60);

        assert_eq!(service.list_entries("org_1").await.unwrap().len(), 0);
        assert_eq!(cache.get("tracker_entries:org_1").await.unwrap(), None);

        assert_eq!(service.list_entries("org_1").await.unwrap().len(), 1);
        assert!(cache.get("tracker_entries:org_1").await.unwrap().is_some());
    }
}
