pub mod entry;
pub mod error;

pub use entry::{CacheEntry, CacheStatus, QueryKey};
pub use error::CacheError;

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vigil_core::{ChangeEvent, ChangeOp, DataBackend, NoticeKind, Notifier, SessionScoped};

/// Keyed cache of query results, kept consistent with the backend's push
/// feed.
///
/// The entry table is single-owner: every state change goes through this
/// coordinator's contract (`get`, `invalidate`, `mutate`, the change feed),
/// and consumers only ever receive snapshots. Cloning the coordinator shares
/// the same table.
///
/// Failure semantics: a background refetch failure leaves the entry in
/// `Error` status with the last known rows still retrievable
/// (stale-while-revalidate) and schedules no automatic retry; the consumer
/// decides whether to invalidate and try again.
#[derive(Clone)]
pub struct CacheSyncCoordinator {
    backend: Arc<dyn DataBackend>,
    notifier: Arc<dyn Notifier>,
    entries: Arc<DashMap<QueryKey, CacheEntry>>,
    watchers: Arc<DashMap<QueryKey, usize>>,
}

impl CacheSyncCoordinator {
    pub fn new(backend: Arc<dyn DataBackend>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            backend,
            notifier,
            entries: Arc::new(DashMap::new()),
            watchers: Arc::new(DashMap::new()),
        }
    }

    /// Snapshot the entry for `key`, starting a background fetch when the
    /// entry is absent or stale.
    ///
    /// The returned snapshot reflects the entry as observed: after an
    /// invalidation the caller sees `Stale` (with the old rows) while the
    /// refetch this call scheduled is in flight. Duplicate in-flight fetches
    /// for one key are coalesced; only the transition into `Fetching` spawns
    /// a request.
    pub fn get(&self, key: &QueryKey) -> CacheEntry {
        let (snapshot, fetch) = match self.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let entry = CacheEntry::pending(key.clone());
                let generation = entry.generation;
                vacant.insert(entry.clone());
                (entry, Some(generation))
            }
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let snapshot = occupied.get().clone();
                // Stale transitions into Fetching here; an entry already
                // Fetching keeps its single in-flight request.
                let fetch = if snapshot.status == CacheStatus::Stale {
                    occupied.get_mut().status = CacheStatus::Fetching;
                    Some(snapshot.generation)
                } else {
                    None
                };
                (snapshot, fetch)
            }
        };
        if let Some(generation) = fetch {
            self.spawn_fetch(key.clone(), generation);
        }
        snapshot
    }

    /// Register a live consumer for `key`. While at least one guard is
    /// alive, invalidations of `key` schedule an eager refetch instead of
    /// waiting for the next `get`.
    pub fn watch(&self, key: &QueryKey) -> WatchGuard {
        *self.watchers.entry(key.clone()).or_insert(0) += 1;
        WatchGuard {
            coordinator: self.clone(),
            key: key.clone(),
        }
    }

    fn watched(&self, key: &QueryKey) -> bool {
        self.watchers.get(key).map(|count| *count > 0).unwrap_or(false)
    }

    /// Mark `key` stale. Watched keys refetch eagerly; unwatched keys wait
    /// for the next `get`.
    ///
    /// A request already in flight may have been served before the change
    /// this invalidation reports, so it is superseded: its result is
    /// discarded on landing instead of being trusted as current.
    pub fn invalidate(&self, key: &QueryKey) {
        let fetch = {
            let Some(mut slot) = self.entries.get_mut(key) else {
                return;
            };
            if slot.status == CacheStatus::Fetching {
                slot.generation += 1;
            }
            if self.watched(key) {
                slot.status = CacheStatus::Fetching;
                Some(slot.generation)
            } else {
                slot.status = CacheStatus::Stale;
                None
            }
        };
        if let Some(generation) = fetch {
            self.spawn_fetch(key.clone(), generation);
        }
    }

    /// Invalidate every key matching `predicate`.
    pub fn invalidate_where(&self, predicate: impl Fn(&QueryKey) -> bool) {
        let matching: Vec<QueryKey> = self
            .entries
            .iter()
            .map(|slot| slot.key().clone())
            .filter(|key| predicate(key))
            .collect();
        for key in matching {
            self.invalidate(&key);
        }
    }

    /// Apply one backend change notification: every cached query over the
    /// event's entity is invalidated, regardless of filter, because the
    /// filtered subset cannot be known without re-fetching.
    pub fn on_change_event(&self, event: &ChangeEvent) {
        tracing::debug!(
            entity = %event.entity,
            op = ?event.op,
            affected = event.affected_keys.len(),
            "change event"
        );
        self.invalidate_where(|key| key.entity == event.entity);
    }

    /// Worker loop over the backend change feed; events are handled one at a
    /// time in delivery order until the feed closes or `token` fires.
    pub async fn run_change_feed(
        &self,
        mut feed: mpsc::UnboundedReceiver<ChangeEvent>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("change feed torn down");
                    return;
                }
                maybe = feed.recv() => match maybe {
                    Some(event) => self.on_change_event(&event),
                    None => {
                        tracing::debug!("change feed closed");
                        return;
                    }
                }
            }
        }
    }

    /// Optimistic mutation: apply `op` with `payload` to the cached rows
    /// immediately, then issue the same (op, payload) write to the backend.
    /// On failure the entry rolls back to its prior state and the error is
    /// surfaced; on success the entry is marked fresh with the confirmed
    /// rows.
    ///
    /// An invalidation arriving while the write is in flight is honored: the
    /// entry is left stale for a refetch instead of being confirmed fresh.
    pub async fn mutate(
        &self,
        key: &QueryKey,
        op: ChangeOp,
        payload: serde_json::Value,
    ) -> Result<(), CacheError> {
        let prior = self.entries.get(key).map(|slot| slot.value().clone());

        let mut rows = prior.as_ref().map(|entry| entry.rows.clone()).unwrap_or_default();
        apply_op(&mut rows, op, &payload);

        let generation = {
            let mut slot = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::pending(key.clone()));
            // Supersede any in-flight fetch; its rows predate this write.
            slot.generation += 1;
            slot.rows = rows.clone();
            slot.status = CacheStatus::Fetching;
            slot.error = None;
            slot.generation
        };

        match self.backend.mutate(&key.entity, op, payload).await {
            Ok(()) => {
                if let Some(mut slot) = self.entries.get_mut(key) {
                    slot.rows = rows;
                    slot.fetched_at = Some(Instant::now());
                    if slot.generation == generation {
                        slot.status = CacheStatus::Fresh;
                    }
                    // Otherwise an invalidation landed during the write; the
                    // slot keeps its Stale/Fetching status for the refetch.
                }
                Ok(())
            }
            Err(err) => {
                match prior {
                    Some(previous) => {
                        if let Some(mut slot) = self.entries.get_mut(key) {
                            let superseded = slot.generation != generation;
                            slot.rows = previous.rows;
                            slot.fetched_at = previous.fetched_at;
                            slot.error = previous.error;
                            if !superseded {
                                slot.status = previous.status;
                            }
                        }
                    }
                    None => {
                        self.entries.remove(key);
                    }
                }
                tracing::warn!(key = %key, error = %err, "mutation rolled back");
                self.notifier
                    .notify(NoticeKind::Error, "Saving your change failed. Please retry.");
                Err(CacheError::MutationFailed {
                    key: key.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Drop every cached entry. Watch registrations survive; the next fetch
    /// repopulates on demand.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn spawn_fetch(&self, key: QueryKey, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.backend.query(&key.entity, &key.filter).await;
            // The entry may have been cleared while the request was in
            // flight; a result with nowhere to land is discarded.
            let Some(mut slot) = this.entries.get_mut(&key) else {
                tracing::debug!(key = %key, "discarding fetch result for evicted entry");
                return;
            };
            if slot.status != CacheStatus::Fetching || slot.generation != generation {
                tracing::debug!(key = %key, "discarding fetch result for superseded entry");
                return;
            }
            match result {
                Ok(rows) => {
                    slot.rows = rows;
                    slot.fetched_at = Some(Instant::now());
                    slot.status = CacheStatus::Fresh;
                    slot.error = None;
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "refetch failed");
                    slot.status = CacheStatus::Error;
                    slot.error = Some(err.to_string());
                }
            }
        });
    }
}

/// Apply one (op, payload) change to a row set, matching rows by their `id`
/// field. Updates and deletes without an identifiable target leave the rows
/// alone; the backend remains the authority either way.
fn apply_op(rows: &mut Vec<serde_json::Value>, op: ChangeOp, payload: &serde_json::Value) {
    match op {
        ChangeOp::Insert => rows.push(payload.clone()),
        ChangeOp::Update => {
            if let Some(id) = payload.get("id") {
                for row in rows.iter_mut() {
                    if row.get("id") == Some(id) {
                        *row = payload.clone();
                    }
                }
            }
        }
        ChangeOp::Delete => {
            if let Some(id) = payload.get("id") {
                rows.retain(|row| row.get("id") != Some(id));
            }
        }
    }
}

impl SessionScoped for CacheSyncCoordinator {
    fn clear_session_scope(&self) {
        tracing::debug!("clearing session-scoped cache");
        self.clear();
    }
}

/// Live-consumer registration; see [`CacheSyncCoordinator::watch`].
pub struct WatchGuard {
    coordinator: CacheSyncCoordinator,
    key: QueryKey,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        let emptied = match self.coordinator.watchers.get_mut(&self.key) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if emptied {
            // Guard dropped above; safe to take the write lock.
            self.coordinator
                .watchers
                .remove_if(&self.key, |_, count| *count == 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use vigil_core::{BackendError, BoxFuture, ChangeOp};

    /// Backend double: serves the rows loaded at the moment a request
    /// arrives (delayed responses carry that snapshot), counts round trips,
    /// and can be told to fail.
    struct FakeBackend {
        rows: Mutex<Vec<serde_json::Value>>,
        queries: AtomicUsize,
        delay: Duration,
        fail_queries: AtomicBool,
        fail_mutations: AtomicBool,
    }

    impl FakeBackend {
        fn serving(rows: Vec<serde_json::Value>) -> Arc<Self> {
            Self::slow(rows, Duration::ZERO)
        }

        fn slow(rows: Vec<serde_json::Value>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(rows),
                queries: AtomicUsize::new(0),
                delay,
                fail_queries: AtomicBool::new(false),
                fail_mutations: AtomicBool::new(false),
            })
        }

        fn set_rows(&self, rows: Vec<serde_json::Value>) {
            *self.rows.lock().unwrap() = rows;
        }

        fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl DataBackend for FakeBackend {
        fn query<'a>(
            &'a self,
            _entity: &'a str,
            _filter: &'a str,
        ) -> BoxFuture<'a, Result<Vec<serde_json::Value>, BackendError>> {
            Box::pin(async move {
                self.queries.fetch_add(1, Ordering::SeqCst);
                let served = self.rows.lock().unwrap().clone();
                tokio::time::sleep(self.delay).await;
                if self.fail_queries.load(Ordering::SeqCst) {
                    Err(BackendError::QueryFailed("backend down".into()))
                } else {
                    Ok(served)
                }
            })
        }

        fn mutate<'a>(
            &'a self,
            _entity: &'a str,
            op: ChangeOp,
            payload: serde_json::Value,
        ) -> BoxFuture<'a, Result<(), BackendError>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                if self.fail_mutations.load(Ordering::SeqCst) {
                    Err(BackendError::MutationFailed("write rejected".into()))
                } else {
                    apply_op(&mut self.rows.lock().unwrap(), op, &payload);
                    Ok(())
                }
            })
        }

        fn subscribe_to_changes(&self) -> mpsc::UnboundedReceiver<ChangeEvent> {
            let (_tx, rx) = mpsc::unbounded_channel();
            rx
        }
    }

    #[derive(Default)]
    struct NoticeLog(Mutex<Vec<(NoticeKind, String)>>);

    impl Notifier for NoticeLog {
        fn notify(&self, kind: NoticeKind, message: &str) {
            self.0.lock().unwrap().push((kind, message.to_string()));
        }
    }

    fn rows(values: &[&str]) -> Vec<serde_json::Value> {
        values.iter().map(|v| serde_json::json!({ "id": v })).collect()
    }

    fn cache(backend: Arc<FakeBackend>) -> (CacheSyncCoordinator, Arc<NoticeLog>) {
        let notices = Arc::new(NoticeLog::default());
        (
            CacheSyncCoordinator::new(backend, notices.clone()),
            notices,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn first_get_fetches_in_the_background() {
        let backend = FakeBackend::serving(rows(&["a"]));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        let first = cache.get(&key);
        assert_eq!(first.status, CacheStatus::Fetching);
        assert!(first.is_loading());

        settle().await;
        let second = cache.get(&key);
        assert_eq!(second.status, CacheStatus::Fresh);
        assert_eq!(second.rows, rows(&["a"]));
        assert_eq!(backend.query_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_gets_coalesce_into_one_fetch() {
        let backend = FakeBackend::slow(rows(&["a"]), Duration::from_millis(50));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        cache.get(&key);
        cache.get(&key);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(backend.query_count(), 1);
        assert_eq!(cache.get(&key).status, CacheStatus::Fresh);
    }

    #[tokio::test]
    async fn invalidated_entry_reads_stale_then_refetched_rows() {
        let backend = FakeBackend::serving(rows(&["a"]));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        settle().await;

        backend.set_rows(rows(&["a", "b"]));
        cache.invalidate(&key);

        // The snapshot observed by the next get is Stale with the old rows;
        // the refetch it scheduled lands afterwards.
        let stale = cache.get(&key);
        assert_eq!(stale.status, CacheStatus::Stale);
        assert_eq!(stale.rows, rows(&["a"]));

        settle().await;
        let fresh = cache.get(&key);
        assert_eq!(fresh.status, CacheStatus::Fresh);
        assert_eq!(fresh.rows, rows(&["a", "b"]));
        assert_eq!(backend.query_count(), 2);
    }

    #[tokio::test]
    async fn refetch_failure_keeps_last_rows_and_does_not_retry() {
        let backend = FakeBackend::serving(rows(&["a"]));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        settle().await;

        backend.fail_queries.store(true, Ordering::SeqCst);
        cache.invalidate(&key);
        cache.get(&key);
        settle().await;

        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Error);
        assert_eq!(entry.rows, rows(&["a"]));
        assert!(entry.error.as_deref().unwrap().contains("backend down"));

        // No automatic retry: further gets leave the round-trip count alone.
        let before = backend.query_count();
        cache.get(&key);
        settle().await;
        assert_eq!(backend.query_count(), before);
    }

    #[tokio::test]
    async fn watched_keys_refetch_eagerly_on_invalidation() {
        let backend = FakeBackend::serving(rows(&["a"]));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        settle().await;
        let _guard = cache.watch(&key);

        backend.set_rows(rows(&["b"]));
        cache.invalidate(&key);
        settle().await;

        // No get needed; the watcher kept the entry hot.
        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Fresh);
        assert_eq!(entry.rows, rows(&["b"]));
    }

    #[tokio::test]
    async fn dropping_the_watch_guard_stops_eager_refetches() {
        let backend = FakeBackend::serving(rows(&["a"]));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        settle().await;
        drop(cache.watch(&key));

        cache.invalidate(&key);
        settle().await;

        assert_eq!(cache.get(&key).status, CacheStatus::Stale);
        assert_eq!(backend.query_count(), 1);
    }

    #[tokio::test]
    async fn invalidation_during_an_in_flight_fetch_supersedes_its_result() {
        // The response racing the invalidation was served before the change
        // it reports; trusting it would freeze the old rows as Fresh.
        let backend = FakeBackend::slow(rows(&["old"]), Duration::from_millis(50));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        backend.set_rows(rows(&["new"]));
        cache.invalidate(&key);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The stale response landed and was discarded; the entry waits for
        // the next get.
        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Stale);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let fresh = cache.get(&key);
        assert_eq!(fresh.status, CacheStatus::Fresh);
        assert_eq!(fresh.rows, rows(&["new"]));
    }

    #[tokio::test]
    async fn watched_invalidation_during_an_in_flight_fetch_refetches() {
        let backend = FakeBackend::slow(rows(&["old"]), Duration::from_millis(50));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        let _guard = cache.watch(&key);
        cache.get(&key);
        backend.set_rows(rows(&["new"]));
        cache.invalidate(&key);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The eager refetch won; the pre-change response was discarded.
        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Fresh);
        assert_eq!(entry.rows, rows(&["new"]));
        assert_eq!(backend.query_count(), 2);
    }

    #[tokio::test]
    async fn change_event_invalidates_every_filter_of_the_entity() {
        let backend = FakeBackend::serving(rows(&["a"]));
        let (cache, _) = cache(backend.clone());
        let all = QueryKey::entity("maintenance_records");
        let filtered = QueryKey::new("maintenance_records", "status=open");
        let other = QueryKey::entity("tasks");

        cache.get(&all);
        cache.get(&filtered);
        cache.get(&other);
        settle().await;

        cache.on_change_event(&ChangeEvent::new("maintenance_records", ChangeOp::Insert));

        assert_eq!(cache.get(&all).status, CacheStatus::Stale);
        assert_eq!(cache.get(&filtered).status, CacheStatus::Stale);
        assert_eq!(cache.get(&other).status, CacheStatus::Fresh);
    }

    #[tokio::test]
    async fn successful_mutation_confirms_fresh_rows() {
        let backend = FakeBackend::serving(rows(&["a"]));
        let (cache, notices) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        settle().await;

        cache
            .mutate(&key, ChangeOp::Insert, serde_json::json!({ "id": "b" }))
            .await
            .unwrap();

        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Fresh);
        assert_eq!(entry.rows, rows(&["a", "b"]));
        assert!(notices.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_mutation_rolls_back_and_surfaces_the_error() {
        let backend = FakeBackend::serving(rows(&["a"]));
        let (cache, notices) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        settle().await;
        let before = cache.get(&key);

        backend.fail_mutations.store(true, Ordering::SeqCst);
        let result = cache
            .mutate(&key, ChangeOp::Insert, serde_json::json!({ "id": "b" }))
            .await;

        assert!(matches!(
            result,
            Err(CacheError::MutationFailed { .. })
        ));
        // As observed by a fresh get, the value is unchanged from before.
        let after = cache.get(&key);
        assert_eq!(after.status, CacheStatus::Fresh);
        assert_eq!(after.rows, before.rows);
        assert_eq!(notices.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalidation_during_a_remote_write_is_not_clobbered() {
        let backend = FakeBackend::slow(rows(&["a"]), Duration::from_millis(50));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let write = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .mutate(&key, ChangeOp::Insert, serde_json::json!({ "id": "b" }))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate(&key);
        write.await.unwrap().unwrap();

        // The write succeeded, but the mid-flight invalidation still stands:
        // the entry must not end up Fresh without a refetch.
        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Stale);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let fresh = cache.get(&key);
        assert_eq!(fresh.status, CacheStatus::Fresh);
        assert_eq!(fresh.rows, rows(&["a", "b"]));
    }

    #[test]
    fn ops_apply_by_row_id() {
        let mut current = rows(&["a", "b"]);

        apply_op(&mut current, ChangeOp::Update, &serde_json::json!({ "id": "a", "x": 1 }));
        assert_eq!(current[0], serde_json::json!({ "id": "a", "x": 1 }));

        apply_op(&mut current, ChangeOp::Delete, &serde_json::json!({ "id": "b" }));
        assert_eq!(current.len(), 1);

        apply_op(&mut current, ChangeOp::Insert, &serde_json::json!({ "id": "c" }));
        assert_eq!(current.len(), 2);

        // No id to match: leave the rows to the backend's authority.
        apply_op(&mut current, ChangeOp::Delete, &serde_json::json!({ "name": "c" }));
        assert_eq!(current.len(), 2);
    }

    #[tokio::test]
    async fn clear_wipes_the_table_and_discards_in_flight_results() {
        let backend = FakeBackend::slow(rows(&["a"]), Duration::from_millis(50));
        let (cache, _) = cache(backend.clone());
        let key = QueryKey::entity("tasks");

        cache.get(&key);
        cache.clear_session_scope();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The fetch completed after the clear; its result had nowhere to
        // land and a later get starts from scratch.
        let entry = cache.get(&key);
        assert_eq!(entry.status, CacheStatus::Fetching);
        assert!(entry.rows.is_empty());
    }
}
