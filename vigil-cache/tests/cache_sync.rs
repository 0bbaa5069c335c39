//! End-to-end wiring: backend change feed -> CacheSyncCoordinator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vigil_cache::{CacheStatus, CacheSyncCoordinator, QueryKey};
use vigil_core::{entity, BackendError, BoxFuture, ChangeEvent, ChangeOp, DataBackend, NoticeKind, Notifier};

struct FeedBackend {
    rows: Mutex<Vec<serde_json::Value>>,
    queries: AtomicUsize,
    feed: Mutex<Option<mpsc::UnboundedSender<ChangeEvent>>>,
}

impl FeedBackend {
    fn new(rows: Vec<serde_json::Value>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            queries: AtomicUsize::new(0),
            feed: Mutex::new(None),
        })
    }

    /// Simulate a remote writer: change the served rows and push the
    /// matching change event.
    fn remote_write(&self, rows: Vec<serde_json::Value>, event: ChangeEvent) {
        *self.rows.lock().unwrap() = rows;
        // Nobody listens after the feed worker stops; that's fine.
        let _ = self
            .feed
            .lock()
            .unwrap()
            .as_ref()
            .expect("feed not armed")
            .send(event);
    }
}

impl DataBackend for FeedBackend {
    fn query<'a>(
        &'a self,
        _entity: &'a str,
        _filter: &'a str,
    ) -> BoxFuture<'a, Result<Vec<serde_json::Value>, BackendError>> {
        Box::pin(async move {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().unwrap().clone())
        })
    }

    fn mutate<'a>(
        &'a self,
        _entity: &'a str,
        op: ChangeOp,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().unwrap();
            match op {
                ChangeOp::Insert => rows.push(payload),
                ChangeOp::Update => {
                    for row in rows.iter_mut() {
                        if row.get("id") == payload.get("id") {
                            *row = payload.clone();
                        }
                    }
                }
                ChangeOp::Delete => rows.retain(|row| row.get("id") != payload.get("id")),
            }
            Ok(())
        })
    }

    fn subscribe_to_changes(&self) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock().unwrap() = Some(tx);
        rx
    }
}

struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _kind: NoticeKind, _message: &str) {}
}

fn record(id: &str) -> serde_json::Value {
    serde_json::json!({ "id": id })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn live_change_events_invalidate_watched_queries() {
    let backend = FeedBackend::new(vec![record("r1")]);
    let cache = CacheSyncCoordinator::new(backend.clone(), Arc::new(SilentNotifier));
    let feed = backend.subscribe_to_changes();
    let token = CancellationToken::new();
    {
        let cache = cache.clone();
        let token = token.clone();
        tokio::spawn(async move { cache.run_change_feed(feed, token).await });
    }

    let key = QueryKey::entity(entity::MAINTENANCE_RECORDS);
    cache.get(&key);
    settle().await;
    let _guard = cache.watch(&key);

    backend.remote_write(
        vec![record("r1"), record("r2")],
        ChangeEvent::new(entity::MAINTENANCE_RECORDS, ChangeOp::Insert),
    );
    settle().await;

    let entry = cache.get(&key);
    assert_eq!(entry.status, CacheStatus::Fresh);
    assert_eq!(entry.rows.len(), 2);

    token.cancel();
}

#[tokio::test]
async fn events_for_other_entities_leave_the_entry_alone() {
    let backend = FeedBackend::new(vec![record("t1")]);
    let cache = CacheSyncCoordinator::new(backend.clone(), Arc::new(SilentNotifier));
    let feed = backend.subscribe_to_changes();
    let token = CancellationToken::new();
    {
        let cache = cache.clone();
        let token = token.clone();
        tokio::spawn(async move { cache.run_change_feed(feed, token).await });
    }

    let tasks = QueryKey::entity(entity::TASKS);
    cache.get(&tasks);
    settle().await;
    let fetches_before = backend.queries.load(Ordering::SeqCst);

    backend.remote_write(
        vec![record("s1")],
        ChangeEvent::new(entity::SENSOR_DATA, ChangeOp::Update),
    );
    settle().await;

    assert_eq!(cache.get(&tasks).status, CacheStatus::Fresh);
    assert_eq!(backend.queries.load(Ordering::SeqCst), fetches_before);

    token.cancel();
}

#[tokio::test]
async fn cancelled_feed_stops_processing_events() {
    let backend = FeedBackend::new(vec![record("t1")]);
    let cache = CacheSyncCoordinator::new(backend.clone(), Arc::new(SilentNotifier));
    let feed = backend.subscribe_to_changes();
    let token = CancellationToken::new();
    {
        let cache = cache.clone();
        let token = token.clone();
        tokio::spawn(async move { cache.run_change_feed(feed, token).await });
    }

    let key = QueryKey::entity(entity::TASKS);
    cache.get(&key);
    settle().await;

    token.cancel();
    settle().await;

    backend.remote_write(
        vec![record("t1"), record("t2")],
        ChangeEvent::new(entity::TASKS, ChangeOp::Insert),
    );
    settle().await;

    // The worker is gone; the entry stays fresh with the pre-event rows.
    let entry = cache.get(&key);
    assert_eq!(entry.status, CacheStatus::Fresh);
    assert_eq!(entry.rows.len(), 1);
}

#[tokio::test]
async fn optimistic_mutation_round_trips_through_the_backend() {
    let backend = FeedBackend::new(vec![record("t1")]);
    let cache = CacheSyncCoordinator::new(backend.clone(), Arc::new(SilentNotifier));

    let key = QueryKey::entity(entity::TASKS);
    cache.get(&key);
    settle().await;

    cache
        .mutate(&key, ChangeOp::Insert, record("t2"))
        .await
        .unwrap();

    assert_eq!(backend.rows.lock().unwrap().len(), 2);
    assert_eq!(cache.get(&key).rows.len(), 2);
}
