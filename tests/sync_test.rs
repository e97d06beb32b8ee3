mod common;

use std::sync::{Arc, Mutex};

use booking_engine::domain::models::booking::CancelPatch;
use booking_engine::domain::models::slot::week_id_for;
use booking_engine::domain::ports::{BookingFeed, BookingStore, FeedErrorFn, SnapshotFn, SubscriptionHandle};
use booking_engine::engine::cache::BookingCache;
use booking_engine::engine::sync::{SyncDelta, WeekSync};
use booking_engine::error::EngineError;
use common::{at, next_week_monday, seed_booking, TestEnv};

fn collect_deltas(sync: &WeekSync) -> Arc<Mutex<Vec<SyncDelta>>> {
    let deltas = Arc::new(Mutex::new(Vec::new()));
    let sink = deltas.clone();
    sync.on_delta(Arc::new(move |delta| {
        sink.lock().unwrap().push(delta);
    }));
    deltas
}

fn week_sync(env: &TestEnv) -> WeekSync {
    WeekSync::new(
        Arc::new(env.store.clone()),
        Arc::new(env.store.clone()),
        Arc::clone(&env.state.cache),
    )
}

#[tokio::test]
async fn live_watch_mirrors_remote_changes_into_the_cache() {
    let env = TestEnv::new();
    let day = next_week_monday();
    let week = week_id_for(at(day, 10), &chrono_tz::UTC);
    let key = ("m1".to_string(), week.clone());

    let existing = seed_booking(&env.store, "m1", "u1", at(day, 10)).await;

    let sync = week_sync(&env);
    let deltas = collect_deltas(&sync);
    sync.watch("m1", &week);

    // Initial snapshot is baseline only, never a delta.
    assert!(deltas.lock().unwrap().is_empty());
    assert_eq!(env.state.cache.active_bookings(&key).len(), 1);

    let added = seed_booking(&env.store, "m1", "u2", at(day, 14)).await;
    {
        let deltas = deltas.lock().unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].added.len(), 1);
        assert_eq!(deltas[0].added[0].id, added.id);
        assert!(deltas[0].removed.is_empty());
    }
    assert_eq!(env.state.cache.active_bookings(&key).len(), 2);

    env.store
        .update_status(&existing.id, &CancelPatch::by("u1"))
        .await
        .unwrap();
    {
        let deltas = deltas.lock().unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[1].removed.len(), 1);
        assert_eq!(deltas[1].removed[0].id, existing.id);
    }
    assert_eq!(env.state.cache.active_bookings(&key).len(), 1);
}

#[tokio::test]
async fn switching_keys_resets_the_baseline() {
    let env = TestEnv::new();
    let day = next_week_monday();
    let week = week_id_for(at(day, 10), &chrono_tz::UTC);

    seed_booking(&env.store, "m1", "u1", at(day, 10)).await;
    seed_booking(&env.store, "m2", "u2", at(day, 10)).await;
    seed_booking(&env.store, "m2", "u3", at(day, 12)).await;

    let sync = week_sync(&env);
    let deltas = collect_deltas(&sync);

    sync.watch("m1", &week);
    // A newly-viewed machine full of bookings is a first load, not news.
    sync.watch("m2", &week);
    assert!(deltas.lock().unwrap().is_empty());

    let key = ("m2".to_string(), week);
    assert_eq!(env.state.cache.active_bookings(&key).len(), 2);
}

#[tokio::test]
async fn point_in_time_refresh_writes_the_shared_cache_without_deltas() {
    let env = TestEnv::new();
    let day = next_week_monday();
    let week = week_id_for(at(day, 10), &chrono_tz::UTC);

    seed_booking(&env.store, "m1", "u1", at(day, 10)).await;

    let sync = week_sync(&env);
    let deltas = collect_deltas(&sync);

    let fetched = sync.refresh("m1", &week).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert!(deltas.lock().unwrap().is_empty());

    let key = ("m1".to_string(), week);
    assert_eq!(env.state.cache.active_bookings(&key).len(), 1);
}

#[tokio::test]
async fn stopping_the_watch_detaches_the_listener() {
    let env = TestEnv::new();
    let day = next_week_monday();
    let week = week_id_for(at(day, 10), &chrono_tz::UTC);
    let key = ("m1".to_string(), week.clone());

    let sync = week_sync(&env);
    let deltas = collect_deltas(&sync);
    sync.watch("m1", &week);
    sync.stop();

    seed_booking(&env.store, "m1", "u1", at(day, 10)).await;
    assert!(deltas.lock().unwrap().is_empty());
    // The last-known-good snapshot survives the stop.
    assert!(env.state.cache.contains_week(&key));
}

/// Feed that fails immediately, for the degraded-mode contract.
struct BrokenFeed;

impl BookingFeed for BrokenFeed {
    fn subscribe_active_bookings(
        &self,
        _machine_id: &str,
        _week_id: &str,
        _on_change: SnapshotFn,
        on_error: FeedErrorFn,
    ) -> SubscriptionHandle {
        on_error(EngineError::Store("connection reset".into()));
        SubscriptionHandle::noop()
    }
}

#[tokio::test]
async fn subscription_errors_keep_the_last_known_good_snapshot() {
    let env = TestEnv::new();
    let day = next_week_monday();
    let week = week_id_for(at(day, 10), &chrono_tz::UTC);
    let key = ("m1".to_string(), week.clone());

    seed_booking(&env.store, "m1", "u1", at(day, 10)).await;

    let cache: Arc<BookingCache> = Arc::clone(&env.state.cache);
    let sync = WeekSync::new(
        Arc::new(env.store.clone()),
        Arc::new(BrokenFeed),
        Arc::clone(&cache),
    );

    sync.refresh("m1", &week).await.unwrap();
    sync.watch("m1", &week);

    assert!(sync.last_error().is_some());
    // Degraded, not dead: the earlier snapshot still serves reads.
    assert_eq!(cache.active_bookings(&key).len(), 1);
}
