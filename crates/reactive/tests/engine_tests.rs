//! End-to-end tests of the engine against the in-process store.

use livesql_core::{doc, Document, Error, Filter, OrderBy, QueryDefinition, TableName, Value};
use livesql_memory::MemoryDatabase;
use livesql_reactive::{
    Action, Engine, EngineConfig, LoadingInfo, LoadingKind, ReactivityMode, Subscription,
    SubscriptionEvent, SubscriptionState, WriteOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> EngineConfig {
    EngineConfig {
        drain_interval_ms: 5,
        write_gate_timeout_ms: Some(5_000),
        ..EngineConfig::default()
    }
}

fn setup() -> (MemoryDatabase, Engine) {
    setup_with(test_config())
}

fn setup_with(config: EngineConfig) -> (MemoryDatabase, Engine) {
    init_tracing();
    let db = MemoryDatabase::new();
    db.create_table("people", "_id").unwrap();
    let engine = Engine::start(config, Arc::new(db.clone()), db.listen()).unwrap();
    (db, engine)
}

/// A drainer that only runs through `Engine::drain_now`.
fn manual_drain_config() -> EngineConfig {
    EngineConfig {
        drain_interval_ms: 3_600_000,
        ..test_config()
    }
}

fn person(id: usize, first_name: &str) -> Document {
    doc! { "_id" => format!("p{:03}", id), "first_name" => first_name }
}

fn drain(events: &mut UnboundedReceiver<SubscriptionEvent>) -> Vec<SubscriptionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn count(events: &[SubscriptionEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

fn last_info(events: &[SubscriptionEvent]) -> LoadingInfo {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            SubscriptionEvent::Info(info) => Some(info.clone()),
            _ => None,
        })
        .expect("no info event")
}

async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_incremental_loading_people() {
    let (db, engine) = setup();
    let seventy_five: Vec<Document> = (0..75).map(|i| person(i, &format!("A{:03}", i))).collect();
    db.seed("people", seventy_five).unwrap();
    db.seed("people", vec![person(500, "Bob")]).unwrap();

    let people = engine.table("people").await.unwrap();
    let subscription = people
        .find(Filter::like("first_name", "A%"))
        .order_by(OrderBy::asc("first_name"))
        .loading(LoadingKind::Incremental)
        .page_size(10)
        .writer("w1")
        .subscribe()
        .unwrap();
    let mut events = subscription.events();

    subscription.run().await.unwrap();
    let first = drain(&mut events);
    assert_eq!(count(&first, "added"), 10);
    assert_eq!(count(&first, "ready"), 1);
    assert_eq!(last_info(&first).total_row_count, Some(75));
    assert_eq!(subscription.state(), SubscriptionState::Ready);

    assert!(subscription.load_next().await.unwrap());
    let next = drain(&mut events);
    assert_eq!(count(&next, "added"), 10);
    assert_eq!(count(&next, "removed"), 0);
    assert_eq!(last_info(&next).current_limit, Some(20));

    let outcome = people
        .insert_one(person(600, "A999"), &WriteOptions::writer("w1"))
        .await
        .unwrap();
    assert!(outcome.observed);
    let after_insert = drain(&mut events);
    assert_eq!(count(&after_insert, "added"), 0);
    assert_eq!(last_info(&after_insert).total_row_count, Some(76));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_paging_windows() {
    let (db, engine) = setup();
    db.seed("people", (0..25).map(|i| person(i, &format!("A{:03}", i))).collect())
        .unwrap();
    let people = engine.table("people").await.unwrap();
    let subscription = people
        .find(Filter::All)
        .order_by(OrderBy::asc("first_name"))
        .loading(LoadingKind::Paging)
        .page_size(10)
        .writer("w1")
        .subscribe()
        .unwrap();
    let mut events = subscription.events();

    subscription.run().await.unwrap();
    let first = drain(&mut events);
    assert_eq!(count(&first, "added"), 10);
    let info = last_info(&first);
    assert_eq!(info.total_page_count, Some(3));
    assert_eq!(info.current_page, Some(1));

    assert!(subscription.goto_page(3).await.unwrap());
    let third = drain(&mut events);
    assert_eq!(count(&third, "removed"), 10);
    assert_eq!(count(&third, "added"), 5);
    assert_eq!(last_info(&third).current_offset, Some(20));

    assert!(!subscription.goto_page(4).await.unwrap());
    assert!(drain(&mut events).is_empty());

    assert!(subscription.goto_page(1).await.unwrap());
    drain(&mut events);

    // lands past page 1; only the counters move
    people
        .insert_one(person(100, "Z"), &WriteOptions::writer("w1"))
        .await
        .unwrap();
    let after_insert = drain(&mut events);
    assert_eq!(count(&after_insert, "added"), 0);
    assert_eq!(count(&after_insert, "removed"), 0);
    let info = last_info(&after_insert);
    assert_eq!(info.total_row_count, Some(26));
    assert_eq!(info.total_page_count, Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_own_mode_ignores_foreign_writes() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let subscription = people
        .find(Filter::All)
        .writer("alice")
        .reactivity(ReactivityMode::Own)
        .subscribe()
        .unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    people
        .insert_one(person(1, "Ann"), &WriteOptions::writer("bob"))
        .await
        .unwrap();
    eventually("staled", || subscription.state() == SubscriptionState::Staled).await;
    let seen = drain(&mut events);
    assert!(seen.iter().all(|e| !e.is_row_event()));

    // an explicit rerun picks the change up
    subscription.rerun().await.unwrap();
    assert_eq!(count(&drain(&mut events), "added"), 1);
    assert_eq!(subscription.state(), SubscriptionState::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_own_write_is_visible_when_write_returns() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).writer("w1").subscribe().unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    let outcome = people
        .insert(
            vec![person(1, "Ann"), person(2, "Al")],
            &WriteOptions::writer("w1"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.row_count, 2);
    assert!(outcome.observed);
    assert_eq!(count(&drain(&mut events), "added"), 2);
    assert_eq!(engine.pending_writes(), 0);

    let outcome = people
        .update(
            Filter::eq("_id", "p001"),
            doc! { "first_name" => "Anna" },
            &WriteOptions::writer("w1"),
        )
        .await
        .unwrap();
    assert!(outcome.observed);
    let changed = drain(&mut events);
    assert!(changed.iter().any(|e| matches!(
        e,
        SubscriptionEvent::Changed { id, row } if id == "p001" && row["first_name"] == Value::from("Anna")
    )));

    people
        .remove(Filter::eq("_id", "p002"), &WriteOptions::writer("w1"))
        .await
        .unwrap();
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SubscriptionEvent::Removed { id } if id == "p002")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_write_changing_nothing_does_not_wait() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let outcome = people
        .remove(Filter::eq("_id", "missing"), &WriteOptions::writer("w1"))
        .await
        .unwrap();
    assert_eq!(outcome.row_count, 0);
    assert!(outcome.observed);

    let outcome = people
        .insert_one(person(1, "Ann"), &WriteOptions::default().no_wait())
        .await
        .unwrap();
    assert!(!outcome.observed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rerun_without_changes_emits_no_rows() {
    let (db, engine) = setup();
    db.seed("people", vec![person(1, "Ann")]).unwrap();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).subscribe().unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    subscription.rerun().await.unwrap();
    let rerun = drain(&mut events);
    assert!(rerun.iter().all(|e| !e.is_row_event()));
    assert_eq!(count(&rerun, "ready"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reruns_coalesce() {
    let (db, engine) = setup();
    db.seed("people", vec![person(1, "Ann")]).unwrap();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).subscribe().unwrap();
    subscription.run().await.unwrap();

    db.set_diff_latency(Some(Duration::from_millis(50)));
    let (first, second) = tokio::join!(subscription.rerun(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        subscription.rerun().await
    });
    first.unwrap();
    second.unwrap();
    assert_eq!(db.max_concurrent_diffs(), 1);

    // the coalesced rerun runs from the stale queue
    eventually("drained", || {
        subscription.state() == SubscriptionState::Ready && engine.stale_queue().is_empty()
    })
    .await;
    db.set_diff_latency(None);
    assert_eq!(db.max_concurrent_diffs(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_waits_for_running_rerun() {
    let (db, engine) = setup();
    db.seed("people", vec![person(1, "Ann")]).unwrap();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).subscribe().unwrap();
    subscription.run().await.unwrap();
    let query_id = subscription.id().clone();
    assert_eq!(db.snapshot_len(&query_id), 1);
    let mut events = subscription.events();

    db.set_diff_latency(Some(Duration::from_millis(50)));
    let rerun = {
        let subscription = subscription.clone();
        tokio::spawn(async move { subscription.rerun().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(subscription.is_running());
    subscription.destroy().await.unwrap();

    rerun.await.unwrap().unwrap();
    let seen = drain(&mut events);
    let ready_at = seen.iter().position(|e| *e == SubscriptionEvent::Ready);
    let destroyed_at = seen
        .iter()
        .position(|e| *e == SubscriptionEvent::State(SubscriptionState::Destroyed));
    assert!(ready_at.is_some() && ready_at < destroyed_at);

    assert_eq!(subscription.state(), SubscriptionState::Destroyed);
    assert!(!engine.registry().contains(&query_id));
    assert!(engine.subscription(&query_id).is_none());
    assert_eq!(db.snapshot_len(&query_id), 0);
    // destroy is idempotent
    subscription.destroy().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_rerun_keeps_state() {
    let (db, engine) = setup();
    db.seed("people", vec![person(1, "Ann")]).unwrap();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).subscribe().unwrap();
    subscription.run().await.unwrap();

    db.fail_next_diffs(1);
    let err = subscription.rerun().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(subscription.state(), SubscriptionState::Ready);
    subscription.rerun().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_first_run_can_be_retried() {
    let (db, engine) = setup();
    db.seed("people", vec![person(1, "Ann")]).unwrap();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).subscribe().unwrap();
    let mut events = subscription.events();

    db.fail_next_diffs(1);
    assert!(subscription.run().await.is_err());
    assert_eq!(subscription.state(), SubscriptionState::Created);
    drain(&mut events);

    subscription.run().await.unwrap();
    assert_eq!(count(&drain(&mut events), "added"), 1);
    assert!(matches!(
        subscription.run().await,
        Err(Error::InvalidState { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_loading_mode_rejects_explicit_window() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let err = people
        .find(Filter::All)
        .limit(5)
        .loading(LoadingKind::Incremental)
        .subscribe()
        .unwrap_err();
    assert!(matches!(err, Error::Definition { .. }));
    assert_eq!(engine.subscription_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fields_and_salt() {
    let (db, engine) = setup();
    db.seed("people", vec![doc! { "_id" => "p1", "first_name" => "Ann", "age" => 30 }])
        .unwrap();
    let people = engine.table("people").await.unwrap();
    let subscription = people
        .find_by_id("p1")
        .fields(doc! { "first_name" => true })
        .salt("_from_people")
        .subscribe()
        .unwrap();
    let mut events = subscription.events();
    subscription.run().await.unwrap();

    let added: Vec<Document> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SubscriptionEvent::Added { row, .. } => Some(row),
            _ => None,
        })
        .collect();
    assert_eq!(
        added,
        vec![doc! { "_id" => "p1", "first_name" => "Ann", "_from_people" => true }]
    );

    let err = people
        .find(Filter::All)
        .fields(doc! { "first_name" => true, "age" => false })
        .subscribe()
        .unwrap_err();
    assert!(matches!(err, Error::Definition { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manual_mode_and_stop() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let subscription = people
        .find(Filter::All)
        .writer("w1")
        .reactivity(ReactivityMode::Manually)
        .subscribe()
        .unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    people
        .insert_one(person(1, "Ann"), &WriteOptions::writer("w1"))
        .await
        .unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Staled);
    assert!(drain(&mut events).iter().all(|e| !e.is_row_event()));

    subscription.rerun().await.unwrap();
    assert_eq!(count(&drain(&mut events), "added"), 1);

    subscription.stop();
    assert_eq!(subscription.state(), SubscriptionState::Stopped);
    assert_eq!(
        drain(&mut events).first(),
        Some(&SubscriptionEvent::State(SubscriptionState::Stopped))
    );
    people
        .insert_one(person(2, "Al"), &WriteOptions::writer("w1"))
        .await
        .unwrap();
    subscription.rerun().await.unwrap();
    assert!(drain(&mut events).is_empty());
    assert!(matches!(subscription.load_next().await, Err(Error::InvalidState { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_view_subscription_follows_base_table() {
    let (db, engine) = setup();
    db.create_view("a_people", "people", Filter::starts_with("first_name", "A"))
        .unwrap();
    let view = engine.view("a_people").await.unwrap();
    assert_eq!(view.dependencies(), &[TableName::new("public", "people")]);
    assert!(db.has_trigger("people"));

    let subscription = view.find(Filter::All).writer("w1").subscribe().unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    let people = engine.table("people").await.unwrap();
    people
        .insert(vec![person(1, "Ann"), person(2, "Bob")], &WriteOptions::writer("w1"))
        .await
        .unwrap();
    let seen = drain(&mut events);
    assert_eq!(count(&seen, "added"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transaction_writes_surface_after_commit() {
    let (db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).writer("w1").subscribe().unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    let mut tx = engine.begin_transaction(Some("w1".into()), None).await.unwrap();
    assert_eq!(tx.insert(&people, vec![person(1, "Ann")]).await.unwrap(), 1);
    let inside = tx
        .select(&QueryDefinition::new(people.name().clone()))
        .await
        .unwrap();
    assert_eq!(inside.len(), 1);
    tx.commit().await.unwrap();

    // no gate for transactions; the rerun arrives on its own
    eventually("rerun after commit", || db.snapshot_len(subscription.id()) == 1).await;
    eventually("ready", || subscription.state() == SubscriptionState::Ready).await;
    assert_eq!(count(&drain(&mut events), "added"), 1);

    let mut tx = engine.begin_transaction(None, None).await.unwrap();
    tx.remove(&people, Filter::All).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(db.rows("people").unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_shot_select() {
    let (db, engine) = setup();
    db.seed("people", vec![person(1, "Ann"), person(2, "Bob")]).unwrap();
    let people = engine.table("people").await.unwrap();
    let rows = people.select(Filter::eq("first_name", "Bob")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["_id"], Value::from("p002"));
    assert_eq!(engine.subscription_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_rejects_writes() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    engine.shutdown().await;
    assert!(engine.is_shut_down());
    let err = people
        .insert_one(person(1, "Ann"), &WriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Shutdown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listeners_can_be_removed() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let subscription: Subscription = people.find(Filter::All).subscribe().unwrap();
    let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let listener = {
        let seen = seen.clone();
        subscription.on(move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
    };
    subscription.run().await.unwrap();
    let after_run = seen.load(std::sync::atomic::Ordering::SeqCst);
    assert!(after_run > 0);

    assert!(subscription.off(listener));
    subscription.rerun().await.unwrap();
    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), after_run);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_event_receivers_are_detached() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).subscribe().unwrap();
    for _ in 0..1000 {
        drop(subscription.events());
    }
    assert!(subscription.listener_count() <= 1);

    subscription.run().await.unwrap();
    subscription.rerun().await.unwrap();
    assert_eq!(subscription.listener_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timed_out_rerun_still_delivers() {
    let (db, engine) = setup_with(EngineConfig {
        rerun_timeout_ms: Some(20),
        ..test_config()
    });
    let people = engine.table("people").await.unwrap();
    let subscription = people
        .find(Filter::All)
        .reactivity(ReactivityMode::Manually)
        .subscribe()
        .unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    people
        .insert_one(person(1, "Ann"), &WriteOptions::default())
        .await
        .unwrap();
    // foreign reactions run after the write returns
    eventually("staled", || subscription.state() == SubscriptionState::Staled).await;
    db.set_diff_latency(Some(Duration::from_millis(100)));
    let err = subscription.rerun().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    eventually("background run", || {
        subscription.state() == SubscriptionState::Ready && !subscription.is_running()
    })
    .await;
    assert_eq!(count(&drain(&mut events), "added"), 1);

    // a caller that gives up does not cancel the run either
    people
        .insert_one(person(2, "Al"), &WriteOptions::default())
        .await
        .unwrap();
    eventually("staled", || subscription.state() == SubscriptionState::Staled).await;
    let abandoned = tokio::time::timeout(Duration::from_millis(5), subscription.rerun()).await;
    assert!(abandoned.is_err());
    eventually("abandoned run", || {
        subscription.state() == SubscriptionState::Ready && !subscription.is_running()
    })
    .await;
    assert_eq!(count(&drain(&mut events), "added"), 1);
    assert_eq!(db.snapshot_len(subscription.id()), 2);

    db.set_diff_latency(None);
    subscription.rerun().await.unwrap();
    assert!(drain(&mut events).iter().all(|e| !e.is_row_event()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_foreign_write_reruns_always_subscription() {
    let (db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).writer("w1").subscribe().unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    people
        .insert_one(person(1, "Ann"), &WriteOptions::writer("w2"))
        .await
        .unwrap();
    eventually("foreign rerun", || {
        db.snapshot_len(subscription.id()) == 1 && subscription.state() == SubscriptionState::Ready
    })
    .await;
    let seen = drain(&mut events);
    assert_eq!(count(&seen, "added"), 1);
    assert!(engine.stale_queue().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_custom_reactivity_decides_per_write() {
    let (db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let reactivity = {
        let calls = calls.clone();
        ReactivityMode::custom(move |ctx| {
            calls.lock().push(ctx.own_write);
            if ctx.own_write {
                Action::Enqueue
            } else {
                Action::Nothing
            }
        })
    };
    let subscription = people
        .find(Filter::All)
        .writer("w1")
        .reactivity(reactivity)
        .subscribe()
        .unwrap();
    subscription.run().await.unwrap();

    people
        .insert_one(person(1, "Ann"), &WriteOptions::writer("w2"))
        .await
        .unwrap();
    eventually("foreign callback", || calls.lock().len() == 1).await;
    assert_eq!(subscription.state(), SubscriptionState::Ready);
    assert_eq!(db.snapshot_len(subscription.id()), 0);

    people
        .insert_one(person(2, "Al"), &WriteOptions::writer("w1"))
        .await
        .unwrap();
    // queued by the callback, rerun by the drainer
    eventually("drained", || {
        db.snapshot_len(subscription.id()) == 2 && subscription.state() == SubscriptionState::Ready
    })
    .await;
    assert_eq!(*calls.lock(), vec![false, true]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_own_reactions_finish_before_foreign_ones() {
    let (db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let own = people.find(Filter::All).writer("w1").subscribe().unwrap();
    own.run().await.unwrap();

    let seen_by_foreign = Arc::new(Mutex::new(None));
    let reactivity = {
        let seen_by_foreign = seen_by_foreign.clone();
        let own = own.clone();
        let db = db.clone();
        ReactivityMode::custom(move |_| {
            let caught_up =
                own.state() == SubscriptionState::Ready && db.snapshot_len(own.id()) == 1;
            *seen_by_foreign.lock() = Some(caught_up);
            Action::Nothing
        })
    };
    let foreign = people
        .find(Filter::All)
        .writer("w2")
        .reactivity(reactivity)
        .subscribe()
        .unwrap();
    foreign.run().await.unwrap();

    db.set_diff_latency(Some(Duration::from_millis(30)));
    let outcome = people
        .insert_one(person(1, "Ann"), &WriteOptions::writer("w1"))
        .await
        .unwrap();
    assert!(outcome.observed);
    assert_eq!(engine.pending_writes(), 0);
    eventually("foreign reaction", || seen_by_foreign.lock().is_some()).await;
    assert_eq!(*seen_by_foreign.lock(), Some(true));
    db.set_diff_latency(None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drain_now_respects_batch_size() {
    let (db, engine) = setup_with(EngineConfig {
        drain_batch_size: 2,
        ..manual_drain_config()
    });
    let people = engine.table("people").await.unwrap();
    let mut subscriptions = Vec::new();
    for _ in 0..5 {
        let subscription = people
            .find(Filter::All)
            .reactivity(ReactivityMode::custom(|_| Action::Enqueue))
            .subscribe()
            .unwrap();
        subscription.run().await.unwrap();
        subscriptions.push(subscription);
    }

    people
        .insert_one(person(1, "Ann"), &WriteOptions::default())
        .await
        .unwrap();
    eventually("all queued", || engine.stale_queue().len() == 5).await;
    assert!(subscriptions
        .iter()
        .all(|s| s.state() == SubscriptionState::Staled));

    assert_eq!(engine.drain_now().await, 2);
    assert_eq!(engine.stale_queue().len(), 3);
    let caught_up = subscriptions
        .iter()
        .filter(|s| db.snapshot_len(s.id()) == 1)
        .count();
    assert_eq!(caught_up, 2);

    assert_eq!(engine.drain_now().await, 2);
    assert_eq!(engine.drain_now().await, 1);
    assert_eq!(engine.drain_now().await, 0);
    assert!(subscriptions
        .iter()
        .all(|s| s.state() == SubscriptionState::Ready && db.snapshot_len(s.id()) == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_explicit_rerun_leaves_stale_queue() {
    let (db, engine) = setup_with(manual_drain_config());
    let people = engine.table("people").await.unwrap();
    let subscription = people
        .find(Filter::All)
        .reactivity(ReactivityMode::custom(|_| Action::Enqueue))
        .subscribe()
        .unwrap();
    subscription.run().await.unwrap();

    people
        .insert_one(person(1, "Ann"), &WriteOptions::default())
        .await
        .unwrap();
    eventually("queued", || engine.stale_queue().contains(subscription.id())).await;

    subscription.rerun().await.unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Ready);
    assert_eq!(db.snapshot_len(subscription.id()), 1);
    assert!(engine.stale_queue().is_empty());
    assert_eq!(engine.drain_now().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upsert_inserts_then_updates() {
    let (_db, engine) = setup();
    let people = engine.table("people").await.unwrap();
    let subscription = people.find(Filter::All).writer("w1").subscribe().unwrap();
    subscription.run().await.unwrap();
    let mut events = subscription.events();

    let outcome = people
        .upsert(
            "_id",
            vec![doc! { "_id" => "u1", "first_name" => "Mike", "last_name" => "Upsert" }],
            &WriteOptions::writer("w1"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.row_count, 1);
    assert!(outcome.observed);
    let inserted = drain(&mut events);
    assert_eq!(count(&inserted, "added"), 1);
    assert_eq!(count(&inserted, "changed"), 0);

    let outcome = people
        .upsert(
            "_id",
            vec![doc! { "_id" => "u1", "first_name" => "Mike", "last_name" => "Upsert-Test" }],
            &WriteOptions::writer("w1"),
        )
        .await
        .unwrap();
    assert!(outcome.observed);
    let updated = drain(&mut events);
    assert_eq!(count(&updated, "added"), 0);
    assert_eq!(count(&updated, "changed"), 1);

    let rows = people.select(Filter::by_id("_id", "u1")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["last_name"], Value::from("Upsert-Test"));
}
