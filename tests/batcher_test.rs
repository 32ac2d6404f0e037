//! Integration tests for batch collection and execution.
//!
//! Validates:
//! 1. Priority ordering inside a batch, arrival order within a priority
//! 2. Per-operation error isolation
//! 3. Cancellation before admission and while a batch is open
//! 4. Batch-wide failures from the store and the durable event sink
//! 5. Construction window timing

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use qscheduler_core::core::{
    operation, BatchCollector, BatchWindow, CollectorOptions, EventSink, InMemoryEventSink,
    ManualWindow, Operation, SchedulerError, SharedEventSink, TaskEvent, TaskEventKind,
    TimerWindow,
};
use qscheduler_core::infra::InMemoryStateStore;
use qscheduler_core::util::serde::{Priority, RequestId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

type Log = String;

fn append(tag: &'static str) -> Operation<Log> {
    operation(move |_ctx, log: &mut Log, events| {
        log.push_str(tag);
        events.add(TaskEventKind::Enqueued, &RequestId::new(tag), None, 0);
        Ok(())
    })
}

fn failing(reason: &'static str) -> Operation<Log> {
    operation(move |_ctx, _log: &mut Log, _events| Err(SchedulerError::Operation(reason.into())))
}

fn manual_collector(
    store: &Arc<InMemoryStateStore<Log>>,
    window: &Arc<ManualWindow>,
) -> BatchCollector<Log> {
    let window: Arc<dyn BatchWindow> = window.clone();
    BatchCollector::new(Arc::clone(store), CollectorOptions::new("test", window))
}

struct BrokenSink;

impl EventSink for BrokenSink {
    fn record_batch(&mut self, _events: &[TaskEvent]) -> Result<(), SchedulerError> {
        Err(SchedulerError::Backend("disk full".into()))
    }
}

#[tokio::test]
async fn test_notify_class_runs_before_assign_class() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = manual_collector(&store, &window);
    let token = CancellationToken::new();

    let mut handles = Vec::new();
    for i in 0..20 {
        let (tag, priority) = if i % 2 == 0 {
            ("A", Priority::Notify)
        } else {
            ("B", Priority::Assign)
        };
        handles.push(collector.enqueue_operation(&token, append(tag), priority).await);
    }
    window.release();

    for handle in handles {
        assert_eq!(handle.wait().await, Ok(()));
    }
    assert_eq!(store.read(Clone::clone), "AAAAAAAAAABBBBBBBBBB");
    assert_eq!(collector.stats().batches_executed, 1);
    collector.close().await;
}

#[tokio::test]
async fn test_random_interleaving_keeps_class_and_arrival_order() {
    const NOTIFY_TAGS: [&str; 5] = ["a", "b", "c", "d", "e"];
    const ASSIGN_TAGS: [&str; 5] = ["V", "W", "X", "Y", "Z"];

    let mut rng = StdRng::seed_from_u64(42);
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = manual_collector(&store, &window);
    let token = CancellationToken::new();
    let (mut n, mut a) = (0, 0);
    let mut handles = Vec::new();
    while n < NOTIFY_TAGS.len() || a < ASSIGN_TAGS.len() {
        let pick_notify = a == ASSIGN_TAGS.len() || (n < NOTIFY_TAGS.len() && rng.random_bool(0.5));
        let handle = if pick_notify {
            n += 1;
            collector
                .enqueue_operation(&token, append(NOTIFY_TAGS[n - 1]), Priority::Notify)
                .await
        } else {
            a += 1;
            collector
                .enqueue_operation(&token, append(ASSIGN_TAGS[a - 1]), Priority::Assign)
                .await
        };
        handles.push(handle);
    }
    window.release();

    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert_eq!(store.read(Clone::clone), "abcdeVWXYZ");
    collector.close().await;
}

#[tokio::test]
async fn test_failure_is_reported_only_to_its_caller() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = manual_collector(&store, &window);
    let token = CancellationToken::new();

    let bad = collector
        .enqueue_operation(&token, failing("boom"), Priority::Notify)
        .await;
    let good = collector
        .enqueue_operation(&token, append("ok"), Priority::Notify)
        .await;
    window.release();

    assert_eq!(
        bad.wait().await,
        Err(SchedulerError::Operation("boom".into()))
    );
    assert_eq!(good.wait().await, Ok(()));
    assert_eq!(store.read(Clone::clone), "ok");

    let stats = collector.stats();
    assert_eq!(stats.operations_executed, 2);
    assert_eq!(stats.operations_failed, 1);
    assert_eq!(stats.batch_failures, 0);
    collector.close().await;
}

#[tokio::test]
async fn test_cancelled_before_admission_has_no_effect() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = manual_collector(&store, &window);

    let token = CancellationToken::new();
    token.cancel();
    let handle = collector
        .enqueue_operation(&token, append("x"), Priority::Notify)
        .await;

    assert_eq!(handle.wait().await, Err(SchedulerError::Cancelled));
    assert!(store.read(String::is_empty));
    assert_eq!(collector.stats().operations_cancelled, 1);
    assert_eq!(store.commits(), 0);
    collector.close().await;
}

#[tokio::test]
async fn test_cancelled_while_pending_is_dropped() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = manual_collector(&store, &window);

    let cancelled = CancellationToken::new();
    let live = CancellationToken::new();
    let dropped = collector
        .enqueue_operation(&cancelled, append("x"), Priority::Notify)
        .await;
    let kept = collector
        .enqueue_operation(&live, append("y"), Priority::Assign)
        .await;
    cancelled.cancel();
    window.release();

    assert_eq!(dropped.wait().await, Err(SchedulerError::Cancelled));
    assert_eq!(kept.wait().await, Ok(()));
    assert_eq!(store.read(Clone::clone), "y");
    assert_eq!(collector.stats().last_batch_size, 1);
    collector.close().await;
}

#[tokio::test]
async fn test_commit_failure_reaches_every_operation() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = manual_collector(&store, &window);
    let token = CancellationToken::new();
    store.fail_next_commit("store unavailable");

    let h1 = collector
        .enqueue_operation(&token, append("a"), Priority::Notify)
        .await;
    let h2 = collector
        .enqueue_operation(&token, failing("own error"), Priority::Assign)
        .await;
    window.release();

    let expected = Err(SchedulerError::Transaction("store unavailable".into()));
    assert_eq!(h1.wait().await, expected);
    assert_eq!(h2.wait().await, expected);
    assert!(store.read(String::is_empty));

    let stats = collector.stats();
    assert_eq!(stats.batch_failures, 1);
    assert_eq!(stats.operations_failed, 2);
    collector.close().await;
}

#[tokio::test]
async fn test_durable_flush_failure_fails_the_batch() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window: Arc<dyn BatchWindow> = Arc::new(TimerWindow::new(Duration::from_millis(1)));
    let sink: SharedEventSink = Arc::new(Mutex::new(BrokenSink));
    let collector = BatchCollector::new(
        Arc::clone(&store),
        CollectorOptions::new("flush", window).with_durable_sink(sink),
    );
    let token = CancellationToken::new();

    let handle = collector
        .enqueue_operation(&token, append("a"), Priority::Notify)
        .await;
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, SchedulerError::Flush(_)));
    assert!(err.is_batch_wide());
    assert!(store.read(String::is_empty));
    collector.close().await;
}

#[tokio::test]
async fn test_telemetry_failure_does_not_fail_the_batch() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window: Arc<dyn BatchWindow> = Arc::new(TimerWindow::new(Duration::from_millis(1)));
    let durable = Arc::new(Mutex::new(InMemoryEventSink::new(16)));
    let durable_sink: SharedEventSink = durable.clone();
    let telemetry: SharedEventSink = Arc::new(Mutex::new(BrokenSink));
    let collector = BatchCollector::new(
        Arc::clone(&store),
        CollectorOptions::new("telemetry", window)
            .with_durable_sink(durable_sink)
            .with_telemetry_sink(telemetry),
    );
    let token = CancellationToken::new();

    let handle = collector
        .enqueue_operation(&token, append("a"), Priority::Notify)
        .await;

    assert_eq!(handle.wait().await, Ok(()));
    assert_eq!(store.read(Clone::clone), "a");
    let events = durable.lock().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pool, "telemetry");
    collector.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_timer_window_collects_late_arrivals() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window: Arc<dyn BatchWindow> = Arc::new(TimerWindow::new(Duration::from_millis(300)));
    let collector = BatchCollector::new(Arc::clone(&store), CollectorOptions::new("timer", window));
    let token = CancellationToken::new();

    let mut first = collector
        .enqueue_operation(&token, append("1"), Priority::Assign)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(first.try_result().is_none());
    assert_eq!(store.commits(), 0);

    let second = collector
        .enqueue_operation(&token, append("2"), Priority::Notify)
        .await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(first.wait().await, Ok(()));
    assert_eq!(second.wait().await, Ok(()));
    assert_eq!(store.read(Clone::clone), "21");
    assert_eq!(store.commits(), 1);
    assert_eq!(collector.stats().last_batch_size, 2);
    collector.close().await;
}

#[tokio::test]
async fn test_concurrent_submitters_share_a_batch() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = manual_collector(&store, &window);
    let token = CancellationToken::new();

    let handles = join_all((0..16).map(|_| {
        collector.enqueue_operation(&token, append("x"), Priority::Notify)
    }))
    .await;
    window.release();
    let results = join_all(handles.into_iter().map(|h| h.wait())).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(store.read(String::len), 16);
    assert_eq!(collector.stats().batches_executed, 1);

    let late = collector
        .enqueue_operation(&token, append("y"), Priority::Notify)
        .await;
    window.release();
    late.wait().await.unwrap();
    assert_eq!(collector.stats().batches_executed, 2);
    collector.close().await;
}

#[tokio::test]
async fn test_close_waits_for_queued_operations() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window: Arc<dyn BatchWindow> = Arc::new(TimerWindow::new(Duration::from_millis(10)));
    let collector = BatchCollector::new(Arc::clone(&store), CollectorOptions::new("close", window));
    let token = CancellationToken::new();

    let handle = collector
        .enqueue_operation(&token, append("z"), Priority::Assign)
        .await;
    collector.close().await;

    assert_eq!(store.commits(), 1);
    assert_eq!(handle.wait().await, Ok(()));

    let after = collector
        .enqueue_operation(&token, append("late"), Priority::Assign)
        .await;
    assert_eq!(after.wait().await, Err(SchedulerError::Closed));
}

#[tokio::test]
async fn test_cancel_after_collection_still_runs() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = manual_collector(&store, &window);
    let token = CancellationToken::new();

    let handle = collector
        .enqueue_operation(&token, append("a"), Priority::Assign)
        .await;
    // Let the loop take the operation as batch master and open the window.
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    token.cancel();
    window.release();

    assert_eq!(handle.wait().await, Ok(()));
    assert_eq!(store.read(Clone::clone), "a");
    assert_eq!(store.commits(), 1);
    assert_eq!(collector.stats().operations_cancelled, 0);
    collector.close().await;
}

#[tokio::test]
async fn test_window_closes_under_sustained_load() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window = Arc::new(ManualWindow::new());
    let collector = Arc::new(manual_collector(&store, &window));
    let token = CancellationToken::new();
    let stop = CancellationToken::new();

    let first = collector
        .enqueue_operation(&token, append("m"), Priority::Assign)
        .await;
    let producer = {
        let collector = Arc::clone(&collector);
        let token = token.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.is_cancelled() {
                let _ = collector
                    .enqueue_operation(&token, append("p"), Priority::Notify)
                    .await;
                tokio::task::yield_now().await;
            }
        })
    };
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    window.release();

    let outcome = tokio::time::timeout(Duration::from_secs(5), first.wait()).await;
    stop.cancel();
    producer.await.unwrap();

    assert_eq!(outcome, Ok(Ok(())));
    assert!(store.read(|log| log.contains('m')));
    assert!(collector.stats().batches_executed >= 1);
    collector.close().await;
}

#[tokio::test]
async fn test_concurrent_close_waits_for_loop_exit() {
    let store = Arc::new(InMemoryStateStore::new(Log::new()));
    let window: Arc<dyn BatchWindow> = Arc::new(TimerWindow::new(Duration::from_millis(10)));
    let collector = BatchCollector::new(Arc::clone(&store), CollectorOptions::new("close", window));
    let token = CancellationToken::new();

    let handle = collector
        .enqueue_operation(&token, append("q"), Priority::Assign)
        .await;
    let ((), commits_seen_by_second) = tokio::join!(collector.close(), async {
        collector.close().await;
        store.commits()
    });

    assert_eq!(commits_seen_by_second, 1);
    assert_eq!(handle.wait().await, Ok(()));
}
