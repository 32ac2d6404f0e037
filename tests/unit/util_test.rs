//! Tests for utility functions

use qscheduler_core::util::{init_tracing, labels, now_ms, AccountId, Priority, RequestId, WorkerId};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Notify < Priority::Assign);
    assert_eq!(Priority::ALL, [Priority::Notify, Priority::Assign]);
}

#[test]
fn test_labels_are_deduplicated_and_sorted() {
    let set = labels(["gpu", "linux", "gpu"]);
    let items: Vec<&str> = set.iter().map(String::as_str).collect();
    assert_eq!(items, vec!["gpu", "linux"]);
}

#[test]
fn test_id_conversions() {
    let worker: WorkerId = "bot-7".into();
    let request = RequestId::from(String::from("req-1"));
    assert_eq!(worker.as_str(), "bot-7");
    assert_eq!(request.to_string(), "req-1");
    assert!(AccountId::default().is_empty());
}

#[test]
fn test_clock_is_after_epoch() {
    assert!(now_ms() > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!(component = "util_test", "tracing initialised");
}
