//! Tests for builder modules

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use qscheduler_core::builders::build_pools;
use qscheduler_core::config::{PoolConfig, SchedulerConfig};
use qscheduler_core::core::{IdleWorker, NullEventSink, SchedulerError, SharedEventSink, TaskUpdate};
use qscheduler_core::infra::{FifoScheduler, InMemoryStateStore};
use qscheduler_core::util::serde::LabelSet;
use tokio_util::sync::CancellationToken;

fn config() -> SchedulerConfig {
    let mut pools = HashMap::new();
    pools.insert(
        "alpha".to_string(),
        PoolConfig {
            batch_window_ms: 5,
            ..PoolConfig::default()
        },
    );
    pools.insert("beta".to_string(), PoolConfig::default());
    SchedulerConfig { pools }
}

#[tokio::test(start_paused = true)]
async fn test_build_pools_from_config() {
    let pools = build_pools(
        &config(),
        |_, _| Ok(FifoScheduler::new()),
        |_, _, state| Ok(Arc::new(InMemoryStateStore::new(state))),
        |_, _| -> Result<SharedEventSink, SchedulerError> { Ok(Arc::new(Mutex::new(NullEventSink))) },
    )
    .unwrap();

    assert_eq!(pools.len(), 2);
    let alpha = &pools["alpha"];
    assert_eq!(alpha.name(), "alpha");

    let token = CancellationToken::new();
    alpha
        .notify(&token, vec![TaskUpdate::new_request("r1", "acct", LabelSet::new(), 1)])
        .await
        .unwrap();
    let out = alpha
        .assign_tasks(&token, vec![IdleWorker::new("w1", LabelSet::new())], 2)
        .await
        .unwrap();
    assert_eq!(out.len(), 1);

    for pool in pools.values() {
        pool.close().await;
    }
}

#[tokio::test]
async fn test_build_pools_propagates_factory_error() {
    let result = build_pools(
        &config(),
        |name, _| {
            if name == "beta" {
                Err(SchedulerError::Backend("no scheduler".into()))
            } else {
                Ok(FifoScheduler::new())
            }
        },
        |_, _, state| Ok(Arc::new(InMemoryStateStore::new(state))),
        |_, _| -> Result<SharedEventSink, SchedulerError> { Ok(Arc::new(Mutex::new(NullEventSink))) },
    );
    assert!(matches!(result, Err(SchedulerError::Backend(_))));
}

#[test]
fn test_build_pools_rejects_empty_config() {
    let cfg = SchedulerConfig {
        pools: HashMap::new(),
    };
    let result = build_pools(
        &cfg,
        |_, _| Ok(FifoScheduler::new()),
        |_, _, state| Ok(Arc::new(InMemoryStateStore::new(state))),
        |_, _| -> Result<SharedEventSink, SchedulerError> { Ok(Arc::new(Mutex::new(NullEventSink))) },
    );
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}
