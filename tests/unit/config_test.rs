//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use qscheduler_core::config::{PoolConfig, SchedulerConfig, DEFAULT_BATCH_WINDOW_MS};

#[test]
fn test_pool_config_defaults() {
    let cfg = PoolConfig::default();
    assert_eq!(cfg.batch_window_ms, DEFAULT_BATCH_WINDOW_MS);
    assert_eq!(cfg.batch_window(), Duration::from_millis(300));
    assert_eq!(cfg.max_pending_operations, 1024);
    assert!(cfg.sort_updates_by_time);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_window() {
    let invalid = PoolConfig {
        batch_window_ms: 0,
        ..PoolConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_pending_limit() {
    let invalid = PoolConfig {
        max_pending_operations: 0,
        ..PoolConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_requires_pools() {
    let cfg = SchedulerConfig {
        pools: HashMap::new(),
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_scheduler_config_from_json_fills_defaults() {
    let json = r#"{ "pools": { "default": { "batch_window_ms": 50 } } }"#;
    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    let pool = &cfg.pools["default"];
    assert_eq!(pool.batch_window_ms, 50);
    assert_eq!(pool.event_buffer_limit, 10_000);
    assert!(pool.sort_updates_by_time);
}

#[test]
fn test_scheduler_config_rejects_invalid_pool() {
    let json = r#"{ "pools": { "broken": { "event_buffer_limit": 0 } } }"#;
    let err = SchedulerConfig::from_json_str(json).unwrap_err();
    assert!(err.to_string().contains("broken"));
}

#[test]
fn test_scheduler_config_from_missing_file() {
    let err = SchedulerConfig::from_json_file("/nonexistent/qscheduler.json").unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/qscheduler.json"));
}

#[test]
fn test_pool_config_from_env() {
    std::env::set_var("QSCHEDULER_BATCH_WINDOW_MS", "75");
    std::env::set_var("QSCHEDULER_SORT_UPDATES_BY_TIME", "false");
    let cfg = PoolConfig::from_env().unwrap();
    assert_eq!(cfg.batch_window_ms, 75);
    assert!(!cfg.sort_updates_by_time);
    assert_eq!(cfg.max_pending_operations, 1024);

    std::env::set_var("QSCHEDULER_BATCH_WINDOW_MS", "soon");
    let err = PoolConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("QSCHEDULER_BATCH_WINDOW_MS"));

    std::env::remove_var("QSCHEDULER_BATCH_WINDOW_MS");
    std::env::remove_var("QSCHEDULER_SORT_UPDATES_BY_TIME");
}
