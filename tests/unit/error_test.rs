//! Tests for error types

use qscheduler_core::core::SchedulerError;

#[test]
fn test_cancelled_error() {
    let err = SchedulerError::Cancelled;
    assert_eq!(format!("{err}"), "operation cancelled before admission");
    assert!(!err.is_batch_wide());
}

#[test]
fn test_transaction_error_is_batch_wide() {
    let err = SchedulerError::Transaction("conflict".to_string());
    assert_eq!(format!("{err}"), "transaction failed: conflict");
    assert!(err.is_batch_wide());
}

#[test]
fn test_flush_error_is_batch_wide() {
    let err = SchedulerError::Flush("sink offline".to_string());
    assert!(err.is_batch_wide());
    assert_eq!(format!("{err}"), "event flush failed: sink offline");
}

#[test]
fn test_update_order_error() {
    let err = SchedulerError::UpdateOrder {
        previous: 20,
        next: 10,
    };
    assert_eq!(
        format!("{err}"),
        "update time 10 is older than scheduler time 20"
    );
}

#[test]
fn test_errors_convert_into_anyhow() {
    let app: qscheduler_core::core::AppResult<()> =
        Err(SchedulerError::Backend("connection failed".to_string()).into());
    let msg = format!("{}", app.unwrap_err());
    assert_eq!(msg, "backend error: connection failed");
}
