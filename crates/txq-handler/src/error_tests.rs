//! Tests for handler error types.

use super::*;
use std::error::Error;

/// Verify the message callers match on when starting twice.
#[test]
fn test_not_stopped_message() {
    assert_eq!(HandlerError::NotStopped.to_string(), "Handler not stopped");
}

/// Verify that a fatal loop failure keeps the queue error as its source.
#[test]
fn test_process_error_source() {
    let error = HandlerError::QueueHandlerProcess {
        queue_name: "orders".to_string(),
        source: QueueError::QueueMissing {
            queue_name: "orders".to_string(),
        },
    };

    assert!(error.to_string().contains("orders"));
    assert_eq!(
        error.source().map(|s| s.to_string()),
        Some("Queue missing: orders".to_string())
    );
}

/// Verify that queue errors convert transparently.
#[test]
fn test_queue_error_is_transparent() {
    let error: HandlerError = QueueError::QueueMissing {
        queue_name: "orders".to_string(),
    }
    .into();

    assert_eq!(error.to_string(), "Queue missing: orders");
}
