//! Integration tests for sending and receiving through queues
//!
//! These tests drive the public queue API end to end against the in-memory
//! transport: chunking of large messages, transactional acknowledgement,
//! typed receive and cancellation.

mod common;

use common::{document, order, Document, OrderPlaced, TestEnvironment};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use txq_runtime::{AccessMode, QueueError, QueueSettings, ReceiveOutcome};

const WAIT: Duration = Duration::from_millis(200);

/// Verify that a message larger than one chunk is split and reassembled
///
/// A 5,000,000 byte body with the default 4,096,000 byte chunk size needs
/// exactly two chunks, and the receiver sees the original document.
#[tokio::test]
async fn test_large_message_is_chunked_and_reassembled() {
    // Arrange
    let env = TestEnvironment::new();
    let queue = env
        .queue("documents", true, AccessMode::SendAndReceive)
        .await;
    let original = document(5_000_000);

    // Act
    tokio_test::assert_ok!(queue.send(&original).await);
    let received = queue
        .receive_typed::<Document>(WAIT, &CancellationToken::new())
        .await
        .expect("Receive failed");

    // Assert
    let stats = env.transport.stats();
    assert_eq!(stats.chunks_sent, 2, "Expected two chunks on the wire");
    assert_eq!(stats.chunks_received, 2);
    assert_eq!(received, Some(original));
    assert_eq!(env.queue_len("documents"), Some(0));
}

/// Verify that many small chunks reassemble in order
#[tokio::test]
async fn test_small_chunk_size_preserves_order() {
    // Arrange
    let env = TestEnvironment::with_queue_settings(QueueSettings {
        max_chunk_size: 64,
        ..QueueSettings::default()
    });
    let queue = env
        .queue("documents", true, AccessMode::SendAndReceive)
        .await;

    // Act
    let first = document(1_000);
    let second = Document {
        content: "y".repeat(300),
    };
    tokio_test::assert_ok!(queue.send(&first).await);
    tokio_test::assert_ok!(queue.send(&second).await);

    let token = CancellationToken::new();
    let received_first = queue.receive_typed::<Document>(WAIT, &token).await.unwrap();
    let received_second = queue.receive_typed::<Document>(WAIT, &token).await.unwrap();

    // Assert
    assert_eq!(received_first, Some(first));
    assert_eq!(received_second, Some(second));
    assert!(env.transport.stats().chunks_sent > 20);
}

/// Verify that a non-transactional queue rejects multi-chunk messages
///
/// The size check happens before anything reaches the transport.
#[tokio::test]
async fn test_non_transactional_queue_rejects_large_message() {
    // Arrange
    let env = TestEnvironment::new();
    let queue = env
        .queue("documents", false, AccessMode::SendAndReceive)
        .await;

    // Act
    let result = queue.send(&document(5_000_000)).await;

    // Assert
    assert!(matches!(result, Err(QueueError::MessageSize { .. })));
    assert_eq!(env.transport.stats().chunks_sent, 0);
    assert_eq!(env.queue_len("documents"), Some(0));
}

/// Verify that a returned message is delivered again and an acknowledged one is gone
#[tokio::test]
async fn test_nack_redelivers_and_ack_consumes() {
    // Arrange
    let env = TestEnvironment::new();
    let queue = env
        .queue("orders", true, AccessMode::SendAndReceive)
        .await;
    queue.send(&order(7)).await.unwrap();
    let token = CancellationToken::new();

    // Act: receive, return, receive again
    let mut first = queue.receive(WAIT, &token).await.unwrap();
    assert_eq!(queue.count().await.unwrap(), Some(0));
    first.nack().unwrap();
    assert_eq!(queue.count().await.unwrap(), Some(1));

    let mut second = queue.receive(WAIT, &token).await.unwrap();
    second.ack().unwrap();

    // Assert
    assert_eq!(second.message::<OrderPlaced>().unwrap(), Some(order(7)));
    assert_eq!(queue.count().await.unwrap(), Some(0));
    assert_eq!(env.transport.pending_transactions(), 0);
}

/// Verify that a message of another type is returned to the queue
#[tokio::test]
async fn test_typed_receive_rejects_other_types() {
    // Arrange
    let env = TestEnvironment::new();
    let queue = env
        .queue("orders", true, AccessMode::SendAndReceive)
        .await;
    queue.send(&document(10)).await.unwrap();

    // Act
    let result = queue
        .receive_typed::<OrderPlaced>(WAIT, &CancellationToken::new())
        .await;

    // Assert
    assert!(matches!(result, Err(QueueError::InvalidMessageType { .. })));
    assert_eq!(queue.count().await.unwrap(), Some(1));
}

/// Verify that a cancelled wait reports cancellation instead of waiting out the timeout
#[tokio::test]
async fn test_cancelled_receive_returns_promptly() {
    // Arrange
    let env = TestEnvironment::new();
    let queue = env
        .queue("orders", true, AccessMode::SendAndReceive)
        .await;
    let token = CancellationToken::new();
    let canceller = token.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    // Act
    let started = std::time::Instant::now();
    let outcome = queue
        .receive_async(Duration::from_secs(30), &token)
        .await
        .unwrap();

    // Assert
    assert!(matches!(outcome, ReceiveOutcome::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Verify that a sender and a receiver on separate queue objects share messages
#[tokio::test]
async fn test_separate_sender_and_receiver() {
    // Arrange
    let env = TestEnvironment::new();
    let receiver = env.queue("orders", true, AccessMode::Receive).await;

    // Act
    env.send_orders("orders", &[1, 2]).await;
    let token = CancellationToken::new();
    let first = receiver.receive_typed::<OrderPlaced>(WAIT, &token).await;
    let second = receiver.receive_typed::<OrderPlaced>(WAIT, &token).await;
    let third = receiver.receive_typed::<OrderPlaced>(WAIT, &token).await;

    // Assert
    assert_eq!(first.unwrap(), Some(order(1)));
    assert_eq!(second.unwrap(), Some(order(2)));
    assert_eq!(third.unwrap(), None);
    assert!(matches!(
        receiver.send(&order(3)).await,
        Err(QueueError::AccessMode { .. })
    ));
}
