//! Integration tests for queue handlers
//!
//! These tests start real handlers over the in-memory transport and observe
//! them through the messages they handle, the queues they leave behind and
//! their idle state.

mod common;

use common::{wait_until, RecordingHandler, TestEnvironment};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use txq_handler::{
    ErrorHandler, HandlerError, HandlerFactory, HandlerSettings, QueueHandling,
    TestQueueHandlerFactory,
};
use txq_runtime::{FaultPoint, LocaleQueueMode, QueueMessage};

/// Verify the full lifecycle of a temporary queue owned by a handler
///
/// The handler creates the queue, handles two good orders, reports the bad
/// one to the error handler and deletes the queue when stopped.
#[tokio::test]
async fn test_temporary_master_lifecycle() {
    // Arrange
    let env = TestEnvironment::new();
    let recorder = RecordingHandler::new();
    recorder.fail_on(3);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let handler = env.handlers().create();

    // Act
    handler
        .start(
            recorder
                .options("orders")
                .with_mode(LocaleQueueMode::TemporaryMaster)
                .with_error_handler(ErrorHandler::action(move |message, error| {
                    sink.lock()
                        .unwrap()
                        .push((message.message_type().to_string(), error.to_string()));
                    Ok(())
                })),
        )
        .await
        .expect("Handler failed to start");
    assert_eq!(env.queue_len("orders"), Some(0), "Queue created on start");

    env.send_orders("orders", &[1, 2, 3]).await;
    wait_until("three orders attempted", || recorder.attempts().len() == 3).await;
    handler.stop().await;

    // Assert
    assert_eq!(recorder.handled(), vec![1, 2]);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, "order 3 rejected");
    assert_eq!(env.queue_len("orders"), None, "Queue deleted on stop");
}

/// Verify that multi-threaded handling overlaps slow handlers
///
/// Three orders taking 500ms each finish in roughly the time of one.
#[tokio::test]
async fn test_multi_threaded_handling_is_concurrent() {
    // Arrange
    let env = TestEnvironment::new();
    env.send_orders("orders", &[1, 2, 3]).await;
    let recorder = RecordingHandler::new();
    recorder.set_delay(Duration::from_millis(500));
    let handler = env.handlers().create();

    // Act
    let started = Instant::now();
    handler
        .start(recorder.options("orders").with_multi_threaded(true))
        .await
        .unwrap();
    wait_until("three orders handled", || recorder.handled().len() == 3).await;
    let elapsed = started.elapsed();
    handler.stop().await;

    // Assert
    assert!(
        elapsed < Duration::from_millis(1200),
        "Took {}ms, expected concurrent handling",
        elapsed.as_millis()
    );
}

/// Verify that single-threaded handling runs one order at a time
#[tokio::test]
async fn test_single_threaded_handling_is_sequential() {
    // Arrange
    let env = TestEnvironment::new();
    env.send_orders("orders", &[1, 2, 3]).await;
    let recorder = RecordingHandler::new();
    recorder.set_delay(Duration::from_millis(200));
    let handler = env.handlers().create();

    // Act
    let started = Instant::now();
    handler.start(recorder.options("orders")).await.unwrap();
    wait_until("three orders handled", || recorder.handled().len() == 3).await;
    let elapsed = started.elapsed();
    handler.stop().await;

    // Assert
    assert!(
        elapsed >= Duration::from_millis(600),
        "Took {}ms, expected sequential handling",
        elapsed.as_millis()
    );
    assert_eq!(recorder.handled(), vec![1, 2, 3]);
}

/// Verify that a rejected order without an error handler is retried until it succeeds
#[tokio::test]
async fn test_rejected_order_is_redelivered() {
    // Arrange
    let env = TestEnvironment::new();
    env.send_orders("orders", &[1]).await;
    let recorder = RecordingHandler::new();
    recorder.fail_on(1);
    let handler = env.handlers().create();

    // Act
    handler.start(recorder.options("orders")).await.unwrap();
    wait_until("order retried", || recorder.attempts().len() >= 3).await;
    recorder.recover(1);
    wait_until("order handled", || recorder.handled() == vec![1]).await;
    handler.stop().await;

    // Assert
    assert_eq!(env.queue_len("orders"), Some(0));
    assert_eq!(env.transport.pending_transactions(), 0);
}

/// Verify that an error func returning true discards the rejected order
#[tokio::test]
async fn test_error_func_discards_rejected_order() {
    // Arrange
    let env = TestEnvironment::new();
    env.send_orders("orders", &[1]).await;
    let recorder = RecordingHandler::new();
    recorder.fail_on(1);

    // Act
    env.handlers()
        .create()
        .start(
            recorder
                .options("orders")
                .with_sync_mode(true)
                .with_error_handler(ErrorHandler::func(|_, _| Ok(true))),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(recorder.attempts(), vec![1]);
    assert!(recorder.handled().is_empty());
    assert_eq!(env.queue_len("orders"), Some(0));
}

/// Verify the heartbeat and idle reporting of a running handler
#[tokio::test]
async fn test_heartbeat_and_idle_state() {
    // Arrange
    let env = TestEnvironment::new();
    let recorder = RecordingHandler::new();
    let beats = Arc::new(AtomicUsize::new(0));
    let counter = beats.clone();
    let handler = env.handlers().create();
    assert!(handler.is_idle(), "Idle before start");

    // Act
    handler
        .start(recorder.options("orders").with_heartbeat(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .await
        .unwrap();
    assert!(!handler.is_idle(), "Busy right after start");

    wait_until("heartbeats", || beats.load(Ordering::SeqCst) >= 3).await;
    wait_until("idle once drained", || handler.is_idle()).await;

    // Assert
    let second = handler.start(recorder.options("orders")).await;
    assert!(matches!(second, Err(HandlerError::NotStopped)));

    handler.stop().await;
    assert!(handler.is_idle(), "Idle after stop");
}

/// Verify that repeated receive failures end a synchronous run
///
/// Each handler-level failure consumes two transport faults, the wait and
/// its retry, so six faults trip a limit of three.
#[tokio::test]
async fn test_sync_mode_receive_failures_are_fatal() {
    // Arrange
    let env = TestEnvironment::new();
    let recorder = RecordingHandler::new();
    let factory = env
        .handlers()
        .with_settings(HandlerSettings {
            receive_failure_limit: 3,
            ..HandlerSettings::default()
        })
        .unwrap();
    env.transport.inject_failures(FaultPoint::Peek, 6);

    // Act
    let result = factory
        .create()
        .start(recorder.options("orders").with_sync_mode(true))
        .await;

    // Assert
    assert!(matches!(
        result,
        Err(HandlerError::QueueHandlerProcess { .. })
    ));
}

/// Verify that cancelling the external token stops the handler
#[tokio::test]
async fn test_external_token_stops_handler() {
    // Arrange
    let env = TestEnvironment::new();
    let recorder = RecordingHandler::new();
    let token = CancellationToken::new();
    let handler = env.handlers().create();

    handler
        .start(
            recorder
                .options("orders")
                .with_mode(LocaleQueueMode::TemporaryMaster)
                .with_cancellation(token.clone()),
        )
        .await
        .unwrap();

    // Act
    token.cancel();

    // Assert
    assert!(handler.is_idle());
    wait_until("queue deleted", || env.queue_len("orders").is_none()).await;
}

/// Verify that code written against the factory seam runs with the test double
#[tokio::test]
async fn test_test_factory_replays_messages() {
    async fn drain(factory: &dyn HandlerFactory, recorder: &RecordingHandler) {
        let handler = factory.create();
        handler
            .start(recorder.options("orders"))
            .await
            .expect("Handler failed to start");
        handler.stop().await;
    }

    // Arrange
    let factory = TestQueueHandlerFactory::new();
    factory.add(&common::order(1)).unwrap();
    factory.add(&common::order(2)).unwrap();
    factory.push(QueueMessage::from_value(&common::order(3)).unwrap());
    let recorder = RecordingHandler::new();

    // Act
    drain(&factory, &recorder).await;

    // Assert
    assert_eq!(recorder.handled(), vec![1, 2, 3]);
}
