//! Tests for the queue factory.

use super::*;
use crate::locks::KeyedLockGuard;
use crate::message::QueuePath;
use crate::providers::InMemoryTransport;
use crate::transport::{MockTransportProvider, TransportError};
use async_trait::async_trait;
use std::time::Duration;

/// Lock provider that never grants a lock
struct UnavailableLocks;

#[async_trait]
impl KeyedLockProvider for UnavailableLocks {
    async fn acquire(&self, _key: &str, _timeout: Duration) -> Option<KeyedLockGuard> {
        None
    }
}

/// Verify that invalid settings are rejected.
#[test]
fn test_with_invalid_settings() {
    let factory = QueueFactory::new(Arc::new(InMemoryTransport::new()));

    let result = factory.with_settings(QueueSettings {
        max_chunk_size: 0,
        ..QueueSettings::default()
    });

    assert!(matches!(result, Err(QueueError::Configuration(_))));
}

/// Verify that a durable-create queue is created during construction.
#[tokio::test]
async fn test_durable_create_creates_queue() {
    let transport = InMemoryTransport::new();
    let factory = QueueFactory::new(Arc::new(transport.clone()));

    let queue = factory
        .create_locale(
            "Orders",
            true,
            LocaleQueueMode::DurableCreate,
            true,
            AccessMode::Send,
        )
        .await
        .unwrap();

    assert_eq!(queue.name(), "Orders");
    assert!(queue.is_durable());
    assert!(queue.is_transactional());
    assert_eq!(queue.access_mode(), AccessMode::Send);
    assert_eq!(
        transport.is_transactional(&QueuePath::local("orders", true)),
        Some(true)
    );
}

/// Verify that creation proceeds when the creation lock cannot be obtained.
#[tokio::test]
async fn test_creation_without_lock() {
    let transport = InMemoryTransport::new();
    let factory =
        QueueFactory::new(Arc::new(transport.clone())).with_lock_provider(Arc::new(UnavailableLocks));

    factory
        .create_locale(
            "orders",
            false,
            LocaleQueueMode::DurableCreate,
            false,
            AccessMode::Send,
        )
        .await
        .unwrap();

    assert_eq!(transport.queue_len(&QueuePath::local("orders", false)), Some(0));
}

/// Verify that concurrent owners of one durable-create queue all succeed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_durable_create() {
    let transport = InMemoryTransport::new();
    let factory = QueueFactory::new(Arc::new(transport.clone()));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            factory
                .create_locale(
                    "shared",
                    true,
                    LocaleQueueMode::DurableCreate,
                    true,
                    AccessMode::SendAndReceive,
                )
                .await
                .map(|_| ())
        }));
    }

    for task in tasks {
        task.await.expect("Task panicked").unwrap();
    }
    assert_eq!(factory.list(".", true).await, vec!["shared"]);
}

/// Verify that owners built from separate factories race to create one queue safely.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_durable_create_across_factories() {
    let transport = InMemoryTransport::new();
    let factories: Vec<QueueFactory> = (0..2)
        .map(|_| QueueFactory::new(Arc::new(transport.clone())))
        .chain((0..2).map(|_| {
            QueueFactory::new(Arc::new(transport.clone()))
                .with_lock_provider(Arc::new(UnavailableLocks))
        }))
        .collect();

    let mut tasks = Vec::new();
    for round in 0..4 {
        for factory in &factories {
            let factory = factory.clone();
            let name = format!("shared-{}", round);
            tasks.push(tokio::spawn(async move {
                factory
                    .create_locale(
                        &name,
                        true,
                        LocaleQueueMode::DurableCreate,
                        true,
                        AccessMode::SendAndReceive,
                    )
                    .await
                    .map(|_| ())
            }));
        }
    }

    for task in tasks {
        task.await.expect("Task panicked").unwrap();
    }
    assert_eq!(factories[0].list(".", true).await.len(), 4);
}

/// Verify that a queue created by someone else between the check and the create is accepted.
#[tokio::test]
async fn test_create_losing_race_is_success() {
    let mut mock = MockTransportProvider::new();
    mock.expect_exists().returning(|_| Ok(false));
    mock.expect_create().times(1).returning(|path, _| {
        Err(TransportError::QueueExists {
            path: path.to_string(),
        })
    });
    let factory = QueueFactory::new(Arc::new(mock)).with_lock_provider(Arc::new(UnavailableLocks));

    let result = factory
        .create_locale(
            "orders",
            true,
            LocaleQueueMode::DurableCreate,
            true,
            AccessMode::Send,
        )
        .await;

    assert!(result.is_ok());
}

/// Verify that other creation failures still surface.
#[tokio::test]
async fn test_create_failure_surfaces() {
    let mut mock = MockTransportProvider::new();
    mock.expect_exists().returning(|_| Ok(false));
    mock.expect_create().returning(|_, _| {
        Err(TransportError::Failure {
            code: "E".to_string(),
            message: "denied".to_string(),
        })
    });
    let factory = QueueFactory::new(Arc::new(mock));

    let result = factory
        .create_locale(
            "orders",
            true,
            LocaleQueueMode::DurableCreate,
            true,
            AccessMode::Send,
        )
        .await;

    assert!(matches!(
        result,
        Err(QueueError::QueueCreate {
            source: TransportError::Failure { .. },
            ..
        })
    ));
}

/// Verify that remote queues are not touched at construction.
#[tokio::test]
async fn test_remote_queue_is_lazy() {
    let transport = InMemoryTransport::new();
    let factory = QueueFactory::new(Arc::new(transport.clone()));

    let queue = factory
        .create_remote(
            "host",
            "orders",
            true,
            RemoteQueueMode::Durable,
            true,
            AccessMode::Send,
        )
        .await
        .unwrap();

    assert!(!queue.is_connected().await);
    assert_eq!(queue.path(), &QueuePath::new("host", "orders", true));
    assert!(factory.list("host", true).await.is_empty());
}
