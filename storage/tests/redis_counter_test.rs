//! Integration tests for the Redis counter store.
//!
//! These tests use the shared Redis testcontainer and skip when Docker is
//! not available.

use broker_core::CounterStore;
use storage::RedisCounterStore;
use testing::{redis, unique_id};

#[tokio::test]
async fn test_increment_and_get() {
    let Some(fixture) = redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };

    let store = RedisCounterStore::new(fixture.url(), &unique_id("broker"))
        .await
        .expect("Failed to connect to Redis");

    let key = "usage:acme:OPEN_AI:CHAT";
    assert_eq!(store.get(key).await.unwrap(), 0);
    assert_eq!(store.increment(key, 120).await.unwrap(), 120);
    assert_eq!(store.increment(key, 30).await.unwrap(), 150);
    assert_eq!(store.get(key).await.unwrap(), 150);
}

#[tokio::test]
async fn test_prefixes_isolate_processes() {
    let Some(fixture) = redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };

    let a = RedisCounterStore::new(fixture.url(), &unique_id("broker-a"))
        .await
        .unwrap();
    let b = RedisCounterStore::new(fixture.url(), &unique_id("broker-b"))
        .await
        .unwrap();

    a.increment("rr:acme:OPEN_AI:CHAT", 1).await.unwrap();
    assert_eq!(b.get("rr:acme:OPEN_AI:CHAT").await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_increments_are_atomic() {
    let Some(fixture) = redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };

    let store = std::sync::Arc::new(
        RedisCounterStore::new(fixture.url(), &unique_id("broker"))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                store.increment("usage:acme:OPEN_AI:cred:c1", 2).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.get("usage:acme:OPEN_AI:cred:c1").await.unwrap(), 400);
}
