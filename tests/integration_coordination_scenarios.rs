//! Await-chain, timeout, any, and retry-with-backoff scenarios, each driven
//! against a real in-process server rather than bare futures, so the
//! coordination layer is exercised the way an application actually uses it:
//! composing `Client::call` futures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evrpc::coordination::{all, any, retry_with_backoff, timeout};
use evrpc::{Address, Client, ClientConfig, ErrorCode, Server, ServerConfig};

async fn connected_client(name: &str) -> Client {
    Client::connect(ClientConfig::new(Address::Inproc(name.to_string())))
        .await
        .unwrap()
}

#[tokio::test]
async fn await_chain_runs_calls_in_sequence() {
    let mut server = Server::new(ServerConfig::new(Address::Inproc("it-chain".to_string())));
    server
        .register("increment", |params| async move {
            let n = i32::from_le_bytes(params.try_into().unwrap());
            Ok((n + 1).to_le_bytes().to_vec())
        })
        .unwrap();
    server.start().await.unwrap();
    tokio::task::yield_now().await;

    let client = connected_client("it-chain").await;

    let mut value = 0i32.to_le_bytes().to_vec();
    for _ in 0..5 {
        value = client.call("increment", value).await.unwrap();
    }
    assert_eq!(i32::from_le_bytes(value.try_into().unwrap()), 5);
}

#[tokio::test]
async fn timeout_scenario_surfaces_timeout_error_code() {
    let mut server = Server::new(ServerConfig::new(Address::Inproc("it-timeout".to_string())));
    server
        .register("never_replies_in_time", |_params| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![])
        })
        .unwrap();
    server.start().await.unwrap();
    tokio::task::yield_now().await;

    let client = connected_client("it-timeout").await;
    let result = timeout(Duration::from_millis(20), client.call("never_replies_in_time", vec![])).await;
    assert_eq!(result.unwrap_err().code, ErrorCode::Timeout);
}

#[tokio::test]
async fn any_scenario_resolves_with_fastest_winner() {
    let mut fast = Server::new(ServerConfig::new(Address::Inproc("it-any-fast".to_string())));
    fast.register("ping", |_| async move { Ok(b"fast".to_vec()) }).unwrap();
    fast.start().await.unwrap();

    let mut slow = Server::new(ServerConfig::new(Address::Inproc("it-any-slow".to_string())));
    slow.register("ping", |_| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(b"slow".to_vec())
    })
    .unwrap();
    slow.start().await.unwrap();
    tokio::task::yield_now().await;

    let fast_client = connected_client("it-any-fast").await;
    let slow_client = connected_client("it-any-slow").await;

    let winner = any(vec![
        slow_client.call("ping", vec![]),
        fast_client.call("ping", vec![]),
    ])
    .await
    .unwrap();
    assert_eq!(winner, b"fast");
}

#[tokio::test]
async fn all_scenario_waits_for_every_call() {
    let mut server = Server::new(ServerConfig::new(Address::Inproc("it-all".to_string())));
    server.register("echo", |p| async move { Ok(p) }).unwrap();
    server.start().await.unwrap();
    tokio::task::yield_now().await;

    let client = connected_client("it-all").await;
    let results = all(vec![
        client.call("echo", b"a".to_vec()),
        client.call("echo", b"b".to_vec()),
    ])
    .await;
    let results: Vec<Vec<u8>> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(results, vec![b"a".to_vec(), b"b".to_vec()]);
}

#[tokio::test]
async fn retry_with_backoff_scenario_recovers_after_transient_failures() {
    let calls_seen = Arc::new(AtomicU32::new(0));
    let mut server = Server::new(ServerConfig::new(Address::Inproc("it-retry".to_string())));
    let counter = calls_seen.clone();
    server
        .register("flaky", move |_params| {
            let counter = counter.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err((ErrorCode::RateLimited.as_i32(), vec![]))
                } else {
                    Ok(b"finally".to_vec())
                }
            }
        })
        .unwrap();
    server.start().await.unwrap();
    tokio::task::yield_now().await;

    let client = connected_client("it-retry").await;
    let result = retry_with_backoff(
        5,
        Duration::from_millis(1),
        |e| e.code == ErrorCode::Error,
        || client.call("flaky", vec![]),
    )
    .await
    .unwrap();
    assert_eq!(result, b"finally");
    assert!(calls_seen.load(Ordering::SeqCst) >= 3);
}
