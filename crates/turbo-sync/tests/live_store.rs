//! End-to-end tests against an in-process store over a real WebSocket.

mod common;

use std::future::Future;
use std::time::Duration;

use common::{TestStore, GOOD_CREDENTIAL};
use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use turbo_sync::{
    Client, ClientConfig, ClientError, ConnectionState, EventKind, ListenOptions, Snapshot,
    TransactionOutcome,
};

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

fn connect(store: &TestStore) -> Client {
    Client::connect(ClientConfig::for_url(&store.url)).unwrap()
}

fn forward(client: &Client, kind: &str) -> mpsc::UnboundedReceiver<Snapshot> {
    let (tx, rx) = mpsc::unbounded_channel();
    client
        .on(kind, move |snap| {
            let _ = tx.send(snap.clone());
        })
        .unwrap();
    rx
}

#[tokio::test]
async fn test_value_listener_sees_nested_write_once() {
    let store = TestStore::start().await;
    let root = connect(&store);
    let mut events = forward(&root, "value");

    within(root.child("a").unwrap().set(json!({ "a": "hi", "b": "there" })).unwrap())
        .await
        .unwrap();

    let snap = common::recv(&mut events).await;
    assert_eq!(snap.path().as_str(), "/a");
    assert_eq!(snap.name(), "a");
    assert_eq!(snap.val(), &json!({ "a": "hi", "b": "there" }));
    assert_eq!(snap.child("b").unwrap().val(), &json!("there"));
    assert_eq!(snap.reference().to_string(), "/a");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_child_removed_carries_prior_value() {
    let store = TestStore::start().await;
    let root = connect(&store);
    let mut removed = forward(&root, "child_removed");
    let a = root.child("a").unwrap();

    within(a.set(json!({ "a": "hi", "b": "there" })).unwrap())
        .await
        .unwrap();
    within(a.set(Value::Null).unwrap()).await.unwrap();

    let snap = common::recv(&mut removed).await;
    assert_eq!(snap.path().as_str(), "/a");
    assert_eq!(snap.val(), &json!({ "a": "hi", "b": "there" }));
    assert_eq!(store.value("/a"), Value::Null);
}

#[tokio::test]
async fn test_push_generates_name_and_child_added() {
    let store = TestStore::start().await;
    let list = connect(&store).child("list").unwrap();
    let mut added = forward(&list, "child_added");

    let name = within(list.push(json!({ "title": "first" })).unwrap())
        .await
        .unwrap();
    let name = name.as_str().unwrap().to_string();

    let snap = common::recv(&mut added).await;
    assert_eq!(snap.name(), name);
    assert_eq!(snap.path(), list.child(&name).unwrap().path());
    assert_eq!(snap.val(), &json!({ "title": "first" }));
}

#[tokio::test]
async fn test_update_merges_deltas() {
    let store = TestStore::start().await;
    let ada = connect(&store).child("users/ada").unwrap();

    within(ada.set(json!({ "name": "Ada", "age": 36 })).unwrap())
        .await
        .unwrap();
    within(ada.update(json!({ "age": 37, "address": { "city": "London" } })).unwrap())
        .await
        .unwrap();

    assert_eq!(
        store.value("/users/ada"),
        json!({ "name": "Ada", "age": 37, "address": { "city": "London" } })
    );

    let read = within(ada.transaction(|_| None)).await.unwrap();
    assert_eq!(
        read,
        TransactionOutcome::Cancelled {
            value: json!({ "name": "Ada", "age": 37, "address": { "city": "London" } })
        }
    );
}

#[tokio::test]
async fn test_concurrent_transactions_from_two_connections() {
    let store = TestStore::start().await;
    let mut config = ClientConfig::for_url(&store.url);
    config.transaction.max_attempts = 0;

    let first = Client::connect(config.clone()).unwrap().child("counter").unwrap();
    let second = Client::connect(config).unwrap().child("counter").unwrap();

    let increment = |current: &Value| Some(json!(current.as_i64().unwrap_or(0) + 1));
    let mut pending = Vec::new();
    for _ in 0..5 {
        pending.push(first.transaction(increment));
        pending.push(second.transaction(increment));
    }

    let outcomes = within(join_all(pending)).await;
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, Ok(outcome) if outcome.is_committed())));
    assert_eq!(store.value("/counter"), json!(10));

    let mut committed: Vec<i64> = outcomes
        .into_iter()
        .filter_map(|o| o.ok().and_then(|outcome| outcome.value().as_i64()))
        .collect();
    committed.sort_unstable();
    assert_eq!(committed, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_auth_and_unauth() {
    let store = TestStore::start().await;
    let root = connect(&store);

    assert_eq!(
        within(root.auth("wrong").unwrap()).await,
        Err(ClientError::Server("invalid credential".into()))
    );
    assert_eq!(root.unauth().err(), Some(ClientError::NotAuthenticated));

    let token = within(root.auth(GOOD_CREDENTIAL).unwrap()).await.unwrap();
    assert_eq!(token, "token-1");

    within(root.unauth().unwrap()).await.unwrap();
    assert_eq!(root.connection().auth_token(), None);
}

#[tokio::test]
async fn test_go_offline_queues_until_go_online() {
    let store = TestStore::start().await;
    let root = connect(&store);
    root.go_online().unwrap();
    within(root.connection().wait_for_state(ConnectionState::Online))
        .await
        .unwrap();

    root.go_offline();
    assert_eq!(root.state(), ConnectionState::Offline);

    let first = root.child("queue/first").unwrap().set(1).unwrap();
    let second = root.child("queue/second").unwrap().set(2).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.value("/queue"), Value::Null);
    assert_eq!(root.connection().status().queued, 2);

    root.go_online().unwrap();
    within(first).await.unwrap();
    within(second).await.unwrap();
    assert_eq!(store.value("/queue"), json!({ "first": 1, "second": 2 }));
}

#[tokio::test]
async fn test_reconnects_after_store_closes_socket() {
    let store = TestStore::start().await;
    let root = connect(&store);
    within(root.child("before").unwrap().set(true).unwrap())
        .await
        .unwrap();

    store.disconnect_all();
    within(root.connection().wait_for_state(ConnectionState::Offline))
        .await
        .unwrap();

    within(root.child("after").unwrap().set(true).unwrap())
        .await
        .unwrap();
    assert_eq!(root.state(), ConnectionState::Online);
    assert_eq!(store.value("/"), json!({ "before": true, "after": true }));
    assert!(root.connection().status().last_connected.is_some());
}

#[tokio::test]
async fn test_store_cancels_subscription() {
    let store = TestStore::start().await;
    let root = connect(&store);
    let secret = root.child("secret").unwrap();

    let (cancel_tx, mut cancelled) = mpsc::unbounded_channel();
    let options = ListenOptions::new().on_cancel(move |err| {
        let _ = cancel_tx.send(err.clone());
    });
    secret
        .on_with("value", std::sync::Arc::new(|_: &Snapshot| {}), options)
        .unwrap();

    // The subscription is registered once a later request on the same socket is acknowledged.
    within(root.child("ping").unwrap().set(1).unwrap())
        .await
        .unwrap();
    store.revoke("/secret", EventKind::Value, "permission_denied");

    assert_eq!(
        common::recv(&mut cancelled).await,
        ClientError::Server("permission_denied".into())
    );
    assert_eq!(root.connection().status().listeners, 0);
}
