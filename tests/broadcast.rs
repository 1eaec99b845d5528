use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use workervisor::{
    BroadcastRelay, BroadcastTransport, Config, Host, LocalHub, Subscription, Topology,
};

const QUIET: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(2);

fn listen(relay: &BroadcastRelay, channel: &str) -> (Subscription, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = relay.subscribe(channel, move |data| {
        let _ = tx.send(data);
    });
    (sub, rx)
}

#[tokio::test]
async fn messages_never_echo_to_their_sender() {
    let hub: Arc<dyn BroadcastTransport> = LocalHub::new(16);
    let a = BroadcastRelay::new(Arc::clone(&hub));
    let b = BroadcastRelay::new(Arc::clone(&hub));

    let (_sa, mut from_a) = listen(&a, "news");
    let (_sb, mut from_b) = listen(&b, "news");

    a.publish("news", json!({"n": 1}));

    let got = timeout(WAIT, from_b.recv()).await.unwrap().unwrap();
    assert_eq!(got, json!({"n": 1}));
    assert!(timeout(QUIET, from_a.recv()).await.is_err());
}

#[tokio::test]
async fn channels_are_isolated() {
    let hub: Arc<dyn BroadcastTransport> = LocalHub::new(16);
    let a = BroadcastRelay::new(Arc::clone(&hub));
    let b = BroadcastRelay::new(Arc::clone(&hub));

    let (_sb, mut sports) = listen(&b, "sports");
    a.publish("news", json!("headline"));

    assert!(timeout(QUIET, sports.recv()).await.is_err());
}

#[tokio::test]
async fn unsubscribe_twice_is_harmless() {
    let hub: Arc<dyn BroadcastTransport> = LocalHub::new(16);
    let a = BroadcastRelay::new(Arc::clone(&hub));
    let b = BroadcastRelay::new(Arc::clone(&hub));

    let (sub, mut rx) = listen(&b, "news");
    assert!(sub.is_active());
    sub.unsubscribe();
    sub.unsubscribe();
    assert!(!sub.is_active());

    a.publish("news", json!(1));
    assert!(matches!(timeout(QUIET, rx.recv()).await, Err(_) | Ok(None)));
}

#[tokio::test]
async fn closed_relay_stops_publishing_and_delivering() {
    let hub: Arc<dyn BroadcastTransport> = LocalHub::new(16);
    let a = BroadcastRelay::new(Arc::clone(&hub));
    let b = BroadcastRelay::new(Arc::clone(&hub));

    let (sub, mut rx) = listen(&b, "news");
    b.close();
    b.close();
    assert!(b.is_closed());
    assert!(!sub.is_active());

    a.publish("news", json!(1));
    assert!(matches!(timeout(QUIET, rx.recv()).await, Err(_) | Ok(None)));
}

#[tokio::test]
async fn pool_contexts_talk_over_the_shared_transport() {
    let cfg = Config {
        topology: Topology::Pool,
        pool_size: 2,
        ..Config::default()
    };
    let host = Host::builder(cfg).build().unwrap();
    let [left, right] = host.contexts() else {
        panic!("expected two contexts");
    };

    let (_sl, mut at_left) = listen(left.broadcast(), "sync");
    let (_sr, mut at_right) = listen(right.broadcast(), "sync");

    left.broadcast().publish("sync", json!({"from": left.name()}));

    let got = timeout(WAIT, at_right.recv()).await.unwrap().unwrap();
    assert_eq!(got, json!({"from": "ctx-0"}));
    assert!(timeout(QUIET, at_left.recv()).await.is_err());

    host.shutdown().await.unwrap();
}
