use std::sync::Arc;
use std::time::Duration;

use workervisor::{
    CacheApi, CacheOwner, CacheStorage, CacheStorageApi, FetchFn, MatchOptions, MemoryFactory,
    NoNetwork, RemoteCacheStorage, Request, Response,
};

fn storage() -> Arc<CacheStorage> {
    Arc::new(CacheStorage::new(Arc::new(MemoryFactory)))
}

fn client(owner: &CacheOwner) -> RemoteCacheStorage {
    RemoteCacheStorage::new(
        owner.connect(32),
        Arc::new(NoNetwork),
        Some(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn concurrent_opens_share_one_instance() {
    let storage = storage();
    let (a, b) = tokio::join!(storage.open_cache("v1"), storage.open_cache("v1"));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(storage.keys().await.unwrap(), vec!["v1".to_string()]);
}

#[tokio::test]
async fn put_is_visible_to_every_caller() {
    let storage = storage();
    let writer = storage.open("v1").await.unwrap();
    let reader = storage.open("v1").await.unwrap();

    writer
        .put(Request::get("https://app.test/a"), Response::ok("x"))
        .await
        .unwrap();
    let hit = reader
        .match_one(&Request::get("https://app.test/a"), MatchOptions::default())
        .await
        .unwrap();
    assert_eq!(hit.map(|r| r.text()), Some("x".to_string()));
}

#[tokio::test]
async fn deleting_an_unopened_cache_is_false() {
    let storage = storage();
    assert!(!storage.delete("never").await.unwrap());
    assert!(!storage.has("never").await.unwrap());
}

#[tokio::test]
async fn relayed_clients_see_each_others_writes() {
    let owner = CacheOwner::spawn(storage(), 32);
    let left = client(&owner);
    let right = client(&owner);

    let cache = left.open("v1").await.unwrap();
    cache
        .put(
            Request::get("https://app.test/a"),
            Response::ok("x").with_header("content-type", "text/plain"),
        )
        .await
        .unwrap();

    let hit = right
        .match_any(&Request::get("https://app.test/a"), MatchOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.status, 200);
    assert_eq!(hit.text(), "x");
    assert_eq!(hit.headers.get("content-type"), Some("text/plain"));

    assert!(right.delete("v1").await.unwrap());
    assert!(!left.has("v1").await.unwrap());

    owner.shutdown().await;
}

#[tokio::test]
async fn relayed_validation_errors_keep_their_kind() {
    let owner = CacheOwner::spawn(storage(), 32);
    let caches = client(&owner);
    let cache = caches.open("v1").await.unwrap();

    let err = cache
        .put(Request::new("POST", "https://app.test/a"), Response::ok("x"))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "type_error");

    let err = cache
        .put(Request::get("https://app.test/a"), Response::new(206, "part"))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "type_error");

    owner.shutdown().await;
}

#[tokio::test]
async fn relayed_add_fetches_in_the_calling_context() {
    let owner = CacheOwner::spawn(storage(), 32);
    let fetch = FetchFn::arc(|request: Request| async move {
        Ok(Response::ok(format!("fetched {}", request.url)))
    });
    let caches = RemoteCacheStorage::new(owner.connect(32), fetch, None);

    let cache = caches.open("assets").await.unwrap();
    cache
        .add_all(vec![
            Request::get("https://app.test/a.js"),
            Request::get("https://app.test/b.js"),
        ])
        .await
        .unwrap();

    let keys = cache.keys(None, MatchOptions::default()).await.unwrap();
    assert_eq!(keys.len(), 2);
    owner.shutdown().await;
}

#[tokio::test]
async fn add_without_network_stores_nothing() {
    let storage = storage();
    let cache = storage.open("assets").await.unwrap();

    assert!(cache.add(Request::get("https://app.test/a.js")).await.is_err());
    let keys = cache.keys(None, MatchOptions::default()).await.unwrap();
    assert!(keys.is_empty());
}

#[tokio::test]
async fn disposed_storage_refuses_opens() {
    let storage = storage();
    storage.open("v1").await.unwrap();

    storage.dispose().await.unwrap();
    storage.dispose().await.unwrap();

    let err = storage.open("v1").await.err().unwrap();
    assert_eq!(err.as_label(), "invalid_state");
}
