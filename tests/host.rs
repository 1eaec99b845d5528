use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use workervisor::{
    CacheApi, CacheStorageApi, Config, ExtensionError, Host, MatchOptions, Request, Response,
    RuntimeError, ScriptFn, ScriptRef, Server, Topology, WorkerScope,
};

fn single() -> Config {
    Config {
        grace: Duration::from_secs(5),
        ..Config::default()
    }
}

fn pool(size: usize) -> Config {
    Config {
        topology: Topology::Pool,
        pool_size: size,
        ..single()
    }
}

fn responder(body: &'static str) -> ScriptRef {
    ScriptFn::arc(body, move |scope: &mut WorkerScope| {
        scope.on_fetch(move |ev| ev.respond(Response::ok(body)).map_err(ExtensionError::from));
        Ok(())
    })
}

/// Answers with the id of the context's broadcast relay, unique per context.
fn whoami() -> ScriptRef {
    ScriptFn::arc("whoami", |scope: &mut WorkerScope| {
        let id = scope.broadcast().id().to_string();
        scope.on_fetch(move |ev| {
            ev.respond(Response::ok(id.clone()))
                .map_err(ExtensionError::from)
        });
        Ok(())
    })
}

#[tokio::test]
async fn serves_503_until_started() {
    let host = Host::builder(single()).build().unwrap();
    let resp = host.dispatch_request(Request::get("https://app.test/")).await;
    assert_eq!(resp.status, 503);
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn serves_the_active_worker() {
    let host = Host::builder(single()).build().unwrap();
    host.start(responder("hello")).await.unwrap();

    let resp = host.dispatch_request(Request::get("https://app.test/")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "hello");
    assert!(host.server().is_some());

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn serves_500_when_nobody_responds() {
    let silent = ScriptFn::arc("silent", |scope: &mut WorkerScope| {
        scope.on_fetch(|_| Ok(()));
        Ok(())
    });
    let host = Host::builder(single()).build().unwrap();
    host.start(silent).await.unwrap();

    let resp = host.dispatch_request(Request::get("https://app.test/")).await;
    assert_eq!(resp.status, 500);
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let host = Host::builder(single()).build().unwrap();
    host.start(responder("a")).await.unwrap();

    let err = host.start(responder("b")).await.unwrap_err();
    assert_eq!(err.as_label(), "invalid_state");
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn pool_round_robins_requests() {
    let host = Host::builder(pool(2)).build().unwrap();
    host.start(whoami()).await.unwrap();
    assert_eq!(host.contexts().len(), 2);

    let first = host.dispatch_request(Request::get("https://app.test/")).await;
    let second = host.dispatch_request(Request::get("https://app.test/")).await;
    let third = host.dispatch_request(Request::get("https://app.test/")).await;
    assert_ne!(first.text(), second.text());
    assert_eq!(first.text(), third.text());

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn pool_contexts_share_one_cache_view() {
    let host = Host::builder(pool(2)).build().unwrap();
    host.start(responder("ok")).await.unwrap();

    let left = Arc::clone(host.contexts()[0].caches());
    let right = Arc::clone(host.contexts()[1].caches());

    let written = left.open("v1").await.unwrap();
    written
        .put(Request::get("https://app.test/a"), Response::ok("x"))
        .await
        .unwrap();

    let read = right.open("v1").await.unwrap();
    let hit = read
        .match_one(&Request::get("https://app.test/a"), MatchOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.status, 200);
    assert_eq!(hit.text(), "x");

    assert!(right.delete("v1").await.unwrap());
    assert!(!left.has("v1").await.unwrap());

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_update_keeps_previous_worker_serving() {
    let host = Host::builder(single()).build().unwrap();
    host.start(responder("v1")).await.unwrap();

    let broken = ScriptFn::arc("broken", |scope: &mut WorkerScope| {
        scope.on_install(|ev| {
            ev.wait_until(async { Err(ExtensionError::fail("install rejected")) })
                .map_err(ExtensionError::from)
        });
        scope.on_fetch(|ev| ev.respond(Response::ok("v2")).map_err(ExtensionError::from));
        Ok(())
    });

    let err = host.update(broken).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Lifecycle { phase: "install", .. }));

    let resp = host.dispatch_request(Request::get("https://app.test/")).await;
    assert_eq!(resp.text(), "v1");
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn partial_pool_update_leaves_no_orphaned_worker() {
    let host = Host::builder(pool(2)).build().unwrap();
    host.start(responder("v1")).await.unwrap();

    let evaluations = Arc::new(AtomicUsize::new(0));
    let disposals = Arc::new(AtomicUsize::new(0));
    let (evals, disp) = (Arc::clone(&evaluations), Arc::clone(&disposals));
    let v2 = ScriptFn::arc("v2", move |scope: &mut WorkerScope| {
        let nth = evals.fetch_add(1, Ordering::SeqCst);
        let disp = Arc::clone(&disp);
        scope.hot().dispose(move || {
            disp.fetch_add(1, Ordering::SeqCst);
        });
        if nth == 0 {
            scope.on_activate(|ev| {
                ev.wait_until(async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                })
                .map_err(ExtensionError::from)
            });
        } else {
            scope.on_install(|ev| {
                ev.wait_until(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(ExtensionError::fail("install rejected"))
                })
                .map_err(ExtensionError::from)
            });
        }
        scope.on_fetch(|ev| ev.respond(Response::ok("v2")).map_err(ExtensionError::from));
        Ok(())
    });

    let err = host.update(v2).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Lifecycle { phase: "install", .. }));
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
    assert_eq!(disposals.load(Ordering::SeqCst), 1);

    let mut bodies = Vec::new();
    for ctx in host.contexts() {
        let reg = ctx.registration();
        assert!(reg.installing().is_none());
        assert!(reg.waiting().is_none());
        assert!(reg.active().is_some());
        bodies.push(host.dispatch_request(Request::get("https://app.test/")).await.text());
    }
    bodies.sort();
    assert_eq!(bodies, vec!["v1", "v2"]);

    host.shutdown().await.unwrap();
    assert_eq!(disposals.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zero_grace_shutdown_does_not_wait_for_in_flight_events() {
    let slow = ScriptFn::arc("slow", |scope: &mut WorkerScope| {
        scope.on_fetch(|ev| {
            ev.respond_with(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, ExtensionError>(Response::ok("late"))
            })
            .map_err(ExtensionError::from)
        });
        Ok(())
    });
    let cfg = Config {
        grace: Duration::ZERO,
        ..Config::default()
    };
    let host = Host::builder(cfg).build().unwrap();
    host.start(slow).await.unwrap();

    let h = Arc::clone(&host);
    let _inflight =
        tokio::spawn(async move { h.dispatch_request(Request::get("https://app.test/")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(1), host.shutdown())
        .await
        .expect("shutdown does not wait")
        .unwrap();
    assert!(host.storage().is_disposed());
}

#[tokio::test]
async fn update_replaces_the_worker() {
    let host = Host::builder(single()).build().unwrap();
    host.start(responder("v1")).await.unwrap();

    let outcomes = host.update(responder("v2")).await.unwrap();
    assert_eq!(outcomes.len(), 1);

    let resp = host.dispatch_request(Request::get("https://app.test/")).await;
    assert_eq!(resp.text(), "v2");
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn messages_reach_every_active_worker() {
    let host = Host::builder(pool(3)).build().unwrap();
    host.start(responder("ok")).await.unwrap();

    let delivered = host.post_message(serde_json::json!({"ping": 1})).await;
    assert_eq!(delivered, 3);
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_the_server() {
    let host = Host::builder(single()).build().unwrap();
    host.start(responder("ok")).await.unwrap();
    let server = host.server().unwrap();

    host.shutdown().await.unwrap();
    host.shutdown().await.unwrap();

    let resp = server.handle(Request::get("https://app.test/")).await;
    assert_eq!(resp.status, 503);
    assert!(host.storage().is_disposed());
    assert!(host.contexts()[0].registration().active().is_none());
}

#[tokio::test]
async fn unknown_backend_fails_the_build() {
    let cfg = Config {
        cache_backend: "redis".into(),
        ..single()
    };
    let err = Host::builder(cfg).build().err().unwrap();
    assert_eq!(err.as_label(), "not_found");
}

#[tokio::test]
async fn fs_backend_persists_under_cache_dir() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        cache_backend: "fs".into(),
        cache_dir: dir.path().to_path_buf(),
        ..single()
    };
    let host = Host::builder(cfg).build().unwrap();
    host.start(responder("ok")).await.unwrap();

    let caches = Arc::clone(host.contexts()[0].caches());
    let cache = caches.open("assets").await.unwrap();
    cache
        .put(Request::get("https://app.test/app.js"), Response::ok("js"))
        .await
        .unwrap();
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_some());

    host.shutdown().await.unwrap();
}
