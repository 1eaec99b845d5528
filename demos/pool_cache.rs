//! # Example: pool_cache
//!
//! Runs the same worker script in a pool of three contexts that share one
//! cache through the relay.
//!
//! ## Flow
//! ```text
//! Host (pool of 3)
//!   ├─ ctx-0 ─┐
//!   ├─ ctx-1 ─┼── RemoteCacheStorage ──► CacheOwner ──► CacheStorage (memory)
//!   └─ ctx-2 ─┘
//! request #1 on ctx-0: miss, render, put
//! request #2 on ctx-1: hit
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example pool_cache
//! ```

use std::sync::Arc;

use workervisor::{
    CacheApi, CacheStorageApi, Config, ExtensionError, Host, MatchOptions, Request, Response,
    ScriptFn, Topology, WorkerScope,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    workervisor::logging::init(Some("info"));

    let cfg = Config {
        topology: Topology::Pool,
        pool_size: 3,
        ..Config::from_env()?
    };
    let host = Host::builder(cfg)
        .with_subscribers(vec![Arc::new(workervisor::LogWriter::new())])
        .build()?;

    let app = ScriptFn::arc("pages", |scope: &mut WorkerScope| {
        let caches = scope.caches();
        let relay = scope.broadcast().id().to_string();
        scope.on_fetch(move |ev| {
            let caches = Arc::clone(&caches);
            let relay = relay.clone();
            let Some(request) = ev.request().cloned() else {
                return Ok(());
            };
            ev.respond_with(async move {
                let pages = caches.open("pages").await?;
                if let Some(hit) = pages.match_one(&request, MatchOptions::default()).await? {
                    return Ok(hit.with_header("x-cache", "hit"));
                }
                let fresh = Response::ok(format!("{} rendered by {relay}", request.url));
                pages.put(request, fresh.clone()).await?;
                Ok::<_, ExtensionError>(fresh.with_header("x-cache", "miss"))
            })?;
            Ok(())
        });
        Ok(())
    });

    host.start(app).await?;
    for _ in 0..3 {
        let resp = host
            .dispatch_request(Request::get("https://app.test/home"))
            .await;
        println!(
            "[demo] {} x-cache={} body={}",
            resp.status,
            resp.headers.get("x-cache").unwrap_or("-"),
            resp.text()
        );
    }

    host.shutdown().await?;
    Ok(())
}
