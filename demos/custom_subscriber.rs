//! # Example: custom_subscriber
//!
//! Attaches a subscriber that only listens to lifecycle events, then walks a
//! worker through install, a failed update and a hot update.
//!
//! ## Flow
//! ```text
//! Host::start(v1) ──► installing ─► installed ─► activating ─► active
//! Host::update(broken) ──► InstallFailed (v1 keeps serving)
//! Host::update(v2) ──► UpdateAccepted (v1 accepted hot updates)
//!
//! Registration ── publish ──► Bus ──► SubscriberSet ──► LifecyclePrinter::on_event
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example custom_subscriber
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use workervisor::{
    Config, ExtensionError, Host, Request, Response, RuntimeEvent, RuntimeEventKind, ScriptFn,
    ScriptRef, Subscribe, WorkerScope,
};

struct LifecyclePrinter;

#[async_trait]
impl Subscribe for LifecyclePrinter {
    async fn on_event(&self, ev: &RuntimeEvent) {
        match ev.kind {
            RuntimeEventKind::WorkerStateChanged => println!(
                "[sub] worker #{} v{} -> {}",
                ev.worker.unwrap_or(0),
                ev.version.unwrap_or(0),
                ev.state.map(|s| s.as_str()).unwrap_or("?")
            ),
            RuntimeEventKind::InstallFailed | RuntimeEventKind::ActivateFailed => println!(
                "[sub] worker #{} failed: {}",
                ev.worker.unwrap_or(0),
                ev.reason.as_deref().unwrap_or("")
            ),
            RuntimeEventKind::UpdateAccepted => println!(
                "[sub] worker #{} adopted v{} in place",
                ev.worker.unwrap_or(0),
                ev.version.unwrap_or(0)
            ),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "lifecycle-printer"
    }

    fn accepts(&self, kind: RuntimeEventKind) -> bool {
        matches!(
            kind,
            RuntimeEventKind::WorkerStateChanged
                | RuntimeEventKind::InstallFailed
                | RuntimeEventKind::ActivateFailed
                | RuntimeEventKind::UpdateAccepted
        )
    }
}

fn version(body: &'static str) -> ScriptRef {
    ScriptFn::arc(body, move |scope: &mut WorkerScope| {
        scope.hot().accept(|next| {
            println!("[app] migrating to {}", next.name());
            Ok(())
        })?;
        scope.on_fetch(move |ev| ev.respond(Response::ok(body)).map_err(ExtensionError::from));
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host = Host::builder(Config::default())
        .with_subscribers(vec![Arc::new(LifecyclePrinter)])
        .build()?;

    host.start(version("v1")).await?;

    let broken = ScriptFn::arc("broken", |_scope: &mut WorkerScope| {
        Err(ExtensionError::fail("does not evaluate"))
    });
    if let Err(e) = host.update(broken).await {
        println!("[demo] update refused: {e}");
    }

    host.update(version("v2")).await?;
    let resp = host.dispatch_request(Request::get("https://app.test/")).await;
    println!("[demo] served: {}", resp.text());

    host.shutdown().await?;
    Ok(())
}
