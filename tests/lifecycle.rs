use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use workervisor::{
    BroadcastRelay, BroadcastTransport, CacheStorage, CacheStorageApi, EventData, EventDispatcher,
    EventType, ExtendableEvent, ExtensionError, Listener, LocalHub, MemoryFactory, Outcome,
    Registration, Request, Response, ScriptFn, ScriptRef, TaskScheduler, UpdateOutcome, WorkerEnv,
    WorkerScope, WorkerState,
};

fn registration() -> (Registration, Arc<TaskScheduler>) {
    let caches: Arc<dyn CacheStorageApi> = Arc::new(CacheStorage::new(Arc::new(MemoryFactory)));
    let hub: Arc<dyn BroadcastTransport> = LocalHub::new(16);
    let scheduler = TaskScheduler::new();
    let env = WorkerEnv::new("/", caches, BroadcastRelay::new(hub), Arc::clone(&scheduler));
    (Registration::new(env), scheduler)
}

fn responder(body: &'static str) -> ScriptRef {
    ScriptFn::arc(body, move |scope: &mut WorkerScope| {
        scope.on_fetch(move |ev| ev.respond(Response::ok(body)).map_err(ExtensionError::from));
        Ok(())
    })
}

async fn fetch_text(reg: &Registration) -> String {
    let settlement = reg
        .dispatch_fetch(Request::get("https://app.test/"))
        .await
        .unwrap();
    settlement.into_response().text()
}

#[tokio::test]
async fn statechange_observers_follow_the_worker() {
    let (reg, scheduler) = registration();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = reg.install(responder("v1")).await.unwrap();
    let log = Arc::clone(&seen);
    first.on_statechange(move |state| log.lock().push(state));

    reg.activate().await.unwrap();
    reg.install(responder("v2")).await.unwrap();
    reg.activate().await.unwrap();
    scheduler.run_until_idle();

    assert_eq!(
        *seen.lock(),
        vec![WorkerState::Activating, WorkerState::Active, WorkerState::Redundant]
    );
    assert_eq!(fetch_text(&reg).await, "v2");
}

#[tokio::test]
async fn evaluation_failure_never_installs() {
    let (reg, _scheduler) = registration();
    let broken = ScriptFn::arc("broken", |_scope: &mut WorkerScope| {
        Err(ExtensionError::fail("syntax error"))
    });

    let err = reg.install(broken).await.unwrap_err();
    assert_eq!(err.as_label(), "lifecycle_failure");
    assert!(reg.installing().is_none());
    assert!(reg.waiting().is_none());
}

#[tokio::test]
async fn accepted_update_swaps_code_in_place() {
    let (reg, _scheduler) = registration();
    let disposed = Arc::new(AtomicUsize::new(0));
    let migrated = Arc::new(AtomicUsize::new(0));

    let script = |body: &'static str| {
        let disposed = Arc::clone(&disposed);
        let migrated = Arc::clone(&migrated);
        ScriptFn::arc(body, move |scope: &mut WorkerScope| {
            let disposed = Arc::clone(&disposed);
            let migrated = Arc::clone(&migrated);
            scope.hot().accept(move |_next| {
                migrated.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })?;
            scope.hot().dispose(move || {
                disposed.fetch_add(1, Ordering::SeqCst);
            });
            scope.on_fetch(move |ev| ev.respond(Response::ok(body)).map_err(ExtensionError::from));
            Ok(())
        })
    };

    let worker = reg.install(script("v1")).await.unwrap();
    reg.activate().await.unwrap();

    let outcome = reg.update(script("v2")).await.unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Adopted {
            worker: worker.id(),
            version: 2
        }
    );
    assert_eq!(migrated.load(Ordering::SeqCst), 1);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert_eq!(worker.state(), WorkerState::Active);
    assert_eq!(fetch_text(&reg).await, "v2");
}

#[tokio::test]
async fn declined_update_replays_the_lifecycle() {
    let (reg, _scheduler) = registration();
    let script = |body: &'static str| {
        ScriptFn::arc(body, move |scope: &mut WorkerScope| {
            scope.hot().decline()?;
            scope.on_fetch(move |ev| ev.respond(Response::ok(body)).map_err(ExtensionError::from));
            Ok(())
        })
    };

    let first = reg.install(script("v1")).await.unwrap();
    reg.activate().await.unwrap();

    let outcome = reg.update(script("v2")).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::Installed { .. }));
    assert_eq!(fetch_text(&reg).await, "v1");

    reg.activate().await.unwrap();
    assert_eq!(first.state(), WorkerState::Redundant);
    assert_eq!(fetch_text(&reg).await, "v2");
}

#[tokio::test]
async fn install_waits_for_every_extension() {
    let (reg, _scheduler) = registration();
    let done = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&done);
    let slow = ScriptFn::arc("slow", move |scope: &mut WorkerScope| {
        let counter = Arc::clone(&counter);
        scope.on_install(move |ev| {
            let counter = Arc::clone(&counter);
            ev.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .map_err(ExtensionError::from)
        });
        Ok(())
    });

    reg.install(slow).await.unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unregistered_registration_refuses_new_work() {
    let (reg, _scheduler) = registration();
    reg.install(responder("v1")).await.unwrap();
    reg.activate().await.unwrap();

    assert!(reg.unregister().await);
    assert!(!reg.unregister().await);

    assert!(reg.dispatch_fetch(Request::get("https://app.test/")).await.is_err());
    let err = reg.install(responder("v2")).await.unwrap_err();
    assert_eq!(err.as_label(), "invalid_state");
}

#[tokio::test]
async fn extensions_may_chain_while_one_is_pending() {
    let dispatcher = EventDispatcher::new();
    let request = Request::get("https://app.test/");
    let event = dispatcher.create_event(EventType::Fetch, EventData::Request(request));

    let listener: Listener = Arc::new(|ev: &ExtendableEvent| {
        let chained = ev.clone();
        ev.wait_until(async move {
            tokio::task::yield_now().await;
            chained
                .respond(Response::ok("late"))
                .map_err(ExtensionError::from)
        })
        .map_err(ExtensionError::from)
    });

    let settlement = dispatcher
        .dispatch_and_settle(&event, &[listener])
        .await
        .unwrap();
    assert_eq!(settlement.outcome, Outcome::Response(Response::ok("late")));
    assert!(!event.is_active());

    let err = event.wait_until(async { Ok(()) }).unwrap_err();
    assert_eq!(err.as_label(), "invalid_state");
}
