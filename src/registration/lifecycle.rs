//! # Registration: install/activate/redundant lifecycle of one worker unit.
//!
//! ```text
//! install(script)
//!   ├─ version += 1; new instance (installing) in the installing slot
//!   ├─ evaluate script; fire install; settle
//!   │     ├─ any failure ─► redundant, dispose, InstallFailed, Err(Lifecycle)
//!   │     └─ ok          ─► installed, moved to the waiting slot
//!   └─ a previously waiting instance is retired
//!
//! activate()                                   (explicit, never automatic)
//!   ├─ waiting ─► activating; fire activate; settle
//!   │     ├─ any failure ─► redundant, dispose, ActivateFailed, Err(Lifecycle)
//!   │     └─ ok          ─► active, moved to the active slot
//!   └─ previous active: drain in-flight events ─► redundant ─► dispose
//!
//! update(script)
//!   ├─ active accepted updates ─► migration(script) ─► dispose old code
//!   │                             ─► adopt in place (still active), version += 1
//!   └─ declined / no choice    ─► install(script); the caller activates
//! ```
//!
//! Lifecycle operations are serialized; fetch and message dispatch run
//! concurrently with them against whichever instance is active at the time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use crate::dispatch::{EventData, EventType, Settlement};
use crate::error::RuntimeError;
use crate::events::{RuntimeEvent, RuntimeEventKind};
use crate::http::Request;

use super::hot::{Migration, UpdatePolicy};
use super::scope::{WorkerEnv, evaluate};
use super::script::ScriptRef;
use super::state::WorkerState;
use super::worker::{InFlight, WorkerInstance};

/// What [`Registration::update`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The active instance adopted the new code in place.
    Adopted {
        /// Instance id (unchanged).
        worker: u64,
        /// New registration version.
        version: u64,
    },
    /// A new instance was installed and waits for [`Registration::activate`].
    Installed {
        /// Id of the new instance.
        worker: u64,
        /// Its registration version.
        version: u64,
    },
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<WorkerInstance>>,
    waiting: Option<Arc<WorkerInstance>>,
    active: Option<Arc<WorkerInstance>>,
}

/// One deployed worker unit bound to a scope.
pub struct Registration {
    env: WorkerEnv,
    slots: Mutex<Slots>,
    version: AtomicU64,
    lifecycle: tokio::sync::Mutex<()>,
    unregistered: AtomicBool,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("Registration")
            .field("scope", &self.env.scope)
            .field("version", &self.version())
            .field("installing", &slots.installing.as_ref().map(|w| w.id()))
            .field("waiting", &slots.waiting.as_ref().map(|w| w.id()))
            .field("active", &slots.active.as_ref().map(|w| w.id()))
            .finish()
    }
}

impl Registration {
    /// Empty registration; nothing serves until a script is installed and activated.
    pub fn new(env: WorkerEnv) -> Self {
        Self {
            env,
            slots: Mutex::new(Slots::default()),
            version: AtomicU64::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
            unregistered: AtomicBool::new(false),
        }
    }

    /// Registration scope.
    pub fn scope(&self) -> &str {
        &self.env.scope
    }

    /// Latest version handed out (0 before the first install).
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Instance currently running its install phase, if any.
    pub fn installing(&self) -> Option<Arc<WorkerInstance>> {
        self.slots.lock().installing.clone()
    }

    /// Installed instance parked until the next [`activate`](Self::activate).
    pub fn waiting(&self) -> Option<Arc<WorkerInstance>> {
        self.slots.lock().waiting.clone()
    }

    /// Instance that receives fetch and message events.
    pub fn active(&self) -> Option<Arc<WorkerInstance>> {
        self.slots.lock().active.clone()
    }

    /// Installs `script` as a new instance and parks it in the waiting slot.
    ///
    /// # Errors
    /// - `Lifecycle` if evaluation or install settlement failed; the instance is
    ///   redundant and the active instance keeps serving.
    /// - `InvalidState` after [`unregister`](Self::unregister).
    pub async fn install(&self, script: ScriptRef) -> Result<Arc<WorkerInstance>, RuntimeError> {
        let _serial = self.lifecycle.lock().await;
        self.install_locked(script).await
    }

    /// Promotes the waiting instance to active and retires the previous one.
    ///
    /// # Errors
    /// - `InvalidState` if no instance is waiting.
    /// - `Lifecycle` if activate settlement failed; the previous active instance
    ///   keeps serving.
    pub async fn activate(&self) -> Result<Arc<WorkerInstance>, RuntimeError> {
        let _serial = self.lifecycle.lock().await;
        self.ensure_registered()?;

        let worker = self.slots.lock().waiting.take().ok_or_else(|| {
            RuntimeError::invalid_state(format!("no installed worker is waiting in '{}'", self.scope()))
        })?;
        let pending = Pending::new(self, &worker);
        worker.transition(WorkerState::Activating)?;

        let settlement = worker.run_event(EventType::Activate, EventData::None).await?;
        if settlement.failed() {
            pending.disarm();
            return Err(self.fail(&worker, "activate", settlement.failure_summary()));
        }

        worker.transition(WorkerState::Active)?;
        pending.disarm();
        let previous = self.slots.lock().active.replace(Arc::clone(&worker));
        info!(scope = %self.scope(), worker = worker.id(), version = worker.version(), "worker active");
        if let Some(previous) = previous {
            self.retire(&previous).await;
        }
        Ok(worker)
    }

    /// Delivers new code, honoring the active instance's hot-reload choice.
    ///
    /// # Errors
    /// Same as [`install`](Self::install) when a full replay is needed.
    pub async fn update(&self, script: ScriptRef) -> Result<UpdateOutcome, RuntimeError> {
        let _serial = self.lifecycle.lock().await;
        self.ensure_registered()?;

        if let Some(active) = self.active() {
            match active.update_policy() {
                Some(UpdatePolicy::Accept(migration)) => {
                    match self.adopt(&active, &script, &migration) {
                        Ok(version) => {
                            return Ok(UpdateOutcome::Adopted {
                                worker: active.id(),
                                version,
                            });
                        }
                        Err(reason) => {
                            warn!(scope = %self.scope(), worker = active.id(), %reason, "hot adoption failed; replaying lifecycle");
                        }
                    }
                }
                Some(UpdatePolicy::Decline) => {
                    self.publish(active.event(RuntimeEventKind::UpdateDeclined));
                    info!(scope = %self.scope(), worker = active.id(), "update declined; replaying lifecycle");
                }
                None => {}
            }
        }

        let worker = self.install_locked(script).await?;
        Ok(UpdateOutcome::Installed {
            worker: worker.id(),
            version: worker.version(),
        })
    }

    /// Fires a fetch event at the active instance.
    ///
    /// # Errors
    /// `InvalidState` if no instance is active.
    pub async fn dispatch_fetch(&self, request: Request) -> Result<Settlement, RuntimeError> {
        let (worker, _busy) = self.acquire_active()?;
        worker.fetch(request).await
    }

    /// Fires a message event at the active instance.
    ///
    /// # Errors
    /// `InvalidState` if no instance is active.
    pub async fn post_message(&self, data: Value) -> Result<Settlement, RuntimeError> {
        let (worker, _busy) = self.acquire_active()?;
        worker.message(data).await
    }

    /// Retires every instance. Idempotent; returns whether anything was retired.
    ///
    /// Later lifecycle calls fail with `InvalidState`.
    pub async fn unregister(&self) -> bool {
        let _serial = self.lifecycle.lock().await;
        self.unregistered.store(true, Ordering::SeqCst);

        let retired: Vec<Arc<WorkerInstance>> = {
            let mut slots = self.slots.lock();
            [slots.installing.take(), slots.waiting.take(), slots.active.take()]
                .into_iter()
                .flatten()
                .collect()
        };
        for worker in &retired {
            self.retire(worker).await;
        }
        !retired.is_empty()
    }

    async fn install_locked(&self, script: ScriptRef) -> Result<Arc<WorkerInstance>, RuntimeError> {
        self.ensure_registered()?;

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let worker = WorkerInstance::new(version, Arc::clone(&script), self.env.clone());
        self.slots.lock().installing = Some(Arc::clone(&worker));
        let pending = Pending::new(self, &worker);

        let scope = match evaluate(&script, &self.env) {
            Ok(scope) => scope,
            Err(e) => {
                self.slots.lock().installing = None;
                pending.disarm();
                return Err(self.fail(&worker, "install", e.to_string()));
            }
        };
        worker.load(scope);

        let settlement = worker.run_event(EventType::Install, EventData::None).await;
        self.slots.lock().installing = None;
        let settlement = settlement?;
        if settlement.failed() {
            pending.disarm();
            return Err(self.fail(&worker, "install", settlement.failure_summary()));
        }

        worker.transition(WorkerState::Installed)?;
        pending.disarm();
        let replaced = self.slots.lock().waiting.replace(Arc::clone(&worker));
        info!(scope = %self.scope(), worker = worker.id(), version, script = script.name(), "worker installed");
        if let Some(replaced) = replaced {
            self.retire(&replaced).await;
        }
        Ok(worker)
    }

    /// Hot path: migration, dispose the outgoing code, swap in place.
    fn adopt(
        &self,
        active: &Arc<WorkerInstance>,
        script: &ScriptRef,
        migration: &Migration,
    ) -> Result<u64, String> {
        let scope = evaluate(script, &self.env).map_err(|e| e.to_string())?;
        (migration)(script).map_err(|e| e.to_string())?;

        active.dispose();
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        active.adopt(scope, Arc::clone(script), version);
        self.publish(active.event(RuntimeEventKind::UpdateAccepted));
        info!(scope = %self.scope(), worker = active.id(), version, "update adopted in place");
        Ok(version)
    }

    fn acquire_active(&self) -> Result<(Arc<WorkerInstance>, InFlight), RuntimeError> {
        let slots = self.slots.lock();
        let worker = slots.active.clone().ok_or_else(|| {
            RuntimeError::invalid_state(format!("no active worker in '{}'", self.scope()))
        })?;
        let busy = worker.begin();
        Ok((worker, busy))
    }

    /// Drains, marks redundant and disposes an outgoing instance.
    async fn retire(&self, worker: &Arc<WorkerInstance>) {
        worker.drain().await;
        if !worker.state().is_terminal() {
            if let Err(e) = worker.transition(WorkerState::Redundant) {
                warn!(worker = worker.id(), error = %e, "retirement transition rejected");
            }
        }
        worker.dispose();
    }

    fn fail(&self, worker: &Arc<WorkerInstance>, phase: &'static str, error: String) -> RuntimeError {
        if let Err(e) = worker.transition(WorkerState::Redundant) {
            warn!(worker = worker.id(), error = %e, "failure transition rejected");
        }
        worker.dispose();

        let kind = match phase {
            "install" => RuntimeEventKind::InstallFailed,
            _ => RuntimeEventKind::ActivateFailed,
        };
        self.publish(worker.event(kind).with_reason(error.as_str()));
        warn!(scope = %self.scope(), worker = worker.id(), version = worker.version(), phase, %error, "lifecycle failure");

        RuntimeError::Lifecycle {
            phase,
            worker: worker.id(),
            error,
        }
    }

    fn ensure_registered(&self) -> Result<(), RuntimeError> {
        if self.unregistered.load(Ordering::SeqCst) {
            return Err(RuntimeError::invalid_state(format!(
                "registration '{}' was unregistered",
                self.scope()
            )));
        }
        Ok(())
    }

    fn publish(&self, ev: RuntimeEvent) {
        if let Some(bus) = &self.env.bus {
            bus.publish(ev);
        }
    }
}

/// Retires an instance whose install or activate step never finished,
/// either because it returned early or because its future was dropped.
struct Pending<'a> {
    reg: &'a Registration,
    worker: Option<Arc<WorkerInstance>>,
}

impl<'a> Pending<'a> {
    fn new(reg: &'a Registration, worker: &Arc<WorkerInstance>) -> Self {
        Self {
            reg,
            worker: Some(Arc::clone(worker)),
        }
    }

    fn disarm(mut self) {
        self.worker = None;
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut slots = self.reg.slots.lock();
            if slots.installing.as_ref().is_some_and(|w| Arc::ptr_eq(w, &worker)) {
                slots.installing = None;
            }
        }
        if !worker.state().is_terminal() {
            if let Err(e) = worker.transition(WorkerState::Redundant) {
                warn!(worker = worker.id(), error = %e, "abandoned transition rejected");
            }
        }
        worker.dispose();
        warn!(scope = %self.reg.scope(), worker = worker.id(), version = worker.version(), "lifecycle step abandoned; instance retired");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatch::Outcome;
    use crate::error::ExtensionError;
    use crate::http::Response;
    use crate::registration::scope::testing;
    use crate::registration::{ScriptFn, WorkerScope};

    fn answering(body: &'static str) -> ScriptRef {
        ScriptFn::arc(body, move |scope: &mut WorkerScope| {
            scope.on_fetch(move |ev| {
                ev.respond(Response::ok(body))?;
                Ok(())
            });
            Ok(())
        })
    }

    async fn body(reg: &Registration) -> String {
        let s = reg
            .dispatch_fetch(Request::get("https://app.test/"))
            .await
            .expect("active worker");
        match s.outcome {
            Outcome::Response(r) => r.text(),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn install_then_explicit_activate() {
        let reg = Registration::new(testing::env());
        let w = reg.install(answering("v1")).await.expect("install");
        assert_eq!(w.state(), WorkerState::Installed);
        assert!(reg.active().is_none());
        assert!(reg.dispatch_fetch(Request::get("https://app.test/")).await.is_err());

        reg.activate().await.expect("activate");
        assert_eq!(w.state(), WorkerState::Active);
        assert_eq!(body(&reg).await, "v1");
        assert_eq!(reg.version(), 1);
    }

    #[tokio::test]
    async fn activate_without_waiting_worker_is_invalid() {
        let reg = Registration::new(testing::env());
        let err = reg.activate().await.expect_err("nothing waiting");
        assert_eq!(err.as_label(), "invalid_state");
    }

    #[tokio::test]
    async fn previous_active_retires_after_the_new_one_is_active() {
        let reg = Registration::new(testing::env());
        reg.install(answering("v1")).await.expect("install v1");
        let v1 = reg.activate().await.expect("activate v1");

        let v2 = reg.install(answering("v2")).await.expect("install v2");
        assert_eq!(v1.state(), WorkerState::Active);
        assert_eq!(body(&reg).await, "v1");

        reg.activate().await.expect("activate v2");
        assert_eq!(v1.state(), WorkerState::Redundant);
        assert_eq!(v2.state(), WorkerState::Active);
        assert_eq!(body(&reg).await, "v2");
    }

    #[tokio::test]
    async fn failing_activate_keeps_previous_active() {
        let reg = Registration::new(testing::env());
        reg.install(answering("v1")).await.expect("install v1");
        reg.activate().await.expect("activate v1");

        let broken: ScriptRef = ScriptFn::arc("broken", |scope: &mut WorkerScope| {
            scope.on_activate(|ev| {
                ev.wait_until(async { Err(ExtensionError::fail("migration failed")) })?;
                Ok(())
            });
            Ok(())
        });
        let w = reg.install(broken).await.expect("install");
        let err = reg.activate().await.expect_err("activate rejects");
        assert_eq!(err.as_label(), "lifecycle_failure");
        assert_eq!(w.state(), WorkerState::Redundant);
        assert_eq!(body(&reg).await, "v1");
    }

    #[tokio::test]
    async fn accepted_update_is_adopted_in_place() {
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let migrated = Arc::new(Mutex::new(Vec::new()));

        let d = disposed.clone();
        let m = migrated.clone();
        let v1: ScriptRef = ScriptFn::arc("v1", move |scope: &mut WorkerScope| {
            scope.on_fetch(|ev| {
                ev.respond(Response::ok("v1"))?;
                Ok(())
            });
            let m = m.clone();
            scope.hot().accept(move |next| {
                m.lock().push(next.name().to_string());
                Ok(())
            })?;
            let d = d.clone();
            scope.hot().dispose(move || d.lock().push("v1"));
            Ok(())
        });

        let reg = Registration::new(testing::env());
        reg.install(v1).await.expect("install");
        let active = reg.activate().await.expect("activate");

        let outcome = reg.update(answering("v2")).await.expect("update");
        assert_eq!(
            outcome,
            UpdateOutcome::Adopted {
                worker: active.id(),
                version: 2
            }
        );
        assert_eq!(active.state(), WorkerState::Active);
        assert_eq!(*migrated.lock(), vec!["v2".to_string()]);
        assert_eq!(*disposed.lock(), vec!["v1"]);
        assert_eq!(body(&reg).await, "v2");
    }

    #[tokio::test]
    async fn declined_update_replays_the_lifecycle() {
        let disposed = Arc::new(Mutex::new(0));
        let d = disposed.clone();
        let v1: ScriptRef = ScriptFn::arc("v1", move |scope: &mut WorkerScope| {
            scope.on_fetch(|ev| {
                ev.respond(Response::ok("v1"))?;
                Ok(())
            });
            scope.hot().decline()?;
            let d = d.clone();
            scope.hot().dispose(move || *d.lock() += 1);
            Ok(())
        });

        let reg = Registration::new(testing::env());
        reg.install(v1).await.expect("install");
        let old = reg.activate().await.expect("activate");

        let outcome = reg.update(answering("v2")).await.expect("update");
        assert!(matches!(outcome, UpdateOutcome::Installed { version: 2, .. }));
        assert_eq!(*disposed.lock(), 0);
        assert_eq!(body(&reg).await, "v1");

        reg.activate().await.expect("activate v2");
        assert_eq!(old.state(), WorkerState::Redundant);
        assert_eq!(*disposed.lock(), 1);
    }

    #[tokio::test]
    async fn retirement_waits_for_in_flight_fetch() {
        let slow: ScriptRef = ScriptFn::arc("slow", |scope: &mut WorkerScope| {
            scope.on_fetch(|ev| {
                ev.respond_with(async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok::<_, ExtensionError>(Response::ok("slow"))
                })?;
                Ok(())
            });
            Ok(())
        });
        let reg = Arc::new(Registration::new(testing::env()));
        reg.install(slow).await.expect("install");
        let old = reg.activate().await.expect("activate");

        let r = Arc::clone(&reg);
        let inflight =
            tokio::spawn(async move { r.dispatch_fetch(Request::get("https://app.test/")).await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        reg.install(answering("v2")).await.expect("install v2");
        reg.activate().await.expect("activate v2");
        assert_eq!(old.state(), WorkerState::Redundant);
        assert_eq!(old.in_flight(), 0);

        let s = inflight.await.expect("join").expect("dispatch");
        assert_eq!(s.outcome, Outcome::Response(Response::ok("slow")));
    }

    #[tokio::test]
    async fn abandoned_activate_retires_the_instance() {
        let slow: ScriptRef = ScriptFn::arc("slow-activate", |scope: &mut WorkerScope| {
            scope.on_activate(|ev| {
                ev.wait_until(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
                .map_err(ExtensionError::from)
            });
            Ok(())
        });
        let reg = Registration::new(testing::env());
        reg.install(answering("v1")).await.expect("install v1");
        let v1 = reg.activate().await.expect("activate v1");

        let w = reg.install(slow).await.expect("install slow");
        let timed_out = tokio::time::timeout(Duration::from_millis(20), reg.activate()).await;
        assert!(timed_out.is_err());

        assert_eq!(w.state(), WorkerState::Redundant);
        assert!(reg.waiting().is_none());
        assert_eq!(v1.state(), WorkerState::Active);
        assert_eq!(body(&reg).await, "v1");
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_final() {
        let reg = Registration::new(testing::env());
        reg.install(answering("v1")).await.expect("install");
        let w = reg.activate().await.expect("activate");

        assert!(reg.unregister().await);
        assert!(!reg.unregister().await);
        assert_eq!(w.state(), WorkerState::Redundant);
        assert!(reg.install(answering("v2")).await.is_err());
    }
}
