//! # WorkerInstance: one evaluated copy of a script plus its lifecycle state.
//!
//! An instance tracks how many events are running against it, so retirement
//! can wait for them before the instance turns `redundant`. State changes are
//! published on the bus right away and handed to `statechange` observers
//! through the [`TaskScheduler`](crate::TaskScheduler), in transition order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::dispatch::{EventData, EventDispatcher, EventType, Listeners, Settlement};
use crate::error::{RuntimeError, panic_message};
use crate::events::{RuntimeEvent, RuntimeEventKind};
use crate::http::Request;

use super::hot::{HotContext, UpdatePolicy};
use super::scope::{WorkerEnv, WorkerScope};
use super::script::ScriptRef;
use super::state::{WorkerState, check_transition};

static WORKER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Callback notified with each new state of an instance.
pub type StateObserver = Arc<dyn Fn(WorkerState) + Send + Sync>;

/// One worker instance.
pub struct WorkerInstance {
    id: u64,
    version: AtomicU64,
    script: Mutex<ScriptRef>,
    state: Mutex<WorkerState>,
    listeners: RwLock<Listeners>,
    hot: Mutex<HotContext>,
    observers: Mutex<Vec<StateObserver>>,
    in_flight: watch::Sender<usize>,
    env: WorkerEnv,
}

impl std::fmt::Debug for WorkerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerInstance")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("state", &self.state())
            .field("script", &self.script_name())
            .finish()
    }
}

/// Keeps an instance counted as busy until dropped.
pub(crate) struct InFlight {
    worker: Arc<WorkerInstance>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.worker.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl WorkerInstance {
    /// New instance in `installing`, with no listeners yet.
    pub(crate) fn new(version: u64, script: ScriptRef, env: WorkerEnv) -> Arc<Self> {
        let (in_flight, _) = watch::channel(0);
        let worker = Arc::new(Self {
            id: WORKER_SEQ.fetch_add(1, Ordering::Relaxed),
            version: AtomicU64::new(version),
            script: Mutex::new(script),
            state: Mutex::new(WorkerState::Installing),
            listeners: RwLock::new(Listeners::new()),
            hot: Mutex::new(HotContext::new()),
            observers: Mutex::new(Vec::new()),
            in_flight,
            env,
        });
        worker.publish_state(WorkerState::Installing);
        worker
    }

    /// Process-unique instance id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registration version of the code this instance currently runs.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// Name of the script this instance currently runs.
    pub fn script_name(&self) -> String {
        self.script.lock().name().to_string()
    }

    /// Number of events currently running against this instance.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Hot-reload hooks of the code this instance currently runs.
    pub fn hot(&self) -> HotContext {
        self.hot.lock().clone()
    }

    /// Registers a `statechange` observer.
    ///
    /// Notifications are delivered through the scheduler, so they become
    /// visible on the turn after the transition.
    pub fn on_statechange<F>(&self, observer: F)
    where
        F: Fn(WorkerState) + Send + Sync + 'static,
    {
        self.observers.lock().push(Arc::new(observer));
    }

    pub(crate) fn update_policy(&self) -> Option<UpdatePolicy> {
        self.hot.lock().policy()
    }

    /// Installs the listeners and hooks of an evaluated scope.
    pub(crate) fn load(&self, scope: WorkerScope) {
        let (listeners, hot) = scope.into_parts();
        *self.listeners.write() = listeners;
        *self.hot.lock() = hot;
    }

    /// Swaps in new code without leaving the current state.
    pub(crate) fn adopt(&self, scope: WorkerScope, script: ScriptRef, version: u64) {
        self.load(scope);
        *self.script.lock() = script;
        self.version.store(version, Ordering::SeqCst);
    }

    /// Validated transition; publishes and schedules observer notifications.
    pub(crate) fn transition(&self, next: WorkerState) -> Result<(), RuntimeError> {
        {
            let mut state = self.state.lock();
            check_transition(self.id, *state, next)?;
            *state = next;
        }
        debug!(worker = self.id, version = self.version(), state = next.as_str(), "worker state changed");
        self.publish_state(next);

        let observers: Vec<StateObserver> = self.observers.lock().clone();
        for observer in observers {
            self.env.scheduler.schedule(move || observer(next));
        }
        Ok(())
    }

    /// Counts the instance as busy until the guard drops.
    pub(crate) fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.send_modify(|n| *n += 1);
        InFlight {
            worker: Arc::clone(self),
        }
    }

    /// Dispatches one event and waits for it to settle.
    pub(crate) async fn run_event(
        &self,
        kind: EventType,
        data: EventData,
    ) -> Result<Settlement, RuntimeError> {
        let mut dispatcher = EventDispatcher::new().with_worker(self.id);
        if let Some(bus) = &self.env.bus {
            dispatcher = dispatcher.with_bus(bus.clone());
        }
        let listeners = self.listeners.read().for_kind(kind).to_vec();
        let event = dispatcher.create_event(kind, data);
        dispatcher.dispatch_and_settle(&event, &listeners).await
    }

    /// Fires a fetch event for `request`.
    pub(crate) async fn fetch(&self, request: Request) -> Result<Settlement, RuntimeError> {
        self.run_event(EventType::Fetch, EventData::Request(request))
            .await
    }

    /// Fires a message event carrying `data`.
    pub(crate) async fn message(&self, data: Value) -> Result<Settlement, RuntimeError> {
        self.run_event(EventType::Message, EventData::Message(data))
            .await
    }

    /// Waits until no event is running against this instance.
    pub(crate) async fn drain(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Runs the disposal hooks of the current code once.
    ///
    /// Returns false if they already ran.
    pub(crate) fn dispose(&self) -> bool {
        let Some(hooks) = self.hot.lock().take_disposers() else {
            return false;
        };
        for hook in hooks {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(hook)) {
                warn!(worker = self.id, panic = %panic_message(&*payload), "dispose hook panicked");
            }
        }
        if let Some(bus) = &self.env.bus {
            bus.publish(self.event(RuntimeEventKind::WorkerDisposed));
        }
        true
    }

    pub(crate) fn event(&self, kind: RuntimeEventKind) -> RuntimeEvent {
        RuntimeEvent::new(kind)
            .with_worker(self.id)
            .with_version(self.version())
            .with_context(Arc::clone(&self.env.scope))
    }

    fn publish_state(&self, state: WorkerState) {
        if let Some(bus) = &self.env.bus {
            bus.publish(self.event(RuntimeEventKind::WorkerStateChanged).with_state(state));
        }
    }
}
