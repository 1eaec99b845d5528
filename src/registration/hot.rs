//! # Hot-reload hooks of one evaluated script.
//!
//! Each evaluation of a script gets its own [`HotContext`]; that is one update
//! cycle. During the cycle the code may either
//! - `decline()` updates, which forces a full install/activate replay, or
//! - `accept(migration)`, which adopts the replacement in place while the worker
//!   stays `active`.
//!
//! Choosing both is an `InvalidState` error. Disposal hooks registered with
//! `dispose(cleanup)` run once, on either path, right before the code is discarded.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ExtensionError, RuntimeError};

use super::script::ScriptRef;

/// Migration invoked with the replacement script before it is adopted.
pub type Migration = Arc<dyn Fn(&ScriptRef) -> Result<(), ExtensionError> + Send + Sync>;

type Disposer = Box<dyn FnOnce() + Send>;

/// How the running code wants to receive an update.
#[derive(Clone)]
pub enum UpdatePolicy {
    /// Replay the whole install/activate lifecycle.
    Decline,
    /// Adopt the replacement in place after running the migration.
    Accept(Migration),
}

impl fmt::Debug for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::Decline => f.write_str("Decline"),
            UpdatePolicy::Accept(_) => f.write_str("Accept(..)"),
        }
    }
}

#[derive(Default)]
struct HotState {
    policy: Option<UpdatePolicy>,
    disposers: Vec<Disposer>,
    disposed: bool,
}

/// Update/disposal hooks registered by one evaluation of a script.
///
/// Cloning shares the same hooks, so listeners can keep a handle.
#[derive(Clone, Default)]
pub struct HotContext {
    inner: Arc<Mutex<HotState>>,
}

impl fmt::Debug for HotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("HotContext")
            .field("policy", &st.policy)
            .field("disposers", &st.disposers.len())
            .field("disposed", &st.disposed)
            .finish()
    }
}

impl HotContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adopt updates in place; `migration` sees the replacement script first.
    ///
    /// Accepting again replaces the migration.
    ///
    /// # Errors
    /// `InvalidState` if updates were already declined in this cycle.
    pub fn accept<F>(&self, migration: F) -> Result<(), RuntimeError>
    where
        F: Fn(&ScriptRef) -> Result<(), ExtensionError> + Send + Sync + 'static,
    {
        let mut st = self.inner.lock();
        if matches!(st.policy, Some(UpdatePolicy::Decline)) {
            return Err(RuntimeError::invalid_state(
                "updates were already declined in this cycle",
            ));
        }
        st.policy = Some(UpdatePolicy::Accept(Arc::new(migration)));
        Ok(())
    }

    /// Force a full lifecycle replay on the next update.
    ///
    /// # Errors
    /// `InvalidState` if updates were already accepted in this cycle.
    pub fn decline(&self) -> Result<(), RuntimeError> {
        let mut st = self.inner.lock();
        if matches!(st.policy, Some(UpdatePolicy::Accept(_))) {
            return Err(RuntimeError::invalid_state(
                "updates were already accepted in this cycle",
            ));
        }
        st.policy = Some(UpdatePolicy::Decline);
        Ok(())
    }

    /// Registers cleanup to run right before this code is discarded.
    ///
    /// Hooks registered after disposal run immediately.
    pub fn dispose<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut st = self.inner.lock();
        if st.disposed {
            drop(st);
            cleanup();
            return;
        }
        st.disposers.push(Box::new(cleanup));
    }

    /// Current choice, if any.
    pub fn policy(&self) -> Option<UpdatePolicy> {
        self.inner.lock().policy.clone()
    }

    /// True once the disposal hooks ran.
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Marks the context disposed and hands out its hooks, in registration order.
    ///
    /// Returns `None` if it was already disposed.
    pub(crate) fn take_disposers(&self) -> Option<Vec<Box<dyn FnOnce() + Send>>> {
        let mut st = self.inner.lock();
        if st.disposed {
            return None;
        }
        st.disposed = true;
        Some(std::mem::take(&mut st.disposers))
    }
}
