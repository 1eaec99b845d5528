//! # Worker scripts and the function-backed [`ScriptFn`].
//!
//! A [`WorkerScript`] is the application code of a worker: evaluating it against
//! a fresh [`WorkerScope`] registers the listeners that instance will serve with.
//! It is evaluated once per worker instance, and once more for every in-place
//! hot adoption, so it should not keep state between evaluations.
//!
//! ## Example
//! ```rust
//! use workervisor::{ExtensionError, Response, ScriptFn, ScriptRef, WorkerScope};
//!
//! let script: ScriptRef = ScriptFn::arc("hello", |scope: &mut WorkerScope| {
//!     scope.on_fetch(|ev| {
//!         ev.respond(Response::ok("hello"))?;
//!         Ok(())
//!     });
//!     Ok::<_, ExtensionError>(())
//! });
//! assert_eq!(script.name(), "hello");
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use crate::error::ExtensionError;

use super::scope::WorkerScope;

/// Application code of a worker.
pub trait WorkerScript: Send + Sync + 'static {
    /// Stable, human-readable script name.
    fn name(&self) -> &str;

    /// Registers listeners and hot-reload hooks on `scope`.
    ///
    /// An `Err` (or a panic) fails the install of the instance being built.
    fn evaluate(&self, scope: &mut WorkerScope) -> Result<(), ExtensionError>;
}

/// Shared handle to a script.
pub type ScriptRef = Arc<dyn WorkerScript>;

/// Function-backed script.
#[derive(Debug)]
pub struct ScriptFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ScriptFn<F>
where
    F: Fn(&mut WorkerScope) -> Result<(), ExtensionError> + Send + Sync + 'static,
{
    /// Creates a new function-backed script.
    ///
    /// Prefer [`ScriptFn::arc`] when you immediately need a [`ScriptRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the script and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F> WorkerScript for ScriptFn<F>
where
    F: Fn(&mut WorkerScope) -> Result<(), ExtensionError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, scope: &mut WorkerScope) -> Result<(), ExtensionError> {
        (self.f)(scope)
    }
}
