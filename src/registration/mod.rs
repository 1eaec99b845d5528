//! Worker registrations and their lifecycle.
//!
//! - [`Registration`]: installing/waiting/active slots of one scope and the
//!   operations that move instances between them
//! - [`WorkerInstance`]: one evaluated script with its [`WorkerState`]
//! - [`WorkerScript`] / [`ScriptFn`]: application code, evaluated against a [`WorkerScope`]
//! - [`HotContext`]: per-evaluation update policy and disposal hooks

mod hot;
mod lifecycle;
mod scope;
mod script;
mod state;
mod worker;

pub use hot::{HotContext, Migration, UpdatePolicy};
pub use lifecycle::{Registration, UpdateOutcome};
pub use scope::{WorkerEnv, WorkerScope};
pub use script::{ScriptFn, ScriptRef, WorkerScript};
pub use state::WorkerState;
pub use worker::{StateObserver, WorkerInstance};
