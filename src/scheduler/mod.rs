//! Turn-based callback scheduling.
//!
//! Provides [`TaskScheduler`], the ordering primitive the rest of the runtime uses
//! for notifications that must become observable *after* the current synchronous
//! step but *before* zero-delay timers queued in the same turn.
//!
//! ## Turn order
//! ```text
//! run_turn()
//!   ├─► micro queue           (drained completely, including nested microtasks)
//!   ├─► scheduled queue       (callbacks present at phase start, each followed by a micro drain)
//!   └─► due timers            (deadline order, FIFO on ties, each followed by a micro drain)
//! ```

mod task_scheduler;

pub use task_scheduler::{Callback, TaskScheduler};
