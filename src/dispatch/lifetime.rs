//! # Lifetime-extension tracking for one event.
//!
//! A counted-completion set: every accepted extension increments `pending`,
//! every finished one decrements it. The set is growable until the single
//! explicit [`close`](Lifetime::close) call; after that, new extensions are
//! accepted only while another extension is still pending, so a tracked
//! extension can always register follow-up work from its own continuation.
//!
//! Waiting is a `watch` on the phase: `wait` resolves once the phase is
//! closed and nothing is pending.

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::ExtensionError;

use super::dispatcher::UnhandledExtension;

#[derive(Clone, Copy, Debug)]
struct Phase {
    open: bool,
    pending: usize,
    registered: usize,
}

pub(crate) struct Lifetime {
    phase: watch::Sender<Phase>,
    rejected: Mutex<Vec<UnhandledExtension>>,
}

impl Lifetime {
    pub(crate) fn new() -> Self {
        let (phase, _rx) = watch::channel(Phase {
            open: true,
            pending: 0,
            registered: 0,
        });
        Self {
            phase,
            rejected: Mutex::new(Vec::new()),
        }
    }

    /// Accepts a new extension if the phase is open or another extension is pending.
    ///
    /// Returns the extension's registration index.
    pub(crate) fn try_register(&self) -> Option<usize> {
        let mut index = None;
        self.phase.send_if_modified(|p| {
            if p.open || p.pending > 0 {
                index = Some(p.registered);
                p.registered += 1;
                p.pending += 1;
                true
            } else {
                false
            }
        });
        index
    }

    /// Records the outcome of extension `index` and releases its slot.
    pub(crate) fn finish(&self, index: usize, result: Result<(), ExtensionError>) {
        if let Err(error) = result {
            self.rejected.lock().push(UnhandledExtension { index, error });
        }
        self.phase.send_modify(|p| p.pending = p.pending.saturating_sub(1));
    }

    /// Closes the dispatch phase. Idempotent.
    pub(crate) fn close(&self) {
        self.phase.send_if_modified(|p| {
            let was_open = p.open;
            p.open = false;
            was_open
        });
    }

    /// True while new extensions would be accepted.
    pub(crate) fn is_active(&self) -> bool {
        let p = *self.phase.borrow();
        p.open || p.pending > 0
    }

    pub(crate) fn is_open(&self) -> bool {
        self.phase.borrow().open
    }

    /// Number of extensions accepted so far.
    pub(crate) fn registered(&self) -> usize {
        self.phase.borrow().registered
    }

    /// Resolves once the phase is closed and every extension finished.
    pub(crate) async fn wait(&self) {
        let mut rx = self.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|p| !p.open && p.pending == 0).await;
    }

    /// Drains recorded rejections ordered by registration index.
    pub(crate) fn take_rejected(&self) -> Vec<UnhandledExtension> {
        let mut rejected = std::mem::take(&mut *self.rejected.lock());
        rejected.sort_by_key(|u| u.index);
        rejected
    }
}
