//! # Named registry: `open(name) -> handle`.
//!
//! Backs every "pick an implementation by name" lookup in the runtime
//! (cache backends, platforms). Names are unique; registering an existing
//! name replaces its handle. Lookups of unregistered names fail with
//! `NotFound` carrying the sorted list of registered names.

use std::collections::BTreeMap;

use crate::error::RuntimeError;

/// Handles keyed by name.
#[derive(Clone, Debug)]
pub struct NamedRegistry<T> {
    what: &'static str,
    entries: BTreeMap<String, T>,
}

impl<T: Clone> NamedRegistry<T> {
    /// Empty registry; `what` names the resource class in errors.
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            entries: BTreeMap::new(),
        }
    }

    /// Registers `handle` under `name`, returning the handle it replaced.
    pub fn register(&mut self, name: impl Into<String>, handle: T) -> Option<T> {
        self.entries.insert(name.into(), handle)
    }

    /// Returns the handle registered under `name`.
    ///
    /// # Errors
    /// `NotFound` listing the registered names.
    pub fn open(&self, name: &str) -> Result<T, RuntimeError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(self.what, name, self.names()))
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_returns_registered_handle_or_not_found() {
        let mut reg = NamedRegistry::new("bucket");
        assert_eq!(reg.register("assets", 1), None);
        assert_eq!(reg.register("assets", 2), Some(1));
        reg.register("uploads", 3);

        assert_eq!(reg.open("assets"), Ok(2));
        assert!(reg.contains("uploads"));

        let err = reg.open("missing").expect_err("not registered");
        assert_eq!(
            err.to_string(),
            "bucket 'missing' not found; available: [\"assets\", \"uploads\"]"
        );
    }
}
