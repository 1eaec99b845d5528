//! Error types used by the workervisor runtime and by worker code.
//!
//! This module defines two main error enums:
//!
//! - [`RuntimeError`]: errors raised by the runtime itself (dispatch contract
//!   violations, lifecycle failures, cache and relay failures, lookups).
//! - [`ExtensionError`]: errors returned by listeners and lifetime extensions.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging/metrics.
//! Only the flat `as_message` string of a [`RuntimeError`] ever crosses a relay
//! boundary.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the workervisor runtime.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// API contract violation local to one dispatch or object
    /// (double response, late extension, disposed cache, illegal transition).
    #[error("invalid state: {reason}")]
    InvalidState {
        /// What was violated.
        reason: String,
    },

    /// A named resource does not exist.
    #[error("{what} '{name}' not found; available: {available:?}")]
    NotFound {
        /// Resource class (`bucket`, `platform`, `cache`, ...).
        what: &'static str,
        /// Requested name.
        name: String,
        /// Registered names at the time of the lookup.
        available: Vec<String>,
    },

    /// Argument rejected by an operation (e.g. caching a non-GET request).
    #[error("type error: {reason}")]
    Type {
        /// Why the argument was rejected.
        reason: String,
    },

    /// The underlying message channel failed (closed, serialization, deadline).
    #[error("relay transport failed: {error}")]
    RelayTransport {
        /// Flat transport error message.
        error: String,
    },

    /// A persistent backend could not read or write its data.
    #[error("cache storage failed: {error}")]
    Storage {
        /// Flat I/O or decoding error message.
        error: String,
    },

    /// The authoritative owner rejected a relayed call; only its message survives.
    #[error("{message}")]
    Remote {
        /// Message produced by the owner context.
        message: String,
    },

    /// Install or activate settlement failed; the worker became redundant.
    #[error("{phase} failed for worker #{worker}: {error}")]
    Lifecycle {
        /// Lifecycle phase (`install` or `activate`).
        phase: &'static str,
        /// Worker instance id.
        worker: u64,
        /// Joined extension failure messages.
        error: String,
    },

    /// Shutdown grace period was exceeded; some contexts did not drain in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Contexts that did not finish draining.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Shorthand for [`RuntimeError::InvalidState`].
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        RuntimeError::InvalidState {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`RuntimeError::Type`].
    pub fn type_error(reason: impl Into<String>) -> Self {
        RuntimeError::Type {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`RuntimeError::RelayTransport`].
    pub fn transport(error: impl Into<String>) -> Self {
        RuntimeError::RelayTransport {
            error: error.into(),
        }
    }

    /// Shorthand for [`RuntimeError::Storage`].
    pub fn storage(error: impl std::fmt::Display) -> Self {
        RuntimeError::Storage {
            error: error.to_string(),
        }
    }

    /// Builds a [`RuntimeError::NotFound`] with a sorted list of available names.
    pub fn not_found<I, S>(what: &'static str, name: impl Into<String>, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut available: Vec<String> = available.into_iter().map(Into::into).collect();
        available.sort_unstable();
        RuntimeError::NotFound {
            what,
            name: name.into(),
            available,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use workervisor::RuntimeError;
    ///
    /// let err = RuntimeError::invalid_state("respond_with called twice");
    /// assert_eq!(err.as_label(), "invalid_state");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InvalidState { .. } => "invalid_state",
            RuntimeError::NotFound { .. } => "not_found",
            RuntimeError::Type { .. } => "type_error",
            RuntimeError::RelayTransport { .. } => "relay_transport",
            RuntimeError::Storage { .. } => "storage",
            RuntimeError::Remote { .. } => "remote",
            RuntimeError::Lifecycle { .. } => "lifecycle_failure",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }

    /// Returns the flat, human-readable message.
    ///
    /// This is what the cache owner sends back in a `cache:error` frame.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::Remote { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// True for the NotFound class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }
}

/// # Errors produced by listener and extension code.
///
/// A listener returning `Err` is the equivalent of a thrown exception: it is
/// reported and the remaining listeners still run. An extension future
/// resolving to `Err` is recorded as an unhandled extension rejection.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    /// The operation failed.
    #[error("rejected: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The extension or listener panicked.
    #[error("panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },
}

impl ExtensionError {
    /// Shorthand for [`ExtensionError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        ExtensionError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use workervisor::ExtensionError;
    ///
    /// let err = ExtensionError::fail("boom");
    /// assert_eq!(err.as_label(), "extension_rejected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ExtensionError::Fail { .. } => "extension_rejected",
            ExtensionError::Panicked { .. } => "extension_panicked",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ExtensionError::Fail { error } => error.clone(),
            ExtensionError::Panicked { info } => format!("panic: {info}"),
        }
    }
}

impl From<RuntimeError> for ExtensionError {
    fn from(err: RuntimeError) -> Self {
        ExtensionError::Fail {
            error: err.as_message(),
        }
    }
}

/// # Errors produced while reading [`Config`](crate::Config) from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value cannot be parsed.
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        /// Environment variable name.
        key: &'static str,
        /// Raw value found.
        value: String,
        /// What was expected.
        reason: &'static str,
    },
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_sorted_names() {
        let err = RuntimeError::not_found("bucket", "assets", ["zeta", "alpha"]);
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "bucket 'assets' not found; available: [\"alpha\", \"zeta\"]"
        );
    }

    #[test]
    fn remote_message_is_passed_through_flat() {
        let err = RuntimeError::Remote {
            message: "invalid state: cache 'v1' is disposed".into(),
        };
        assert_eq!(err.as_message(), "invalid state: cache 'v1' is disposed");
        assert_eq!(err.as_label(), "remote");
    }

    #[test]
    fn runtime_error_converts_into_extension_failure() {
        let ext: ExtensionError = RuntimeError::type_error("only GET can be cached").into();
        assert_eq!(ext, ExtensionError::fail("type error: only GET can be cached"));
    }
}
