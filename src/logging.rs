//! `tracing` setup for binaries and tests embedding the runtime.
//!
//! The library itself only emits through `tracing` macros; installing a
//! subscriber is left to the embedding application. [`init`] is a convenience
//! for the common case.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the filter directive.
pub const FILTER_ENV: &str = "WORKERVISOR_LOG";

/// Installs a stderr fmt subscriber filtered by `WORKERVISOR_LOG`.
///
/// Falls back to `default_directive` (or `info`) when the variable is unset or
/// unparsable. Returns `false` if a global subscriber was already installed.
pub fn init(default_directive: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive.unwrap_or("info")));

    let layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let _ = init(Some("warn"));
        assert!(!init(Some("debug")));
    }
}
