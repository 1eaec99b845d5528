//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for a [`Host`](crate::Host).
//!
//! Config is used in two ways:
//! 1. **Host creation**: `HostBuilder::new(config)`
//! 2. **Environment overlay**: `Config::from_env()` reads `WORKERVISOR_*` variables
//!    on top of [`Config::default`]
//!
//! ## Sentinel values
//! - `relay_timeout = 0s` → relay calls wait forever
//! - `grace = 0s` → do not wait for contexts to drain on shutdown; in-flight
//!   events finish on their own and shutdown returns once the caches are disposed
//! - `pool_size` is ignored for [`Topology::Single`]
//!
//! ## Environment variables
//! | Variable | Field | Format |
//! |---|---|---|
//! | `WORKERVISOR_GRACE_MS` | `grace` | milliseconds |
//! | `WORKERVISOR_BUS_CAPACITY` | `bus_capacity` | integer |
//! | `WORKERVISOR_BROADCAST_CAPACITY` | `broadcast_capacity` | integer |
//! | `WORKERVISOR_RELAY_CAPACITY` | `relay_capacity` | integer |
//! | `WORKERVISOR_RELAY_TIMEOUT_MS` | `relay_timeout` | milliseconds |
//! | `WORKERVISOR_TOPOLOGY` | `topology` | `single` or `pool` |
//! | `WORKERVISOR_POOL_SIZE` | `pool_size` | integer, at least 1 |
//! | `WORKERVISOR_CACHE_BACKEND` | `cache_backend` | backend name |
//! | `WORKERVISOR_CACHE_DIR` | `cache_dir` | path |
//! | `WORKERVISOR_PLATFORM` | `platform` | platform name |
//! | `WORKERVISOR_HOST` | `host` | host name |
//! | `WORKERVISOR_PORT` | `port` | `u16` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// How worker contexts are laid out inside a host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Topology {
    /// One context; the cache storage is used directly.
    #[default]
    Single,
    /// `pool_size` contexts sharing no memory; caches go through a relay owner.
    Pool,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Single => "single",
            Topology::Pool => "pool",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Topology::Single),
            "pool" => Ok(Topology::Pool),
            _ => Err(()),
        }
    }
}

/// Global configuration for the host runtime.
///
/// ## Field semantics
/// - `grace`: Maximum wait for contexts to drain on shutdown
/// - `bus_capacity`: Runtime event bus ring size (min 1; clamped by Bus)
/// - `broadcast_capacity`: Ring size of each broadcast channel
/// - `relay_capacity`: Queue size of the cache owner inbox and of each reply queue
/// - `relay_timeout`: Per-call deadline of relayed cache calls (`0s` = none)
/// - `topology` / `pool_size`: context layout
/// - `cache_backend` / `cache_dir`: which backend caches are stored in
/// - `platform` / `host` / `port`: which platform adapter serves requests, and where
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over sentinel checks.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for a graceful shutdown.
    ///
    /// If exceeded, shutdown returns `RuntimeError::GraceExceeded`.
    pub grace: Duration,

    /// Capacity of the runtime event bus.
    ///
    /// Slow subscribers that lag behind skip older events.
    pub bus_capacity: usize,

    /// Capacity of each broadcast channel ring.
    pub broadcast_capacity: usize,

    /// Capacity of the cache relay queues.
    pub relay_capacity: usize,

    /// Deadline of one relayed cache call; `Duration::ZERO` = no deadline.
    pub relay_timeout: Duration,

    /// Context layout.
    pub topology: Topology,

    /// Number of contexts for [`Topology::Pool`].
    pub pool_size: usize,

    /// Cache backend name (`memory`, `fs`).
    pub cache_backend: String,

    /// Directory used by the `fs` backend.
    pub cache_dir: PathBuf,

    /// Platform adapter name (`loopback` is built in).
    pub platform: String,

    /// Host name passed to the platform server.
    pub host: String,

    /// Port passed to the platform server.
    pub port: u16,
}

impl Config {
    /// Returns the relay deadline as an `Option`.
    ///
    /// - `None` → wait forever
    /// - `Some(d)` → each call fails after `d`
    #[inline]
    pub fn relay_deadline(&self) -> Option<Duration> {
        if self.relay_timeout == Duration::ZERO {
            None
        } else {
            Some(self.relay_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Number of contexts the topology creates.
    #[inline]
    pub fn context_count(&self) -> usize {
        match self.topology {
            Topology::Single => 1,
            Topology::Pool => self.pool_size.max(1),
        }
    }

    /// Default config overlaid with `WORKERVISOR_*` environment variables.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] for a set variable that cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Default config overlaid with values from `lookup` (same keys as [`from_env`](Self::from_env)).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "WORKERVISOR_GRACE_MS", "milliseconds")? {
            cfg.grace = Duration::from_millis(ms);
        }
        if let Some(n) = parse(&lookup, "WORKERVISOR_BUS_CAPACITY", "an integer")? {
            cfg.bus_capacity = n;
        }
        if let Some(n) = parse(&lookup, "WORKERVISOR_BROADCAST_CAPACITY", "an integer")? {
            cfg.broadcast_capacity = n;
        }
        if let Some(n) = parse(&lookup, "WORKERVISOR_RELAY_CAPACITY", "an integer")? {
            cfg.relay_capacity = n;
        }
        if let Some(ms) = parse::<u64>(&lookup, "WORKERVISOR_RELAY_TIMEOUT_MS", "milliseconds")? {
            cfg.relay_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("WORKERVISOR_TOPOLOGY") {
            cfg.topology = raw.parse().map_err(|()| ConfigError::Invalid {
                key: "WORKERVISOR_TOPOLOGY",
                value: raw.clone(),
                reason: "expected `single` or `pool`",
            })?;
        }
        if let Some(n) = parse::<usize>(&lookup, "WORKERVISOR_POOL_SIZE", "an integer")? {
            if n == 0 {
                return Err(ConfigError::Invalid {
                    key: "WORKERVISOR_POOL_SIZE",
                    value: n.to_string(),
                    reason: "pool needs at least one context",
                });
            }
            cfg.pool_size = n;
        }
        if let Some(name) = non_empty(&lookup, "WORKERVISOR_CACHE_BACKEND")? {
            cfg.cache_backend = name;
        }
        if let Some(dir) = non_empty(&lookup, "WORKERVISOR_CACHE_DIR")? {
            cfg.cache_dir = PathBuf::from(dir);
        }
        if let Some(name) = non_empty(&lookup, "WORKERVISOR_PLATFORM")? {
            cfg.platform = name;
        }
        if let Some(host) = non_empty(&lookup, "WORKERVISOR_HOST")? {
            cfg.host = host;
        }
        if let Some(port) = parse(&lookup, "WORKERVISOR_PORT", "a port number")? {
            cfg.port = port;
        }
        Ok(cfg)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    reason: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key,
                value: raw,
                reason,
            }),
    }
}

fn non_empty(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<String>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must not be empty",
        }),
        Some(raw) => Ok(Some(raw.trim().to_string())),
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`, `broadcast_capacity = 256`, `relay_capacity = 128`
    /// - `relay_timeout = 0s` (no deadline)
    /// - `topology = single`, `pool_size = 4`
    /// - `cache_backend = "memory"`, `cache_dir = "./.workervisor/cache"`
    /// - `platform = "loopback"` on `127.0.0.1:8787`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            broadcast_capacity: 256,
            relay_capacity: 128,
            relay_timeout: Duration::ZERO,
            topology: Topology::Single,
            pool_size: 4,
            cache_backend: "memory".to_string(),
            cache_dir: PathBuf::from("./.workervisor/cache"),
            platform: "loopback".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}
