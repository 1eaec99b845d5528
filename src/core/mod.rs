//! Runtime core: host wiring and lifecycle.
//!
//! Internal modules:
//! - [`host`]: owns the contexts, drives start/update, serves requests, drains on shutdown;
//! - [`builder`]: resolves platform and cache backend by name and assembles a [`Host`];
//! - [`context`]: one worker context (scheduler, broadcast endpoint, registration);
//! - [`platform`]: platform adapters and the built-in loopback server;
//! - [`config`]: global settings and their environment overlay;
//! - [`registry`]: name → handle tables with fail-fast lookup;
//! - [`shutdown`]: termination signal handling.

mod builder;
mod config;
mod context;
mod host;
mod platform;
mod registry;
mod shutdown;

pub use builder::HostBuilder;
pub use config::{Config, Topology};
pub use context::ExecutionContext;
pub use host::Host;
pub use platform::{
    Handler, Loopback, Platform, PlatformRef, Server, ServerOptions, platform_table,
};
pub use registry::NamedRegistry;
