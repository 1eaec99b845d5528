//! Backend selection by name.
//!
//! The storage only knows [`BackendFactory`]; which one sits behind a
//! configured name is decided by a [`NamedRegistry`] of constructors, so an
//! unknown backend name fails with the list of valid ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::NamedRegistry;
use crate::error::RuntimeError;

use super::backend::CacheBackend;
use super::fs::FsBackend;
use super::memory::MemoryBackend;

/// Creates the backend for each newly opened cache.
pub trait BackendFactory: Send + Sync + 'static {
    /// Short name of the backend kind (`memory`, `fs`, ...).
    fn kind(&self) -> &'static str;

    /// Backend for the cache called `name`.
    fn create(&self, name: &str) -> Result<Arc<dyn CacheBackend>, RuntimeError>;
}

/// Shared factory handle.
pub type FactoryRef = Arc<dyn BackendFactory>;

/// Every cache in its own in-process map.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryFactory;

impl BackendFactory for MemoryFactory {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn create(&self, _name: &str) -> Result<Arc<dyn CacheBackend>, RuntimeError> {
        Ok(Arc::new(MemoryBackend::new()))
    }
}

/// Every cache in its own JSON file under `dir`.
#[derive(Debug, Clone)]
pub struct FsFactory {
    dir: PathBuf,
}

impl FsFactory {
    /// Factory persisting under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BackendFactory for FsFactory {
    fn kind(&self) -> &'static str {
        "fs"
    }

    fn create(&self, name: &str) -> Result<Arc<dyn CacheBackend>, RuntimeError> {
        Ok(Arc::new(FsBackend::new(&self.dir, name)))
    }
}

/// Constructor table of the built-in backends, keyed by kind.
pub fn backend_table(cache_dir: &Path) -> NamedRegistry<FactoryRef> {
    let mut table: NamedRegistry<FactoryRef> = NamedRegistry::new("cache backend");
    table.register("memory", Arc::new(MemoryFactory));
    table.register("fs", Arc::new(FsFactory::new(cache_dir)));
    table
}

/// Resolves the backend kind `name` from the built-in table.
pub fn resolve_backend(name: &str, cache_dir: &Path) -> Result<FactoryRef, RuntimeError> {
    backend_table(cache_dir).open(name)
}
