//! Registry of running mirrors

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use pv_core::config::{MirrorConfig, SecurityConfig};
use pv_core::PivotError;

use crate::mirror::{Mirror, MirrorHandle};

/// Running mirrors indexed by name
pub struct MirrorRegistry {
    mirrors: DashMap<String, MirrorHandle>,
}

impl MirrorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            mirrors: DashMap::new(),
        }
    }

    /// Start a mirror unless one with the same name is already running
    ///
    /// An already running mirror's handle is returned as-is.
    pub async fn start(
        &self,
        config: MirrorConfig,
        security: &SecurityConfig,
    ) -> Result<MirrorHandle, PivotError> {
        if let Some(existing) = self.get(&config.name) {
            tracing::info!("Mirror {} already running", config.name);
            return Ok(existing);
        }

        let ctx = security.resolve()?;
        let mirror = Mirror::new(config, ctx)?;
        let name = mirror.name().to_string();
        let handle = mirror.start().await;

        // Another start for the same name may have won the race meanwhile
        let existing = match self.mirrors.entry(name) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(handle.clone());
                None
            }
        };

        match existing {
            Some(existing) => {
                handle.shutdown().await;
                Ok(existing)
            }
            None => Ok(handle),
        }
    }

    /// Get a mirror by name
    pub fn get(&self, name: &str) -> Option<MirrorHandle> {
        self.mirrors.get(name).map(|r| r.value().clone())
    }

    /// Names of all registered mirrors
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mirrors.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered mirrors
    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Stop a mirror and remove it; `false` if no such mirror
    pub async fn stop(&self, name: &str) -> bool {
        match self.mirrors.remove(name) {
            Some((_, handle)) => {
                tracing::info!("Stopping mirror {}", name);
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop every mirror
    pub async fn shutdown_all(&self) {
        for name in self.names() {
            self.stop(&name).await;
        }
    }
}

impl Default for MirrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
