//! Storage seam for cassette contents

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::request::HttpInteraction;
use crate::{Result, TapedeckError};

/// Loads and saves the interactions of named cassettes
///
/// The serialization format is up to the implementation.
pub trait CassettePersister: Send + Sync {
    /// Interactions stored under `name`; empty if nothing was stored yet
    ///
    /// # Errors
    ///
    /// Returns error if stored data cannot be read
    fn load(&self, name: &str) -> Result<Vec<HttpInteraction>>;

    /// Replace the interactions stored under `name`
    ///
    /// # Errors
    ///
    /// Returns error if data cannot be written
    fn save(&self, name: &str, interactions: Vec<HttpInteraction>) -> Result<()>;
}

/// Persister that keeps cassettes in memory
#[derive(Default)]
pub struct MemoryPersister {
    cassettes: DashMap<String, Vec<HttpInteraction>>,
    saves: AtomicUsize,
}

impl MemoryPersister {
    /// Create an empty persister
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cassette
    pub fn insert(&self, name: &str, interactions: Vec<HttpInteraction>) {
        self.cassettes.insert(name.to_string(), interactions);
    }

    /// Stored interactions of an existing cassette
    ///
    /// # Errors
    ///
    /// Returns `CassetteNotFound` if nothing is stored under `name`
    pub fn fetch(&self, name: &str) -> Result<Vec<HttpInteraction>> {
        self.cassettes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TapedeckError::CassetteNotFound(name.to_string()))
    }

    /// Number of stored cassettes
    #[must_use]
    pub fn len(&self) -> usize {
        self.cassettes.len()
    }

    /// Whether no cassette is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cassettes.is_empty()
    }

    /// Number of completed saves
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CassettePersister for MemoryPersister {
    fn load(&self, name: &str) -> Result<Vec<HttpInteraction>> {
        Ok(self
            .cassettes
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn save(&self, name: &str, interactions: Vec<HttpInteraction>) -> Result<()> {
        debug!("Saving cassette '{}': {} interactions", name, interactions.len());
        self.cassettes.insert(name.to_string(), interactions);
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
