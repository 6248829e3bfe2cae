//! Keyed store backend
//!
//! The fabric talks to any keyed store supporting string set/get, hash
//! set/get, list append/range/delete, atomic numeric increment, and TTL.
//! The in-memory backend below implements those semantics for local runs
//! and tests; a networked store can be swapped in behind the same trait.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::FabricError;

/// Minimal keyed-store operations the fabric requires.
///
/// All values are strings; numeric fields are stringified floats or
/// integers. Every operation may fail with `FabricError::Unavailable` when
/// the store cannot be reached within the bounded timeout.
pub trait FabricBackend {
    fn set(&mut self, key: &str, value: &str) -> Result<(), FabricError>;
    fn get(&mut self, key: &str) -> Result<Option<String>, FabricError>;

    fn hset(&mut self, key: &str, fields: &[(String, String)]) -> Result<(), FabricError>;
    fn hgetall(&mut self, key: &str) -> Result<BTreeMap<String, String>, FabricError>;

    fn rpush(&mut self, key: &str, value: &str) -> Result<(), FabricError>;
    fn lrange(&mut self, key: &str) -> Result<Vec<String>, FabricError>;

    fn del(&mut self, key: &str) -> Result<(), FabricError>;

    /// Atomic read-modify-write increment of a stringified float.
    /// Returns the new value.
    fn incr_by_float(&mut self, key: &str, delta: f64) -> Result<f64, FabricError>;

    /// Attach a time-to-live to a key.
    fn expire(&mut self, key: &str, ttl: Duration) -> Result<(), FabricError>;

    /// Drop every key.
    fn flush(&mut self) -> Result<(), FabricError>;
}

/// In-memory keyed store with TTL support.
#[derive(Debug, Default)]
pub struct MemoryStore {
    strings: HashMap<String, String>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    lists: HashMap<String, Vec<String>>,
    expiries: HashMap<String, Instant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_if_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expiries.get(key) {
            if Instant::now() >= *deadline {
                self.expiries.remove(key);
                self.strings.remove(key);
                self.hashes.remove(key);
                self.lists.remove(key);
            }
        }
    }
}

impl FabricBackend for MemoryStore {
    fn set(&mut self, key: &str, value: &str) -> Result<(), FabricError> {
        self.purge_if_expired(key);
        self.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, FabricError> {
        self.purge_if_expired(key);
        Ok(self.strings.get(key).cloned())
    }

    fn hset(&mut self, key: &str, fields: &[(String, String)]) -> Result<(), FabricError> {
        self.purge_if_expired(key);
        let hash = self.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn hgetall(&mut self, key: &str) -> Result<BTreeMap<String, String>, FabricError> {
        self.purge_if_expired(key);
        Ok(self.hashes.get(key).cloned().unwrap_or_default())
    }

    fn rpush(&mut self, key: &str, value: &str) -> Result<(), FabricError> {
        self.purge_if_expired(key);
        self.lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    fn lrange(&mut self, key: &str) -> Result<Vec<String>, FabricError> {
        self.purge_if_expired(key);
        Ok(self.lists.get(key).cloned().unwrap_or_default())
    }

    fn del(&mut self, key: &str) -> Result<(), FabricError> {
        self.strings.remove(key);
        self.hashes.remove(key);
        self.lists.remove(key);
        self.expiries.remove(key);
        Ok(())
    }

    fn incr_by_float(&mut self, key: &str, delta: f64) -> Result<f64, FabricError> {
        self.purge_if_expired(key);
        let current = self
            .strings
            .get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        let next = current + delta;
        self.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> Result<(), FabricError> {
        self.expiries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FabricError> {
        self.strings.clear();
        self.hashes.clear();
        self.lists.clear();
        self.expiries.clear();
        Ok(())
    }
}
