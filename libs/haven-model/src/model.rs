//! Models and the Model Store
//!
//! A [`Model`] is one authoritative entity instance: an immutable address
//! plus a mutable attribute map. Models are owned by a [`ModelStore`] and
//! mutated only through committed updates, which report the set of attributes
//! that actually changed so callers can broadcast value-change events.

use crate::address::Address;
use crate::attributes::{AttributeMap, AttributeValue};
use crate::error::{ModelError, Result};
use crate::predicate::Predicate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One committed attribute change on a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelChange {
    /// Address of the changed model
    pub address: Address,
    /// Attribute key that changed
    pub key: String,
    /// Previous value, if the attribute existed
    pub old: Option<AttributeValue>,
    /// Committed value
    pub new: AttributeValue,
}

/// Entity model: immutable address, mutable namespaced attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    address: Address,
    attributes: AttributeMap,
}

impl Model {
    /// Create a model with the given address and initial attributes
    pub fn new(address: Address, attributes: AttributeMap) -> Self {
        Self { address, attributes }
    }

    /// The model's immutable address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Read-only view of the attributes
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Shorthand attribute read
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Shorthand required text read
    pub fn require_text(&self, key: &str) -> Result<&str> {
        self.attributes.require_text(key)
    }

    /// Apply a batch of attribute writes, returning the changes that took
    /// effect. Writes that leave the stored value untouched produce no change.
    pub fn apply(&mut self, changes: AttributeMap) -> Vec<ModelChange> {
        let mut applied = Vec::new();
        for (key, new) in changes {
            let old = self.attributes.get(&key).cloned();
            if old.as_ref() == Some(&new) {
                continue;
            }
            self.attributes.set(key.clone(), new.clone());
            applied.push(ModelChange {
                address: self.address.clone(),
                key,
                old,
                new,
            });
        }
        applied
    }
}

/// Queryable, mutable set of models keyed by address
///
/// Implementations must be safe for concurrent use across places; exclusive
/// per-place access is the responsibility of the place executor, not the
/// store.
pub trait ModelStore: Send + Sync {
    /// Fetch a model snapshot by address
    fn get(&self, address: &Address) -> Option<Model>;

    /// Fetch snapshots of every model matching the predicate
    fn models(&self, predicate: &Predicate) -> Vec<Model>;

    /// Insert a model, failing if the address is taken
    fn insert(&self, model: Model) -> Result<()>;

    /// Commit attribute changes against the model at the address
    fn update(&self, address: &Address, changes: AttributeMap) -> Result<Vec<ModelChange>>;

    /// Remove a model, returning it if present
    fn remove(&self, address: &Address) -> Option<Model>;
}

/// In-memory model store
///
/// DashMap-backed for concurrent access across place actors. Used in tests
/// and as the cache tier in front of external persistence.
#[derive(Default)]
pub struct MemoryModelStore {
    models: DashMap<Address, Model>,
}

impl MemoryModelStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of models held
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// True when the store holds no models
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelStore for MemoryModelStore {
    fn get(&self, address: &Address) -> Option<Model> {
        self.models.get(address).map(|m| m.clone())
    }

    fn models(&self, predicate: &Predicate) -> Vec<Model> {
        let mut matched: Vec<Model> = self
            .models
            .iter()
            .filter(|entry| predicate.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        // Deterministic ordering for callers that fan commands out
        matched.sort_by(|a, b| a.address().cmp(b.address()));
        matched
    }

    fn insert(&self, model: Model) -> Result<()> {
        let address = model.address().clone();
        if self.models.contains_key(&address) {
            return Err(ModelError::AlreadyExists(address));
        }
        debug!(%address, "model inserted");
        self.models.insert(address, model);
        Ok(())
    }

    fn update(&self, address: &Address, changes: AttributeMap) -> Result<Vec<ModelChange>> {
        let mut entry = self
            .models
            .get_mut(address)
            .ok_or_else(|| ModelError::NotFound(address.clone()))?;
        let applied = entry.apply(changes);
        if !applied.is_empty() {
            debug!(%address, changed = applied.len(), "model updated");
        }
        Ok(applied)
    }

    fn remove(&self, address: &Address) -> Option<Model> {
        self.models.remove(address).map(|(_, m)| m)
    }
}
