//! Identity Map for tracking unique entity instances per persistent identity.
//!
//! The Identity Map ensures that each node (and each relationship entity) in
//! the store corresponds to exactly one live [`EntityRef`] within a session:
//!
//! - **Uniqueness**: the same identity always resolves to the same instance
//! - **Consistency**: changes made through one handle are visible everywhere
//! - **Lookup**: nodes can also be found by type or by primary index value
//!
//! Node and relationship identities are separate namespaces in a property
//! graph store, so they are kept in separate tables.

use graphmodel_core::{EntityRef, Value};
use std::collections::{BTreeSet, HashMap};

/// Key of a primary index entry: registered type plus the rendered value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    entity_type: String,
    value: String,
}

impl IndexKey {
    fn new(entity_type: &str, value: &Value) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            value: value.to_json().to_string(),
        }
    }
}

/// Identity Map for nodes and relationship entities.
#[derive(Debug, Default)]
pub struct IdentityMap {
    nodes: HashMap<i64, EntityRef>,
    relationship_entities: HashMap<i64, EntityRef>,
    /// Node identities per runtime type.
    types: HashMap<&'static str, BTreeSet<i64>>,
    primary_index: HashMap<IndexKey, i64>,
    /// Reverse of `primary_index`, for removal.
    indexed_by: HashMap<i64, IndexKey>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node instance under `id`.
    ///
    /// If an instance is already registered under that identity, it is returned
    /// and `entity` is discarded. Otherwise `entity` is registered and returned.
    pub fn insert_node(&mut self, id: i64, entity: EntityRef) -> EntityRef {
        if let Some(existing) = self.nodes.get(&id) {
            return existing.clone();
        }
        self.types
            .entry(entity.entity_type())
            .or_default()
            .insert(id);
        self.nodes.insert(id, entity.clone());
        entity
    }

    /// Register a relationship entity instance under its relationship identity.
    ///
    /// Same semantics as [`insert_node`](Self::insert_node).
    pub fn insert_relationship_entity(&mut self, id: i64, entity: EntityRef) -> EntityRef {
        self.relationship_entities
            .entry(id)
            .or_insert(entity)
            .clone()
    }

    pub fn node(&self, id: i64) -> Option<EntityRef> {
        self.nodes.get(&id).cloned()
    }

    pub fn relationship_entity(&self, id: i64) -> Option<EntityRef> {
        self.relationship_entities.get(&id).cloned()
    }

    pub fn contains_node(&self, id: i64) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn contains_relationship_entity(&self, id: i64) -> bool {
        self.relationship_entities.contains_key(&id)
    }

    /// Identity under which this exact instance is registered as a node.
    pub fn node_id_of(&self, entity: &EntityRef) -> Option<i64> {
        self.nodes
            .iter()
            .find(|(_, e)| e.ptr_eq(entity))
            .map(|(id, _)| *id)
    }

    /// Record the primary index value of a registered node.
    ///
    /// A later registration of the same value for the same type replaces the
    /// earlier entry.
    pub fn index_primary(&mut self, entity_type: &str, value: &Value, id: i64) {
        if value.is_null() {
            return;
        }
        self.unindex(id);
        let key = IndexKey::new(entity_type, value);
        if let Some(previous) = self.primary_index.insert(key.clone(), id) {
            self.indexed_by.remove(&previous);
        }
        self.indexed_by.insert(id, key);
    }

    /// Look a node up by its primary index value.
    pub fn by_primary_index(&self, entity_type: &str, value: &Value) -> Option<EntityRef> {
        let id = self.primary_index.get(&IndexKey::new(entity_type, value))?;
        self.node(*id)
    }

    fn unindex(&mut self, id: i64) {
        if let Some(key) = self.indexed_by.remove(&id) {
            self.primary_index.remove(&key);
        }
    }

    /// Identities of registered nodes of one runtime type, ascending.
    pub fn ids_of_type(&self, entity_type: &str) -> Vec<i64> {
        self.types
            .get(entity_type)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a node.
    ///
    /// # Returns
    ///
    /// The instance that was registered, if any.
    pub fn remove_node(&mut self, id: i64) -> Option<EntityRef> {
        let removed = self.nodes.remove(&id)?;
        if let Some(ids) = self.types.get_mut(removed.entity_type()) {
            ids.remove(&id);
        }
        self.unindex(id);
        Some(removed)
    }

    pub fn remove_relationship_entity(&mut self, id: i64) -> Option<EntityRef> {
        self.relationship_entities.remove(&id)
    }

    /// Clear all entries from the identity map.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.relationship_entities.clear();
        self.types.clear();
        self.primary_index.clear();
        self.indexed_by.clear();
    }

    /// Number of registered nodes and relationship entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() + self.relationship_entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationship_entities.is_empty()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
