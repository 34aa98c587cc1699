//! The session's ledger of what the store looked like at the last load or save.
//!
//! A [`MappingContext`] owns the identity map, the property snapshots and the
//! set of relationships known to exist. It is exclusive to one session and
//! performs no internal locking.

use crate::change_tracker::{ChangeTracker, EntityState, NodeSnapshot, RelationshipSnapshot};
use crate::identity_map::IdentityMap;
use graphmodel_core::{
    Direction, EntityRef, Error, MappedRelationship, MappingError, MappingErrorKind, MetaData,
    Result, Value,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Identity map, snapshots and known relationships of one session.
#[derive(Debug)]
pub struct MappingContext {
    metadata: Arc<MetaData>,
    identity_map: IdentityMap,
    tracker: ChangeTracker,
    /// Edges known to exist, in stored orientation.
    relationships: BTreeSet<MappedRelationship>,
}

impl MappingContext {
    pub fn new(metadata: Arc<MetaData>) -> Self {
        Self {
            metadata,
            identity_map: IdentityMap::new(),
            tracker: ChangeTracker::new(),
            relationships: BTreeSet::new(),
        }
    }

    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    /// Persistent identity of `entity` as read through its identity field.
    pub fn identity_of(&self, entity: &EntityRef) -> Result<Option<i64>> {
        let guard = entity.read();
        let descriptor = self.metadata.require(guard.entity_type())?;
        Ok(descriptor.identity_of(&*guard))
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register `entity` under `id`.
    ///
    /// Returns the instance already registered under that identity if there is
    /// one; `entity` is then discarded. Relationship entities are registered in
    /// their own identity namespace.
    #[tracing::instrument(level = "trace", skip(self, entity))]
    pub fn remember(&mut self, entity: EntityRef, id: i64) -> Result<EntityRef> {
        let entity_type = entity.entity_type();
        let descriptor = self.metadata.require(entity_type)?;
        if descriptor.is_relationship_entity() {
            return Ok(self.identity_map.insert_relationship_entity(id, entity));
        }

        let registered = self.identity_map.insert_node(id, entity.clone());
        if registered.ptr_eq(&entity) {
            if let Some(field) = descriptor.primary_index_field() {
                let value = entity.get(field);
                self.identity_map.index_primary(entity_type, &value, id);
            }
        } else {
            tracing::trace!(id, entity_type, "Identity already registered");
        }
        Ok(registered)
    }

    pub fn node(&self, id: i64) -> Option<EntityRef> {
        self.identity_map.node(id)
    }

    pub fn relationship_entity(&self, id: i64) -> Option<EntityRef> {
        self.identity_map.relationship_entity(id)
    }

    pub fn contains_node(&self, id: i64) -> bool {
        self.identity_map.contains_node(id)
    }

    /// Node registered under a primary index value.
    pub fn by_primary_index(&self, entity_type: &str, value: &Value) -> Option<EntityRef> {
        self.identity_map.by_primary_index(entity_type, value)
    }

    /// Identities of registered nodes of one runtime type.
    pub fn ids_of_type(&self, entity_type: &str) -> Vec<i64> {
        self.identity_map.ids_of_type(entity_type)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn snapshot_node(&self, id: i64) -> Option<&NodeSnapshot> {
        self.tracker.node(id)
    }

    pub fn relationship_snapshot(&self, id: i64) -> Option<&RelationshipSnapshot> {
        self.tracker.relationship(id)
    }

    /// Replace the snapshot of node `id`.
    pub fn update_snapshot(&mut self, id: i64, snapshot: NodeSnapshot) {
        self.tracker.snapshot_node(id, snapshot);
    }

    pub fn update_relationship_snapshot(&mut self, snapshot: RelationshipSnapshot) {
        self.tracker.snapshot_relationship(snapshot);
    }

    /// Take a fresh snapshot of `entity`'s current state.
    ///
    /// Nodes also get their primary index entry refreshed. Entities without
    /// identity are ignored.
    pub fn refresh_snapshot(&mut self, entity: &EntityRef) -> Result<()> {
        let state = EntityState::capture(&self.metadata, entity)?;
        let Some(id) = state.id else {
            return Ok(());
        };
        let descriptor = self.metadata.require(state.entity_type)?;
        if descriptor.is_relationship_entity() {
            let relationship = self.mapped_relationship_of(entity, id)?;
            self.tracker
                .snapshot_relationship(RelationshipSnapshot::new(relationship, &state));
            return Ok(());
        }
        if let Some(field) = descriptor.primary_index_field() {
            if self.identity_map.contains_node(id) {
                let value = entity.get(field);
                self.identity_map
                    .index_primary(state.entity_type, &value, id);
            }
        }
        self.tracker.snapshot_node(id, NodeSnapshot::new(id, &state));
        Ok(())
    }

    // ========================================================================
    // Known relationships
    // ========================================================================

    /// Record an edge as existing in the store. Returns false if already known.
    pub fn add_relationship(&mut self, relationship: MappedRelationship) -> bool {
        self.relationships.insert(relationship)
    }

    pub fn remove_relationship(&mut self, relationship: &MappedRelationship) -> bool {
        self.relationships.remove(relationship)
    }

    pub fn contains_relationship(&self, relationship: &MappedRelationship) -> bool {
        self.relationships.contains(relationship)
    }

    /// Whether a plain edge of `rel_type` joins `a` and `b` in either orientation.
    pub fn has_edge_between(&self, a: i64, rel_type: &str, b: i64) -> bool {
        self.relationships.iter().any(|rel| {
            rel.rel_id.is_none()
                && rel.rel_type == rel_type
                && ((rel.start == a && rel.end == b) || (rel.start == b && rel.end == a))
        })
    }

    /// Every known edge of one type.
    pub fn relationships_of_type(&self, rel_type: &str) -> Vec<MappedRelationship> {
        self.relationships
            .iter()
            .filter(|rel| rel.rel_type == rel_type)
            .copied()
            .collect()
    }

    /// Known edges of `rel_type` that an entity of `owner_type` reaches along
    /// `direction`: as start for outgoing, as end for incoming, either for
    /// undirected.
    pub fn relationships_of_type_from(
        &self,
        owner_type: &str,
        rel_type: &str,
        direction: Direction,
    ) -> Vec<MappedRelationship> {
        let owns = |ty: &str| self.metadata.is_assignable(ty, owner_type);
        self.relationships
            .iter()
            .filter(|rel| rel.rel_type == rel_type)
            .filter(|rel| match direction {
                Direction::Outgoing => owns(rel.start_type),
                Direction::Incoming => owns(rel.end_type),
                Direction::Undirected => owns(rel.start_type) || owns(rel.end_type),
            })
            .copied()
            .collect()
    }

    /// Known edges of `rel_type` leaving `node` along `direction`.
    pub fn relationships_for(
        &self,
        node: i64,
        rel_type: &str,
        direction: Direction,
    ) -> Vec<MappedRelationship> {
        self.relationships
            .iter()
            .filter(|rel| rel.rel_type == rel_type && rel.other_end(node, direction).is_some())
            .copied()
            .collect()
    }

    /// Known edges with `node` at either end.
    pub fn relationships_touching(&self, node: i64) -> Vec<MappedRelationship> {
        self.relationships
            .iter()
            .filter(|rel| rel.touches(node))
            .copied()
            .collect()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// The edge a relationship entity describes, read from its endpoint fields.
    ///
    /// Both endpoints must be present and persisted.
    pub fn mapped_relationship_of(
        &self,
        entity: &EntityRef,
        rel_id: i64,
    ) -> Result<MappedRelationship> {
        let entity_type = entity.entity_type();
        let descriptor = self.metadata.require(entity_type)?;
        let (Some(rel_type), Some((start_field, end_field))) =
            (descriptor.relationship_type(), descriptor.endpoint_fields())
        else {
            return Err(Error::Mapping(
                MappingError::new(
                    MappingErrorKind::InvalidMetadata,
                    format!("'{}' is not a relationship entity", entity_type),
                )
                .entity_type(entity_type),
            ));
        };

        let start = self.persisted_endpoint(entity, entity_type, start_field)?;
        let end = self.persisted_endpoint(entity, entity_type, end_field)?;
        Ok(MappedRelationship::new(start.0, rel_type, end.0, start.1, end.1).with_id(rel_id))
    }

    fn persisted_endpoint(
        &self,
        entity: &EntityRef,
        entity_type: &'static str,
        field: &'static str,
    ) -> Result<(i64, &'static str)> {
        let missing = |message: &str| {
            Error::Mapping(
                MappingError::new(MappingErrorKind::MissingRelationshipEndpoint, message)
                    .entity_type(entity_type)
                    .field(field),
            )
        };
        let endpoint = entity
            .related(field)
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| missing("relationship entity has no endpoint"))?;
        let id = self
            .identity_of(&endpoint)?
            .ok_or_else(|| missing("relationship entity endpoint is not persisted"))?;
        Ok((id, endpoint.entity_type()))
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Untrack node `id`: its identity-map entry, snapshot, the edges touching
    /// it and the relationship entities on those edges.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn forget(&mut self, id: i64) -> Option<EntityRef> {
        let removed = self.identity_map.remove_node(id);
        self.tracker.remove_node(id);
        let touching = self.relationships_touching(id);
        for rel in &touching {
            self.relationships.remove(rel);
            if let Some(rel_id) = rel.rel_id {
                self.identity_map.remove_relationship_entity(rel_id);
                self.tracker.remove_relationship(rel_id);
            }
        }
        tracing::debug!(
            relationships = touching.len(),
            "context-del: node and its relationships forgotten"
        );
        removed
    }

    /// Untrack a relationship entity and its edge.
    pub fn forget_relationship_entity(&mut self, rel_id: i64) -> Option<EntityRef> {
        self.relationships.retain(|rel| rel.rel_id != Some(rel_id));
        self.tracker.remove_relationship(rel_id);
        self.identity_map.remove_relationship_entity(rel_id)
    }

    /// Untrack one entity, if it is the instance registered under its identity.
    pub fn detach(&mut self, entity: &EntityRef) -> Result<bool> {
        let Some(id) = self.identity_of(entity)? else {
            return Ok(false);
        };
        if self.metadata.is_relationship_entity(entity.entity_type()) {
            let registered = self
                .identity_map
                .relationship_entity(id)
                .is_some_and(|e| e.ptr_eq(entity));
            if registered {
                self.forget_relationship_entity(id);
            }
            return Ok(registered);
        }
        let registered = self.identity_map.node(id).is_some_and(|e| e.ptr_eq(entity));
        if registered {
            self.forget(id);
        }
        Ok(registered)
    }

    /// Drop all tracked state. Live objects keep their field values.
    pub fn clear(&mut self) {
        self.identity_map.clear();
        self.tracker.clear_all();
        self.relationships.clear();
    }

    /// Number of registered nodes and relationship entities.
    pub fn len(&self) -> usize {
        self.identity_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identity_map.is_empty() && self.relationships.is_empty()
    }
}
