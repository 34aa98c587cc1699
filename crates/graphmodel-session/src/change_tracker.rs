//! Change tracking and dirty detection for GraphModel sessions.
//!
//! Every persisted entity the session knows about has a snapshot of its
//! converted property map, labels and version as of the last load or save.
//! [`DirtyChecker`] compares the live entity against that baseline.

use crate::mapping_context::MappingContext;
use graphmodel_core::{
    Direction, EntityRef, MappedRelationship, MetaData, PropertyMap, RelationshipField, Result,
    Value,
};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

// ============================================================================
// Current state
// ============================================================================

/// Converted, storable view of a live entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub entity_type: &'static str,
    pub id: Option<i64>,
    /// Static labels from the type chain followed by dynamic labels.
    pub labels: Vec<String>,
    /// Property key to converted value; NULL for unset fields.
    pub properties: PropertyMap,
    pub version: Option<i64>,
}

impl EntityState {
    /// Read and convert the mapped fields of `entity`.
    ///
    /// Fails when the runtime type is not registered or a converter rejects a
    /// value.
    pub fn capture(metadata: &MetaData, entity: &EntityRef) -> Result<Self> {
        let guard = entity.read();
        let entity_type = guard.entity_type();
        let descriptor = metadata.require(entity_type)?;

        let mut properties = PropertyMap::new();
        for info in descriptor.properties() {
            let value = info.to_graph(entity_type, &guard.get(info.field))?;
            properties.insert(info.property.to_string(), value);
        }

        let mut labels: Vec<String> = descriptor
            .labels()
            .iter()
            .map(|label| (*label).to_string())
            .collect();
        if let Some(field) = descriptor.labels_field() {
            for label in guard.get(field).string_items() {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
        }

        Ok(Self {
            entity_type,
            id: descriptor.identity_of(&*guard),
            labels,
            properties,
            version: descriptor
                .version_field()
                .and_then(|field| guard.get(field).as_i64()),
        })
    }

    /// Properties with a value, as written by a create statement.
    pub fn stored_properties(&self) -> PropertyMap {
        self.properties
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Properties whose value in `after` differs from `before`.
///
/// A key missing on one side compares as NULL.
pub fn changed_between(before: &PropertyMap, after: &PropertyMap) -> PropertyMap {
    let mut changed = PropertyMap::new();
    for (key, value) in after {
        if before.get(key).unwrap_or(&Value::Null) != value {
            changed.insert(key.clone(), value.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            changed.insert(key.clone(), Value::Null);
        }
    }
    changed
}

// ============================================================================
// Snapshots
// ============================================================================

/// Last known persisted state of a node.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: i64,
    pub entity_type: &'static str,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
    pub version: Option<i64>,
    taken_at: Instant,
}

impl NodeSnapshot {
    pub fn new(id: i64, state: &EntityState) -> Self {
        Self {
            id,
            entity_type: state.entity_type,
            labels: state.labels.clone(),
            properties: state.properties.clone(),
            version: state.version,
            taken_at: Instant::now(),
        }
    }

    /// Get the timestamp when the snapshot was taken.
    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// Labels in `current` but not in the snapshot, and the reverse.
    pub fn label_changes(&self, current: &[String]) -> (Vec<String>, Vec<String>) {
        let added = current
            .iter()
            .filter(|label| !self.labels.contains(label))
            .cloned()
            .collect();
        let removed = self
            .labels
            .iter()
            .filter(|label| !current.contains(label))
            .cloned()
            .collect();
        (added, removed)
    }
}

/// Last known persisted state of a relationship entity.
#[derive(Debug, Clone)]
pub struct RelationshipSnapshot {
    /// The edge as stored, including its identity.
    pub relationship: MappedRelationship,
    pub entity_type: &'static str,
    pub properties: PropertyMap,
    pub version: Option<i64>,
    taken_at: Instant,
}

impl RelationshipSnapshot {
    pub fn new(relationship: MappedRelationship, state: &EntityState) -> Self {
        Self {
            relationship,
            entity_type: state.entity_type,
            properties: state.properties.clone(),
            version: state.version,
            taken_at: Instant::now(),
        }
    }

    /// Get the timestamp when the snapshot was taken.
    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }
}

/// Stores snapshots keyed by node identity and relationship identity.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    nodes: HashMap<i64, NodeSnapshot>,
    relationships: HashMap<i64, RelationshipSnapshot>,
}

impl ChangeTracker {
    /// Create a new empty change tracker.
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(level = "trace", skip(self, snapshot))]
    pub fn snapshot_node(&mut self, id: i64, mut snapshot: NodeSnapshot) {
        tracing::trace!(
            entity_type = snapshot.entity_type,
            properties = snapshot.properties.len(),
            "Taking node snapshot"
        );
        snapshot.id = id;
        self.nodes.insert(id, snapshot);
    }

    pub fn snapshot_relationship(&mut self, snapshot: RelationshipSnapshot) {
        if let Some(id) = snapshot.relationship.rel_id {
            self.relationships.insert(id, snapshot);
        }
    }

    pub fn node(&self, id: i64) -> Option<&NodeSnapshot> {
        self.nodes.get(&id)
    }

    pub fn relationship(&self, id: i64) -> Option<&RelationshipSnapshot> {
        self.relationships.get(&id)
    }

    pub fn remove_node(&mut self, id: i64) -> Option<NodeSnapshot> {
        self.nodes.remove(&id)
    }

    pub fn remove_relationship(&mut self, id: i64) -> Option<RelationshipSnapshot> {
        self.relationships.remove(&id)
    }

    /// Clear all snapshots.
    pub fn clear_all(&mut self) {
        self.nodes.clear();
        self.relationships.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

// ============================================================================
// Dirty checking
// ============================================================================

/// Relationship changes of one field (or group of fields sharing an edge).
#[derive(Debug, Default)]
pub struct RelationshipDelta {
    /// Current targets with no matching known edge (including new targets).
    pub added: Vec<EntityRef>,
    /// Known edges whose far end is no longer referenced.
    pub removed: Vec<MappedRelationship>,
}

impl RelationshipDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compares live entities against the snapshots of a [`MappingContext`].
#[derive(Debug, Clone, Copy)]
pub struct DirtyChecker<'a> {
    context: &'a MappingContext,
}

impl<'a> DirtyChecker<'a> {
    pub fn new(context: &'a MappingContext) -> Self {
        Self { context }
    }

    /// Whether `entity` needs a write.
    ///
    /// True for entities without identity or without a snapshot (evicted);
    /// otherwise true when a converted property or a label differs. A
    /// relationship entity is also dirty when either endpoint changed.
    #[tracing::instrument(level = "trace", skip(self, entity))]
    pub fn is_dirty(&self, entity: &EntityRef) -> Result<bool> {
        let metadata = self.context.metadata();
        let state = EntityState::capture(metadata, entity)?;
        let Some(id) = state.id else {
            tracing::trace!(dirty = true, "No identity - treating as dirty");
            return Ok(true);
        };

        if metadata.is_relationship_entity(state.entity_type) {
            let Some(snapshot) = self.context.relationship_snapshot(id) else {
                return Ok(true);
            };
            if !changed_between(&snapshot.properties, &state.properties).is_empty() {
                return Ok(true);
            }
            let current = self.context.mapped_relationship_of(entity, id).ok();
            let moved = current.is_none_or(|rel| {
                rel.start != snapshot.relationship.start || rel.end != snapshot.relationship.end
            });
            return Ok(moved);
        }

        let Some(snapshot) = self.context.snapshot_node(id) else {
            tracing::trace!(id, dirty = true, "No snapshot - treating as dirty");
            return Ok(true);
        };
        let (added, removed) = snapshot.label_changes(&state.labels);
        let dirty = !added.is_empty()
            || !removed.is_empty()
            || !changed_between(&snapshot.properties, &state.properties).is_empty();
        tracing::trace!(id, dirty, "Dirty check result");
        Ok(dirty)
    }

    /// Changed properties of `entity`; every property when there is no
    /// baseline to compare against.
    pub fn changed_properties(&self, entity: &EntityRef) -> Result<PropertyMap> {
        let metadata = self.context.metadata();
        let state = EntityState::capture(metadata, entity)?;
        let baseline = state.id.and_then(|id| {
            if metadata.is_relationship_entity(state.entity_type) {
                self.context
                    .relationship_snapshot(id)
                    .map(|s| &s.properties)
            } else {
                self.context.snapshot_node(id).map(|s| &s.properties)
            }
        });
        Ok(match baseline {
            Some(before) => changed_between(before, &state.properties),
            None => state.properties,
        })
    }

    /// Added and removed edges of one relationship field.
    pub fn relationship_delta(
        &self,
        entity: &EntityRef,
        field: &RelationshipField,
    ) -> Result<RelationshipDelta> {
        let id = self.context.identity_of(entity)?;
        match id {
            Some(id) => self.relationship_delta_for(entity, id, std::slice::from_ref(field)),
            None => Ok(RelationshipDelta {
                added: entity.related(field.field).into_vec(),
                removed: Vec::new(),
            }),
        }
    }

    /// Delta of a group of fields that map the same edges: same relationship
    /// type, direction and declared target. An edge is retained while any
    /// field of the group still references its far end.
    pub fn relationship_delta_for(
        &self,
        entity: &EntityRef,
        id: i64,
        fields: &[RelationshipField],
    ) -> Result<RelationshipDelta> {
        let Some(first) = fields.first() else {
            return Ok(RelationshipDelta::default());
        };
        let metadata = self.context.metadata();
        let via_entity = metadata.holds_relationship_entities(first.target_type);

        let mut targets: Vec<EntityRef> = Vec::new();
        for field in fields {
            for target in entity.related(field.field).into_vec() {
                if !targets.iter().any(|t| t.ptr_eq(&target)) {
                    targets.push(target);
                }
            }
        }

        let known: Vec<MappedRelationship> = self
            .context
            .relationships_for(id, first.rel_type, first.direction)
            .into_iter()
            .filter(|rel| rel.rel_id.is_some() == via_entity)
            .filter(|rel| {
                via_entity
                    || rel
                        .other_end(id, first.direction)
                        .is_some_and(|(_, ty)| metadata.is_assignable(ty, first.target_type))
            })
            .collect();

        // Identities the current targets contribute: relationship identities
        // for relationship entities, far-end node identities otherwise.
        let mut current_ids = HashSet::new();
        let mut delta = RelationshipDelta::default();
        for target in targets {
            let target_id = self.context.identity_of(&target)?;
            let is_known = target_id.is_some_and(|tid| {
                current_ids.insert(tid);
                known.iter().any(|rel| {
                    if via_entity {
                        rel.rel_id == Some(tid)
                    } else {
                        far_end(rel, id, first.direction) == Some(tid)
                    }
                })
            });
            if !is_known {
                delta.added.push(target);
            }
        }
        for rel in known {
            let key = if via_entity {
                rel.rel_id
            } else {
                far_end(&rel, id, first.direction)
            };
            if key.is_none_or(|k| !current_ids.contains(&k)) {
                delta.removed.push(rel);
            }
        }
        Ok(delta)
    }
}

fn far_end(rel: &MappedRelationship, id: i64, direction: Direction) -> Option<i64> {
    rel.other_end(id, direction).map(|(other, _)| other)
}
