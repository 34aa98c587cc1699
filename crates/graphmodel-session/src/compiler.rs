//! Graph compiler: turns object graphs into change sets.
//!
//! A save walks the graph breadth-first from the roots. Each node is keyed by
//! its persistent identity, or by the address of its instance while it has
//! none, and compiled at most once; cycles and self-references therefore
//! terminate on the second encounter. Relationship edges are collected while
//! walking and resolved once every reachable node has a [`NodeRef`], keyed by
//! (start, type, end) so an edge reachable from both of its ends is written
//! once. Removed edges are read from the mapping context, never from the
//! current object state.

use crate::change_tracker::{DirtyChecker, EntityState, changed_between};
use crate::flush::FlushOrderer;
use crate::mapping_context::MappingContext;
use graphmodel_core::{
    ChangeSet, CreateNode, CreateRelationship, DeleteNode, DeleteRelationship, Direction,
    EntityDescriptor, EntityRef, Error, MappedRelationship, MappingError, MappingErrorKind,
    MetaData, NodeRef, Operation, PropertyMap, RelationshipField, Result, UpdateNode,
    UpdateRelationship, VersionCheck,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Which properties an `UpdateNode` or `UpdateRelationshipProperties` carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyUpdatePolicy {
    /// Only properties whose converted value differs from the snapshot.
    #[default]
    ChangedOnly,
    /// Every mapped property.
    Full,
}

/// Options of one compilation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Traversal horizon; `None` walks the whole reachable graph.
    pub depth: Option<usize>,
    pub property_updates: PropertyUpdatePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VisitKey {
    Persisted(i64),
    Transient(usize),
}

/// A relationship field value seen during traversal, resolved after the walk.
#[derive(Debug)]
struct Link {
    from: NodeRef,
    from_type: &'static str,
    field: RelationshipField,
    target: EntityRef,
}

/// Compiles save and delete calls against one mapping context.
#[derive(Debug)]
pub struct GraphCompiler<'a> {
    context: &'a MappingContext,
    options: CompileOptions,
    queue: VecDeque<(EntityRef, usize)>,
    nodes: HashMap<VisitKey, (NodeRef, &'static str)>,
    relationship_entities: HashSet<VisitKey>,
    next_reference: usize,
    operations: Vec<Operation>,
    links: Vec<Link>,
    pending: Vec<EntityRef>,
    /// Persisted nodes whose relationship fields were walked.
    traversed: Vec<(EntityRef, i64)>,
    dropped: HashSet<MappedRelationship>,
}

impl<'a> GraphCompiler<'a> {
    pub fn new(context: &'a MappingContext) -> Self {
        Self::with_options(context, CompileOptions::default())
    }

    pub fn with_options(context: &'a MappingContext, options: CompileOptions) -> Self {
        Self {
            context,
            options,
            queue: VecDeque::new(),
            nodes: HashMap::new(),
            relationship_entities: HashSet::new(),
            next_reference: 0,
            operations: Vec::new(),
            links: Vec::new(),
            pending: Vec::new(),
            traversed: Vec::new(),
            dropped: HashSet::new(),
        }
    }

    fn metadata(&self) -> &'a MetaData {
        self.context.metadata()
    }

    fn next_token(&mut self) -> usize {
        let token = self.next_reference;
        self.next_reference += 1;
        token
    }

    fn within_horizon(&self, depth: usize) -> bool {
        self.options.depth.is_none_or(|horizon| depth < horizon)
    }

    fn key_of(&self, entity: &EntityRef) -> Result<VisitKey> {
        Ok(match self.context.identity_of(entity)? {
            Some(id) => VisitKey::Persisted(id),
            None => VisitKey::Transient(entity.address()),
        })
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Compile a save of `roots` and everything reachable from them.
    ///
    /// Fails without producing operations when any reachable entity cannot be
    /// mapped or any property value is rejected by its converter.
    #[tracing::instrument(level = "debug", skip(self, roots), fields(roots = roots.len(), depth = ?self.options.depth))]
    pub fn compile_save(mut self, roots: &[EntityRef]) -> Result<ChangeSet> {
        for root in roots {
            self.queue.push_back((root.clone(), 0));
        }
        while let Some((entity, depth)) = self.queue.pop_front() {
            self.visit(&entity, depth)?;
        }

        self.resolve_links()?;
        self.collect_removed()?;
        self.resolve_relationship_entities()?;

        let dropped = &self.dropped;
        let mut operations = std::mem::take(&mut self.operations);
        operations.retain(|op| match op {
            // deletion wins over an update of the same edge
            Operation::UpdateRelationshipProperties(update) => !dropped
                .iter()
                .any(|rel| rel.rel_id == Some(update.id)),
            _ => true,
        });

        let changes = FlushOrderer::new().order(operations);
        tracing::debug!(
            operations = changes.len(),
            nodes = self.nodes.len(),
            "Save compiled"
        );
        Ok(changes)
    }

    fn visit(&mut self, entity: &EntityRef, depth: usize) -> Result<()> {
        let metadata = self.metadata();
        let descriptor = metadata.require(entity.entity_type())?;
        if descriptor.is_relationship_entity() {
            return self.visit_relationship_entity(entity, descriptor, depth);
        }

        let state = EntityState::capture(metadata, entity)?;
        let key = match state.id {
            Some(id) => VisitKey::Persisted(id),
            None => VisitKey::Transient(entity.address()),
        };
        if self.nodes.contains_key(&key) {
            tracing::trace!(entity_type = state.entity_type, ?key, "Already visited");
            return Ok(());
        }

        let node = match state.id {
            None => {
                let reference = self.next_token();
                tracing::debug!(
                    entity_type = state.entity_type,
                    reference,
                    "context-new: node will be created"
                );
                self.operations.push(Operation::CreateNode(CreateNode {
                    reference,
                    entity: entity.clone(),
                    entity_type: state.entity_type,
                    properties: state.stored_properties(),
                    labels: state.labels.clone(),
                    version: descriptor.version_field(),
                }));
                NodeRef::New(reference)
            }
            Some(id) => {
                if let Some(update) = self.update_node(entity, id, descriptor, &state) {
                    self.operations.push(Operation::UpdateNode(update));
                }
                NodeRef::Existing(id)
            }
        };
        self.nodes.insert(key, (node, state.entity_type));

        if self.within_horizon(depth) {
            self.traverse(entity, node, descriptor, depth)?;
        } else {
            tracing::trace!(depth, "Horizon reached, relationships not followed");
        }
        Ok(())
    }

    fn update_node(
        &self,
        entity: &EntityRef,
        id: i64,
        descriptor: &EntityDescriptor,
        state: &EntityState,
    ) -> Option<UpdateNode> {
        let snapshot = self.context.snapshot_node(id);
        let (properties, labels, removed_labels) = match snapshot {
            None => (state.properties.clone(), state.labels.clone(), Vec::new()),
            Some(snapshot) => {
                let changed = changed_between(&snapshot.properties, &state.properties);
                let (added, removed) = snapshot.label_changes(&state.labels);
                if changed.is_empty() && added.is_empty() && removed.is_empty() {
                    tracing::trace!(id, "Unchanged");
                    return None;
                }
                let properties = match self.options.property_updates {
                    PropertyUpdatePolicy::ChangedOnly => changed,
                    PropertyUpdatePolicy::Full => state.properties.clone(),
                };
                (properties, added, removed)
            }
        };

        tracing::debug!(
            id,
            entity_type = state.entity_type,
            properties = properties.len(),
            baseline = snapshot.is_some(),
            "Node is dirty"
        );
        Some(UpdateNode {
            id,
            entity: entity.clone(),
            entity_type: state.entity_type,
            labels,
            removed_labels,
            properties,
            version: version_check(
                descriptor,
                id,
                snapshot.and_then(|s| s.version),
                state.version,
            ),
        })
    }

    fn traverse(
        &mut self,
        entity: &EntityRef,
        node: NodeRef,
        descriptor: &'a EntityDescriptor,
        depth: usize,
    ) -> Result<()> {
        let metadata = self.metadata();
        let owner = descriptor.name();
        for field in descriptor.relationships() {
            metadata.resolve_target(field.target_type).map_err(|e| match e {
                Error::Mapping(m) => Error::Mapping(m.field(field.field)),
                other => other,
            })?;
            let via_entity = metadata.holds_relationship_entities(field.target_type);

            for target in entity.related(field.field).into_vec() {
                let target_type = target.entity_type();
                metadata.require(target_type)?;
                if !metadata.is_assignable(target_type, field.target_type) {
                    return Err(Error::Mapping(
                        MappingError::new(
                            MappingErrorKind::UnresolvableTarget,
                            format!(
                                "'{}' cannot be held by a field declared as '{}'",
                                target_type, field.target_type
                            ),
                        )
                        .entity_type(owner)
                        .field(field.field),
                    ));
                }
                self.queue.push_back((target.clone(), depth + 1));
                if !via_entity {
                    self.links.push(Link {
                        from: node,
                        from_type: owner,
                        field: *field,
                        target,
                    });
                }
            }
        }
        if let NodeRef::Existing(id) = node {
            self.traversed.push((entity.clone(), id));
        }
        Ok(())
    }

    fn visit_relationship_entity(
        &mut self,
        entity: &EntityRef,
        descriptor: &EntityDescriptor,
        depth: usize,
    ) -> Result<()> {
        let key = self.key_of(entity)?;
        if !self.relationship_entities.insert(key) {
            return Ok(());
        }
        for field in endpoint_fields(descriptor) {
            let endpoint = endpoint(entity, descriptor, field)?;
            self.queue.push_back((endpoint, depth));
        }
        self.pending.push(entity.clone());
        Ok(())
    }

    fn node_ref_of(&self, entity: &EntityRef) -> Result<(NodeRef, &'static str)> {
        let key = self.key_of(entity)?;
        self.nodes.get(&key).copied().ok_or_else(|| {
            Error::Mapping(
                MappingError::new(
                    MappingErrorKind::MissingRelationshipEndpoint,
                    "relationship endpoint is not a compiled node",
                )
                .entity_type(entity.entity_type()),
            )
        })
    }

    /// Emit one `CreateRelationship` per new (start, type, end) edge.
    fn resolve_links(&mut self) -> Result<()> {
        let links = std::mem::take(&mut self.links);
        let mut emitted: HashSet<(NodeRef, &'static str, NodeRef)> = HashSet::new();

        for link in links {
            let (target, target_type) = self.node_ref_of(&link.target)?;
            let rel_type = link.field.rel_type;
            let forward = (link.from, link.from_type, target, target_type);
            let backward = (target, target_type, link.from, link.from_type);
            let (start, start_type, end, end_type) = match link.field.direction {
                Direction::Outgoing => forward,
                Direction::Incoming => backward,
                Direction::Undirected => match (link.from.id(), target.id()) {
                    (Some(a), Some(b))
                        if self.context.contains_relationship(&MappedRelationship::new(
                            b, rel_type, a, target_type, link.from_type,
                        )) =>
                    {
                        backward
                    }
                    _ => forward,
                },
            };

            if let (Some(s), Some(e)) = (start.id(), end.id()) {
                let known = match link.field.direction {
                    Direction::Undirected => self.context.has_edge_between(s, rel_type, e),
                    _ => self.context.contains_relationship(&MappedRelationship::new(
                        s, rel_type, e, start_type, end_type,
                    )),
                };
                if known {
                    continue;
                }
            }

            let undirected = link.field.direction == Direction::Undirected;
            if emitted.contains(&(start, rel_type, end))
                || (undirected && emitted.contains(&(end, rel_type, start)))
            {
                tracing::trace!(%start, rel_type, %end, "Edge already emitted");
                continue;
            }
            emitted.insert((start, rel_type, end));

            let reference = self.next_token();
            self.operations
                .push(Operation::CreateRelationship(CreateRelationship {
                    reference,
                    rel_type,
                    start,
                    end,
                    start_type,
                    end_type,
                    entity: None,
                    entity_type: None,
                    properties: PropertyMap::new(),
                    version: None,
                    merge: !start.is_new() && !end.is_new(),
                }));
        }
        Ok(())
    }

    /// Drop known edges no longer referenced from the persisted nodes walked.
    fn collect_removed(&mut self) -> Result<()> {
        let checker = DirtyChecker::new(self.context);
        let metadata = self.metadata();
        let traversed = std::mem::take(&mut self.traversed);

        for (entity, id) in &traversed {
            let descriptor = metadata.require(entity.entity_type())?;
            let mut groups: Vec<Vec<RelationshipField>> = Vec::new();
            for field in descriptor.relationships() {
                let same_edge = groups.iter_mut().find(|group| {
                    group.first().is_some_and(|g| {
                        g.rel_type == field.rel_type
                            && g.direction == field.direction
                            && g.target_type == field.target_type
                    })
                });
                match same_edge {
                    Some(group) => group.push(*field),
                    None => groups.push(vec![*field]),
                }
            }

            for group in &groups {
                let delta = checker.relationship_delta_for(entity, *id, group)?;
                for rel in delta.removed {
                    self.drop_relationship(rel);
                }
            }
        }
        Ok(())
    }

    fn drop_relationship(&mut self, relationship: MappedRelationship) {
        if !self.dropped.insert(relationship) {
            return;
        }
        tracing::debug!(%relationship, "context-del: relationship no longer referenced");
        let op = delete_relationship(self.context, relationship);
        self.operations.push(op);
    }

    /// Create, move or update the relationship entities met during the walk.
    fn resolve_relationship_entities(&mut self) -> Result<()> {
        let context = self.context;
        let metadata = context.metadata();
        let pending = std::mem::take(&mut self.pending);

        for entity in pending {
            let state = EntityState::capture(metadata, &entity)?;
            let descriptor = metadata.require(state.entity_type)?;
            let rel_type = descriptor.relationship_type().ok_or_else(|| {
                Error::Mapping(
                    MappingError::new(
                        MappingErrorKind::InvalidMetadata,
                        "relationship entity without a relationship type",
                    )
                    .entity_type(state.entity_type),
                )
            })?;
            let [start_field, end_field] = endpoint_fields(descriptor);
            let (start, start_type) =
                self.node_ref_of(&endpoint(&entity, descriptor, start_field)?)?;
            let (end, end_type) = self.node_ref_of(&endpoint(&entity, descriptor, end_field)?)?;

            let snapshot = state.id.and_then(|id| context.relationship_snapshot(id));
            let moved = snapshot.is_some_and(|s| {
                Some(s.relationship.start) != start.id() || Some(s.relationship.end) != end.id()
            });

            match (state.id, snapshot) {
                (Some(id), _) if !moved => {
                    let properties = match snapshot {
                        Some(s) => {
                            let changed = changed_between(&s.properties, &state.properties);
                            if changed.is_empty() {
                                continue;
                            }
                            match self.options.property_updates {
                                PropertyUpdatePolicy::ChangedOnly => changed,
                                PropertyUpdatePolicy::Full => state.properties.clone(),
                            }
                        }
                        None => state.properties.clone(),
                    };
                    self.operations
                        .push(Operation::UpdateRelationshipProperties(UpdateRelationship {
                            id,
                            rel_type,
                            entity: entity.clone(),
                            entity_type: state.entity_type,
                            properties,
                            version: version_check(
                                descriptor,
                                id,
                                snapshot.and_then(|s| s.version),
                                state.version,
                            ),
                        }));
                }
                (_, previous) => {
                    if let Some(previous) = previous {
                        tracing::debug!(
                            relationship = %previous.relationship,
                            "Relationship entity endpoints changed; replacing edge"
                        );
                        self.drop_relationship(previous.relationship);
                    }
                    let reference = self.next_token();
                    self.operations
                        .push(Operation::CreateRelationship(CreateRelationship {
                            reference,
                            rel_type,
                            start,
                            end,
                            start_type,
                            end_type,
                            entity: Some(entity.clone()),
                            entity_type: Some(state.entity_type),
                            properties: state.stored_properties(),
                            version: descriptor.version_field(),
                            merge: false,
                        }));
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Compile the deletion of one node or relationship entity.
    ///
    /// A node takes every relationship the context knows on it along. Deleting
    /// an entity without identity compiles to an empty change set.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn compile_delete(self, entity: &EntityRef) -> Result<ChangeSet> {
        let metadata = self.metadata();
        let entity_type = entity.entity_type();
        let descriptor = metadata.require(entity_type)?;
        let (id, version) = {
            let guard = entity.read();
            let version = descriptor
                .version_field()
                .and_then(|field| guard.get(field).as_i64());
            (descriptor.identity_of(&*guard), version)
        };
        let Some(id) = id else {
            tracing::debug!(entity_type, "Entity was never saved; nothing to delete");
            return Ok(ChangeSet::new());
        };

        let mut operations = Vec::new();
        if descriptor.is_relationship_entity() {
            let snapshot = self.context.relationship_snapshot(id);
            let relationship = match snapshot {
                Some(s) => s.relationship,
                None => self.context.mapped_relationship_of(entity, id)?,
            };
            operations.push(Operation::DeleteRelationship(DeleteRelationship {
                relationship,
                entity_type: Some(entity_type),
                version: version_check(descriptor, id, snapshot.and_then(|s| s.version), version),
            }));
        } else {
            for relationship in self.context.relationships_touching(id) {
                operations.push(delete_relationship(self.context, relationship));
            }
            let snapshot_version = self.context.snapshot_node(id).and_then(|s| s.version);
            operations.push(Operation::DeleteNode(DeleteNode {
                id,
                entity: Some(entity.clone()),
                entity_type,
                version: version_check(descriptor, id, snapshot_version, version),
            }));
        }
        tracing::debug!(id, operations = operations.len(), "context-del: delete compiled");
        Ok(FlushOrderer::new().order(operations))
    }
}

/// Version predicate for a write to `id`, preferring the version recorded at
/// the last load or save.
fn version_check(
    descriptor: &EntityDescriptor,
    id: i64,
    snapshot: Option<i64>,
    current: Option<i64>,
) -> Option<VersionCheck> {
    let property = descriptor.version_field()?;
    match snapshot.or(current) {
        Some(expected) => Some(VersionCheck { property, expected }),
        None => {
            tracing::warn!(
                id,
                entity_type = descriptor.name(),
                property,
                "Versioned entity has no known version; writing without a version predicate"
            );
            None
        }
    }
}

fn delete_relationship(context: &MappingContext, relationship: MappedRelationship) -> Operation {
    let (entity_type, version) = match relationship.rel_id {
        Some(rel_id) => {
            let snapshot = context.relationship_snapshot(rel_id);
            let entity_type = snapshot.map(|s| s.entity_type);
            let version = entity_type
                .and_then(|ty| context.metadata().descriptor(ty))
                .and_then(|d| {
                    version_check(d, rel_id, snapshot.and_then(|s| s.version), None)
                });
            (entity_type, version)
        }
        None => (None, None),
    };
    Operation::DeleteRelationship(DeleteRelationship {
        relationship,
        entity_type,
        version,
    })
}

fn endpoint_fields(descriptor: &EntityDescriptor) -> [&'static str; 2] {
    descriptor
        .endpoint_fields()
        .map_or(["", ""], |(start, end)| [start, end])
}

fn endpoint(
    entity: &EntityRef,
    descriptor: &EntityDescriptor,
    field: &'static str,
) -> Result<EntityRef> {
    entity
        .related(field)
        .into_vec()
        .into_iter()
        .next()
        .ok_or_else(|| {
            Error::Mapping(
                MappingError::new(
                    MappingErrorKind::MissingRelationshipEndpoint,
                    "relationship entity has no endpoint",
                )
                .entity_type(descriptor.name())
                .field(field),
            )
        })
}
