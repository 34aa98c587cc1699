//! Change-set operations produced by the graph compiler.
//!
//! Operations carry everything the statement builder needs to bind
//! parameters (already converted property values, labels, endpoint
//! references) and everything the write-back step needs (the live entity
//! handle, the creation token that identifies a new node or relationship).

use std::collections::BTreeMap;
use std::fmt;

use crate::entity::EntityRef;
use crate::graph::{MappedRelationship, NodeRef};
use crate::value::Value;

/// Converted property map, ordered by key for stable statements.
pub type PropertyMap = BTreeMap<String, Value>;

/// Optimistic-locking predicate: the stored `property` must equal `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionCheck {
    pub property: &'static str,
    pub expected: i64,
}

#[derive(Debug, Clone)]
pub struct CreateNode {
    /// Per-run token other operations use to reference this node.
    pub reference: usize,
    pub entity: EntityRef,
    pub entity_type: &'static str,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
    /// Version property initialised to 0 on creation.
    pub version: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct UpdateNode {
    pub id: i64,
    pub entity: EntityRef,
    pub entity_type: &'static str,
    /// Labels to set: every current label when there is no snapshot to
    /// compare against, otherwise only those added since the snapshot.
    pub labels: Vec<String>,
    /// Labels carried at the last snapshot but no longer present.
    pub removed_labels: Vec<String>,
    pub properties: PropertyMap,
    pub version: Option<VersionCheck>,
}

#[derive(Debug, Clone)]
pub struct DeleteNode {
    pub id: i64,
    pub entity: Option<EntityRef>,
    pub entity_type: &'static str,
    pub version: Option<VersionCheck>,
}

#[derive(Debug, Clone)]
pub struct CreateRelationship {
    /// Per-run token used to write the assigned identity back.
    pub reference: usize,
    pub rel_type: &'static str,
    pub start: NodeRef,
    pub end: NodeRef,
    pub start_type: &'static str,
    pub end_type: &'static str,
    /// The relationship entity, for edges with their own properties.
    pub entity: Option<EntityRef>,
    pub entity_type: Option<&'static str>,
    pub properties: PropertyMap,
    pub version: Option<&'static str>,
    /// Both endpoints already existed: create only if no such edge exists yet.
    pub merge: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateRelationship {
    pub id: i64,
    pub rel_type: &'static str,
    pub entity: EntityRef,
    pub entity_type: &'static str,
    pub properties: PropertyMap,
    pub version: Option<VersionCheck>,
}

#[derive(Debug, Clone)]
pub struct DeleteRelationship {
    /// The edge as recorded in the mapping context.
    pub relationship: MappedRelationship,
    pub entity_type: Option<&'static str>,
    pub version: Option<VersionCheck>,
}

/// One write in a change set.
#[derive(Debug, Clone)]
pub enum Operation {
    CreateNode(CreateNode),
    UpdateNode(UpdateNode),
    DeleteNode(DeleteNode),
    CreateRelationship(CreateRelationship),
    UpdateRelationshipProperties(UpdateRelationship),
    DeleteRelationship(DeleteRelationship),
}

/// Operation kind, for counting and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    CreateNode,
    UpdateNode,
    DeleteNode,
    CreateRelationship,
    UpdateRelationshipProperties,
    DeleteRelationship,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::CreateNode => "CreateNode",
            OperationKind::UpdateNode => "UpdateNode",
            OperationKind::DeleteNode => "DeleteNode",
            OperationKind::CreateRelationship => "CreateRelationship",
            OperationKind::UpdateRelationshipProperties => "UpdateRelationshipProperties",
            OperationKind::DeleteRelationship => "DeleteRelationship",
        };
        f.write_str(name)
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateNode(_) => OperationKind::CreateNode,
            Operation::UpdateNode(_) => OperationKind::UpdateNode,
            Operation::DeleteNode(_) => OperationKind::DeleteNode,
            Operation::CreateRelationship(_) => OperationKind::CreateRelationship,
            Operation::UpdateRelationshipProperties(_) => {
                OperationKind::UpdateRelationshipProperties
            }
            Operation::DeleteRelationship(_) => OperationKind::DeleteRelationship,
        }
    }

    /// The live entity this operation writes, if any.
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            Operation::CreateNode(op) => Some(&op.entity),
            Operation::UpdateNode(op) => Some(&op.entity),
            Operation::DeleteNode(op) => op.entity.as_ref(),
            Operation::CreateRelationship(op) => op.entity.as_ref(),
            Operation::UpdateRelationshipProperties(op) => Some(&op.entity),
            Operation::DeleteRelationship(_) => None,
        }
    }

    /// Whether this operation targets a node (as opposed to an edge).
    pub fn is_node_operation(&self) -> bool {
        matches!(
            self,
            Operation::CreateNode(_) | Operation::UpdateNode(_) | Operation::DeleteNode(_)
        )
    }

    /// Node references this operation depends on having been created first.
    pub fn dependencies(&self) -> Vec<usize> {
        match self {
            Operation::CreateRelationship(op) => [op.start, op.end]
                .into_iter()
                .filter_map(|r| match r {
                    NodeRef::New(token) => Some(token),
                    NodeRef::Existing(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The ordered, deduplicated writes compiled from one save or delete call.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    operations: Vec<Operation>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations of one kind.
    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind() == kind).count()
    }

    /// Operation kinds in order, handy for assertions and logging.
    pub fn kinds(&self) -> Vec<OperationKind> {
        self.operations.iter().map(Operation::kind).collect()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}
