//! Flush ordering and execution for graph sessions.
//!
//! This module orders compiled operations, submits their statements to a
//! [`Driver`] as one batch and writes the outcome back into the
//! [`MappingContext`]:
//!
//! - Nodes are created before the relationships that reference them
//! - Relationships are deleted before nodes
//! - Nothing is written back unless every statement succeeded

use crate::mapping_context::MappingContext;
use graphmodel_core::{
    ChangeSet, Driver, DriverError, EntityRef, Error, MappedRelationship, NodeRef, NotFoundError,
    Operation, OperationKind, OptimisticLockError, Result, Statement, StatementOutcome, Value,
    WriteTarget,
};
use graphmodel_cypher::StatementBuilder;
use std::collections::HashMap;

/// Orders change-set operations so that every dependency is written first.
///
/// The order is stable within each kind:
/// 1. `CreateNode` - new endpoints first
/// 2. `UpdateNode`
/// 3. `DeleteRelationship` - before any node delete, and before an edge is
///    recreated between the same endpoints
/// 4. `CreateRelationship` - endpoints resolved
/// 5. `UpdateRelationshipProperties`
/// 6. `DeleteNode`
#[derive(Debug, Default, Clone, Copy)]
pub struct FlushOrderer;

impl FlushOrderer {
    /// Create a new flush orderer.
    pub fn new() -> Self {
        Self
    }

    fn rank(kind: OperationKind) -> u8 {
        match kind {
            OperationKind::CreateNode => 0,
            OperationKind::UpdateNode => 1,
            OperationKind::DeleteRelationship => 2,
            OperationKind::CreateRelationship => 3,
            OperationKind::UpdateRelationshipProperties => 4,
            OperationKind::DeleteNode => 5,
        }
    }

    /// Order operations into a change set.
    pub fn order(&self, mut ops: Vec<Operation>) -> ChangeSet {
        ops.sort_by_key(|op| Self::rank(op.kind()));
        ChangeSet::from_operations(ops)
    }
}

/// A change set with its rendered statements, ready to execute.
#[derive(Debug)]
pub struct FlushPlan {
    changes: ChangeSet,
    statements: Vec<Statement>,
}

impl FlushPlan {
    /// Render every operation. A rejected operation fails the whole plan.
    pub fn new(changes: ChangeSet, builder: &StatementBuilder) -> Result<Self> {
        let statements = builder.build_all(&changes)?;
        Ok(Self {
            changes,
            statements,
        })
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Check if the plan has any operations.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Total number of operations in the plan.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Execute the plan and write assigned identities, versions and new
    /// snapshots back into `context`.
    ///
    /// On any error the context is left as it was.
    #[tracing::instrument(level = "info", skip(self, driver, context), fields(operations = self.len()))]
    pub fn execute<D: Driver + ?Sized>(
        self,
        driver: &mut D,
        context: &mut MappingContext,
    ) -> Result<FlushResult> {
        if self.is_empty() {
            tracing::debug!("Nothing to flush");
            return Ok(FlushResult::default());
        }
        tracing::info!(
            creates = self.changes.count(OperationKind::CreateNode)
                + self.changes.count(OperationKind::CreateRelationship),
            updates = self.changes.count(OperationKind::UpdateNode)
                + self.changes.count(OperationKind::UpdateRelationshipProperties),
            deletes = self.changes.count(OperationKind::DeleteNode)
                + self.changes.count(OperationKind::DeleteRelationship),
            "Executing flush plan"
        );

        let start = std::time::Instant::now();
        let executed = driver.execute(&self.statements).map_err(|e| {
            tracing::warn!(error = %e, "Driver failed; context left unchanged");
            e
        })?;

        for (op, outcome) in self.changes.iter().zip(&executed.outcomes) {
            if let Some(err) = failure(op, *outcome) {
                tracing::warn!(error = %err, "Flush rejected; context left unchanged");
                return Err(err);
            }
        }
        executed.ensure_complete(self.statements.len())?;
        for (op, outcome) in self.changes.iter().zip(&executed.outcomes) {
            check_shape(op, *outcome)?;
        }

        let mut result = FlushResult::default();
        let mut assigned: HashMap<usize, i64> = HashMap::new();
        for (op, outcome) in self.changes.iter().zip(executed.outcomes) {
            write_back(op, outcome, context, &mut assigned, &mut result)?;
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            nodes_created = result.nodes_created,
            nodes_updated = result.nodes_updated,
            nodes_deleted = result.nodes_deleted,
            relationships_created = result.relationships_created,
            relationships_updated = result.relationships_updated,
            relationships_deleted = result.relationships_deleted,
            "Flush complete"
        );
        Ok(result)
    }
}

/// The caller-facing error for a failed outcome, if the outcome is a failure
/// that aborts the flush.
fn failure(op: &Operation, outcome: StatementOutcome) -> Option<Error> {
    let (target, entity_type, id, expected) = match op {
        Operation::CreateNode(_) => return None,
        Operation::CreateRelationship(op) => {
            // a create only fails when an endpoint vanished
            let (id, entity_type) = match (op.start, op.end) {
                (NodeRef::Existing(id), _) => (id, op.start_type),
                (_, NodeRef::Existing(id)) => (id, op.end_type),
                _ => return None,
            };
            (WriteTarget::Node, entity_type, id, None)
        }
        Operation::UpdateNode(op) => (
            WriteTarget::Node,
            op.entity_type,
            op.id,
            op.version.map(|v| v.expected),
        ),
        Operation::DeleteNode(op) => (
            WriteTarget::Node,
            op.entity_type,
            op.id,
            op.version.map(|v| v.expected),
        ),
        Operation::UpdateRelationshipProperties(op) => (
            WriteTarget::Relationship,
            op.entity_type,
            op.id,
            op.version.map(|v| v.expected),
        ),
        Operation::DeleteRelationship(op) => match op.relationship.rel_id {
            Some(rel_id) => (
                WriteTarget::Relationship,
                op.entity_type.unwrap_or(op.relationship.rel_type),
                rel_id,
                op.version.map(|v| v.expected),
            ),
            None => {
                if outcome == StatementOutcome::NotFound {
                    tracing::debug!(
                        relationship = %op.relationship,
                        "Relationship already gone"
                    );
                }
                return None;
            }
        },
    };

    match outcome {
        StatementOutcome::NotFound => Some(Error::NotFound(NotFoundError {
            target,
            entity_type: entity_type.to_string(),
            id,
        })),
        StatementOutcome::VersionConflict {
            expected: reported,
            actual,
        } => Some(Error::OptimisticLock(OptimisticLockError {
            target,
            entity_type: entity_type.to_string(),
            id,
            expected_version: expected.or(reported),
            actual_version: actual,
        })),
        _ => None,
    }
}

fn check_shape(op: &Operation, outcome: StatementOutcome) -> Result<()> {
    let matches = matches!(
        (op, outcome),
        (
            Operation::CreateNode(_) | Operation::CreateRelationship(_),
            StatementOutcome::Created { .. }
        ) | (
            Operation::UpdateNode(_) | Operation::UpdateRelationshipProperties(_),
            StatementOutcome::Updated { .. }
        ) | (Operation::DeleteNode(_), StatementOutcome::Deleted)
            | (
                Operation::DeleteRelationship(_),
                StatementOutcome::Deleted | StatementOutcome::NotFound
            )
    );
    if matches {
        Ok(())
    } else {
        Err(DriverError::protocol(format!(
            "unexpected outcome {:?} for {}",
            outcome,
            op.kind()
        ))
        .into())
    }
}

fn resolve(node: NodeRef, assigned: &HashMap<usize, i64>) -> Result<i64> {
    match node {
        NodeRef::Existing(id) => Ok(id),
        NodeRef::New(reference) => assigned.get(&reference).copied().ok_or_else(|| {
            DriverError::protocol(format!("no identity assigned to new node #{reference}")).into()
        }),
    }
}

/// Write a store-assigned identity and version into the entity's fields.
fn assign(
    context: &MappingContext,
    entity: &EntityRef,
    id: Option<i64>,
    version: Option<(&'static str, i64)>,
) -> Result<()> {
    let descriptor = context.metadata().require(entity.entity_type())?;
    let mut guard = entity.write();
    if let Some(id) = id {
        guard.set(descriptor.identity_field(), Value::Integer(id));
    }
    if let Some((field, version)) = version {
        guard.set(field, Value::Integer(version));
    }
    Ok(())
}

fn write_back(
    op: &Operation,
    outcome: StatementOutcome,
    context: &mut MappingContext,
    assigned: &mut HashMap<usize, i64>,
    result: &mut FlushResult,
) -> Result<()> {
    match (op, outcome) {
        (Operation::CreateNode(op), StatementOutcome::Created { id, version }) => {
            assigned.insert(op.reference, id);
            let version = op.version.map(|field| (field, version.unwrap_or(0)));
            assign(context, &op.entity, Some(id), version)?;
            context.remember(op.entity.clone(), id)?;
            context.refresh_snapshot(&op.entity)?;
            tracing::trace!(id, entity_type = op.entity_type, "Node created");
            result.nodes_created += 1;
        }
        (Operation::UpdateNode(op), StatementOutcome::Updated { version }) => {
            let version = op
                .version
                .map(|check| (check.property, version.unwrap_or(check.expected + 1)));
            assign(context, &op.entity, None, version)?;
            context.remember(op.entity.clone(), op.id)?;
            context.refresh_snapshot(&op.entity)?;
            result.nodes_updated += 1;
        }
        (Operation::DeleteNode(op), _) => {
            context.forget(op.id);
            result.nodes_deleted += 1;
        }
        (Operation::CreateRelationship(op), StatementOutcome::Created { id, version }) => {
            assigned.insert(op.reference, id);
            let start = resolve(op.start, assigned)?;
            let end = resolve(op.end, assigned)?;
            let mut relationship =
                MappedRelationship::new(start, op.rel_type, end, op.start_type, op.end_type);
            if let Some(entity) = &op.entity {
                relationship = relationship.with_id(id);
                let version = op.version.map(|field| (field, version.unwrap_or(0)));
                assign(context, entity, Some(id), version)?;
                context.remember(entity.clone(), id)?;
                context.add_relationship(relationship);
                context.refresh_snapshot(entity)?;
            } else {
                context.add_relationship(relationship);
            }
            result.relationships_created += 1;
        }
        (Operation::UpdateRelationshipProperties(op), StatementOutcome::Updated { version }) => {
            let version = op
                .version
                .map(|check| (check.property, version.unwrap_or(check.expected + 1)));
            assign(context, &op.entity, None, version)?;
            context.remember(op.entity.clone(), op.id)?;
            context.refresh_snapshot(&op.entity)?;
            result.relationships_updated += 1;
        }
        (Operation::DeleteRelationship(op), outcome) => {
            context.remove_relationship(&op.relationship);
            if let Some(rel_id) = op.relationship.rel_id {
                context.forget_relationship_entity(rel_id);
            }
            if outcome == StatementOutcome::Deleted {
                result.relationships_deleted += 1;
            }
        }
        (op, outcome) => {
            return Err(DriverError::protocol(format!(
                "unexpected outcome {:?} for {}",
                outcome,
                op.kind()
            ))
            .into());
        }
    }
    Ok(())
}

/// Result of a flush operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub nodes_deleted: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    pub relationships_deleted: usize,
}

impl FlushResult {
    /// Create a new empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.nodes_created
            + self.nodes_updated
            + self.nodes_deleted
            + self.relationships_created
            + self.relationships_updated
            + self.relationships_deleted
    }
}
