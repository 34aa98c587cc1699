//! In-memory graph store and driver for GraphModel Rust.
//!
//! `graphmodel-memory` executes compiled statements against a property graph
//! held in process memory. It reads the structured [`WriteAction`] carried by
//! every statement rather than parsing Cypher, so it exercises the same
//! batches a network driver would send.
//!
//! Each [`Driver::execute`] call is one transaction: the batch runs against a
//! staged copy of the graph and is committed only if every statement succeeds.
//! Execution stops at the first failing statement. The store stays locked from
//! staging to commit, so batches from drivers sharing a store serialize.
//!
//! ```ignore
//! let store = MemoryStore::new();
//! let mut session = Session::new(MemoryDriver::new(store.clone()), metadata);
//! session.save(&folder)?;
//! assert_eq!(store.node_count(), 3);
//! ```

use graphmodel_core::{
    Driver, DriverError, Error, ExecutionResult, NodeRef, Result, Statement, StatementOutcome,
    Value, VersionPredicate, WriteAction,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// Graph
// ============================================================================

/// A stored node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub id: i64,
    pub labels: BTreeSet<String>,
    pub properties: BTreeMap<String, Value>,
}

/// A stored, directed relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRelationship {
    pub id: i64,
    pub rel_type: String,
    pub start: i64,
    pub end: i64,
    pub properties: BTreeMap<String, Value>,
}

/// The whole graph. Nodes and relationships have separate identity spaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryGraph {
    nodes: BTreeMap<i64, StoredNode>,
    relationships: BTreeMap<i64, StoredRelationship>,
    next_node_id: i64,
    next_relationship_id: i64,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: i64) -> Option<&StoredNode> {
        self.nodes.get(&id)
    }

    pub fn relationship(&self, id: i64) -> Option<&StoredRelationship> {
        self.relationships.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StoredNode> {
        self.nodes.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &StoredRelationship> {
        self.relationships.values()
    }

    fn create_node(&mut self, labels: &[String], properties: BTreeMap<String, Value>) -> i64 {
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.insert(
            id,
            StoredNode {
                id,
                labels: labels.iter().cloned().collect(),
                properties: stored(properties),
            },
        );
        id
    }

    fn create_relationship(
        &mut self,
        rel_type: &str,
        start: i64,
        end: i64,
        properties: BTreeMap<String, Value>,
    ) -> i64 {
        let id = self.next_relationship_id;
        self.next_relationship_id += 1;
        self.relationships.insert(
            id,
            StoredRelationship {
                id,
                rel_type: rel_type.to_string(),
                start,
                end,
                properties: stored(properties),
            },
        );
        id
    }

    fn find_relationship(&self, start: i64, rel_type: &str, end: i64) -> Option<&StoredRelationship> {
        self.relationships
            .values()
            .find(|r| r.start == start && r.end == end && r.rel_type == rel_type)
    }

    /// Remove a node and every relationship attached to it.
    fn detach_delete(&mut self, id: i64) -> bool {
        if self.nodes.remove(&id).is_none() {
            return false;
        }
        self.relationships.retain(|_, r| r.start != id && r.end != id);
        true
    }
}

/// Null values are not stored.
fn stored(properties: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    properties.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

/// `SET x += $props`: null removes the key.
fn merge_properties(target: &mut BTreeMap<String, Value>, changes: &BTreeMap<String, Value>) {
    for (key, value) in changes {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Compare the stored version with the predicate; on a match, bump it.
fn check_and_bump(
    properties: &mut BTreeMap<String, Value>,
    check: Option<&VersionPredicate>,
) -> std::result::Result<Option<i64>, StatementOutcome> {
    let Some(check) = check else {
        return Ok(None);
    };
    let actual = properties.get(&check.property).and_then(Value::as_i64);
    if actual != Some(check.expected) {
        return Err(StatementOutcome::VersionConflict {
            expected: Some(check.expected),
            actual,
        });
    }
    let next = check.expected + 1;
    properties.insert(check.property.clone(), Value::Integer(next));
    Ok(Some(next))
}

fn version_matches(
    properties: &BTreeMap<String, Value>,
    check: Option<&VersionPredicate>,
) -> std::result::Result<(), StatementOutcome> {
    let Some(check) = check else {
        return Ok(());
    };
    let actual = properties.get(&check.property).and_then(Value::as_i64);
    if actual == Some(check.expected) {
        Ok(())
    } else {
        Err(StatementOutcome::VersionConflict {
            expected: Some(check.expected),
            actual,
        })
    }
}

// ============================================================================
// Store
// ============================================================================

/// Shared handle to a graph. Clones see the same data, so several drivers
/// (and sessions) can write to one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryGraph>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_graph<R>(&self, f: impl FnOnce(&mut MemoryGraph) -> R) -> R {
        let mut graph = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut graph)
    }

    /// Copy of the current committed graph.
    pub fn snapshot(&self) -> MemoryGraph {
        self.with_graph(|g| g.clone())
    }

    pub fn node(&self, id: i64) -> Option<StoredNode> {
        self.with_graph(|g| g.node(id).cloned())
    }

    pub fn relationship(&self, id: i64) -> Option<StoredRelationship> {
        self.with_graph(|g| g.relationship(id).cloned())
    }

    /// Outgoing relationships of `start`, optionally of one type.
    pub fn relationships_from(&self, start: i64, rel_type: Option<&str>) -> Vec<StoredRelationship> {
        self.with_graph(|g| {
            g.relationships()
                .filter(|r| r.start == start && rel_type.is_none_or(|t| r.rel_type == t))
                .cloned()
                .collect()
        })
    }

    pub fn nodes_with_label(&self, label: &str) -> Vec<StoredNode> {
        self.with_graph(|g| g.nodes().filter(|n| n.labels.contains(label)).cloned().collect())
    }

    pub fn node_count(&self) -> usize {
        self.with_graph(|g| g.nodes.len())
    }

    pub fn relationship_count(&self) -> usize {
        self.with_graph(|g| g.relationships.len())
    }

    /// Write a property outside any session, as a concurrent writer would.
    /// Returns false if the node does not exist.
    pub fn set_node_property(&self, id: i64, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        self.with_graph(|g| match g.nodes.get_mut(&id) {
            Some(node) => {
                merge_properties(&mut node.properties, &BTreeMap::from([(key.to_string(), value)]));
                true
            }
            None => false,
        })
    }

    /// Delete a node (and its relationships) outside any session.
    pub fn delete_node(&self, id: i64) -> bool {
        self.with_graph(|g| g.detach_delete(id))
    }

    /// Serialize the committed graph.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.snapshot())
            .map_err(|e| Error::Custom(format!("failed to serialize graph: {e}")))
    }

    /// Restore a store from [`MemoryStore::to_json`] output.
    pub fn from_json(json: &str) -> Result<Self> {
        let graph: MemoryGraph = serde_json::from_str(json)
            .map_err(|e| Error::Custom(format!("failed to deserialize graph: {e}")))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(graph)),
        })
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Executes statement batches against a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryDriver {
    store: MemoryStore,
    history: Vec<Statement>,
    fail_next: Option<DriverError>,
}

impl MemoryDriver {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            history: Vec::new(),
            fail_next: None,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Every statement received, in order, including failed batches.
    pub fn history(&self) -> &[Statement] {
        &self.history
    }

    /// Make the next `execute` call fail with `error` without touching the
    /// store.
    pub fn fail_next(&mut self, error: DriverError) {
        self.fail_next = Some(error);
    }
}

impl Driver for MemoryDriver {
    #[tracing::instrument(level = "debug", skip(self, statements), fields(statements = statements.len()))]
    fn execute(&mut self, statements: &[Statement]) -> Result<ExecutionResult> {
        self.history.extend_from_slice(statements);
        if let Some(error) = self.fail_next.take() {
            tracing::debug!(error = %error.message, "Injected driver failure");
            return Err(error.into());
        }

        // the lock is held from staging to commit so batches serialize
        self.store.with_graph(|graph| -> Result<ExecutionResult> {
            let mut staged = graph.clone();
            let outcomes = run_batch(&mut staged, statements)?;
            if outcomes.last().is_some_and(StatementOutcome::is_failure) {
                return Ok(ExecutionResult::new(outcomes));
            }
            *graph = staged;
            tracing::debug!(outcomes = outcomes.len(), "Batch committed");
            Ok(ExecutionResult::new(outcomes))
        })
    }
}

/// Apply `statements` in order, stopping after the first failing outcome.
fn run_batch(graph: &mut MemoryGraph, statements: &[Statement]) -> Result<Vec<StatementOutcome>> {
    let mut transaction = Transaction {
        graph,
        assigned: HashMap::new(),
    };
    let mut outcomes = Vec::with_capacity(statements.len());
    for statement in statements {
        let outcome = transaction.apply(statement)?;
        outcomes.push(outcome);
        if outcome.is_failure() {
            tracing::debug!(?outcome, cypher = %statement.cypher, "Batch rolled back");
            break;
        }
    }
    Ok(outcomes)
}

/// One batch in flight.
struct Transaction<'g> {
    graph: &'g mut MemoryGraph,
    /// Creation token to assigned node identity.
    assigned: HashMap<usize, i64>,
}

impl Transaction<'_> {
    fn apply(&mut self, statement: &Statement) -> Result<StatementOutcome> {
        for binding in &statement.bindings {
            if !self.assigned.contains_key(&binding.reference) {
                return Err(DriverError::protocol(format!(
                    "parameter ${} refers to creation {} which has not run",
                    binding.parameter, binding.reference
                ))
                .into());
            }
        }
        let props = statement.properties().cloned().unwrap_or_default();

        let outcome = match &statement.action {
            WriteAction::CreateNode {
                creates,
                labels,
                version,
            } => {
                let id = self.graph.create_node(labels, props);
                self.assigned.insert(*creates, id);
                StatementOutcome::Created {
                    id,
                    version: version.as_ref().map(|_| 0),
                }
            }
            WriteAction::UpdateNode {
                id,
                add_labels,
                remove_labels,
                check,
            } => match self.graph.nodes.get_mut(id) {
                None => StatementOutcome::NotFound,
                Some(node) => match check_and_bump(&mut node.properties, check.as_ref()) {
                    Err(conflict) => conflict,
                    Ok(version) => {
                        merge_properties(&mut node.properties, &props);
                        if let (Some(check), Some(version)) = (check, version) {
                            node.properties
                                .insert(check.property.clone(), Value::Integer(version));
                        }
                        node.labels.extend(add_labels.iter().cloned());
                        for label in remove_labels {
                            node.labels.remove(label);
                        }
                        StatementOutcome::Updated { version }
                    }
                },
            },
            WriteAction::DeleteNode { id, check } => match self.graph.node(*id) {
                None => StatementOutcome::NotFound,
                Some(node) => match version_matches(&node.properties, check.as_ref()) {
                    Err(conflict) => conflict,
                    Ok(()) => {
                        self.graph.detach_delete(*id);
                        StatementOutcome::Deleted
                    }
                },
            },
            WriteAction::CreateRelationship {
                creates: _,
                rel_type,
                start,
                end,
                merge,
                version,
            } => {
                let start = self.resolve(*start)?;
                let end = self.resolve(*end)?;
                if self.graph.node(start).is_none() || self.graph.node(end).is_none() {
                    StatementOutcome::NotFound
                } else if let Some(existing) = self
                    .graph
                    .find_relationship(start, rel_type, end)
                    .filter(|_| *merge)
                {
                    StatementOutcome::Created {
                        id: existing.id,
                        version: version
                            .as_ref()
                            .and_then(|v| existing.properties.get(v))
                            .and_then(Value::as_i64),
                    }
                } else {
                    let id = self.graph.create_relationship(rel_type, start, end, props);
                    StatementOutcome::Created {
                        id,
                        version: version.as_ref().map(|_| 0),
                    }
                }
            }
            WriteAction::UpdateRelationship { id, check } => {
                match self.graph.relationships.get_mut(id) {
                    None => StatementOutcome::NotFound,
                    Some(rel) => match check_and_bump(&mut rel.properties, check.as_ref()) {
                        Err(conflict) => conflict,
                        Ok(version) => {
                            merge_properties(&mut rel.properties, &props);
                            if let (Some(check), Some(version)) = (check, version) {
                                rel.properties
                                    .insert(check.property.clone(), Value::Integer(version));
                            }
                            StatementOutcome::Updated { version }
                        }
                    },
                }
            }
            WriteAction::DeleteRelationship {
                id: Some(id),
                check,
                ..
            } => match self.graph.relationship(*id) {
                None => StatementOutcome::NotFound,
                Some(rel) => match version_matches(&rel.properties, check.as_ref()) {
                    Err(conflict) => conflict,
                    Ok(()) => {
                        self.graph.relationships.remove(id);
                        StatementOutcome::Deleted
                    }
                },
            },
            WriteAction::DeleteRelationship {
                id: None,
                start,
                rel_type,
                end,
                ..
            } => {
                // a count of zero still reports success
                self.graph
                    .relationships
                    .retain(|_, r| !(r.start == *start && r.end == *end && r.rel_type == *rel_type));
                StatementOutcome::Deleted
            }
        };
        Ok(outcome)
    }

    fn resolve(&self, node: NodeRef) -> Result<i64> {
        match node {
            NodeRef::Existing(id) => Ok(id),
            NodeRef::New(reference) => self.assigned.get(&reference).copied().ok_or_else(|| {
                DriverError::protocol(format!("node {} was not created in this batch", node))
                    .into()
            }),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
