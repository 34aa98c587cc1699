//! Session and change compilation for GraphModel Rust.
//!
//! `graphmodel-session` is the **unit-of-work layer**. It tracks which live
//! objects stand for which nodes and relationships, detects what changed since
//! they were loaded or saved, and compiles the net change into ordered,
//! parameterized write statements.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: a single in-memory instance per persistent identity.
//! - **Mapping context**: snapshots and the relationships known to exist.
//! - **Graph compiler**: cycle-safe traversal into a deduplicated change set.
//! - **Flush**: one driver batch per call; the context only changes on success.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(driver, metadata);
//!
//! // Creates the folder, both documents and two CONTAINS edges
//! session.save(&folder)?;
//!
//! // Clearing one side of a bidirectional mapping removes the edge
//! doc.with_mut::<Document, _>(|d| d.folder = None);
//! session.save(&doc)?;
//!
//! session.delete(&folder)?;
//! ```

pub mod change_tracker;
pub mod compiler;
pub mod flush;
pub mod identity_map;
pub mod mapping_context;

#[cfg(test)]
mod test_support;

pub use change_tracker::{
    ChangeTracker, DirtyChecker, EntityState, NodeSnapshot, RelationshipDelta,
    RelationshipSnapshot,
};
pub use compiler::{CompileOptions, GraphCompiler, PropertyUpdatePolicy};
pub use flush::{FlushOrderer, FlushPlan, FlushResult};
pub use identity_map::IdentityMap;
pub use mapping_context::MappingContext;

use graphmodel_core::{
    ChangeSet, Driver, EntityRef, Error, MappedRelationship, MappingError, MappingErrorKind,
    MetaData, Result, Value,
};
use graphmodel_cypher::StatementBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Session Events
// ============================================================================

/// Type alias for entity lifecycle callbacks.
///
/// Returning `Err` from a pre-event aborts the save or delete before any
/// statement reaches the driver.
type EntityEventFn = Box<dyn FnMut(&EntityRef) -> Result<()> + Send>;

/// Holds registered entity lifecycle callbacks.
#[derive(Default)]
pub struct SessionEventCallbacks {
    pre_save: Vec<EntityEventFn>,
    post_save: Vec<EntityEventFn>,
    pre_delete: Vec<EntityEventFn>,
    post_delete: Vec<EntityEventFn>,
}

impl std::fmt::Debug for SessionEventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventCallbacks")
            .field("pre_save", &self.pre_save.len())
            .field("post_save", &self.post_save.len())
            .field("pre_delete", &self.pre_delete.len())
            .field("post_delete", &self.post_delete.len())
            .finish()
    }
}

impl SessionEventCallbacks {
    fn fire(&mut self, event: SessionEvent, entity: &EntityRef) -> Result<()> {
        let callbacks = match event {
            SessionEvent::PreSave => &mut self.pre_save,
            SessionEvent::PostSave => &mut self.post_save,
            SessionEvent::PreDelete => &mut self.pre_delete,
            SessionEvent::PostDelete => &mut self.post_delete,
        };
        for cb in callbacks.iter_mut() {
            cb(entity)?;
        }
        Ok(())
    }
}

/// Entity lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Fired per written entity after compilation, before execution.
    PreSave,
    /// Fired per written entity after a successful save.
    PostSave,
    /// Fired before a delete is executed.
    PreDelete,
    /// Fired after a successful delete.
    PostDelete,
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How far `save` follows relationships from its roots; `None` for the
    /// whole reachable graph.
    pub save_depth: Option<usize>,
    /// Which properties updates carry.
    pub property_updates: PropertyUpdatePolicy,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_depth(mut self, depth: Option<usize>) -> Self {
        self.save_depth = depth;
        self
    }

    pub fn property_updates(mut self, policy: PropertyUpdatePolicy) -> Self {
        self.property_updates = policy;
        self
    }

    /// Parse a configuration document; absent keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Custom(format!("invalid session configuration: {e}")))
    }
}

// ============================================================================
// Session
// ============================================================================

/// A unit of work over one driver.
///
/// Owns its mapping context exclusively; share the metadata, not the session.
pub struct Session<D: Driver> {
    driver: D,
    context: MappingContext,
    config: SessionConfig,
    builder: StatementBuilder,
    event_callbacks: SessionEventCallbacks,
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tracked", &self.context.len())
            .field("relationships", &self.context.relationship_count())
            .field("config", &self.config)
            .field("event_callbacks", &self.event_callbacks)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Session<D> {
    /// Create a new session over `driver`.
    pub fn new(driver: D, metadata: Arc<MetaData>) -> Self {
        Self::with_config(driver, metadata, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(driver: D, metadata: Arc<MetaData>, config: SessionConfig) -> Self {
        Self {
            driver,
            context: MappingContext::new(metadata),
            config,
            builder: StatementBuilder::new(),
            event_callbacks: SessionEventCallbacks::default(),
        }
    }

    /// Replace the statement builder (e.g. to turn verification off).
    pub fn with_statement_builder(mut self, builder: StatementBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn context(&self) -> &MappingContext {
        &self.context
    }

    pub fn metadata(&self) -> &MetaData {
        self.context.metadata()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    // ========================================================================
    // Session Events
    // ========================================================================

    /// Register a callback to run before an entity is saved.
    ///
    /// The callback can abort the save by returning `Err`.
    pub fn on_pre_save(&mut self, f: impl FnMut(&EntityRef) -> Result<()> + Send + 'static) {
        self.event_callbacks.pre_save.push(Box::new(f));
    }

    /// Register a callback to run after an entity was saved.
    ///
    /// The save is already committed when it runs, so an `Err` is logged
    /// and the save still succeeds.
    pub fn on_post_save(&mut self, f: impl FnMut(&EntityRef) -> Result<()> + Send + 'static) {
        self.event_callbacks.post_save.push(Box::new(f));
    }

    /// Register a callback to run before an entity is deleted.
    ///
    /// The callback can abort the delete by returning `Err`.
    pub fn on_pre_delete(&mut self, f: impl FnMut(&EntityRef) -> Result<()> + Send + 'static) {
        self.event_callbacks.pre_delete.push(Box::new(f));
    }

    /// Register a callback to run after an entity was deleted.
    ///
    /// An `Err` is logged; the delete still succeeds.
    pub fn on_post_delete(&mut self, f: impl FnMut(&EntityRef) -> Result<()> + Send + 'static) {
        self.event_callbacks.post_delete.push(Box::new(f));
    }

    // ========================================================================
    // Save / Delete
    // ========================================================================

    /// Compile a save of `roots` without executing it.
    pub fn compile(&self, roots: &[EntityRef]) -> Result<ChangeSet> {
        GraphCompiler::with_options(&self.context, self.compile_options(self.config.save_depth))
            .compile_save(roots)
    }

    fn compile_options(&self, depth: Option<usize>) -> CompileOptions {
        CompileOptions {
            depth,
            property_updates: self.config.property_updates,
        }
    }

    /// Save `root` and everything reachable from it up to the configured depth.
    pub fn save(&mut self, root: &EntityRef) -> Result<FlushResult> {
        self.save_roots(std::slice::from_ref(root), self.config.save_depth)
    }

    /// Save `root`, following relationships at most `depth` hops.
    pub fn save_with_depth(&mut self, root: &EntityRef, depth: Option<usize>) -> Result<FlushResult> {
        self.save_roots(std::slice::from_ref(root), depth)
    }

    /// Save several roots in one batch.
    pub fn save_all(&mut self, roots: &[EntityRef]) -> Result<FlushResult> {
        self.save_roots(roots, self.config.save_depth)
    }

    #[tracing::instrument(level = "debug", skip(self, roots), fields(roots = roots.len()))]
    fn save_roots(&mut self, roots: &[EntityRef], depth: Option<usize>) -> Result<FlushResult> {
        let changes = GraphCompiler::with_options(&self.context, self.compile_options(depth))
            .compile_save(roots)?;
        let mut touched: Vec<EntityRef> = Vec::new();
        for entity in changes.iter().filter_map(|op| op.entity()) {
            if !touched.iter().any(|t| t.ptr_eq(entity)) {
                touched.push(entity.clone());
            }
        }
        self.flush(changes, &touched, SessionEvent::PreSave, SessionEvent::PostSave)
    }

    /// Delete a node (with the relationships known on it) or a relationship
    /// entity.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn delete(&mut self, entity: &EntityRef) -> Result<FlushResult> {
        let changes = GraphCompiler::new(&self.context).compile_delete(entity)?;
        self.flush(
            changes,
            std::slice::from_ref(entity),
            SessionEvent::PreDelete,
            SessionEvent::PostDelete,
        )
    }

    fn flush(
        &mut self,
        changes: ChangeSet,
        touched: &[EntityRef],
        pre: SessionEvent,
        post: SessionEvent,
    ) -> Result<FlushResult> {
        if changes.is_empty() {
            tracing::debug!("No changes to flush");
            return Ok(FlushResult::default());
        }
        let plan = FlushPlan::new(changes, &self.builder)?;
        for entity in touched {
            self.event_callbacks.fire(pre, entity)?;
        }
        let result = plan.execute(&mut self.driver, &mut self.context)?;
        // the batch is committed; a failing post callback cannot undo it
        for entity in touched {
            if let Err(error) = self.event_callbacks.fire(post, entity) {
                tracing::warn!(event = ?post, %error, "Post-event callback failed");
            }
        }
        Ok(result)
    }

    // ========================================================================
    // Tracked state
    // ========================================================================

    /// Whether saving `entity` would write it.
    pub fn is_dirty(&self, entity: &EntityRef) -> Result<bool> {
        DirtyChecker::new(&self.context).is_dirty(entity)
    }

    /// Drop all tracked state. Previously returned objects become evicted and
    /// compare as dirty until saved or attached again.
    pub fn clear(&mut self) {
        tracing::debug!(tracked = self.context.len(), "Clearing session");
        self.context.clear();
    }

    /// Forget one entity and the relationships hanging off it.
    pub fn detach(&mut self, entity: &EntityRef) -> Result<bool> {
        self.context.detach(entity)
    }

    /// Register a loaded entity.
    ///
    /// Returns the instance already tracked under the same identity if there
    /// is one, in which case its snapshot is kept. Relationship entities also
    /// record their edge.
    pub fn attach(&mut self, entity: EntityRef) -> Result<EntityRef> {
        if self.metadata().is_relationship_entity(entity.entity_type()) {
            return self.attach_relationship_entity(entity);
        }
        let id = self.require_identity(&entity)?;
        let registered = self.context.remember(entity.clone(), id)?;
        if registered.ptr_eq(&entity) {
            self.context.refresh_snapshot(&entity)?;
        }
        Ok(registered)
    }

    /// Register a loaded relationship entity and its edge.
    ///
    /// Both endpoints must already carry their identities.
    pub fn attach_relationship_entity(&mut self, entity: EntityRef) -> Result<EntityRef> {
        let id = self.require_identity(&entity)?;
        let relationship = self.context.mapped_relationship_of(&entity, id)?;
        let registered = self.context.remember(entity.clone(), id)?;
        if registered.ptr_eq(&entity) {
            self.context.add_relationship(relationship);
            self.context.refresh_snapshot(&entity)?;
        }
        Ok(registered)
    }

    /// Record a loaded edge between two tracked nodes.
    ///
    /// Returns false if the edge was already known.
    pub fn attach_relationship(&mut self, start: i64, rel_type: &str, end: i64) -> Result<bool> {
        let interned = self.metadata().relationship_type(rel_type).ok_or_else(|| {
            Error::Mapping(MappingError::new(
                MappingErrorKind::InvalidMetadata,
                format!("relationship type '{}' is not mapped", rel_type),
            ))
        })?;
        let endpoint_type = |id: i64| {
            self.context
                .node(id)
                .map(|node| node.entity_type())
                .ok_or_else(|| {
                    Error::Mapping(MappingError::new(
                        MappingErrorKind::MissingRelationshipEndpoint,
                        format!("node {} is not tracked by this session", id),
                    ))
                })
        };
        let start_type = endpoint_type(start)?;
        let end_type = endpoint_type(end)?;
        Ok(self.context.add_relationship(MappedRelationship::new(
            start, interned, end, start_type, end_type,
        )))
    }

    fn require_identity(&self, entity: &EntityRef) -> Result<i64> {
        self.context.identity_of(entity)?.ok_or_else(|| {
            Error::Custom(format!(
                "cannot attach a '{}' that has no identity",
                entity.entity_type()
            ))
        })
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Tracked node by identity.
    pub fn get_node(&self, id: i64) -> Option<EntityRef> {
        self.context.node(id)
    }

    /// Tracked relationship entity by relationship identity.
    pub fn get_relationship_entity(&self, id: i64) -> Option<EntityRef> {
        self.context.relationship_entity(id)
    }

    /// Tracked node by its primary index value.
    pub fn get_by_primary_index(
        &self,
        entity_type: &str,
        value: impl Into<Value>,
    ) -> Option<EntityRef> {
        self.context.by_primary_index(entity_type, &value.into())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
