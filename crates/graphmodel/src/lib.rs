//! GraphModel Rust - object-graph mapping for property graph databases.
//!
//! GraphModel maps plain Rust objects onto nodes and relationships and keeps
//! them in step with the store:
//!
//! - A metadata model describing labels, properties and relationship fields
//! - An identity map giving one live instance per persistent identity
//! - Dirty checking against snapshots taken at load or save time
//! - A cycle-safe compiler turning an object graph into ordered writes
//! - Parameterized Cypher with optimistic locking on versioned entities
//!
//! # Quick Start
//!
//! ```ignore
//! use graphmodel::prelude::*;
//!
//! let metadata = Arc::new(
//!     MetaData::builder()
//!         .register(
//!             EntityDescriptor::node("Folder")
//!                 .property("name")
//!                 .relationship_many("documents", "CONTAINS", Direction::Outgoing, "Document"),
//!         )
//!         .register(
//!             EntityDescriptor::node("Document")
//!                 .property("name")
//!                 .relationship("folder", "CONTAINS", Direction::Incoming, "Folder"),
//!         )
//!         .build()?,
//! );
//!
//! let store = MemoryStore::new();
//! let mut session = Session::new(MemoryDriver::new(store.clone()), metadata);
//!
//! let folder = EntityRef::new(Folder::new("inbox"));
//! let doc = EntityRef::new(Document::new("a"));
//! link(&folder, &doc);
//!
//! // One node per object, one CONTAINS edge for the bidirectional pair
//! session.save(&folder)?;
//! assert!(!session.is_dirty(&folder)?);
//! ```
//!
//! # Crates
//!
//! - `graphmodel-core`: metadata, entity handles, values, operations, errors
//! - `graphmodel-cypher`: statement building
//! - `graphmodel-session`: mapping context, dirty checking, compilation, flush
//! - `graphmodel-memory`: an in-memory transactional store and driver

// Re-export all public types from sub-crates
pub use graphmodel_core::{
    ChangeSet,
    ConversionError,
    Converter,
    CreateNode,
    CreateRelationship,
    DeleteNode,
    DeleteRelationship,
    Direction,
    Driver,
    DriverError,
    DriverErrorKind,
    EntityDescriptor,
    EntityKind,
    EntityRef,
    Error,
    ExecutionResult,
    GraphEntity,
    MappedRelationship,
    MappingError,
    MappingErrorKind,
    MetaData,
    MetaDataBuilder,
    NodeRef,
    NotFoundError,
    Operation,
    OperationKind,
    OptimisticLockError,
    PropertyInfo,
    PropertyMap,
    Related,
    RelationshipField,
    Result,
    ResultShape,
    Statement,
    StatementOutcome,
    UpdateNode,
    UpdateRelationship,
    Value,
    VersionCheck,
    WriteAction,
    WriteTarget,
};

pub use graphmodel_cypher::StatementBuilder;

pub use graphmodel_session::{
    CompileOptions, DirtyChecker, FlushPlan, FlushResult, GraphCompiler, IdentityMap,
    MappingContext, PropertyUpdatePolicy, Session, SessionConfig, SessionEvent,
};

pub use graphmodel_memory::{MemoryDriver, MemoryGraph, MemoryStore, StoredNode, StoredRelationship};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use graphmodel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Metadata
        Converter,
        Direction,
        EntityDescriptor,
        // Entities
        EntityRef,
        Error,
        GraphEntity,
        // Store
        MemoryDriver,
        MemoryStore,
        MetaData,
        Related,
        Result,
        // Session
        Session,
        SessionConfig,
        Value,
    };
    pub use std::sync::Arc;
}
