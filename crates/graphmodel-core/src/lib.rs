//! Core types and traits for GraphModel Rust.
//!
//! This crate provides the foundational abstractions shared by the compiler,
//! the statement builder and the drivers:
//!
//! - `GraphEntity` trait and `EntityRef` handles for mapped objects
//! - `MetaData` registry describing labels, properties and relationships
//! - `Value` for dynamically-typed property values, with `Converter`s
//! - `Operation` / `ChangeSet` produced by the graph compiler
//! - `Driver` trait for executing parameterized write statements

pub mod convert;
pub mod driver;
pub mod entity;
pub mod error;
pub mod graph;
pub mod identifiers;
pub mod metadata;
pub mod operation;
pub mod value;

pub use convert::{ConvertFn, Converter};
pub use driver::{
    Driver, ExecutionResult, ParameterBinding, ResultShape, Statement, StatementOutcome,
    VersionPredicate, WriteAction,
};
pub use entity::{EntityRef, GraphEntity, Related};
pub use error::{
    ConversionError, DriverError, DriverErrorKind, Error, MappingError, MappingErrorKind,
    NotFoundError, OptimisticLockError, Result, WriteTarget,
};
pub use graph::{Direction, MappedRelationship, NodeRef};
pub use identifiers::{escape_identifier, is_plain_identifier, label_expression, validate_identifier};
pub use metadata::{
    EntityDescriptor, EntityKind, MetaData, MetaDataBuilder, PropertyInfo, RelationshipField,
};
pub use operation::{
    ChangeSet, CreateNode, CreateRelationship, DeleteNode, DeleteRelationship, Operation,
    OperationKind, PropertyMap, UpdateNode, UpdateRelationship, VersionCheck,
};
pub use value::Value;
