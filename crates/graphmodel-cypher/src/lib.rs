//! Cypher write statements for GraphModel Rust.
//!
//! `graphmodel-cypher` is the **statement layer**: it turns the operations of a
//! compiled [`ChangeSet`](graphmodel_core::ChangeSet) into parameterized Cypher
//! statements, each tagged with the result shape the executor should expect.
//!
//! # Role In The Architecture
//!
//! - **Parameters only**: identities, versions and property maps are always
//!   bound parameters; labels and relationship types are escaped identifiers.
//! - **Optimistic locking**: versioned writes carry a version predicate plus
//!   a verification statement that separates "not found" from "conflict".
//! - **Same-batch references**: relationships to nodes created in the same
//!   batch declare bindings instead of literal identities.

pub mod builder;

pub use builder::StatementBuilder;
