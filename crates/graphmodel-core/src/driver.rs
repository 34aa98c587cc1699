//! Persistence driver interface.
//!
//! This module defines the boundary between the change compiler and the store:
//!
//! - [`Statement`] - One parameterized write, with its expected result shape
//! - [`WriteAction`] - Structured form of the same write, for embedded stores
//! - [`StatementOutcome`] / [`ExecutionResult`] - What the store reports back
//! - [`Driver`] - The synchronous execution boundary
//!
//! A driver receives every statement of one save or delete call in a single
//! [`Driver::execute`] call. Statements that reference nodes created earlier
//! in the same batch say so through [`ParameterBinding`]s; the driver fills
//! those parameters from the identities it assigned.

use std::collections::BTreeMap;

use crate::error::{DriverError, Result};
use crate::graph::NodeRef;
use crate::value::Value;

/// What the executor expects a statement to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// A newly assigned identity (and the initial version, if versioned).
    AssignedIdentity,
    /// A versioned update or delete: the new version, or a conflict /
    /// not-found signal.
    VersionedWrite,
    /// An unversioned update or delete; not-found is still reported.
    Unversioned,
}

/// Fill `parameter` with the identity assigned to creation token `reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    pub parameter: String,
    pub reference: usize,
}

/// Version predicate in driver terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPredicate {
    pub property: String,
    pub expected: i64,
}

/// Structured description of a write.
///
/// Carries the same information as the Cypher text so stores that do not
/// parse Cypher can execute the batch. Property payloads live in the
/// statement parameters under `props`.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteAction {
    CreateNode {
        creates: usize,
        labels: Vec<String>,
        /// Version property initialised by the statement, reported back.
        version: Option<String>,
    },
    UpdateNode {
        id: i64,
        add_labels: Vec<String>,
        remove_labels: Vec<String>,
        check: Option<VersionPredicate>,
    },
    DeleteNode {
        id: i64,
        check: Option<VersionPredicate>,
    },
    CreateRelationship {
        creates: usize,
        rel_type: String,
        start: NodeRef,
        end: NodeRef,
        merge: bool,
        version: Option<String>,
    },
    UpdateRelationship {
        id: i64,
        check: Option<VersionPredicate>,
    },
    DeleteRelationship {
        /// Identity of a relationship entity; plain edges are matched by
        /// endpoints and type.
        id: Option<i64>,
        start: i64,
        rel_type: String,
        end: i64,
        check: Option<VersionPredicate>,
    },
}

/// One parameterized write statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub cypher: String,
    pub parameters: BTreeMap<String, Value>,
    pub bindings: Vec<ParameterBinding>,
    pub shape: ResultShape,
    /// Read-only follow-up (same parameters) that tells "no such element"
    /// from "version mismatch" when the write matched nothing.
    pub verification: Option<String>,
    pub action: WriteAction,
}

impl Statement {
    /// Property payload of the statement, if any.
    pub fn properties(&self) -> Option<&BTreeMap<String, Value>> {
        match self.parameters.get("props") {
            Some(Value::Map(map)) => Some(map),
            _ => None,
        }
    }

    /// Statement text with parameters rendered as JSON, for logs.
    pub fn describe(&self) -> String {
        let params: serde_json::Map<String, serde_json::Value> = self
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        format!("{} {}", self.cypher, serde_json::Value::Object(params))
    }
}

/// Per-statement result reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementOutcome {
    /// A node or relationship was created (or merged onto an existing edge).
    Created { id: i64, version: Option<i64> },
    /// An update matched; `version` is the new stored version.
    Updated { version: Option<i64> },
    Deleted,
    /// The target identity does not exist.
    NotFound,
    /// The target exists but its version differs from the predicate.
    VersionConflict {
        expected: Option<i64>,
        actual: Option<i64>,
    },
}

impl StatementOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StatementOutcome::NotFound | StatementOutcome::VersionConflict { .. }
        )
    }
}

/// Outcomes for a batch, index-aligned with the submitted statements.
///
/// A driver that stops at the first failing statement reports outcomes up to
/// and including that failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub outcomes: Vec<StatementOutcome>,
}

impl ExecutionResult {
    pub fn new(outcomes: Vec<StatementOutcome>) -> Self {
        Self { outcomes }
    }

    /// Index and outcome of the first failed statement.
    pub fn first_failure(&self) -> Option<(usize, StatementOutcome)> {
        self.outcomes
            .iter()
            .enumerate()
            .find(|(_, o)| o.is_failure())
            .map(|(i, o)| (i, *o))
    }

    /// Check the result lines up with `submitted` statements.
    pub fn ensure_complete(&self, submitted: usize) -> Result<()> {
        if self.outcomes.len() == submitted {
            Ok(())
        } else {
            Err(DriverError::protocol(format!(
                "driver returned {} outcomes for {} statements",
                self.outcomes.len(),
                submitted
            ))
            .into())
        }
    }
}

/// Executes compiled statements against a store.
///
/// Implementations should apply a batch atomically: when any statement fails
/// (error or failure outcome) none of the batch should remain applied.
pub trait Driver {
    fn execute(&mut self, statements: &[Statement]) -> Result<ExecutionResult>;
}

impl<D: Driver + ?Sized> Driver for &mut D {
    fn execute(&mut self, statements: &[Statement]) -> Result<ExecutionResult> {
        (**self).execute(statements)
    }
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    fn execute(&mut self, statements: &[Statement]) -> Result<ExecutionResult> {
        (**self).execute(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement() -> Statement {
        let mut parameters = BTreeMap::new();
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), Value::from("f"));
        parameters.insert("props".to_string(), Value::Map(props));
        Statement {
            cypher: "CREATE (n:Folder) SET n = $props RETURN id(n) AS id".to_string(),
            parameters,
            bindings: Vec::new(),
            shape: ResultShape::AssignedIdentity,
            verification: None,
            action: WriteAction::CreateNode {
                creates: 0,
                labels: vec!["Folder".to_string()],
                version: None,
            },
        }
    }

    #[test]
    fn test_properties_accessor() {
        let stmt = statement();
        assert_eq!(
            stmt.properties().unwrap().get("name"),
            Some(&Value::from("f"))
        );
    }

    #[test]
    fn test_describe_includes_parameters() {
        let text = statement().describe();
        assert!(text.starts_with("CREATE (n:Folder)"));
        assert!(text.contains(r#""name":"f""#));
    }

    #[test]
    fn test_first_failure() {
        let result = ExecutionResult::new(vec![
            StatementOutcome::Created {
                id: 1,
                version: None,
            },
            StatementOutcome::VersionConflict {
                expected: Some(0),
                actual: Some(1),
            },
        ]);
        assert_eq!(result.first_failure().map(|(i, _)| i), Some(1));
        assert!(result.ensure_complete(2).is_ok());
        assert!(result.ensure_complete(3).unwrap_err().is_driver());
    }

    struct Recorder(usize);

    impl Driver for Recorder {
        fn execute(&mut self, statements: &[Statement]) -> Result<ExecutionResult> {
            self.0 += statements.len();
            Ok(ExecutionResult::default())
        }
    }

    #[test]
    fn test_driver_through_mut_ref_and_box() {
        let mut recorder = Recorder(0);
        {
            let mut by_ref: &mut Recorder = &mut recorder;
            Driver::execute(&mut by_ref, &[statement()]).unwrap();
        }
        let mut boxed: Box<dyn Driver> = Box::new(Recorder(0));
        boxed.execute(&[statement(), statement()]).unwrap();
        assert_eq!(recorder.0, 1);
    }
}
