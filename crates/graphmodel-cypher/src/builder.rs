//! Statement builder for change-set operations.
//!
//! Each [`Operation`] becomes exactly one parameterized [`Statement`]. Labels,
//! relationship types and property keys are spliced in escaped form; every
//! value (identities, versions, property maps) is a bound parameter.

use std::collections::BTreeMap;

use graphmodel_core::{
    ChangeSet, ConversionError, CreateNode, CreateRelationship, DeleteNode, DeleteRelationship,
    Error, NodeRef, Operation, ParameterBinding, PropertyMap, Result, ResultShape, Statement,
    UpdateNode, UpdateRelationship, Value, VersionCheck, VersionPredicate, WriteAction,
    escape_identifier, label_expression, validate_identifier,
};

/// Parameter holding the property map of a write.
pub const PROPS: &str = "props";
/// Parameter holding the identity of the targeted node or relationship.
pub const ID: &str = "id";
/// Parameter holding the expected version of a versioned write.
pub const VERSION: &str = "version";
/// Parameters holding relationship endpoint identities.
pub const START: &str = "start";
pub const END: &str = "end";

/// Renders change-set operations as Cypher write statements.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    verification: bool,
}

impl Default for StatementBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementBuilder {
    /// Builder that attaches verification statements to versioned writes.
    pub const fn new() -> Self {
        Self { verification: true }
    }

    /// Toggle verification statements (drivers that report conflicts
    /// themselves do not need them).
    pub const fn verification(mut self, enabled: bool) -> Self {
        self.verification = enabled;
        self
    }

    /// Render a whole change set, failing on the first rejected operation.
    #[tracing::instrument(level = "debug", skip(self, changes), fields(operations = changes.len()))]
    pub fn build_all(&self, changes: &ChangeSet) -> Result<Vec<Statement>> {
        changes.iter().map(|op| self.build(op)).collect()
    }

    /// Render one operation.
    pub fn build(&self, op: &Operation) -> Result<Statement> {
        let statement = match op {
            Operation::CreateNode(op) => self.create_node(op)?,
            Operation::UpdateNode(op) => self.update_node(op)?,
            Operation::DeleteNode(op) => self.delete_node(op),
            Operation::CreateRelationship(op) => self.create_relationship(op)?,
            Operation::UpdateRelationshipProperties(op) => self.update_relationship(op)?,
            Operation::DeleteRelationship(op) => self.delete_relationship(op)?,
        };
        tracing::trace!(kind = %op.kind(), cypher = %statement.cypher, "Statement built");
        Ok(statement)
    }

    fn create_node(&self, op: &CreateNode) -> Result<Statement> {
        for label in &op.labels {
            validate_identifier("label", label)?;
        }
        let mut props = checked_properties(op.entity_type, &op.properties)?;
        let mut returns = String::from("id(n) AS id");
        if let Some(version) = op.version {
            props.insert(version.to_string(), Value::Integer(0));
            returns.push_str(&format!(", n.{} AS version", escape_identifier(version)));
        }

        let mut parameters = BTreeMap::new();
        parameters.insert(PROPS.to_string(), Value::Map(props));
        Ok(Statement {
            cypher: format!(
                "CREATE (n{}) SET n = ${} RETURN {}",
                label_expression(&op.labels),
                PROPS,
                returns
            ),
            parameters,
            bindings: Vec::new(),
            shape: ResultShape::AssignedIdentity,
            verification: None,
            action: WriteAction::CreateNode {
                creates: op.reference,
                labels: op.labels.clone(),
                version: op.version.map(str::to_string),
            },
        })
    }

    fn update_node(&self, op: &UpdateNode) -> Result<Statement> {
        for label in op.labels.iter().chain(&op.removed_labels) {
            validate_identifier("label", label)?;
        }
        let props = checked_properties(op.entity_type, &op.properties)?;

        let mut parameters = BTreeMap::new();
        parameters.insert(ID.to_string(), Value::Integer(op.id));
        parameters.insert(PROPS.to_string(), Value::Map(props));

        let mut cypher = format!("MATCH (n) WHERE id(n) = ${}", ID);
        cypher.push_str(&version_predicate("n", op.version, &mut parameters));
        cypher.push_str(&format!(" SET n += ${}", PROPS));
        if let Some(check) = op.version {
            let key = escape_identifier(check.property);
            cypher.push_str(&format!(", n.{key} = n.{key} + 1"));
        }
        if !op.labels.is_empty() {
            cypher.push_str(&format!(" SET n{}", label_expression(&op.labels)));
        }
        if !op.removed_labels.is_empty() {
            cypher.push_str(&format!(" REMOVE n{}", label_expression(&op.removed_labels)));
        }
        cypher.push_str(&returning("n", op.version));

        Ok(Statement {
            cypher,
            verification: self.verify("MATCH (n) WHERE id(n) = $id", "n", op.version),
            parameters,
            bindings: Vec::new(),
            shape: write_shape(op.version),
            action: WriteAction::UpdateNode {
                id: op.id,
                add_labels: op.labels.clone(),
                remove_labels: op.removed_labels.clone(),
                check: op.version.map(predicate),
            },
        })
    }

    fn delete_node(&self, op: &DeleteNode) -> Statement {
        let mut parameters = BTreeMap::new();
        parameters.insert(ID.to_string(), Value::Integer(op.id));
        let mut cypher = format!("MATCH (n) WHERE id(n) = ${}", ID);
        cypher.push_str(&version_predicate("n", op.version, &mut parameters));
        cypher.push_str(" DETACH DELETE n RETURN count(n) AS deleted");

        Statement {
            cypher,
            verification: self.verify("MATCH (n) WHERE id(n) = $id", "n", op.version),
            parameters,
            bindings: Vec::new(),
            shape: write_shape(op.version),
            action: WriteAction::DeleteNode {
                id: op.id,
                check: op.version.map(predicate),
            },
        }
    }

    fn create_relationship(&self, op: &CreateRelationship) -> Result<Statement> {
        validate_identifier("relationship type", op.rel_type)?;
        let owner = op.entity_type.unwrap_or(op.rel_type);
        let mut props = checked_properties(owner, &op.properties)?;

        let mut parameters = BTreeMap::new();
        let mut bindings = Vec::new();
        bind_endpoint(START, op.start, &mut parameters, &mut bindings);
        bind_endpoint(END, op.end, &mut parameters, &mut bindings);

        let rel_type = escape_identifier(op.rel_type);
        let mut cypher = format!(
            "MATCH (a) WHERE id(a) = ${} MATCH (b) WHERE id(b) = ${} ",
            START, END
        );
        let mut returns = String::from("id(r) AS id");
        if op.merge {
            cypher.push_str(&format!("MERGE (a)-[r:{}]->(b)", rel_type));
        } else {
            cypher.push_str(&format!("CREATE (a)-[r:{}]->(b)", rel_type));
        }
        if let Some(version) = op.version {
            props.insert(version.to_string(), Value::Integer(0));
            returns.push_str(&format!(", r.{} AS version", escape_identifier(version)));
        }
        if !props.is_empty() {
            if op.merge {
                cypher.push_str(&format!(" ON CREATE SET r = ${}", PROPS));
            } else {
                cypher.push_str(&format!(" SET r = ${}", PROPS));
            }
            parameters.insert(PROPS.to_string(), Value::Map(props));
        }
        cypher.push_str(&format!(" RETURN {}", returns));

        Ok(Statement {
            cypher,
            parameters,
            bindings,
            shape: ResultShape::AssignedIdentity,
            verification: None,
            action: WriteAction::CreateRelationship {
                creates: op.reference,
                rel_type: op.rel_type.to_string(),
                start: op.start,
                end: op.end,
                merge: op.merge,
                version: op.version.map(str::to_string),
            },
        })
    }

    fn update_relationship(&self, op: &UpdateRelationship) -> Result<Statement> {
        let props = checked_properties(op.entity_type, &op.properties)?;
        let mut parameters = BTreeMap::new();
        parameters.insert(ID.to_string(), Value::Integer(op.id));
        parameters.insert(PROPS.to_string(), Value::Map(props));

        let mut cypher = format!("MATCH ()-[r]->() WHERE id(r) = ${}", ID);
        cypher.push_str(&version_predicate("r", op.version, &mut parameters));
        cypher.push_str(&format!(" SET r += ${}", PROPS));
        if let Some(check) = op.version {
            let key = escape_identifier(check.property);
            cypher.push_str(&format!(", r.{key} = r.{key} + 1"));
        }
        cypher.push_str(&returning("r", op.version));

        Ok(Statement {
            cypher,
            verification: self.verify("MATCH ()-[r]->() WHERE id(r) = $id", "r", op.version),
            parameters,
            bindings: Vec::new(),
            shape: write_shape(op.version),
            action: WriteAction::UpdateRelationship {
                id: op.id,
                check: op.version.map(predicate),
            },
        })
    }

    fn delete_relationship(&self, op: &DeleteRelationship) -> Result<Statement> {
        let rel = &op.relationship;
        validate_identifier("relationship type", rel.rel_type)?;
        let mut parameters = BTreeMap::new();

        let (mut cypher, verification) = if let Some(id) = rel.rel_id {
            parameters.insert(ID.to_string(), Value::Integer(id));
            let mut cypher = format!("MATCH ()-[r]->() WHERE id(r) = ${}", ID);
            cypher.push_str(&version_predicate("r", op.version, &mut parameters));
            (
                cypher,
                self.verify("MATCH ()-[r]->() WHERE id(r) = $id", "r", op.version),
            )
        } else {
            parameters.insert(START.to_string(), Value::Integer(rel.start));
            parameters.insert(END.to_string(), Value::Integer(rel.end));
            (
                format!(
                    "MATCH (a)-[r:{}]->(b) WHERE id(a) = ${} AND id(b) = ${}",
                    escape_identifier(rel.rel_type),
                    START,
                    END
                ),
                None,
            )
        };
        cypher.push_str(" DELETE r RETURN count(r) AS deleted");

        Ok(Statement {
            cypher,
            parameters,
            bindings: Vec::new(),
            shape: write_shape(op.version),
            verification,
            action: WriteAction::DeleteRelationship {
                id: rel.rel_id,
                start: rel.start,
                rel_type: rel.rel_type.to_string(),
                end: rel.end,
                check: op.version.map(predicate),
            },
        })
    }

    fn verify(&self, matcher: &str, var: &str, check: Option<VersionCheck>) -> Option<String> {
        if !self.verification {
            return None;
        }
        let check = check?;
        Some(format!(
            "{} RETURN {}.{} AS version",
            matcher,
            var,
            escape_identifier(check.property)
        ))
    }
}

/// Reject property values the store cannot hold.
fn checked_properties(owner: &str, properties: &PropertyMap) -> Result<PropertyMap> {
    for (key, value) in properties {
        validate_identifier("property", key)?;
        value.check_graph_primitive().map_err(|msg| {
            Error::Conversion(ConversionError::new(msg).at(owner, key.as_str()))
        })?;
    }
    Ok(properties.clone())
}

fn version_predicate(
    var: &str,
    check: Option<VersionCheck>,
    parameters: &mut BTreeMap<String, Value>,
) -> String {
    match check {
        Some(check) => {
            parameters.insert(VERSION.to_string(), Value::Integer(check.expected));
            format!(
                " AND {}.{} = ${}",
                var,
                escape_identifier(check.property),
                VERSION
            )
        }
        None => String::new(),
    }
}

fn returning(var: &str, check: Option<VersionCheck>) -> String {
    match check {
        Some(check) => format!(
            " RETURN {}.{} AS version",
            var,
            escape_identifier(check.property)
        ),
        None => format!(" RETURN id({}) AS id", var),
    }
}

fn write_shape(check: Option<VersionCheck>) -> ResultShape {
    if check.is_some() {
        ResultShape::VersionedWrite
    } else {
        ResultShape::Unversioned
    }
}

fn predicate(check: VersionCheck) -> VersionPredicate {
    VersionPredicate {
        property: check.property.to_string(),
        expected: check.expected,
    }
}

/// Existing endpoints are bound directly; new ones are filled in by the
/// driver from the identity it assigned earlier in the batch.
fn bind_endpoint(
    parameter: &str,
    node: NodeRef,
    parameters: &mut BTreeMap<String, Value>,
    bindings: &mut Vec<ParameterBinding>,
) {
    match node {
        NodeRef::Existing(id) => {
            parameters.insert(parameter.to_string(), Value::Integer(id));
        }
        NodeRef::New(reference) => {
            parameters.insert(parameter.to_string(), Value::Null);
            bindings.push(ParameterBinding {
                parameter: parameter.to_string(),
                reference,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmodel_core::{EntityRef, GraphEntity, MappedRelationship};
    use std::any::Any;

    #[derive(Debug)]
    struct Stub;

    impl GraphEntity for Stub {
        fn entity_type(&self) -> &'static str {
            "Stub"
        }
        fn get(&self, _field: &str) -> Value {
            Value::Null
        }
        fn set(&mut self, _field: &str, _value: Value) {}
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn props(pairs: &[(&str, Value)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_create_node_initialises_version() {
        let op = Operation::CreateNode(CreateNode {
            reference: 0,
            entity: EntityRef::new(Stub),
            entity_type: "Folder",
            labels: vec!["Folder".to_string(), "Entity".to_string()],
            properties: props(&[("name", Value::from("f"))]),
            version: Some("version"),
        });
        let stmt = StatementBuilder::new().build(&op).unwrap();
        assert_eq!(
            stmt.cypher,
            "CREATE (n:Folder:Entity) SET n = $props RETURN id(n) AS id, n.version AS version"
        );
        let map = stmt.properties().unwrap();
        assert_eq!(map.get("version"), Some(&Value::Integer(0)));
        assert!(!map.contains_key("id"));
        assert_eq!(stmt.shape, ResultShape::AssignedIdentity);
    }

    #[test]
    fn test_update_node_carries_version_predicate() {
        let op = Operation::UpdateNode(UpdateNode {
            id: 12,
            entity: EntityRef::new(Stub),
            entity_type: "User",
            labels: Vec::new(),
            removed_labels: vec!["Admin".to_string()],
            properties: props(&[("name", Value::from("x"))]),
            version: Some(VersionCheck {
                property: "version",
                expected: 3,
            }),
        });
        let stmt = StatementBuilder::new().build(&op).unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (n) WHERE id(n) = $id AND n.version = $version \
             SET n += $props, n.version = n.version + 1 REMOVE n:Admin \
             RETURN n.version AS version"
        );
        assert_eq!(stmt.parameters.get("version"), Some(&Value::Integer(3)));
        assert_eq!(stmt.shape, ResultShape::VersionedWrite);
        assert_eq!(
            stmt.verification.as_deref(),
            Some("MATCH (n) WHERE id(n) = $id RETURN n.version AS version")
        );
    }

    #[test]
    fn test_unversioned_update_has_no_verification() {
        let op = Operation::UpdateNode(UpdateNode {
            id: 1,
            entity: EntityRef::new(Stub),
            entity_type: "Tag",
            labels: Vec::new(),
            removed_labels: Vec::new(),
            properties: PropertyMap::new(),
            version: None,
        });
        let stmt = StatementBuilder::new().build(&op).unwrap();
        assert!(stmt.verification.is_none());
        assert_eq!(stmt.shape, ResultShape::Unversioned);
        assert!(!stmt.parameters.contains_key("version"));
    }

    #[test]
    fn test_create_relationship_binds_new_endpoints() {
        let op = Operation::CreateRelationship(CreateRelationship {
            reference: 4,
            rel_type: "CONTAINS",
            start: NodeRef::New(0),
            end: NodeRef::Existing(9),
            start_type: "Folder",
            end_type: "Document",
            entity: None,
            entity_type: None,
            properties: PropertyMap::new(),
            version: None,
            merge: false,
        });
        let stmt = StatementBuilder::new().build(&op).unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (a) WHERE id(a) = $start MATCH (b) WHERE id(b) = $end \
             CREATE (a)-[r:CONTAINS]->(b) RETURN id(r) AS id"
        );
        assert_eq!(
            stmt.bindings,
            vec![ParameterBinding {
                parameter: "start".to_string(),
                reference: 0
            }]
        );
        assert_eq!(stmt.parameters.get("end"), Some(&Value::Integer(9)));
    }

    #[test]
    fn test_merge_between_existing_nodes() {
        let op = Operation::CreateRelationship(CreateRelationship {
            reference: 0,
            rel_type: "has space",
            start: NodeRef::Existing(1),
            end: NodeRef::Existing(2),
            start_type: "A",
            end_type: "B",
            entity: None,
            entity_type: None,
            properties: PropertyMap::new(),
            version: None,
            merge: true,
        });
        let stmt = StatementBuilder::new().build(&op).unwrap();
        assert!(stmt.cypher.contains("MERGE (a)-[r:`has space`]->(b)"));
        assert!(stmt.bindings.is_empty());
    }

    #[test]
    fn test_delete_plain_relationship_by_endpoints() {
        let op = Operation::DeleteRelationship(DeleteRelationship {
            relationship: MappedRelationship::new(1, "CONTAINS", 2, "Folder", "Document"),
            entity_type: None,
            version: None,
        });
        let stmt = StatementBuilder::new().build(&op).unwrap();
        assert_eq!(
            stmt.cypher,
            "MATCH (a)-[r:CONTAINS]->(b) WHERE id(a) = $start AND id(b) = $end \
             DELETE r RETURN count(r) AS deleted"
        );
    }

    #[test]
    fn test_delete_node_is_detach_delete() {
        let op = Operation::DeleteNode(DeleteNode {
            id: 5,
            entity: None,
            entity_type: "Folder",
            version: None,
        });
        let stmt = StatementBuilder::new().verification(false).build(&op).unwrap();
        assert!(stmt.cypher.contains("DETACH DELETE n"));
        assert_eq!(stmt.parameters.get("id"), Some(&Value::Integer(5)));
    }

    #[test]
    fn test_unconverted_value_rejected() {
        let op = Operation::CreateNode(CreateNode {
            reference: 0,
            entity: EntityRef::new(Stub),
            entity_type: "Event",
            labels: vec!["Event".to_string()],
            properties: props(&[("when", Value::Date(3))]),
            version: None,
        });
        let err = StatementBuilder::new().build(&op).unwrap_err();
        assert!(err.is_compilation());
        assert!(err.to_string().contains("property 'when' of Event"));
    }
}
