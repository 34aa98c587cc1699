//! Entity metadata model.
//!
//! Every mapped type is registered once at startup as an [`EntityDescriptor`].
//! [`MetaDataBuilder::build`] flattens inheritance into self-contained
//! descriptors (labels from the full type chain, inherited identity, version
//! and property fields) so the rest of the crate never walks a type hierarchy.
//!
//! ```
//! use graphmodel_core::{Direction, EntityDescriptor, MetaData};
//!
//! let metadata = MetaData::builder()
//!     .register(EntityDescriptor::node("Entity").abstract_type().version("version"))
//!     .register(
//!         EntityDescriptor::node("Folder")
//!             .extends("Entity")
//!             .property("name")
//!             .relationship_many("documents", "CONTAINS", Direction::Outgoing, "Document"),
//!     )
//!     .register(
//!         EntityDescriptor::node("Document")
//!             .extends("Entity")
//!             .property("name")
//!             .relationship("folder", "CONTAINS", Direction::Incoming, "Folder"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(metadata.labels_for("Folder"), &["Folder", "Entity"]);
//! assert_eq!(metadata.version_field("Document"), Some("version"));
//! ```

use std::collections::{HashMap, HashSet};

use crate::convert::Converter;
use crate::error::{ConversionError, Error, MappingError, MappingErrorKind, Result};
use crate::graph::Direction;
use crate::identifiers::validate_identifier;
use crate::value::Value;

/// A scalar field mapped to a graph property.
#[derive(Debug, Clone, Copy)]
pub struct PropertyInfo {
    /// Field name on the entity
    pub field: &'static str,
    /// Property key in the graph (may differ from the field name)
    pub property: &'static str,
    /// Converter applied before the value is written or snapshotted
    pub converter: Option<Converter>,
}

impl PropertyInfo {
    pub const fn new(field: &'static str) -> Self {
        Self {
            field,
            property: field,
            converter: None,
        }
    }

    /// Store under a different property key.
    pub const fn property(mut self, name: &'static str) -> Self {
        self.property = name;
        self
    }

    pub const fn converter(mut self, converter: Converter) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Convert a raw field value into the value stored in the graph.
    ///
    /// Runs the converter (if any) and then checks the result is storable.
    pub fn to_graph(&self, entity_type: &str, value: &Value) -> Result<Value> {
        let converted = match &self.converter {
            Some(converter) => converter.to_graph(value).map_err(|msg| {
                Error::Conversion(
                    ConversionError::new(msg)
                        .at(entity_type, self.property)
                        .converter(converter.name()),
                )
            })?,
            None => value.clone(),
        };
        converted.check_graph_primitive().map_err(|msg| {
            Error::Conversion(ConversionError::new(msg).at(entity_type, self.property))
        })?;
        Ok(converted)
    }
}

/// A field holding references to other entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipField {
    pub field: &'static str,
    pub rel_type: &'static str,
    pub direction: Direction,
    /// Declared target type: a node type, an interface or abstract type, or a
    /// relationship entity type
    pub target_type: &'static str,
    pub collection: bool,
}

impl RelationshipField {
    /// Scalar relationship field.
    pub const fn one(
        field: &'static str,
        rel_type: &'static str,
        direction: Direction,
        target_type: &'static str,
    ) -> Self {
        Self {
            field,
            rel_type,
            direction,
            target_type,
            collection: false,
        }
    }

    /// Collection relationship field.
    pub const fn many(
        field: &'static str,
        rel_type: &'static str,
        direction: Direction,
        target_type: &'static str,
    ) -> Self {
        Self {
            field,
            rel_type,
            direction,
            target_type,
            collection: true,
        }
    }
}

/// What a registered type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A node; labels come from the type chain.
    Node,
    /// A relationship with its own properties and identity.
    Relationship {
        rel_type: &'static str,
        start_field: &'static str,
        end_field: &'static str,
    },
    /// A pure interface: contributes no label, resolves to its implementors.
    Interface,
}

/// Registration-time description of one type, flattened by [`MetaDataBuilder::build`].
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: &'static str,
    kind: EntityKind,
    label: Option<&'static str>,
    is_abstract: bool,
    extends: Option<&'static str>,
    implements: Vec<&'static str>,
    identity_field: Option<&'static str>,
    version_field: Option<&'static str>,
    labels_field: Option<&'static str>,
    primary_index: Option<&'static str>,
    properties: Vec<PropertyInfo>,
    relationships: Vec<RelationshipField>,
    // Filled in by build()
    labels: Vec<&'static str>,
    supertypes: Vec<&'static str>,
}

impl EntityDescriptor {
    fn with_kind(name: &'static str, kind: EntityKind) -> Self {
        Self {
            name,
            kind,
            label: None,
            is_abstract: false,
            extends: None,
            implements: Vec::new(),
            identity_field: None,
            version_field: None,
            labels_field: None,
            primary_index: None,
            properties: Vec::new(),
            relationships: Vec::new(),
            labels: Vec::new(),
            supertypes: Vec::new(),
        }
    }

    /// A node type. Its label defaults to the type name.
    pub fn node(name: &'static str) -> Self {
        Self::with_kind(name, EntityKind::Node)
    }

    /// A relationship entity whose endpoints are read from `start_field` and
    /// `end_field`.
    pub fn relationship_entity(
        name: &'static str,
        rel_type: &'static str,
        start_field: &'static str,
        end_field: &'static str,
    ) -> Self {
        Self::with_kind(
            name,
            EntityKind::Relationship {
                rel_type,
                start_field,
                end_field,
            },
        )
    }

    /// An interface that concrete types declare with [`implements`](Self::implements).
    pub fn interface(name: &'static str) -> Self {
        Self::with_kind(name, EntityKind::Interface)
    }

    /// Override the label this type contributes.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    /// Never instantiated directly; still contributes its label.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn extends(mut self, parent: &'static str) -> Self {
        self.extends = Some(parent);
        self
    }

    pub fn implements(mut self, interface: &'static str) -> Self {
        self.implements.push(interface);
        self
    }

    /// Name of the identity field (default `id`).
    pub fn identity(mut self, field: &'static str) -> Self {
        self.identity_field = Some(field);
        self
    }

    /// Enable optimistic locking on this field.
    pub fn version(mut self, field: &'static str) -> Self {
        self.version_field = Some(field);
        self
    }

    /// Field holding additional runtime labels.
    pub fn dynamic_labels(mut self, field: &'static str) -> Self {
        self.labels_field = Some(field);
        self
    }

    /// Scalar field whose value is unique per type and indexed in the session.
    pub fn primary_index(mut self, field: &'static str) -> Self {
        self.primary_index = Some(field);
        self
    }

    /// Map a field to the property of the same name.
    pub fn property(self, field: &'static str) -> Self {
        self.property_info(PropertyInfo::new(field))
    }

    /// Map a field to a differently named property.
    pub fn property_as(self, field: &'static str, property: &'static str) -> Self {
        self.property_info(PropertyInfo::new(field).property(property))
    }

    /// Map a field through a converter.
    pub fn converted(self, field: &'static str, converter: Converter) -> Self {
        self.property_info(PropertyInfo::new(field).converter(converter))
    }

    pub fn property_info(mut self, info: PropertyInfo) -> Self {
        self.properties.push(info);
        self
    }

    /// Scalar relationship field.
    pub fn relationship(
        mut self,
        field: &'static str,
        rel_type: &'static str,
        direction: Direction,
        target_type: &'static str,
    ) -> Self {
        self.relationships
            .push(RelationshipField::one(field, rel_type, direction, target_type));
        self
    }

    /// Collection relationship field.
    pub fn relationship_many(
        mut self,
        field: &'static str,
        rel_type: &'static str,
        direction: Direction,
        target_type: &'static str,
    ) -> Self {
        self.relationships
            .push(RelationshipField::many(field, rel_type, direction, target_type));
        self
    }

    // ------------------------------------------------------------------
    // Accessors (flattened values after build)
    // ------------------------------------------------------------------

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Whether instances of exactly this type may exist.
    pub fn is_concrete(&self) -> bool {
        !self.is_abstract && self.kind != EntityKind::Interface
    }

    pub fn is_relationship_entity(&self) -> bool {
        matches!(self.kind, EntityKind::Relationship { .. })
    }

    pub fn identity_field(&self) -> &'static str {
        self.identity_field.unwrap_or("id")
    }

    pub fn version_field(&self) -> Option<&'static str> {
        self.version_field
    }

    pub fn labels_field(&self) -> Option<&'static str> {
        self.labels_field
    }

    pub fn primary_index_field(&self) -> Option<&'static str> {
        self.primary_index
    }

    pub fn properties(&self) -> &[PropertyInfo] {
        &self.properties
    }

    pub fn relationships(&self) -> &[RelationshipField] {
        &self.relationships
    }

    /// Static labels, most specific first.
    pub fn labels(&self) -> &[&'static str] {
        &self.labels
    }

    /// Relationship type of a relationship entity.
    pub fn relationship_type(&self) -> Option<&'static str> {
        match self.kind {
            EntityKind::Relationship { rel_type, .. } => Some(rel_type),
            _ => None,
        }
    }

    /// Start and end endpoint fields of a relationship entity.
    pub fn endpoint_fields(&self) -> Option<(&'static str, &'static str)> {
        match self.kind {
            EntityKind::Relationship {
                start_field,
                end_field,
                ..
            } => Some((start_field, end_field)),
            _ => None,
        }
    }

    /// Read the identity of an instance through its identity field.
    pub fn identity_of(&self, entity: &dyn crate::entity::GraphEntity) -> Option<i64> {
        entity.get(self.identity_field()).as_i64()
    }
}

/// Read-only, shareable registry of flattened descriptors.
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    entities: HashMap<&'static str, EntityDescriptor>,
    rel_types: HashSet<&'static str>,
}

/// Collects registrations and validates them in [`build`](Self::build).
#[derive(Debug, Default)]
pub struct MetaDataBuilder {
    entities: Vec<EntityDescriptor>,
}

impl MetaDataBuilder {
    pub fn register(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    /// Validate and flatten all registrations.
    #[tracing::instrument(level = "debug", skip(self), fields(types = self.entities.len()))]
    pub fn build(self) -> Result<MetaData> {
        let mut raw: HashMap<&'static str, EntityDescriptor> = HashMap::new();
        for descriptor in self.entities {
            if raw.contains_key(descriptor.name) {
                return Err(invalid(format!(
                    "type '{}' registered twice",
                    descriptor.name
                )));
            }
            raw.insert(descriptor.name, descriptor);
        }

        let mut entities = HashMap::with_capacity(raw.len());
        let mut rel_types = HashSet::new();
        for name in raw.keys() {
            let flat = flatten(name, &raw)?;
            validate(&flat)?;
            if let Some(rel_type) = flat.relationship_type() {
                rel_types.insert(rel_type);
            }
            for rel in &flat.relationships {
                rel_types.insert(rel.rel_type);
            }
            entities.insert(flat.name, flat);
        }

        reject_mixed_implementors(&entities)?;

        tracing::debug!(
            types = entities.len(),
            relationship_types = rel_types.len(),
            "Metadata built"
        );
        Ok(MetaData {
            entities,
            rel_types,
        })
    }
}

/// A supertype is implemented either by nodes only or by relationship
/// entities only, so a field declared with it maps one kind of edge.
fn reject_mixed_implementors(entities: &HashMap<&'static str, EntityDescriptor>) -> Result<()> {
    let mut kinds: HashMap<&'static str, (Option<&'static str>, Option<&'static str>)> =
        HashMap::new();
    for descriptor in entities.values().filter(|d| d.is_concrete()) {
        for supertype in &descriptor.supertypes {
            let (node, relationship) = kinds.entry(*supertype).or_default();
            let slot = if descriptor.is_relationship_entity() {
                relationship
            } else {
                node
            };
            slot.get_or_insert(descriptor.name);
        }
    }
    for (supertype, kind) in kinds {
        if let (Some(node), Some(relationship)) = kind {
            return Err(invalid(format!(
                "'{}' is implemented by node '{}' and relationship entity '{}'",
                supertype, node, relationship
            )));
        }
    }
    Ok(())
}

fn invalid(message: String) -> Error {
    Error::Mapping(MappingError::new(MappingErrorKind::InvalidMetadata, message))
}

/// Chain from `name` up to its root ancestor, most specific first.
fn chain<'a>(
    name: &'static str,
    raw: &'a HashMap<&'static str, EntityDescriptor>,
) -> Result<Vec<&'a EntityDescriptor>> {
    let mut out: Vec<&EntityDescriptor> = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(name);
    while let Some(type_name) = current {
        if !seen.insert(type_name) {
            return Err(invalid(format!(
                "inheritance cycle through '{}'",
                type_name
            )));
        }
        let descriptor = raw.get(type_name).ok_or_else(|| {
            invalid(format!(
                "'{}' extends unregistered type '{}'",
                out.last().map_or(name, |d| d.name),
                type_name
            ))
        })?;
        if let Some(child) = out.last() {
            let compatible = matches!(
                (child.kind, descriptor.kind),
                (EntityKind::Node, EntityKind::Node)
                    | (EntityKind::Relationship { .. }, EntityKind::Relationship { .. })
                    | (EntityKind::Interface, EntityKind::Interface)
            );
            if !compatible {
                return Err(invalid(format!(
                    "'{}' cannot extend '{}': node, relationship and interface types do not mix",
                    child.name, descriptor.name
                )));
            }
        }
        out.push(descriptor);
        current = descriptor.extends;
    }
    Ok(out)
}

fn flatten(
    name: &'static str,
    raw: &HashMap<&'static str, EntityDescriptor>,
) -> Result<EntityDescriptor> {
    let chain = chain(name, raw)?;
    let own = chain[0];
    let mut flat = own.clone();

    // Root first, so subtypes override inherited field mappings.
    let mut properties: Vec<PropertyInfo> = Vec::new();
    let mut relationships: Vec<RelationshipField> = Vec::new();
    for descriptor in chain.iter().rev() {
        for prop in &descriptor.properties {
            properties.retain(|p| p.field != prop.field);
            properties.push(*prop);
        }
        for rel in &descriptor.relationships {
            relationships.retain(|r| r.field != rel.field);
            relationships.push(*rel);
        }
        flat.identity_field = descriptor.identity_field.or(flat.identity_field);
        flat.version_field = descriptor.version_field.or(flat.version_field);
        flat.labels_field = descriptor.labels_field.or(flat.labels_field);
        flat.primary_index = descriptor.primary_index.or(flat.primary_index);
    }
    flat.properties = properties;
    flat.relationships = relationships;

    if own.kind == EntityKind::Node {
        flat.labels = chain.iter().map(|d| d.label.unwrap_or(d.name)).collect();
    }

    let mut supertypes: Vec<&'static str> = Vec::new();
    let mut pending: Vec<&'static str> = Vec::new();
    for descriptor in &chain {
        if descriptor.name != name {
            supertypes.push(descriptor.name);
        }
        pending.extend(descriptor.implements.iter().copied());
    }
    while let Some(interface) = pending.pop() {
        if supertypes.contains(&interface) {
            continue;
        }
        let target = raw.get(interface).ok_or_else(|| {
            invalid(format!(
                "'{}' implements unregistered interface '{}'",
                name, interface
            ))
        })?;
        if target.kind != EntityKind::Interface {
            return Err(invalid(format!(
                "'{}' implements '{}', which is not an interface",
                name, interface
            )));
        }
        supertypes.push(interface);
        pending.extend(target.implements.iter().copied());
        pending.extend(target.extends);
    }
    flat.supertypes = supertypes;
    Ok(flat)
}

fn validate(descriptor: &EntityDescriptor) -> Result<()> {
    let with_type = |e: Error| match e {
        Error::Mapping(m) => Error::Mapping(m.entity_type(descriptor.name)),
        other => other,
    };
    for label in &descriptor.labels {
        validate_identifier("label", label).map_err(with_type)?;
    }
    let mut seen_properties = HashSet::new();
    for prop in &descriptor.properties {
        validate_identifier("property", prop.property).map_err(with_type)?;
        if !seen_properties.insert(prop.property) {
            return Err(invalid(format!(
                "property '{}' of '{}' is mapped by more than one field",
                prop.property, descriptor.name
            )));
        }
    }
    for rel in &descriptor.relationships {
        validate_identifier("relationship type", rel.rel_type).map_err(with_type)?;
    }
    if let EntityKind::Relationship {
        rel_type,
        start_field,
        end_field,
    } = descriptor.kind
    {
        validate_identifier("relationship type", rel_type).map_err(with_type)?;
        if start_field.is_empty() || end_field.is_empty() {
            return Err(invalid(format!(
                "relationship entity '{}' needs start and end fields",
                descriptor.name
            )));
        }
    }
    Ok(())
}

impl MetaData {
    pub fn builder() -> MetaDataBuilder {
        MetaDataBuilder::default()
    }

    pub fn descriptor(&self, type_name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(type_name)
    }

    /// Descriptor for a runtime type, failing if the type was never registered.
    pub fn require(&self, type_name: &str) -> Result<&EntityDescriptor> {
        self.entities.get(type_name).ok_or_else(|| {
            Error::Mapping(
                MappingError::new(
                    MappingErrorKind::UnknownEntityType,
                    format!("type '{}' is not a registered entity", type_name),
                )
                .entity_type(type_name),
            )
        })
    }

    pub fn identity_field(&self, type_name: &str) -> Option<&'static str> {
        self.descriptor(type_name).map(EntityDescriptor::identity_field)
    }

    pub fn version_field(&self, type_name: &str) -> Option<&'static str> {
        self.descriptor(type_name).and_then(EntityDescriptor::version_field)
    }

    pub fn scalar_properties(&self, type_name: &str) -> &[PropertyInfo] {
        self.descriptor(type_name)
            .map(EntityDescriptor::properties)
            .unwrap_or_default()
    }

    pub fn relationship_fields(&self, type_name: &str) -> &[RelationshipField] {
        self.descriptor(type_name)
            .map(EntityDescriptor::relationships)
            .unwrap_or_default()
    }

    /// Static labels of a runtime type, most specific first.
    pub fn labels_for(&self, type_name: &str) -> &[&'static str] {
        self.descriptor(type_name)
            .map(EntityDescriptor::labels)
            .unwrap_or_default()
    }

    pub fn is_relationship_entity(&self, type_name: &str) -> bool {
        self.descriptor(type_name)
            .is_some_and(EntityDescriptor::is_relationship_entity)
    }

    /// Whether a field declared as `declared` holds relationship entities
    /// rather than nodes. Interfaces and abstract types are resolved first.
    pub fn holds_relationship_entities(&self, declared: &str) -> bool {
        self.resolve_target(declared)
            .is_ok_and(|resolved| self.is_relationship_entity(resolved))
    }

    /// Whether an instance of `runtime` may sit in a field declared as `declared`.
    pub fn is_assignable(&self, runtime: &str, declared: &str) -> bool {
        runtime == declared
            || self
                .descriptor(runtime)
                .is_some_and(|d| d.supertypes.contains(&declared))
    }

    /// Resolve a declared relationship target to a concrete mapped type.
    ///
    /// Interfaces and abstract types resolve when at least one concrete
    /// registered type is assignable to them.
    pub fn resolve_target(&self, declared: &str) -> Result<&'static str> {
        if let Some(descriptor) = self.descriptor(declared) {
            if descriptor.is_concrete() {
                return Ok(descriptor.name);
            }
        }
        let mut candidates: Vec<&'static str> = self
            .entities
            .values()
            .filter(|d| d.is_concrete() && d.supertypes.contains(&declared))
            .map(|d| d.name)
            .collect();
        candidates.sort_unstable();
        candidates.first().copied().ok_or_else(|| {
            Error::Mapping(
                MappingError::new(
                    MappingErrorKind::UnresolvableTarget,
                    format!("no concrete mapped type for '{}'", declared),
                )
                .entity_type(declared),
            )
        })
    }

    /// Whether any registered mapping uses this relationship type.
    pub fn knows_relationship_type(&self, rel_type: &str) -> bool {
        self.rel_types.contains(rel_type)
    }

    /// Intern a relationship type read at runtime to its registered spelling.
    pub fn relationship_type(&self, rel_type: &str) -> Option<&'static str> {
        self.rel_types.get(rel_type).copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetaData {
        MetaData::builder()
            .register(
                EntityDescriptor::node("Entity")
                    .abstract_type()
                    .version("version"),
            )
            .register(EntityDescriptor::interface("Pet"))
            .register(EntityDescriptor::interface("Unimplemented"))
            .register(
                EntityDescriptor::node("Person")
                    .extends("Entity")
                    .property("name")
                    .property_as("email", "emailAddress")
                    .primary_index("email")
                    .relationship_many("pets", "OWNS", Direction::Outgoing, "Pet"),
            )
            .register(
                EntityDescriptor::node("Dog")
                    .extends("Entity")
                    .implements("Pet")
                    .label("Canine")
                    .property("name"),
            )
            .register(
                EntityDescriptor::relationship_entity("Ownership", "OWNS", "owner", "pet")
                    .property("since"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_labels_follow_type_chain() {
        let md = sample();
        assert_eq!(md.labels_for("Person"), &["Person", "Entity"]);
        assert_eq!(md.labels_for("Dog"), &["Canine", "Entity"]);
        assert!(md.labels_for("Pet").is_empty());
        assert!(md.labels_for("Ownership").is_empty());
    }

    #[test]
    fn test_inherited_fields() {
        let md = sample();
        assert_eq!(md.version_field("Person"), Some("version"));
        assert_eq!(md.identity_field("Dog"), Some("id"));
        let person = md.descriptor("Person").unwrap();
        assert_eq!(person.primary_index_field(), Some("email"));
        assert_eq!(person.properties()[1].property, "emailAddress");
    }

    #[test]
    fn test_assignability() {
        let md = sample();
        assert!(md.is_assignable("Dog", "Pet"));
        assert!(md.is_assignable("Dog", "Entity"));
        assert!(md.is_assignable("Dog", "Dog"));
        assert!(!md.is_assignable("Person", "Pet"));
    }

    #[test]
    fn test_resolve_target() {
        let md = sample();
        assert_eq!(md.resolve_target("Pet").unwrap(), "Dog");
        assert_eq!(md.resolve_target("Person").unwrap(), "Person");
        let err = md.resolve_target("Unimplemented").unwrap_err();
        assert!(matches!(
            err,
            Error::Mapping(MappingError {
                kind: MappingErrorKind::UnresolvableTarget,
                ..
            })
        ));
        assert!(md.resolve_target("Nowhere").is_err());
    }

    #[test]
    fn test_relationship_entity_descriptor() {
        let md = sample();
        assert!(md.is_relationship_entity("Ownership"));
        let d = md.descriptor("Ownership").unwrap();
        assert_eq!(d.relationship_type(), Some("OWNS"));
        assert_eq!(d.endpoint_fields(), Some(("owner", "pet")));
        assert!(md.knows_relationship_type("OWNS"));
        assert_eq!(md.relationship_type("OWNS"), Some("OWNS"));
    }

    #[test]
    fn test_relationship_entity_interface_holds_relationship_entities() {
        let md = MetaData::builder()
            .register(EntityDescriptor::interface("Credit"))
            .register(EntityDescriptor::node("Actor").relationship_many(
                "credits",
                "ACTS_IN",
                Direction::Outgoing,
                "Credit",
            ))
            .register(EntityDescriptor::node("Movie"))
            .register(
                EntityDescriptor::relationship_entity("Role", "ACTS_IN", "actor", "movie")
                    .implements("Credit"),
            )
            .build()
            .unwrap();
        assert!(md.holds_relationship_entities("Credit"));
        assert!(md.holds_relationship_entities("Role"));
        assert!(!md.holds_relationship_entities("Movie"));
        assert!(!md.holds_relationship_entities("Nowhere"));
    }

    #[test]
    fn test_mixed_interface_implementors_rejected() {
        let err = MetaData::builder()
            .register(EntityDescriptor::interface("Credit"))
            .register(EntityDescriptor::node("Award").implements("Credit"))
            .register(
                EntityDescriptor::relationship_entity("Role", "ACTS_IN", "actor", "movie")
                    .implements("Credit"),
            )
            .build()
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("'Credit' is implemented by node 'Award' and relationship entity 'Role'"));
    }

    #[test]
    fn test_unknown_supertype_rejected() {
        let err = MetaData::builder()
            .register(EntityDescriptor::node("A").extends("Missing"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unregistered type 'Missing'"));
    }

    #[test]
    fn test_inheritance_cycle_rejected() {
        let err = MetaData::builder()
            .register(EntityDescriptor::node("A").extends("B"))
            .register(EntityDescriptor::node("B").extends("A"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let err = MetaData::builder()
            .register(EntityDescriptor::node("A"))
            .register(EntityDescriptor::node("A"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn test_duplicate_property_key_rejected() {
        let err = MetaData::builder()
            .register(
                EntityDescriptor::node("A")
                    .property("name")
                    .property_as("title", "name"),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("more than one field"));
    }

    #[test]
    fn test_empty_label_rejected() {
        let err = MetaData::builder()
            .register(EntityDescriptor::node("A").label(""))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Mapping(MappingError {
                kind: MappingErrorKind::InvalidIdentifier,
                ..
            })
        ));
    }

    #[test]
    fn test_property_conversion() {
        let info = PropertyInfo::new("born").converter(Converter::DATE_ISO);
        assert_eq!(
            info.to_graph("Person", &Value::Date(0)).unwrap(),
            Value::from("1970-01-01")
        );
        let err = info.to_graph("Person", &Value::from("x")).unwrap_err();
        assert!(err.is_compilation());

        let raw = PropertyInfo::new("tags");
        assert!(raw.to_graph("Person", &Value::Date(1)).is_err());
    }
}
