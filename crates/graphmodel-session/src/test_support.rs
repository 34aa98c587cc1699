//! Shared fixtures for the unit tests of this crate.

use graphmodel_core::{
    Direction, EntityDescriptor, EntityRef, GraphEntity, MetaData, Related, Value,
};
use std::any::Any;
use std::collections::HashMap;

/// Field-bag entity standing in for any registered type.
#[derive(Debug)]
pub(crate) struct Record {
    entity_type: &'static str,
    fields: HashMap<String, Value>,
    links: HashMap<String, Vec<EntityRef>>,
}

impl GraphEntity for Record {
    fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    fn get(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    fn related(&self, field: &str) -> Related {
        match self.links.get(field) {
            Some(targets) => Related::many(targets),
            None => Related::None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) fn record(entity_type: &'static str, fields: &[(&str, Value)]) -> EntityRef {
    EntityRef::new(Record {
        entity_type,
        fields: fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
        links: HashMap::new(),
    })
}

/// Replace the targets of a relationship field.
pub(crate) fn set_links(entity: &EntityRef, field: &str, targets: &[&EntityRef]) {
    entity.with_mut::<Record, _>(|r| {
        r.links.insert(
            field.to_string(),
            targets.iter().map(|t| (*t).clone()).collect(),
        );
    });
}

/// Break reference cycles so fixtures do not leak.
pub(crate) fn unlink(entity: &EntityRef) {
    entity.with_mut::<Record, _>(|r| r.links.clear());
}

/// Folders contain documents; people know people; actors play roles in
/// movies through a relationship entity.
pub(crate) fn metadata() -> MetaData {
    MetaData::builder()
        .register(
            EntityDescriptor::node("Folder")
                .property("name")
                .version("version")
                .relationship_many("documents", "CONTAINS", Direction::Outgoing, "Document"),
        )
        .register(
            EntityDescriptor::node("Document")
                .property("name")
                .relationship("folder", "CONTAINS", Direction::Incoming, "Folder"),
        )
        .register(
            EntityDescriptor::node("Person")
                .property("name")
                .primary_index("name")
                .dynamic_labels("extra_labels")
                .relationship_many("friends", "KNOWS", Direction::Undirected, "Person")
                .relationship("manager", "REPORTS_TO", Direction::Outgoing, "Person"),
        )
        .register(
            EntityDescriptor::node("Actor")
                .property("name")
                .relationship_many("roles", "ACTS_IN", Direction::Outgoing, "Role"),
        )
        .register(
            EntityDescriptor::node("Movie")
                .property("title")
                .relationship_many("cast", "ACTS_IN", Direction::Incoming, "Role"),
        )
        .register(
            EntityDescriptor::relationship_entity("Role", "ACTS_IN", "actor", "movie")
                .property("character")
                .version("version"),
        )
        .register(EntityDescriptor::interface("Pet"))
        .register(
            EntityDescriptor::node("Owner")
                .property("name")
                .relationship_many("pets", "OWNS", Direction::Outgoing, "Pet"),
        )
        .build()
        .unwrap_or_else(|e| panic!("fixture metadata: {e}"))
}
