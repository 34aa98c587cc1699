//! Domain model shared by the integration tests.

#![allow(dead_code)]

use graphmodel::prelude::*;
use std::any::Any;

pub fn metadata() -> Arc<MetaData> {
    let metadata = MetaData::builder()
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
                .dynamic_labels("tags")
                .relationship_many("friends", "KNOWS", Direction::Undirected, "Person"),
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
        .register(
            EntityDescriptor::node("Invoice")
                .property("number")
                .converted("amount", Converter::DECIMAL_STRING)
                .converted("issued", Converter::DATE_ISO),
        )
        .register(EntityDescriptor::interface("Pet"))
        .register(
            EntityDescriptor::node("Owner")
                .property("name")
                .relationship_many("pets", "OWNS", Direction::Outgoing, "Pet"),
        )
        .build()
        .unwrap_or_else(|e| panic!("test metadata: {e}"));
    Arc::new(metadata)
}

/// Session over a fresh store.
pub fn session() -> (Session<MemoryDriver>, MemoryStore) {
    let store = MemoryStore::new();
    (Session::new(MemoryDriver::new(store.clone()), metadata()), store)
}

pub fn id_of(entity: &EntityRef) -> i64 {
    entity
        .get("id")
        .as_i64()
        .unwrap_or_else(|| panic!("{entity:?} has no identity"))
}

fn targets(refs: &[EntityRef]) -> Related {
    Related::many(refs)
}

// ============================================================================
// Folders and documents
// ============================================================================

#[derive(Debug, Default)]
pub struct Folder {
    pub id: Option<i64>,
    pub version: Option<i64>,
    pub name: String,
    pub documents: Vec<EntityRef>,
}

impl Folder {
    pub fn create(name: &str) -> EntityRef {
        EntityRef::new(Folder {
            name: name.to_string(),
            ..Folder::default()
        })
    }
}

impl GraphEntity for Folder {
    fn entity_type(&self) -> &'static str {
        "Folder"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "version" => self.version.into(),
            "name" => self.name.as_str().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "id" => self.id = value.as_i64(),
            "version" => self.version = value.as_i64(),
            "name" => self.name = value.as_str().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    fn related(&self, field: &str) -> Related {
        match field {
            "documents" => targets(&self.documents),
            _ => Related::None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct Document {
    pub id: Option<i64>,
    pub name: String,
    pub folder: Option<EntityRef>,
}

impl Document {
    pub fn create(name: &str) -> EntityRef {
        EntityRef::new(Document {
            name: name.to_string(),
            ..Document::default()
        })
    }
}

impl GraphEntity for Document {
    fn entity_type(&self) -> &'static str {
        "Document"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "id" => self.id = value.as_i64(),
            "name" => self.name = value.as_str().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    fn related(&self, field: &str) -> Related {
        match field {
            "folder" => Related::one(self.folder.as_ref()),
            _ => Related::None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Set both sides of the folder/document mapping.
pub fn file_into(folder: &EntityRef, doc: &EntityRef) {
    folder.with_mut::<Folder, _>(|f| f.documents.push(doc.clone()));
    doc.with_mut::<Document, _>(|d| d.folder = Some(folder.clone()));
}

/// Clear both sides so test graphs do not leak through reference cycles.
pub fn unfile(folder: &EntityRef) {
    let docs = folder
        .with_mut::<Folder, _>(|f| std::mem::take(&mut f.documents))
        .unwrap_or_default();
    for doc in docs {
        doc.with_mut::<Document, _>(|d| d.folder = None);
    }
}

// ============================================================================
// People
// ============================================================================

#[derive(Debug, Default)]
pub struct Person {
    pub id: Option<i64>,
    pub name: String,
    pub tags: Vec<String>,
    pub friends: Vec<EntityRef>,
}

impl Person {
    pub fn create(name: &str) -> EntityRef {
        EntityRef::new(Person {
            name: name.to_string(),
            ..Person::default()
        })
    }
}

impl GraphEntity for Person {
    fn entity_type(&self) -> &'static str {
        "Person"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            "tags" => self.tags.clone().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "id" => self.id = value.as_i64(),
            "name" => self.name = value.as_str().unwrap_or_default().to_string(),
            "tags" => self.tags = value.string_items(),
            _ => {}
        }
    }

    fn related(&self, field: &str) -> Related {
        match field {
            "friends" => targets(&self.friends),
            _ => Related::None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn befriend(a: &EntityRef, b: &EntityRef) {
    a.with_mut::<Person, _>(|p| p.friends.push(b.clone()));
    b.with_mut::<Person, _>(|p| p.friends.push(a.clone()));
}

pub fn forget_friends(person: &EntityRef) {
    person.with_mut::<Person, _>(|p| p.friends.clear());
}

// ============================================================================
// Actors, movies and roles
// ============================================================================

#[derive(Debug, Default)]
pub struct Actor {
    pub id: Option<i64>,
    pub name: String,
    pub roles: Vec<EntityRef>,
}

impl GraphEntity for Actor {
    fn entity_type(&self) -> &'static str {
        "Actor"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "id" => self.id = value.as_i64(),
            "name" => self.name = value.as_str().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    fn related(&self, field: &str) -> Related {
        match field {
            "roles" => targets(&self.roles),
            _ => Related::None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct Movie {
    pub id: Option<i64>,
    pub title: String,
    pub cast: Vec<EntityRef>,
}

impl GraphEntity for Movie {
    fn entity_type(&self) -> &'static str {
        "Movie"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "title" => self.title.as_str().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "id" => self.id = value.as_i64(),
            "title" => self.title = value.as_str().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    fn related(&self, field: &str) -> Related {
        match field {
            "cast" => targets(&self.cast),
            _ => Related::None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct Role {
    pub id: Option<i64>,
    pub version: Option<i64>,
    pub character: String,
    pub actor: Option<EntityRef>,
    pub movie: Option<EntityRef>,
}

impl GraphEntity for Role {
    fn entity_type(&self) -> &'static str {
        "Role"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "version" => self.version.into(),
            "character" => self.character.as_str().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "id" => self.id = value.as_i64(),
            "version" => self.version = value.as_i64(),
            "character" => self.character = value.as_str().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    fn related(&self, field: &str) -> Related {
        match field {
            "actor" => Related::one(self.actor.as_ref()),
            "movie" => Related::one(self.movie.as_ref()),
            _ => Related::None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Cast `actor` as `character` in `movie`, wiring every side.
pub fn cast(actor: &EntityRef, movie: &EntityRef, character: &str) -> EntityRef {
    let role = EntityRef::new(Role {
        character: character.to_string(),
        actor: Some(actor.clone()),
        movie: Some(movie.clone()),
        ..Role::default()
    });
    actor.with_mut::<Actor, _>(|a| a.roles.push(role.clone()));
    movie.with_mut::<Movie, _>(|m| m.cast.push(role.clone()));
    role
}

pub fn uncast(role: &EntityRef) {
    role.with_mut::<Role, _>(|r| {
        r.actor = None;
        r.movie = None;
    });
}

// ============================================================================
// Converted properties
// ============================================================================

#[derive(Debug, Default)]
pub struct Invoice {
    pub id: Option<i64>,
    pub number: String,
    pub amount: String,
    pub issued: Option<i32>,
}

impl GraphEntity for Invoice {
    fn entity_type(&self) -> &'static str {
        "Invoice"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "number" => self.number.as_str().into(),
            "amount" => Value::Decimal(self.amount.clone()),
            "issued" => self.issued.map_or(Value::Null, Value::Date),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        if field == "id" {
            self.id = value.as_i64();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Unmapped interface target
// ============================================================================

#[derive(Debug, Default)]
pub struct Owner {
    pub id: Option<i64>,
    pub name: String,
}

impl GraphEntity for Owner {
    fn entity_type(&self) -> &'static str {
        "Owner"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        if field == "id" {
            self.id = value.as_i64();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
