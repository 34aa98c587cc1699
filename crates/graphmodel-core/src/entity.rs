//! Entity trait and shared entity handles.
//!
//! Domain objects are reached only through [`GraphEntity`]: a by-name field
//! accessor the mapping layer combines with the metadata model. Live objects
//! are shared as [`EntityRef`] handles whose equality is instance identity.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::value::Value;

/// Field access for an object mapped to a node or relationship entity.
///
/// Which fields exist, and what they mean (identity, version, property,
/// relationship), is described by the metadata registered for
/// [`entity_type`](GraphEntity::entity_type); the entity only answers
/// by-name reads and writes.
pub trait GraphEntity: Any + Send + Sync + fmt::Debug {
    /// Registered type name of this instance's runtime type.
    fn entity_type(&self) -> &'static str;

    /// Read a scalar field. Unknown fields read as NULL.
    fn get(&self, field: &str) -> Value;

    /// Write a scalar field. Used to write store-assigned identities and
    /// versions back; unknown fields are ignored.
    fn set(&mut self, field: &str, value: Value);

    /// Read a relationship field (or a relationship entity's endpoint field).
    fn related(&self, field: &str) -> Related {
        let _ = field;
        Related::None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Current value of a relationship field.
#[derive(Debug, Clone, Default)]
pub enum Related {
    #[default]
    None,
    One(EntityRef),
    Many(Vec<EntityRef>),
}

impl Related {
    /// Scalar relationship field from an optional handle.
    pub fn one(target: Option<&EntityRef>) -> Self {
        match target {
            Some(t) => Related::One(t.clone()),
            None => Related::None,
        }
    }

    /// Collection relationship field.
    pub fn many<'a>(targets: impl IntoIterator<Item = &'a EntityRef>) -> Self {
        Related::Many(targets.into_iter().cloned().collect())
    }

    /// The referenced handles in field order.
    pub fn into_vec(self) -> Vec<EntityRef> {
        match self {
            Related::None => Vec::new(),
            Related::One(target) => vec![target],
            Related::Many(targets) => targets,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Related::None => true,
            Related::One(_) => false,
            Related::Many(targets) => targets.is_empty(),
        }
    }
}

/// Shared handle to a live entity.
///
/// Cloning the handle shares the instance. Two handles are equal iff they
/// point at the same instance.
#[derive(Clone)]
pub struct EntityRef {
    inner: Arc<RwLock<dyn GraphEntity>>,
}

impl EntityRef {
    /// Move an entity behind a new shared handle.
    pub fn new<E: GraphEntity>(entity: E) -> Self {
        let inner: Arc<RwLock<dyn GraphEntity>> = Arc::new(RwLock::new(entity));
        Self { inner }
    }

    /// Read access. A poisoned lock is recovered rather than propagated.
    pub fn read(&self) -> RwLockReadGuard<'_, dyn GraphEntity> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access. A poisoned lock is recovered rather than propagated.
    pub fn write(&self) -> RwLockWriteGuard<'_, dyn GraphEntity> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entity_type(&self) -> &'static str {
        self.read().entity_type()
    }

    /// Read a scalar field.
    pub fn get(&self, field: &str) -> Value {
        self.read().get(field)
    }

    /// Write a scalar field.
    pub fn set(&self, field: &str, value: Value) {
        self.write().set(field, value);
    }

    /// Read a relationship field. The lock is released before returning.
    pub fn related(&self, field: &str) -> Related {
        self.read().related(field)
    }

    /// Borrow the concrete entity. `None` if it is not an `E`.
    pub fn with<E: GraphEntity, R>(&self, f: impl FnOnce(&E) -> R) -> Option<R> {
        let guard = self.read();
        guard.as_any().downcast_ref::<E>().map(f)
    }

    /// Mutably borrow the concrete entity. `None` if it is not an `E`.
    pub fn with_mut<E: GraphEntity, R>(&self, f: impl FnOnce(&mut E) -> R) -> Option<R> {
        let mut guard = self.write();
        guard.as_any_mut().downcast_mut::<E>().map(f)
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        self.address() == other.address()
    }

    /// Address of the shared instance; stable for the instance's lifetime.
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.inner).cast::<()>() as usize
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for EntityRef {}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Entity graphs are cyclic: print the handle, never the fields.
        match self.inner.try_read() {
            Ok(guard) => write!(f, "EntityRef({}@{:#x})", guard.entity_type(), self.address()),
            Err(_) => write!(f, "EntityRef(<locked>@{:#x})", self.address()),
        }
    }
}
