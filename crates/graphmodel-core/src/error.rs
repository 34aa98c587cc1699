//! Error types for GraphModel operations.

use std::fmt;

/// The primary error type for all GraphModel operations.
#[derive(Debug)]
pub enum Error {
    /// Metadata or object graph cannot be compiled (unknown types, bad endpoints)
    Mapping(MappingError),
    /// A property value was rejected by its converter or is not storable
    Conversion(ConversionError),
    /// A version predicate did not match the stored version
    OptimisticLock(OptimisticLockError),
    /// The targeted node or relationship no longer exists in the store
    NotFound(NotFoundError),
    /// Failure reported by the persistence driver
    Driver(DriverError),
    /// Custom error with message
    Custom(String),
}

/// What a write was aimed at: a node or a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Node,
    Relationship,
}

impl fmt::Display for WriteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteTarget::Node => write!(f, "node"),
            WriteTarget::Relationship => write!(f, "relationship"),
        }
    }
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub entity_type: Option<String>,
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// The runtime type of an instance is not registered
    UnknownEntityType,
    /// A relationship field targets a type with no concrete mapping
    UnresolvableTarget,
    /// A relationship entity is missing its start or end node
    MissingRelationshipEndpoint,
    /// The metadata registration itself is inconsistent
    InvalidMetadata,
    /// A label, relationship type or property name cannot be used in a statement
    InvalidIdentifier,
}

#[derive(Debug)]
pub struct ConversionError {
    pub entity_type: Option<String>,
    pub property: Option<String>,
    pub converter: Option<&'static str>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct OptimisticLockError {
    pub target: WriteTarget,
    pub entity_type: String,
    pub id: i64,
    /// Version the session submitted in the predicate
    pub expected_version: Option<i64>,
    /// Version found in the store, when the driver could read it
    pub actual_version: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NotFoundError {
    pub target: WriteTarget,
    pub entity_type: String,
    pub id: i64,
}

#[derive(Debug)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The statements never reached the store or the connection failed
    Transport,
    /// The execution result does not line up with the submitted statements
    Protocol,
    /// The store rejected a statement (constraint, syntax)
    Rejected,
}

impl MappingError {
    /// Create a mapping error of the given kind.
    pub fn new(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity_type: None,
            field: None,
            message: message.into(),
        }
    }

    /// Attach the entity type the error was raised for.
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Attach the field the error was raised for.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl ConversionError {
    /// Create a conversion error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            entity_type: None,
            property: None,
            converter: None,
            message: message.into(),
        }
    }

    /// Attach the entity type and property that failed to convert.
    pub fn at(mut self, entity_type: impl Into<String>, property: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.property = Some(property.into());
        self
    }

    /// Attach the name of the converter that rejected the value.
    pub fn converter(mut self, name: &'static str) -> Self {
        self.converter = Some(name);
        self
    }
}

impl DriverError {
    /// Create a driver error without an underlying source.
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// A mismatch between submitted statements and the returned outcomes.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Protocol, message)
    }
}

impl Error {
    /// Was this raised while compiling, before anything reached the driver?
    pub fn is_compilation(&self) -> bool {
        matches!(self, Error::Mapping(_) | Error::Conversion(_))
    }

    /// Is this an optimistic-locking conflict (reload and retry may succeed)?
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::OptimisticLock(_))
    }

    /// Did the targeted node or relationship vanish from the store?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Is this an opaque driver failure?
    pub fn is_driver(&self) -> bool {
        matches!(self, Error::Driver(_))
    }

    /// Identity of the entity a store-level failure refers to.
    pub fn entity_id(&self) -> Option<i64> {
        match self {
            Error::OptimisticLock(e) => Some(e.id),
            Error::NotFound(e) => Some(e.id),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::Conversion(e) => write!(f, "Conversion error: {}", e),
            Error::OptimisticLock(e) => write!(f, "Optimistic locking conflict: {}", e),
            Error::NotFound(e) => write!(f, "Not found: {}", e),
            Error::Driver(e) => write!(f, "Driver error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Driver(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.entity_type, &self.field) {
            (Some(ty), Some(field)) => write!(f, "{} (at {}.{})", self.message, ty, field),
            (Some(ty), None) => write!(f, "{} (type {})", self.message, ty),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(ty), Some(prop)) = (&self.entity_type, &self.property) {
            write!(f, "property '{}' of {}: {}", prop, ty, self.message)?;
        } else {
            write!(f, "{}", self.message)?;
        }
        if let Some(converter) = self.converter {
            write!(f, " [converter {}]", converter)?;
        }
        Ok(())
    }
}

impl fmt::Display for OptimisticLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.target {
            WriteTarget::Node => "Entity",
            WriteTarget::Relationship => "Relationship entity",
        };
        match self.expected_version {
            Some(v) => write!(
                f,
                "{} with type='{}' id='{}' had incorrect version {}",
                kind, self.entity_type, self.id, v
            )?,
            None => write!(
                f,
                "{} with type='{}' id='{}' had incorrect version",
                kind, self.entity_type, self.id
            )?,
        }
        if let Some(actual) = self.actual_version {
            write!(f, " (stored version {})", actual)?;
        }
        Ok(())
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with type='{}' id='{}' no longer exists",
            self.target, self.entity_type, self.id
        )
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MappingError {}
impl std::error::Error for ConversionError {}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<ConversionError> for Error {
    fn from(err: ConversionError) -> Self {
        Error::Conversion(err)
    }
}

impl From<OptimisticLockError> for Error {
    fn from(err: OptimisticLockError) -> Self {
        Error::OptimisticLock(err)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        Error::Driver(err)
    }
}

/// Result type alias for GraphModel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        let mapping = Error::from(MappingError::new(
            MappingErrorKind::UnresolvableTarget,
            "no concrete type",
        ));
        assert!(mapping.is_compilation());
        assert!(!mapping.is_conflict());

        let conflict = Error::from(OptimisticLockError {
            target: WriteTarget::Node,
            entity_type: "User".to_string(),
            id: 4,
            expected_version: Some(0),
            actual_version: Some(1),
        });
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
        assert_eq!(conflict.entity_id(), Some(4));

        let missing = Error::from(NotFoundError {
            target: WriteTarget::Relationship,
            entity_type: "Role".to_string(),
            id: 9,
        });
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());
    }

    #[test]
    fn test_optimistic_lock_message() {
        let err = OptimisticLockError {
            target: WriteTarget::Node,
            entity_type: "User".to_string(),
            id: 12,
            expected_version: Some(0),
            actual_version: None,
        };
        assert_eq!(
            err.to_string(),
            "Entity with type='User' id='12' had incorrect version 0"
        );
    }

    #[test]
    fn test_mapping_error_context() {
        let err = MappingError::new(MappingErrorKind::UnresolvableTarget, "cannot resolve Pet")
            .entity_type("Person")
            .field("pets");
        assert_eq!(err.to_string(), "cannot resolve Pet (at Person.pets)");
    }

    #[test]
    fn test_conversion_error_context() {
        let err = ConversionError::new("day out of range")
            .at("Event", "when")
            .converter("date_iso");
        assert_eq!(
            err.to_string(),
            "property 'when' of Event: day out of range [converter date_iso]"
        );
    }
}
