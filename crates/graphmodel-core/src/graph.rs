//! Relationship bookkeeping shared by the mapping context, compiler and drivers.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Direction of a relationship field, seen from the entity declaring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Direction {
    /// The declaring entity is the start node.
    Outgoing,
    /// The declaring entity is the end node.
    Incoming,
    /// Either orientation matches; new edges are stored outgoing.
    Undirected,
}

impl Direction {
    /// The same edge seen from the other end.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
            Direction::Undirected => Direction::Undirected,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Outgoing => "OUTGOING",
            Direction::Incoming => "INCOMING",
            Direction::Undirected => "UNDIRECTED",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a node inside one compiled change set.
///
/// Persisted nodes are addressed by identity; nodes created by the same
/// change set by the per-run token of their `CreateNode` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeRef {
    Existing(i64),
    New(usize),
}

impl NodeRef {
    pub const fn id(self) -> Option<i64> {
        match self {
            NodeRef::Existing(id) => Some(id),
            NodeRef::New(_) => None,
        }
    }

    pub const fn is_new(self) -> bool {
        matches!(self, NodeRef::New(_))
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Existing(id) => write!(f, "#{id}"),
            NodeRef::New(token) => write!(f, "new#{token}"),
        }
    }
}

/// A relationship the session knows to exist in the store.
///
/// Stored in the orientation it has in the graph. Equality covers the
/// endpoints, type and relationship-entity identity; the endpoint type names
/// are descriptive only.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MappedRelationship {
    pub start: i64,
    pub rel_type: &'static str,
    pub end: i64,
    /// Identity of the relationship, tracked for relationship entities.
    pub rel_id: Option<i64>,
    pub start_type: &'static str,
    pub end_type: &'static str,
}

impl MappedRelationship {
    pub fn new(
        start: i64,
        rel_type: &'static str,
        end: i64,
        start_type: &'static str,
        end_type: &'static str,
    ) -> Self {
        Self {
            start,
            rel_type,
            end,
            rel_id: None,
            start_type,
            end_type,
        }
    }

    /// Attach the identity of a relationship entity.
    pub fn with_id(mut self, rel_id: i64) -> Self {
        self.rel_id = Some(rel_id);
        self
    }

    /// Whether either endpoint is `node`.
    pub fn touches(&self, node: i64) -> bool {
        self.start == node || self.end == node
    }

    /// The far endpoint as seen from `node` looking along `direction`, with its
    /// type name. `None` when the edge does not leave `node` that way.
    pub fn other_end(&self, node: i64, direction: Direction) -> Option<(i64, &'static str)> {
        match direction {
            Direction::Outgoing if self.start == node => Some((self.end, self.end_type)),
            Direction::Incoming if self.end == node => Some((self.start, self.start_type)),
            Direction::Undirected if self.start == node => Some((self.end, self.end_type)),
            Direction::Undirected if self.end == node => Some((self.start, self.start_type)),
            _ => None,
        }
    }

    fn key(&self) -> (i64, &'static str, i64, Option<i64>) {
        (self.start, self.rel_type, self.end, self.rel_id)
    }
}

impl PartialEq for MappedRelationship {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for MappedRelationship {}

impl Hash for MappedRelationship {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for MappedRelationship {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MappedRelationship {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for MappedRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[", self.start)?;
        if let Some(id) = self.rel_id {
            write!(f, "{id}")?;
        }
        write!(f, ":{}]->({})", self.rel_type, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_end_respects_direction() {
        let rel = MappedRelationship::new(1, "CONTAINS", 2, "Folder", "Document");
        assert_eq!(rel.other_end(1, Direction::Outgoing), Some((2, "Document")));
        assert_eq!(rel.other_end(1, Direction::Incoming), None);
        assert_eq!(rel.other_end(2, Direction::Incoming), Some((1, "Folder")));
        assert_eq!(rel.other_end(2, Direction::Undirected), Some((1, "Folder")));
        assert_eq!(rel.other_end(3, Direction::Undirected), None);
    }

    #[test]
    fn test_self_loop_other_end() {
        let rel = MappedRelationship::new(5, "KNOWS", 5, "Person", "Person");
        assert_eq!(rel.other_end(5, Direction::Outgoing), Some((5, "Person")));
        assert_eq!(rel.other_end(5, Direction::Incoming), Some((5, "Person")));
    }

    #[test]
    fn test_equality_ignores_type_names() {
        let a = MappedRelationship::new(1, "R", 2, "A", "B");
        let b = MappedRelationship::new(1, "R", 2, "X", "Y");
        assert_eq!(a, b);
        assert_ne!(a, a.with_id(10));
    }

    #[test]
    fn test_display() {
        let rel = MappedRelationship::new(1, "ACTS_IN", 2, "Actor", "Movie").with_id(7);
        assert_eq!(rel.to_string(), "(1)-[7:ACTS_IN]->(2)");
        assert_eq!(NodeRef::New(3).to_string(), "new#3");
        assert_eq!(Direction::Incoming.reverse(), Direction::Outgoing);
    }
}
