//! Shared id types and the [`Value`] tagged union used by both the storage
//! and query layers, so neither has to depend on the other for basic types.

mod duration;
mod ids;
mod point;
mod value;

pub use duration::Duration;
pub use ids::{EdgeId, EdgeKey, NodeId};
pub use point::{Crs, Point};
pub use value::{TimeValue, Value};

/// A node reference carried inside a [`Value::Node`], cheap to clone and
/// independent of the owning graph's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeRef {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub properties: std::collections::BTreeMap<String, Value>,
}

/// An edge reference carried inside a [`Value::Edge`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EdgeRef {
    pub id: EdgeId,
    pub rel_type: String,
    pub src: NodeId,
    pub dst: NodeId,
    pub properties: std::collections::BTreeMap<String, Value>,
}

/// An ordered walk alternating nodes and relationships, `relationships.len()
/// == nodes.len() - 1` for any non-empty path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PathValue {
    pub nodes: Vec<NodeRef>,
    pub relationships: Vec<EdgeRef>,
}

impl PathValue {
    pub fn length(&self) -> usize {
        self.relationships.len()
    }
}

/// Storage-facing trait implemented by the in-memory graph: gives the query
/// layer a read-only, point-in-time view without leaking storage internals.
pub trait GraphStore {
    type Snapshot<'a>: GraphSnapshot
    where
        Self: 'a;

    fn snapshot(&self) -> Self::Snapshot<'_>;
}

/// A read-only view over one graph state, used by the executor to walk
/// adjacency without holding a mutable borrow of the whole store.
pub trait GraphSnapshot {
    fn node_exists(&self, id: NodeId) -> bool;
    fn edge_exists(&self, id: EdgeId) -> bool;
}
