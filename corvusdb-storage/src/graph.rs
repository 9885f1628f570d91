//! The in-memory property graph: arena-style node/edge collections addressed
//! by id (never by pointer), insertion-ordered adjacency, and the label/type
//! indexes derived from them.

use std::collections::{BTreeMap, BTreeSet};

use corvusdb_api::{EdgeId, NodeId, Value};

use crate::error::{Error, Result};
use crate::stats::GraphStatistics;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, Value>,
}

impl Node {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub rel_type: String,
    pub src: NodeId,
    pub dst: NodeId,
    pub properties: BTreeMap<String, Value>,
}

/// The graph store. Node and edge collections are `BTreeMap`s keyed by id so
/// "scan everything" iteration (no label filter) has a stable, deterministic
/// order; adjacency lists are plain `Vec<EdgeId>` appended to on insert,
/// which is what gives traversal its insertion-order guarantee.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    adjacency_out: BTreeMap<NodeId, Vec<EdgeId>>,
    adjacency_in: BTreeMap<NodeId, Vec<EdgeId>>,
    label_index: BTreeMap<String, BTreeSet<NodeId>>,
    type_index: BTreeMap<String, BTreeSet<EdgeId>>,
    next_node_id: u64,
    next_edge_id: u64,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn next_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    pub fn next_edge_id(&mut self) -> EdgeId {
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        id
    }

    /// Restores the id counters after a bulk load from the durable backend,
    /// so freshly created ids never collide with loaded ones.
    pub fn bump_id_counters(&mut self, max_node: Option<u64>, max_edge: Option<u64>) {
        if let Some(n) = max_node {
            self.next_node_id = self.next_node_id.max(n + 1);
        }
        if let Some(e) = max_edge {
            self.next_edge_id = self.next_edge_id.max(e + 1);
        }
    }

    pub fn add_node(&mut self, node: Node) {
        if let Some(existing) = self.nodes.get(&node.id) {
            for label in &existing.labels {
                if let Some(set) = self.label_index.get_mut(label) {
                    set.remove(&node.id);
                }
            }
        } else {
            self.adjacency_out.entry(node.id).or_default();
            self.adjacency_in.entry(node.id).or_default();
        }
        for label in &node.labels {
            self.label_index.entry(label.clone()).or_default().insert(node.id);
        }
        self.nodes.insert(node.id, node);
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if !self.nodes.contains_key(&edge.src) {
            return Err(Error::NotFound(format!("node {}", edge.src)));
        }
        if !self.nodes.contains_key(&edge.dst) {
            return Err(Error::NotFound(format!("node {}", edge.dst)));
        }
        if let Some(existing) = self.edges.get(&edge.id) {
            self.detach_edge_from_indexes(existing.id, &existing.rel_type, existing.src, existing.dst);
        }
        self.type_index.entry(edge.rel_type.clone()).or_default().insert(edge.id);
        self.adjacency_out.entry(edge.src).or_default().push(edge.id);
        self.adjacency_in.entry(edge.dst).or_default().push(edge.id);
        self.edges.insert(edge.id, edge);
        Ok(())
    }

    fn detach_edge_from_indexes(&mut self, id: EdgeId, rel_type: &str, src: NodeId, dst: NodeId) {
        if let Some(set) = self.type_index.get_mut(rel_type) {
            set.remove(&id);
        }
        if let Some(list) = self.adjacency_out.get_mut(&src) {
            list.retain(|e| *e != id);
        }
        if let Some(list) = self.adjacency_in.get_mut(&dst) {
            list.retain(|e| *e != id);
        }
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Result<Edge> {
        let edge = self
            .edges
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("edge {}", id)))?;
        self.detach_edge_from_indexes(edge.id, &edge.rel_type, edge.src, edge.dst);
        Ok(edge)
    }

    /// Removes a node. Callers that must enforce "no dangling edges" (the
    /// non-detach DELETE case) check `get_outgoing`/`get_incoming` first;
    /// this method itself performs the removal unconditionally.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
        for label in &node.labels {
            if let Some(set) = self.label_index.get_mut(label) {
                set.remove(&id);
            }
        }
        self.adjacency_out.remove(&id);
        self.adjacency_in.remove(&id);
        Ok(node)
    }

    pub fn get_node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    pub fn get_edge(&self, id: EdgeId) -> Result<&Edge> {
        self.edges.get(&id).ok_or_else(|| Error::NotFound(format!("edge {}", id)))
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    pub fn get_edge_mut(&mut self, id: EdgeId) -> Result<&mut Edge> {
        self.edges.get_mut(&id).ok_or_else(|| Error::NotFound(format!("edge {}", id)))
    }

    /// Removes `label` from the node's label set, keeping the index
    /// consistent. No-op if the node never had the label.
    pub fn remove_label(&mut self, id: NodeId, label: &str) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
        node.labels.retain(|l| l != label);
        if let Some(set) = self.label_index.get_mut(label) {
            set.remove(&id);
        }
        Ok(())
    }

    pub fn add_label(&mut self, id: NodeId, label: &str) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
        if !node.labels.iter().any(|l| l == label) {
            node.labels.push(label.to_string());
        }
        self.label_index.entry(label.to_string()).or_default().insert(id);
        Ok(())
    }

    pub fn get_outgoing(&self, id: NodeId) -> Result<&[EdgeId]> {
        self.adjacency_out
            .get(&id)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    pub fn get_incoming(&self, id: NodeId) -> Result<&[EdgeId]> {
        self.adjacency_in
            .get(&id)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    pub fn nodes_by_label(&self, label: &str) -> impl Iterator<Item = NodeId> + '_ {
        self.label_index.get(label).into_iter().flatten().copied()
    }

    pub fn edges_by_type(&self, rel_type: &str) -> impl Iterator<Item = EdgeId> + '_ {
        self.type_index.get(rel_type).into_iter().flatten().copied()
    }

    pub fn all_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn all_edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges.keys().copied()
    }

    pub fn node_exists(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn edge_exists(&self, id: EdgeId) -> bool {
        self.edges.contains_key(&id)
    }

    pub fn snapshot(&self) -> Graph {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: Graph) {
        *self = snapshot;
    }

    pub fn clear(&mut self) {
        *self = Graph::new();
    }

    pub fn statistics(&self) -> GraphStatistics {
        let mut node_counts_by_label = BTreeMap::new();
        for (label, set) in &self.label_index {
            node_counts_by_label.insert(label.clone(), set.len() as u64);
        }
        let mut edge_counts_by_type = BTreeMap::new();
        let mut avg_degree_by_type = BTreeMap::new();
        for (rel_type, set) in &self.type_index {
            edge_counts_by_type.insert(rel_type.clone(), set.len() as u64);
            let mut sources = BTreeSet::new();
            for eid in set {
                if let Some(edge) = self.edges.get(eid) {
                    sources.insert(edge.src);
                }
            }
            let avg = if sources.is_empty() {
                0.0
            } else {
                set.len() as f64 / sources.len() as f64
            };
            avg_degree_by_type.insert(rel_type.clone(), avg);
        }
        GraphStatistics {
            node_counts_by_label,
            edge_counts_by_type,
            avg_degree_by_type,
            total_nodes: self.nodes.len() as u64,
            total_edges: self.edges.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, labels: &[&str]) -> Node {
        Node {
            id: NodeId(id),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            properties: BTreeMap::new(),
        }
    }

    fn edge(id: u64, rel_type: &str, src: u64, dst: u64) -> Edge {
        Edge {
            id: EdgeId(id),
            rel_type: rel_type.to_string(),
            src: NodeId(src),
            dst: NodeId(dst),
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn adjacency_preserves_insertion_order() {
        let mut g = Graph::new();
        g.add_node(node(0, &["Person"]));
        g.add_node(node(1, &["Person"]));
        g.add_node(node(2, &["Person"]));
        g.add_edge(edge(0, "KNOWS", 0, 2)).unwrap();
        g.add_edge(edge(1, "KNOWS", 0, 1)).unwrap();
        let out = g.get_outgoing(NodeId(0)).unwrap();
        assert_eq!(out, &[EdgeId(0), EdgeId(1)]);
    }

    #[test]
    fn add_edge_fails_on_missing_endpoint() {
        let mut g = Graph::new();
        g.add_node(node(0, &[]));
        let err = g.add_edge(edge(0, "KNOWS", 0, 99));
        assert!(err.is_err());
    }

    #[test]
    fn remove_node_cleans_label_index() {
        let mut g = Graph::new();
        g.add_node(node(0, &["Person"]));
        assert_eq!(g.nodes_by_label("Person").count(), 1);
        g.remove_node(NodeId(0)).unwrap();
        assert_eq!(g.nodes_by_label("Person").count(), 0);
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut g = Graph::new();
        g.add_node(node(0, &["Person"]));
        let snap = g.snapshot();
        g.add_node(node(1, &["Person"]));
        assert_eq!(g.all_node_ids().count(), 2);
        g.restore(snap);
        assert_eq!(g.all_node_ids().count(), 1);
    }

    #[test]
    fn statistics_tracks_avg_degree() {
        let mut g = Graph::new();
        g.add_node(node(0, &[]));
        g.add_node(node(1, &[]));
        g.add_node(node(2, &[]));
        g.add_edge(edge(0, "KNOWS", 0, 1)).unwrap();
        g.add_edge(edge(1, "KNOWS", 0, 2)).unwrap();
        let stats = g.statistics();
        assert_eq!(stats.edge_counts_by_type.get("KNOWS"), Some(&2));
        assert_eq!(stats.avg_degree_by_type.get("KNOWS"), Some(&2.0));
    }
}
