//! CorvusDB: an embeddable property-graph database that accepts queries in
//! an openCypher subset, plans and optimizes them, and executes them
//! against an in-memory graph with an optional SQLite-backed durable store.
//!
//! # Quickstart
//!
//! ```
//! use corvusdb::Db;
//!
//! let mut db = Db::open().unwrap();
//! db.execute("CREATE (a:Person {name:'Alice', age:30})").unwrap();
//! let rows = db.execute("MATCH (p:Person) RETURN p.name AS name").unwrap();
//! assert_eq!(rows.len(), 1);
//! ```
//!
//! A single [`Db`] handle owns one graph and exposes two surfaces: the
//! query-execution entry point [`Db::execute`] returning tabular result
//! rows, and a direct programmatic node/edge API ([`Db::create_node`],
//! [`Db::create_relationship`]) for callers that would rather not round-trip
//! through Cypher text for simple mutations.
//!
//! `Db` is not safe to share across threads (§5 of the design: single
//! in-flight transaction, one OS thread per handle); wrap it in a mutex if
//! the host needs to serialize access from multiple threads.

mod error;
mod options;
mod params;

use std::collections::BTreeMap;

use corvusdb_api::{EdgeId, EdgeRef, NodeId, NodeRef, Value};
use corvusdb_query::evaluator::try_point_from_map;
use corvusdb_query::{optimizer, parser, planner};
use corvusdb_storage::{DurableBackend, Edge, Graph, GraphStatistics, Node, SqliteBackend};

pub use corvusdb_query::{CustomFunction, Error as QueryError, FunctionRegistry, OptimizerOptions, Row};
pub use corvusdb_storage::SyncMode;

pub use error::{Error, Result};
pub use options::Options;
pub use params::Params;

/// The embedded database handle. Owns the in-memory [`Graph`], an optional
/// durable backend, the registered custom functions, and the single
/// in-flight transaction's pre-image, if any.
pub struct Db {
    graph: Graph,
    backend: Option<Box<dyn DurableBackend>>,
    functions: FunctionRegistry,
    optimizer_options: OptimizerOptions,
    in_transaction: bool,
    tx_snapshot: Option<Graph>,
    closed: bool,
}

const AUTO_SAVEPOINT: &str = "corvusdb_auto_exec";

impl Db {
    /// Opens a purely in-memory handle: no durable backend, nothing
    /// persisted across the process lifetime.
    pub fn open() -> Result<Db> {
        Db::open_with_options(Options::default())
    }

    /// Opens a handle at the given SQLite file path, creating it if absent
    /// and loading any existing graph into memory.
    pub fn open_path(path: impl Into<std::path::PathBuf>) -> Result<Db> {
        Db::open_with_options(Options::default().with_path(path))
    }

    /// Opens a handle with full control over the durable backend's
    /// durability/timeout tradeoffs. See [`Options`].
    pub fn open_with_options(options: Options) -> Result<Db> {
        let backend: Option<Box<dyn DurableBackend>> = match &options.path {
            Some(path) => {
                Some(Box::new(SqliteBackend::open(path, options.sync_mode, options.busy_timeout_ms)?))
            }
            None => None,
        };

        let mut graph = Graph::new();
        if let Some(backend) = &backend {
            let nodes = backend.load_nodes()?;
            let mut edges = backend.load_edges()?;
            // Edge ids are assigned monotonically at creation and never
            // reused, so replaying them in id order reconstructs the exact
            // insertion-ordered adjacency lists without needing the
            // separate adjacency tables at all.
            edges.sort_by_key(|e| e.id.as_u64());
            let max_node = nodes.iter().map(|n| n.id.as_u64()).max();
            let max_edge = edges.iter().map(|e| e.id.as_u64()).max();
            for node in nodes {
                graph.add_node(node);
            }
            for edge in edges {
                graph.add_edge(edge)?;
            }
            graph.bump_id_counters(max_node, max_edge);
        }

        Ok(Db {
            graph,
            backend,
            functions: FunctionRegistry::new(),
            optimizer_options: OptimizerOptions::default(),
            in_transaction: false,
            tx_snapshot: None,
            closed: false,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Runs one statement or clause sequence, returning the eagerly
    /// materialized result rows. Equivalent to
    /// `execute_with_params(query_text, &Params::new())`.
    pub fn execute(&mut self, query_text: &str) -> Result<Vec<Row>> {
        self.execute_with_params(query_text, &Params::new())
    }

    /// Parses, plans, optimizes, and executes `query_text`, with `$name`
    /// parameters bound from `params`.
    ///
    /// Refreshes the optimizer's statistics snapshot first (§4.6: staleness
    /// within one execution is acceptable, staleness across queries is
    /// not). If no explicit transaction is open, wraps this call in its own
    /// auto-commit transaction against both the in-memory graph and the
    /// durable backend; on error, restores the graph to its pre-call state
    /// and discards any buffered backend writes before re-raising.
    pub fn execute_with_params(&mut self, query_text: &str, params: &Params) -> Result<Vec<Row>> {
        self.check_open()?;
        let query = parser::parse(query_text)?;
        let plan = planner::plan(&query)?;
        let stats = self.graph.statistics();
        let plan = optimizer::optimize(plan, &stats, &self.optimizer_options);

        let auto_commit = !self.in_transaction;
        let pre_image = self.graph.snapshot();
        if let Some(backend) = &self.backend {
            if auto_commit {
                backend.begin()?;
            } else {
                backend.savepoint(AUTO_SAVEPOINT)?;
            }
        }

        let result = {
            let mut ctx = corvusdb_query::ExecCtx {
                graph: &mut self.graph,
                backend: self.backend.as_deref(),
                params: &params.inner,
                functions: &self.functions,
            };
            corvusdb_query::execute(&plan, &mut ctx)
        };
        match result {
            Ok(rows) => {
                if let Some(backend) = &self.backend {
                    if auto_commit {
                        backend.commit()?;
                    } else {
                        backend.release_savepoint(AUTO_SAVEPOINT)?;
                    }
                }
                Ok(rows)
            }
            Err(err) => {
                self.graph.restore(pre_image);
                if let Some(backend) = &self.backend {
                    if auto_commit {
                        let _ = backend.rollback();
                    } else {
                        let _ = backend.rollback_to_savepoint(AUTO_SAVEPOINT);
                    }
                }
                tracing::warn!(error = %err, "query execution failed, rolled back");
                Err(err.into())
            }
        }
    }

    /// Begins an explicit transaction: captures a graph snapshot and opens
    /// a durable-backend transaction (if a backend is attached). Only one
    /// transaction may be in flight per handle.
    pub fn begin(&mut self) -> Result<()> {
        self.check_open()?;
        if self.in_transaction {
            return Err(Error::TransactionInProgress);
        }
        self.tx_snapshot = Some(self.graph.snapshot());
        if let Some(backend) = &self.backend {
            backend.begin()?;
        }
        self.in_transaction = true;
        tracing::debug!("transaction begin");
        Ok(())
    }

    /// Commits the open transaction: drops the snapshot and persists
    /// everything written since `begin()` to the durable backend.
    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.in_transaction {
            return Err(Error::NoTransaction);
        }
        if let Some(backend) = &self.backend {
            backend.commit()?;
        }
        self.tx_snapshot = None;
        self.in_transaction = false;
        tracing::debug!("transaction commit");
        Ok(())
    }

    /// Rolls back the open transaction: restores the graph to the snapshot
    /// taken at `begin()` and discards everything buffered in the backend.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.in_transaction {
            return Err(Error::NoTransaction);
        }
        let snapshot = self.tx_snapshot.take().expect("snapshot set while in_transaction");
        self.graph.restore(snapshot);
        if let Some(backend) = &self.backend {
            backend.rollback()?;
        }
        self.in_transaction = false;
        tracing::debug!("transaction rollback");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Discards all data, resets id counters and statistics, aborts any
    /// open transaction, and resets registered custom functions. Leaves the
    /// handle in the same observable state as a freshly constructed one —
    /// the durable backend, if any, stays attached but is wiped too.
    pub fn clear(&mut self) -> Result<()> {
        self.check_open()?;
        self.graph.clear();
        self.functions.clear();
        self.in_transaction = false;
        self.tx_snapshot = None;
        if let Some(backend) = &self.backend {
            backend.clear()?;
        }
        Ok(())
    }

    /// Deep-copies the in-memory graph, id counters, registered functions,
    /// and optimizer options into a new in-memory handle. Fails on handles
    /// attached to durable storage, since two handles cannot share one
    /// SQLite connection's transaction state.
    pub fn clone_handle(&self) -> Result<Db> {
        self.check_open()?;
        if self.backend.is_some() {
            return Err(Error::Runtime("clone() is not supported on a handle with a durable backend attached".into()));
        }
        Ok(Db {
            graph: self.graph.clone(),
            backend: None,
            functions: self.functions.clone(),
            optimizer_options: self.optimizer_options,
            in_transaction: false,
            tx_snapshot: None,
            closed: false,
        })
    }

    /// Commits any open transaction and releases the durable backend.
    /// Idempotent: calling `close()` twice is a no-op the second time.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.in_transaction {
            self.commit()?;
        }
        if let Some(backend) = self.backend.take() {
            backend.close()?;
        }
        self.closed = true;
        Ok(())
    }

    /// Installs a user-defined scalar function, callable from Cypher text by
    /// `name` once every built-in function name has been tried first.
    pub fn register_function(&mut self, name: impl Into<String>, f: CustomFunction) -> Result<()> {
        self.check_open()?;
        self.functions.register(name, f);
        Ok(())
    }

    /// Creates a node directly, bypassing the Cypher text pipeline.
    /// Property maps shaped like a spatial-point schema (`{x,y[,z]}` or
    /// `{latitude,longitude[,height]}`) are lifted to [`Value::Point`]
    /// values; anything else, or an invalid coordinate shape, stays a plain
    /// map (no exception).
    pub fn create_node<L, K1, P, K2>(&mut self, labels: L, properties: P) -> Result<NodeRef>
    where
        L: IntoIterator<Item = K1>,
        K1: Into<String>,
        P: IntoIterator<Item = (K2, Value)>,
        K2: Into<String>,
    {
        self.check_open()?;
        let pre_image = self.graph.snapshot();
        let id = self.graph.next_node_id();
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let properties: BTreeMap<String, Value> =
            properties.into_iter().map(|(k, v)| (k.into(), lift_point_values(v))).collect();
        let node = Node { id, labels: labels.clone(), properties: properties.clone() };
        self.graph.add_node(node.clone());
        if let Some(backend) = &self.backend {
            if let Err(err) = backend.save_node(&node).and_then(|()| backend.save_statistics(&self.graph.statistics())) {
                self.graph.restore(pre_image);
                return Err(err.into());
            }
        }
        Ok(NodeRef { id, labels, properties })
    }

    /// Creates a directed edge between two already-existing nodes, bypassing
    /// the Cypher text pipeline. Fails with a storage `NotFound` error if
    /// either endpoint does not exist.
    pub fn create_relationship<P, K>(
        &mut self,
        src: NodeId,
        dst: NodeId,
        rel_type: impl Into<String>,
        properties: P,
    ) -> Result<EdgeRef>
    where
        K: Into<String>,
        P: IntoIterator<Item = (K, Value)>,
    {
        self.check_open()?;
        let pre_image = self.graph.snapshot();
        let id = self.graph.next_edge_id();
        let rel_type = rel_type.into();
        let properties: BTreeMap<String, Value> =
            properties.into_iter().map(|(k, v)| (k.into(), lift_point_values(v))).collect();
        let edge = Edge { id, rel_type: rel_type.clone(), src, dst, properties: properties.clone() };
        if let Err(err) = self.graph.add_edge(edge) {
            self.graph.restore(pre_image);
            return Err(err.into());
        }
        if let Some(backend) = &self.backend {
            let result = backend
                .save_edge(self.graph.get_edge(id)?)
                .and_then(|()| backend.save_statistics(&self.graph.statistics()));
            if let Err(err) = result {
                self.graph.restore(pre_image);
                return Err(err.into());
            }
        }
        Ok(EdgeRef { id, rel_type, src, dst, properties })
    }

    /// Removes an edge id regardless of how it was created (DELETE outside
    /// of Cypher text).
    pub fn delete_relationship(&mut self, id: EdgeId) -> Result<()> {
        self.check_open()?;
        let pre_image = self.graph.snapshot();
        self.graph.remove_edge(id)?;
        if let Some(backend) = &self.backend {
            let result = backend.delete_edge(id).and_then(|()| backend.save_statistics(&self.graph.statistics()));
            if let Err(err) = result {
                self.graph.restore(pre_image);
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Statistics snapshot as currently maintained by the graph store.
    pub fn statistics(&self) -> GraphStatistics {
        self.graph.statistics()
    }

    pub fn optimizer_options(&self) -> OptimizerOptions {
        self.optimizer_options
    }

    pub fn set_optimizer_options(&mut self, options: OptimizerOptions) {
        self.optimizer_options = options;
    }

    /// Exports the whole graph as a JSON-graph interchange document (§4.3,
    /// §6): `{"nodes":[...],"edges":[...],"directed":true,"metadata":{}}`.
    pub fn export_json(&self) -> serde_json::Value {
        corvusdb_storage::interchange::export_graph(&self.graph)
    }

    /// Replaces the current graph with one imported from a JSON-graph
    /// document. Node/edge ids in the document are used verbatim and the id
    /// counters are bumped past the highest one seen, so subsequently
    /// created nodes/edges never collide with imported ones.
    pub fn import_json(&mut self, document: &serde_json::Value) -> Result<()> {
        self.check_open()?;
        let mut graph = corvusdb_storage::interchange::import_graph(document)?;
        let max_node = graph.all_node_ids().map(NodeId::as_u64).max();
        let max_edge = graph.all_edge_ids().map(EdgeId::as_u64).max();
        graph.bump_id_counters(max_node, max_edge);
        self.graph = graph;
        self.in_transaction = false;
        self.tx_snapshot = None;
        if let Some(backend) = &self.backend {
            backend.clear()?;
            for id in self.graph.all_node_ids().collect::<Vec<_>>() {
                backend.save_node(self.graph.get_node(id)?)?;
            }
            for id in self.graph.all_edge_ids().collect::<Vec<_>>() {
                backend.save_edge(self.graph.get_edge(id)?)?;
            }
            backend.save_statistics(&self.graph.statistics())?;
        }
        Ok(())
    }
}

/// A map literal shaped like `{x:.., y:..}` / `{latitude:.., longitude:..}`
/// is lifted to a [`Value::Point`]; applied recursively through lists and
/// nested maps so a property like `{home: {x:1.0, y:2.0}}` lifts its nested
/// map too. Mirrors the evaluator's own `point()` coordinate-shape check
/// (`try_point_from_map`).
fn lift_point_values(value: Value) -> Value {
    match value {
        Value::Map(map) => {
            let lifted: BTreeMap<String, Value> = map.into_iter().map(|(k, v)| (k, lift_point_values(v))).collect();
            match try_point_from_map(&lifted) {
                Some(point) => Value::Point(point),
                None => Value::Map(lifted),
            }
        }
        Value::List(items) => Value::List(items.into_iter().map(lift_point_values).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_execute_close_round_trip() {
        let mut db = Db::open().unwrap();
        db.execute("CREATE (a:Person {name:'Alice', age:30})").unwrap();
        let rows = db.execute("MATCH (p:Person) RETURN p.name AS name").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::Str("Alice".into())));
        db.close().unwrap();
        assert!(matches!(db.execute("RETURN 1"), Err(Error::Closed)));
    }

    #[test]
    fn clear_resets_to_fresh_state() {
        let mut db = Db::open().unwrap();
        db.execute("CREATE (a:Person)").unwrap();
        let echo: CustomFunction = std::sync::Arc::new(|args: &[Value]| Ok(args[0].clone()));
        db.register_function("double", echo).unwrap();
        db.clear().unwrap();
        let rows = db.execute("MATCH (n) RETURN count(n) AS c").unwrap();
        assert_eq!(rows[0].get("c"), Some(&Value::Int(0)));
    }

    #[test]
    fn begin_rollback_restores_snapshot() {
        let mut db = Db::open().unwrap();
        db.execute("CREATE (a:Person {name:'Alice'})").unwrap();
        db.begin().unwrap();
        db.execute("CREATE (b:Person {name:'Bob'})").unwrap();
        db.rollback().unwrap();
        let rows = db.execute("MATCH (p:Person) RETURN count(p) AS c").unwrap();
        assert_eq!(rows[0].get("c"), Some(&Value::Int(1)));
    }

    #[test]
    fn begin_commit_persists_changes() {
        let mut db = Db::open().unwrap();
        db.begin().unwrap();
        db.execute("CREATE (a:Person {name:'Alice'})").unwrap();
        db.commit().unwrap();
        let rows = db.execute("MATCH (p:Person) RETURN count(p) AS c").unwrap();
        assert_eq!(rows[0].get("c"), Some(&Value::Int(1)));
    }

    #[test]
    fn create_node_lifts_point_shaped_properties() {
        let mut db = Db::open().unwrap();
        let mut props = BTreeMap::new();
        let mut loc = BTreeMap::new();
        loc.insert("x".to_string(), Value::float(1.0));
        loc.insert("y".to_string(), Value::float(2.0));
        props.insert("home".to_string(), Value::Map(loc));
        let node = db.create_node(["Place"], props).unwrap();
        assert!(matches!(node.properties.get("home"), Some(Value::Point(_))));
    }

    #[test]
    fn clone_fails_with_durable_backend() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open_path(dir.path().join("g.db")).unwrap();
        assert!(db.clone_handle().is_err());
    }

    #[test]
    fn clone_in_memory_is_independent() {
        let mut db = Db::open().unwrap();
        db.execute("CREATE (a:Person {name:'Alice'})").unwrap();
        let mut cloned = db.clone_handle().unwrap();
        cloned.execute("CREATE (b:Person {name:'Bob'})").unwrap();
        let original_count = db.execute("MATCH (p:Person) RETURN count(p) AS c").unwrap();
        assert_eq!(original_count[0].get("c"), Some(&Value::Int(1)));
    }
}
