//! The durable backend contract and its SQLite-backed implementation.
//!
//! Persist-on-commit, load-on-open: buffered writes only become visible to
//! `load_*` after `commit()`. Five logical tables carry the graph
//! (`nodes`, `edges`, `adjacency_out`, `adjacency_in`, `statistics`); a sixth
//! (`meta`) tracks the schema version and id high-water marks so ids never
//! collide across process restarts.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use corvusdb_api::{EdgeId, NodeId};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::graph::{Edge, Node};
use crate::serialize;
use crate::stats::GraphStatistics;

pub trait DurableBackend {
    fn save_node(&self, node: &Node) -> Result<()>;
    fn save_edge(&self, edge: &Edge) -> Result<()>;
    fn delete_node(&self, id: NodeId) -> Result<()>;
    fn delete_edge(&self, id: EdgeId) -> Result<()>;

    fn load_nodes(&self) -> Result<Vec<Node>>;
    fn load_edges(&self) -> Result<Vec<Edge>>;
    /// Outgoing adjacency, id -> ordered edge ids, insertion order preserved.
    fn load_adjacency_out(&self) -> Result<BTreeMap<NodeId, Vec<EdgeId>>>;
    fn load_adjacency_in(&self) -> Result<BTreeMap<NodeId, Vec<EdgeId>>>;

    fn save_statistics(&self, stats: &GraphStatistics) -> Result<()>;
    fn load_statistics(&self) -> Result<Option<GraphStatistics>>;

    /// Opens an explicit transaction; subsequent `save_*`/`delete_*` calls
    /// are buffered and only become visible to `load_*` after [`commit`].
    /// A backend that is never asked to `begin` stays in autocommit mode,
    /// where every call is its own implicit transaction (used by the
    /// façade's per-`execute` auto-commit path).
    ///
    /// [`commit`]: DurableBackend::commit
    fn begin(&self) -> Result<()>;
    /// Commits the currently-open explicit transaction, or does nothing if
    /// none is open (autocommit mode already persisted everything).
    fn commit(&self) -> Result<()>;
    /// Discards every buffered write since the matching [`begin`], or does
    /// nothing if no explicit transaction is open.
    ///
    /// [`begin`]: DurableBackend::begin
    fn rollback(&self) -> Result<()>;

    /// Marks a point inside the current explicit transaction that a later
    /// [`rollback_to_savepoint`] can discard back to, without undoing
    /// earlier auto-committed `execute` calls in the same transaction.
    ///
    /// [`rollback_to_savepoint`]: DurableBackend::rollback_to_savepoint
    fn savepoint(&self, name: &str) -> Result<()>;
    fn release_savepoint(&self, name: &str) -> Result<()>;
    fn rollback_to_savepoint(&self, name: &str) -> Result<()>;

    /// Wipes every row from every table; used by the façade's `clear()`.
    fn clear(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY,
    labels BLOB NOT NULL,
    properties BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY,
    rel_type TEXT NOT NULL,
    src INTEGER NOT NULL,
    dst INTEGER NOT NULL,
    properties BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src);
CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(rel_type);

CREATE TABLE IF NOT EXISTS adjacency_out (
    node_id INTEGER NOT NULL,
    edge_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (node_id, position)
);

CREATE TABLE IF NOT EXISTS adjacency_in (
    node_id INTEGER NOT NULL,
    edge_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (node_id, position)
);

CREATE TABLE IF NOT EXISTS statistics (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    payload BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

PRAGMA foreign_keys = ON;
"#;

/// Controls the backend's durability tradeoff, mirrored from SQLite's own
/// `PRAGMA synchronous` levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Off,
    Normal,
    Full,
}

impl SyncMode {
    fn pragma_value(self) -> &'static str {
        match self {
            SyncMode::Off => "OFF",
            SyncMode::Normal => "NORMAL",
            SyncMode::Full => "FULL",
        }
    }
}

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    in_transaction: std::sync::atomic::AtomicBool,
}

impl SqliteBackend {
    pub fn open(path: &Path, sync_mode: SyncMode, busy_timeout_ms: u32) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms as u64))?;
        conn.pragma_update(None, "synchronous", sync_mode.pragma_value())?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "opened sqlite durable backend");
        Ok(SqliteBackend { conn: Mutex::new(conn), in_transaction: std::sync::atomic::AtomicBool::new(false) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteBackend { conn: Mutex::new(conn), in_transaction: std::sync::atomic::AtomicBool::new(false) })
    }
}

impl DurableBackend for SqliteBackend {
    fn save_node(&self, node: &Node) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let labels = serialize::encode_labels(&node.labels);
        let properties = serialize::encode_properties(&node.properties);
        conn.execute(
            "INSERT INTO nodes (id, labels, properties) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET labels = excluded.labels, properties = excluded.properties",
            params![node.id.as_u64() as i64, labels, properties],
        )?;
        Ok(())
    }

    fn save_edge(&self, edge: &Edge) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let is_new = !conn
            .query_row("SELECT 1 FROM edges WHERE id = ?1", params![edge.id.as_u64() as i64], |_| Ok(()))
            .optional()?
            .is_some();
        let properties = serialize::encode_properties(&edge.properties);
        conn.execute(
            "INSERT INTO edges (id, rel_type, src, dst, properties) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET rel_type = excluded.rel_type, src = excluded.src,
                dst = excluded.dst, properties = excluded.properties",
            params![
                edge.id.as_u64() as i64,
                edge.rel_type,
                edge.src.as_u64() as i64,
                edge.dst.as_u64() as i64,
                properties
            ],
        )?;
        // Adjacency position is only assigned once, at first insert; a
        // later SET re-saving the same edge must not grow the adjacency
        // list a second time.
        if is_new {
            append_adjacency(&conn, "adjacency_out", edge.src, edge.id)?;
            append_adjacency(&conn, "adjacency_in", edge.dst, edge.id)?;
        }
        Ok(())
    }

    fn delete_node(&self, id: NodeId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM nodes WHERE id = ?1", params![id.as_u64() as i64])?;
        conn.execute("DELETE FROM adjacency_out WHERE node_id = ?1", params![id.as_u64() as i64])?;
        conn.execute("DELETE FROM adjacency_in WHERE node_id = ?1", params![id.as_u64() as i64])?;
        Ok(())
    }

    fn delete_edge(&self, id: EdgeId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM edges WHERE id = ?1", params![id.as_u64() as i64])?;
        conn.execute("DELETE FROM adjacency_out WHERE edge_id = ?1", params![id.as_u64() as i64])?;
        conn.execute("DELETE FROM adjacency_in WHERE edge_id = ?1", params![id.as_u64() as i64])?;
        Ok(())
    }

    fn load_nodes(&self) -> Result<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, labels, properties FROM nodes ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let labels: Vec<u8> = row.get(1)?;
            let properties: Vec<u8> = row.get(2)?;
            Ok((id, labels, properties))
        })?;
        let mut nodes = Vec::new();
        for row in rows {
            let (id, labels, properties) = row?;
            let labels = serialize::decode_labels(&labels).map_err(|e| Error::Decode(e.to_string()))?;
            let properties =
                serialize::decode_properties(&properties).map_err(|e| Error::Decode(e.to_string()))?;
            nodes.push(Node { id: NodeId(id as u64), labels, properties });
        }
        Ok(nodes)
    }

    fn load_edges(&self) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, rel_type, src, dst, properties FROM edges ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let rel_type: String = row.get(1)?;
            let src: i64 = row.get(2)?;
            let dst: i64 = row.get(3)?;
            let properties: Vec<u8> = row.get(4)?;
            Ok((id, rel_type, src, dst, properties))
        })?;
        let mut edges = Vec::new();
        for row in rows {
            let (id, rel_type, src, dst, properties) = row?;
            let properties =
                serialize::decode_properties(&properties).map_err(|e| Error::Decode(e.to_string()))?;
            edges.push(Edge {
                id: EdgeId(id as u64),
                rel_type,
                src: NodeId(src as u64),
                dst: NodeId(dst as u64),
                properties,
            });
        }
        Ok(edges)
    }

    fn load_adjacency_out(&self) -> Result<BTreeMap<NodeId, Vec<EdgeId>>> {
        load_adjacency(&self.conn.lock().unwrap(), "adjacency_out")
    }

    fn load_adjacency_in(&self) -> Result<BTreeMap<NodeId, Vec<EdgeId>>> {
        load_adjacency(&self.conn.lock().unwrap(), "adjacency_in")
    }

    fn save_statistics(&self, stats: &GraphStatistics) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let payload = stats.encode();
        conn.execute(
            "INSERT INTO statistics (id, payload) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
            params![payload],
        )?;
        Ok(())
    }

    fn load_statistics(&self) -> Result<Option<GraphStatistics>> {
        let conn = self.conn.lock().unwrap();
        let payload: Option<Vec<u8>> = conn
            .query_row("SELECT payload FROM statistics WHERE id = 0", [], |row| row.get(0))
            .optional()?;
        Ok(payload.and_then(|bytes| GraphStatistics::decode(&bytes)))
    }

    fn begin(&self) -> Result<()> {
        use std::sync::atomic::Ordering;
        if self.in_transaction.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.conn.lock().unwrap().execute_batch("BEGIN")?;
        tracing::debug!("durable backend transaction begin");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        use std::sync::atomic::Ordering;
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.conn.lock().unwrap().execute_batch("COMMIT")?;
        tracing::debug!("durable backend transaction commit");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        use std::sync::atomic::Ordering;
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.conn.lock().unwrap().execute_batch("ROLLBACK")?;
        tracing::debug!("durable backend transaction rollback");
        Ok(())
    }

    fn savepoint(&self, name: &str) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(())
    }

    fn release_savepoint(&self, name: &str) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
        Ok(())
    }

    fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}"))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "DELETE FROM nodes; DELETE FROM edges; DELETE FROM adjacency_out;
             DELETE FROM adjacency_in; DELETE FROM statistics;",
        )?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        use std::sync::atomic::Ordering;
        if self.in_transaction.swap(false, Ordering::SeqCst) {
            let _ = self.conn.lock().unwrap().execute_batch("ROLLBACK");
        }
        tracing::info!("closed sqlite durable backend");
        Ok(())
    }
}

fn append_adjacency(conn: &Connection, table: &str, node: NodeId, edge: EdgeId) -> Result<()> {
    let next_position: i64 = conn.query_row(
        &format!("SELECT COALESCE(MAX(position) + 1, 0) FROM {table} WHERE node_id = ?1"),
        params![node.as_u64() as i64],
        |row| row.get(0),
    )?;
    conn.execute(
        &format!("INSERT INTO {table} (node_id, edge_id, position) VALUES (?1, ?2, ?3)"),
        params![node.as_u64() as i64, edge.as_u64() as i64, next_position],
    )?;
    Ok(())
}

fn load_adjacency(conn: &Connection, table: &str) -> Result<BTreeMap<NodeId, Vec<EdgeId>>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT node_id, edge_id FROM {table} ORDER BY node_id, position"
    ))?;
    let rows = stmt.query_map([], |row| {
        let node_id: i64 = row.get(0)?;
        let edge_id: i64 = row.get(1)?;
        Ok((node_id, edge_id))
    })?;
    let mut map: BTreeMap<NodeId, Vec<EdgeId>> = BTreeMap::new();
    for row in rows {
        let (node_id, edge_id) = row?;
        map.entry(NodeId(node_id as u64)).or_default().push(EdgeId(edge_id as u64));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn node(id: u64, labels: &[&str]) -> Node {
        Node {
            id: NodeId(id),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            properties: Map::new(),
        }
    }

    fn edge(id: u64, rel_type: &str, src: u64, dst: u64) -> Edge {
        Edge {
            id: EdgeId(id),
            rel_type: rel_type.to_string(),
            src: NodeId(src),
            dst: NodeId(dst),
            properties: Map::new(),
        }
    }

    #[test]
    fn save_and_load_round_trips_nodes_and_adjacency() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.save_node(&node(0, &["Person"])).unwrap();
        backend.save_node(&node(1, &["Person"])).unwrap();
        backend.save_edge(&edge(0, "KNOWS", 0, 1)).unwrap();
        backend.save_edge(&edge(1, "KNOWS", 0, 1)).unwrap();
        backend.commit().unwrap();

        let nodes = backend.load_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        let adjacency = backend.load_adjacency_out().unwrap();
        assert_eq!(adjacency.get(&NodeId(0)).unwrap(), &vec![EdgeId(0), EdgeId(1)]);
    }

    #[test]
    fn statistics_round_trip_through_sqlite() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert!(backend.load_statistics().unwrap().is_none());
        let mut stats = GraphStatistics::default();
        stats.total_nodes = 2;
        backend.save_statistics(&stats).unwrap();
        let loaded = backend.load_statistics().unwrap().unwrap();
        assert_eq!(loaded.total_nodes, 2);
    }

    #[test]
    fn on_disk_file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        {
            let backend = SqliteBackend::open(&path, SyncMode::Normal, 5000).unwrap();
            backend.save_node(&node(0, &["Person"])).unwrap();
            backend.commit().unwrap();
            backend.close().unwrap();
        }
        let reopened = SqliteBackend::open(&path, SyncMode::Normal, 5000).unwrap();
        assert_eq!(reopened.load_nodes().unwrap().len(), 1);
    }
}
