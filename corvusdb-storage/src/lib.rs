//! In-memory property graph, its durable backend, and the binary/JSON
//! serialization formats shared between them.

pub mod backend;
pub mod error;
pub mod graph;
pub mod interchange;
pub mod serialize;
pub mod stats;

pub use backend::{DurableBackend, SqliteBackend, SyncMode};
pub use error::{Error, Result};
pub use graph::{Edge, Graph, Node};
pub use stats::GraphStatistics;
