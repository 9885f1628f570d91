//! Cypher lexer, parser, planner, optimizer, and row-at-a-time executor.
//!
//! The façade crate (`corvusdb`) is the only intended caller: it owns the
//! [`corvusdb_storage::Graph`], refreshes the optimizer's statistics
//! snapshot before every call, and wraps [`execute`](executor::execute) in
//! transaction snapshot/restore semantics. This crate has no notion of a
//! "handle" or durability beyond the [`corvusdb_storage::DurableBackend`]
//! trait object it writes through to.
//!
//! ```ignore
//! let query = parser::parse("MATCH (n:Person) RETURN n.name AS name")?;
//! let plan = planner::plan(&query)?;
//! let plan = optimizer::optimize(plan, &graph.statistics(), &OptimizerOptions::default());
//! let mut ctx = ExecCtx { graph: &mut graph, backend: None, params: &params, functions: &functions };
//! let rows = executor::execute(&plan, &mut ctx)?;
//! ```

pub mod ast;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod planner;

pub use ast::Query;
pub use error::{Error, Result, SemanticError};
pub use evaluator::{CustomFunction, FunctionRegistry, Row};
pub use executor::{execute, ExecCtx};
pub use optimizer::{optimize, OptimizerOptions};
pub use parser::parse;
pub use planner::{plan, Plan};
