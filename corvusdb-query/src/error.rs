use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),

    #[error("type error: {0}")]
    Type(String),

    #[error("value error: {0}")]
    Value(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] corvusdb_storage::Error),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("cannot delete node {0}: it still has relationships (use DETACH DELETE)")]
    CannotDeleteNodeWithRelationships(String),
}

#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("column name conflict: '{0}' is bound more than once")]
    ColumnNameConflict(String),

    #[error("expression in WITH/RETURN must have an alias: {0}")]
    NoExpressionAlias(String),

    #[error("variable '{0}' used with conflicting types across clauses")]
    VariableTypeConflict(String),

    #[error("disjunctive labels are not allowed in CREATE")]
    DisjunctiveLabelsInCreate,
}
