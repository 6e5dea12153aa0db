//! Crate-wide error taxonomy.
//!
//! Every fallible operation in provena returns [`Result`]. The variants map
//! onto the recoverable/fatal split callers care about: `Cycle`,
//! `InvalidFilter` and `JoinOrder` are caller mistakes detected before any
//! partial write, while `Storage` aborts the current transaction.

use thiserror::Error;

use crate::model::NodeId;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ProvenaError>;

/// Structured errors emitted by the graph store and the query engine.
#[derive(Debug, Error)]
pub enum ProvenaError {
    /// Inserting the link would close a directed cycle. The closure index
    /// and the link table are left untouched.
    #[error("link {ancestor} -> {descendant} would create a cycle")]
    Cycle {
        /// Source node of the rejected link.
        ancestor: NodeId,
        /// Target node of the rejected link.
        descendant: NodeId,
    },
    /// Malformed filter specification, detected at compile time before any
    /// storage access.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    /// A query path step referenced an alias that was never declared, or an
    /// illegal entity-kind/join combination.
    #[error("query path error: {0}")]
    JoinOrder(String),
    /// Failure in the underlying transactional store; the surrounding
    /// transaction is rolled back.
    #[error("storage error: {0}")]
    Storage(String),
    /// A record lookup came up empty.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Mutation attempted on frozen state (sealed node, or an attribute
    /// write forbidden by the configured policy).
    #[error("node {0} is immutable: {1}")]
    Immutable(NodeId, String),
    /// A result stream was cancelled cooperatively between rows.
    #[error("query cancelled")]
    Cancelled,
}

impl ProvenaError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ProvenaError::Cycle { .. } => "Cycle",
            ProvenaError::InvalidFilter(_) => "InvalidFilter",
            ProvenaError::JoinOrder(_) => "JoinOrder",
            ProvenaError::Storage(_) => "Storage",
            ProvenaError::NotFound(_) => "NotFound",
            ProvenaError::InvalidArgument(_) => "InvalidArgument",
            ProvenaError::Immutable(..) => "Immutable",
            ProvenaError::Cancelled => "Cancelled",
        }
    }
}

impl From<rusqlite::Error> for ProvenaError {
    fn from(err: rusqlite::Error) -> Self {
        ProvenaError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ProvenaError {
    fn from(err: serde_json::Error) -> Self {
        ProvenaError::Storage(format!("row payload: {err}"))
    }
}
