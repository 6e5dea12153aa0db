//! Backend-agnostic filter and query-path engine.
//!
//! Filters are compiled ahead of execution ([`filter`]), evaluated per row
//! with type-gated comparisons ([`eval`]), and composed into multi-hop
//! paths over the graph ([`path`]) that execute against any
//! [`StorageBackend`](crate::storage::StorageBackend) ([`executor`]).

pub mod eval;
pub mod executor;
pub mod filter;
pub mod path;

pub use eval::EntityRow;
pub use executor::{CancelFlag, QueryValue, Row, RowStream};
pub use filter::{BagColumn, Column, CompareOp, Comparison, FieldPath, FilterExpr};
pub use path::{CastTag, EntityKind, Join, LinkDirection, QueryPath};
