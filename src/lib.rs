//! Embedded provenance graph store.
//!
//! provena keeps a directed acyclic graph of typed, versioned nodes and
//! labelled links, maintains its transitive closure incrementally on every
//! link insert and delete, and answers multi-hop queries (direct links,
//! closure ancestry, group membership) with typed attribute filters. The
//! whole engine is written against a small transactional [`storage`]
//! abstraction, with in-memory and SQLite backends behaving identically.
//!
//! ```no_run
//! use std::sync::Arc;
//! use provena::db::{NodeDraft, ProvenaDb};
//! use provena::model::LinkType;
//! use provena::storage::MemoryBackend;
//!
//! # fn main() -> provena::Result<()> {
//! let db = ProvenaDb::open(Arc::new(MemoryBackend::new()));
//! let data = db.persist_node(NodeDraft::new("data.int"))?;
//! let calc = db.persist_node(NodeDraft::new("process.calc"))?;
//! db.add_link(data, calc, LinkType::InputCalc, "x")?;
//! assert!(db.is_reachable(data, calc)?);
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod storage;

pub use db::{AttributePolicy, DbConfig, NodeDraft, ProvenaDb};
pub use error::{ProvenaError, Result};
pub use query::{FilterExpr, QueryPath};
