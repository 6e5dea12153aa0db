//! High-level facade over the stores.
//!
//! [`ProvenaDb`] bundles a storage context with the node/link/group
//! operations and hands out query paths bound to the same backend. All
//! mutation rules (lifecycle, exclusivity classes, closure consistency)
//! are enforced here; the storage layer below stays a dumb row store.

use std::sync::Arc;

use crate::query::QueryPath;
use crate::storage::{StorageBackend, StorageContext};

pub mod closure;
mod groups;
mod links;
mod nodes;

pub use nodes::NodeDraft;

/// Governs attribute mutability after a node is persisted. Sealing always
/// freezes attributes permanently, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributePolicy {
    /// New attribute keys may be added; existing values never change.
    #[default]
    AppendOnly,
    /// Attributes are frozen at persist time.
    Frozen,
}

/// Store-wide configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbConfig {
    /// Post-persist attribute mutability.
    pub attribute_policy: AttributePolicy,
}

/// Facade over a provenance graph stored in a [`StorageBackend`].
pub struct ProvenaDb {
    ctx: StorageContext,
    config: DbConfig,
}

impl ProvenaDb {
    /// Opens a database over the given backend with default configuration.
    pub fn open(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_config(backend, DbConfig::default())
    }

    /// Opens a database with explicit configuration.
    pub fn with_config(backend: Arc<dyn StorageBackend>, config: DbConfig) -> Self {
        Self {
            ctx: StorageContext::new(backend),
            config,
        }
    }

    /// The storage context this database operates on.
    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    /// Current configuration.
    pub fn config(&self) -> DbConfig {
        self.config
    }

    /// Starts a query path bound to this database's backend.
    pub fn query(&self) -> QueryPath {
        QueryPath::new(self.ctx.clone())
    }
}
