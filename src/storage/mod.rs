//! Storage abstraction shared by the stores, the closure index and the
//! query engine.
//!
//! A single [`StorageBackend`] trait replaces per-backend store
//! implementations: everything above it (node/link stores, closure
//! maintenance, query execution) is written once against [`StorageTx`].
//! Transactions are scoped through [`StorageContext`]: the closure either
//! returns `Ok` and the transaction commits, or returns `Err` and every
//! row written inside it is rolled back. No ambient global state.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{ProvenaError, Result};
use crate::model::{
    ClosureEdgeId, ClosureEdgeRecord, GroupId, GroupRecord, LinkId, LinkRecord, NodeId, NodeRecord,
};

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Row-level operations available inside a transaction.
///
/// Only the closure index writes closure rows and only the link store
/// writes link rows; the trait does not enforce that split, the module
/// visibility of the callers does.
pub trait StorageTx {
    // -- nodes ---------------------------------------------------------

    /// Inserts a node record, assigning a fresh id when `rec.id` is null.
    /// Returns the id under which the row was stored.
    fn insert_node(&mut self, rec: &NodeRecord) -> Result<NodeId>;

    /// Overwrites the stored row for `rec.id`.
    fn update_node(&mut self, rec: &NodeRecord) -> Result<()>;

    /// Fetches a node row by id.
    fn node(&self, id: NodeId) -> Result<Option<NodeRecord>>;

    /// Fetches a node row by uuid.
    fn node_by_uuid(&self, uuid: &uuid::Uuid) -> Result<Option<NodeRecord>>;

    /// Returns every node row. Query execution filters in-process.
    fn scan_nodes(&self) -> Result<Vec<NodeRecord>>;

    // -- links ---------------------------------------------------------

    /// Inserts a link row, assigning a fresh id when `rec.id` is null.
    fn insert_link(&mut self, rec: &LinkRecord) -> Result<LinkId>;

    /// Deletes a link row, returning it if it existed.
    fn delete_link(&mut self, id: LinkId) -> Result<Option<LinkRecord>>;

    /// Fetches a link row by id.
    fn link(&self, id: LinkId) -> Result<Option<LinkRecord>>;

    /// Links whose input side is `input` (outgoing links of a node).
    fn links_from(&self, input: NodeId) -> Result<Vec<LinkRecord>>;

    /// Links whose output side is `output` (incoming links of a node).
    fn links_into(&self, output: NodeId) -> Result<Vec<LinkRecord>>;

    /// Returns every link row.
    fn scan_links(&self) -> Result<Vec<LinkRecord>>;

    // -- closure -------------------------------------------------------

    /// Inserts a closure row, assigning a fresh id when `rec.id` is null.
    fn insert_closure_edge(&mut self, rec: &ClosureEdgeRecord) -> Result<ClosureEdgeId>;

    /// Overwrites the stored row for `rec.id` (used to make depth-0 rows
    /// self-referential once their id is known).
    fn update_closure_edge(&mut self, rec: &ClosureEdgeRecord) -> Result<()>;

    /// Deletes every closure row whose id is in `ids`, returning the count.
    fn delete_closure_edges(&mut self, ids: &BTreeSet<ClosureEdgeId>) -> Result<usize>;

    /// Closure rows ending at `child` (paths into the node).
    fn closure_into(&self, child: NodeId) -> Result<Vec<ClosureEdgeRecord>>;

    /// Closure rows starting at `parent` (paths out of the node).
    fn closure_from(&self, parent: NodeId) -> Result<Vec<ClosureEdgeRecord>>;

    /// Closure rows witnessing `parent -> child` reachability.
    fn closure_between(&self, parent: NodeId, child: NodeId) -> Result<Vec<ClosureEdgeRecord>>;

    /// The depth-0 closure row for `(parent, child)`, if present.
    fn closure_depth0(&self, parent: NodeId, child: NodeId) -> Result<Option<ClosureEdgeRecord>>;

    /// Ids of closure rows whose entry, direct or exit pointer is in `ids`.
    /// Drives the purge-set fixed point on link deletion.
    fn closure_referencing(&self, ids: &BTreeSet<ClosureEdgeId>) -> Result<Vec<ClosureEdgeId>>;

    /// Returns every closure row. Test oracles and audits only.
    fn scan_closure(&self) -> Result<Vec<ClosureEdgeRecord>>;

    // -- groups --------------------------------------------------------

    /// Inserts a group row, assigning a fresh id when `rec.id` is null.
    fn insert_group(&mut self, rec: &GroupRecord) -> Result<GroupId>;

    /// Fetches a group row by id.
    fn group(&self, id: GroupId) -> Result<Option<GroupRecord>>;

    /// Returns every group row.
    fn scan_groups(&self) -> Result<Vec<GroupRecord>>;

    /// Adds a membership row; returns false when it already existed.
    fn add_group_member(&mut self, group: GroupId, node: NodeId) -> Result<bool>;

    /// Removes a membership row; returns false when it was absent.
    fn remove_group_member(&mut self, group: GroupId, node: NodeId) -> Result<bool>;

    /// Node ids belonging to `group`.
    fn group_members(&self, group: GroupId) -> Result<Vec<NodeId>>;

    /// Group ids containing `node`.
    fn groups_of(&self, node: NodeId) -> Result<Vec<GroupId>>;
}

/// Transactional entry points a backend must provide.
///
/// The closures receive a [`StorageTx`]; `run_write` commits when the
/// closure returns `Ok` and rolls back otherwise, `run_read` executes on a
/// consistent snapshot and never commits anything.
pub trait StorageBackend: Send + Sync {
    /// Runs `f` on a read snapshot.
    fn run_read(&self, f: &mut dyn FnMut(&mut dyn StorageTx) -> Result<()>) -> Result<()>;

    /// Runs `f` inside a write transaction with all-or-nothing semantics.
    fn run_write(&self, f: &mut dyn FnMut(&mut dyn StorageTx) -> Result<()>) -> Result<()>;
}

/// Cloneable handle bundling a backend with ergonomic, generically typed
/// transaction scopes.
#[derive(Clone)]
pub struct StorageContext {
    backend: Arc<dyn StorageBackend>,
}

impl StorageContext {
    /// Wraps a backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Runs `f` on a read snapshot and returns its value.
    pub fn read<T>(&self, f: impl FnOnce(&mut dyn StorageTx) -> Result<T>) -> Result<T> {
        let mut f = Some(f);
        let mut out = None;
        self.backend.run_read(&mut |tx| match f.take() {
            Some(f) => {
                out = Some(f(tx)?);
                Ok(())
            }
            None => Err(ProvenaError::Storage("read closure invoked twice".into())),
        })?;
        out.ok_or_else(|| ProvenaError::Storage("read transaction produced no result".into()))
    }

    /// Runs `f` inside a write transaction and returns its value. An `Err`
    /// from `f` rolls back every row the closure touched.
    pub fn write<T>(&self, f: impl FnOnce(&mut dyn StorageTx) -> Result<T>) -> Result<T> {
        let mut f = Some(f);
        let mut out = None;
        self.backend.run_write(&mut |tx| match f.take() {
            Some(f) => {
                out = Some(f(tx)?);
                Ok(())
            }
            None => Err(ProvenaError::Storage("write closure invoked twice".into())),
        })?;
        out.ok_or_else(|| ProvenaError::Storage("write transaction produced no result".into()))
    }
}
