//! Incremental transitive-closure maintenance.
//!
//! Every link mutation notifies this module inside the same transaction, so
//! after the storage commit the closure table witnesses exactly the
//! reachability of the current link set. Insertion uses the semi-naive
//! online update: the cost scales with the number of paths touching the new
//! link's endpoints, not with the graph. Deletion purges by expanding a set
//! of doomed edge ids to a fixed point over the entry/direct/exit pointers.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::{ProvenaError, Result};
use crate::model::{ClosureEdgeRecord, LinkRecord, NodeId, NULL_ID};
use crate::storage::StorageTx;

/// Registers a freshly inserted link with the closure index.
///
/// Must run inside the same transaction as the link-row insert, before
/// commit. Re-inserting a `(parent, child)` pair that already has a depth-0
/// closure row is a no-op. Rejects the insert with [`ProvenaError::Cycle`]
/// when the reverse reachability already holds; the caller's transaction
/// rollback then also discards the link row.
pub fn notify_link_inserted(tx: &mut dyn StorageTx, link: &LinkRecord) -> Result<()> {
    let parent = link.input_id;
    let child = link.output_id;

    if tx.closure_depth0(parent, child)?.is_some() {
        debug!(parent, child, "closure.insert.noop");
        return Ok(());
    }
    if parent == child || !tx.closure_between(child, parent)?.is_empty() {
        return Err(ProvenaError::Cycle {
            ancestor: parent,
            descendant: child,
        });
    }

    // Base case: the depth-0 row points at itself in all three slots.
    let base_id = tx.insert_closure_edge(&ClosureEdgeRecord {
        id: NULL_ID,
        parent_id: parent,
        child_id: child,
        depth: 0,
        entry_edge_id: NULL_ID,
        direct_edge_id: NULL_ID,
        exit_edge_id: NULL_ID,
    })?;
    tx.update_closure_edge(&ClosureEdgeRecord {
        id: base_id,
        parent_id: parent,
        child_id: child,
        depth: 0,
        entry_edge_id: base_id,
        direct_edge_id: base_id,
        exit_edge_id: base_id,
    })?;

    // Scans are taken before any derived row is written, so the expansion
    // never reconsumes its own output.
    let incoming = tx.closure_into(parent)?;
    let outgoing = tx.closure_from(child)?;

    let mut created = 1usize;
    for a in &incoming {
        tx.insert_closure_edge(&ClosureEdgeRecord {
            id: NULL_ID,
            parent_id: a.parent_id,
            child_id: child,
            depth: a.depth + 1,
            entry_edge_id: a.id,
            direct_edge_id: base_id,
            exit_edge_id: base_id,
        })?;
        created += 1;
    }
    for b in &outgoing {
        tx.insert_closure_edge(&ClosureEdgeRecord {
            id: NULL_ID,
            parent_id: parent,
            child_id: b.child_id,
            depth: b.depth + 1,
            entry_edge_id: base_id,
            direct_edge_id: base_id,
            exit_edge_id: b.id,
        })?;
        created += 1;
    }
    for a in &incoming {
        for b in &outgoing {
            tx.insert_closure_edge(&ClosureEdgeRecord {
                id: NULL_ID,
                parent_id: a.parent_id,
                child_id: b.child_id,
                depth: a.depth + b.depth + 2,
                entry_edge_id: a.id,
                direct_edge_id: base_id,
                exit_edge_id: b.id,
            })?;
            created += 1;
        }
    }

    debug!(parent, child, rows = created, "closure.insert.expand");
    Ok(())
}

/// Unregisters a link that is about to be deleted.
///
/// Must run inside the same transaction as the link-row delete, before
/// commit. Removes exactly the closure rows whose every witnessing path
/// went through the link: the purge set starts at the depth-0 row and grows
/// over rows referencing a doomed row until nothing new is added.
pub fn notify_link_before_delete(tx: &mut dyn StorageTx, link: &LinkRecord) -> Result<()> {
    let parent = link.input_id;
    let child = link.output_id;

    let Some(base) = tx.closure_depth0(parent, child)? else {
        warn!(parent, child, "closure.delete.missing_base");
        return Ok(());
    };

    let mut purge: BTreeSet<_> = BTreeSet::from([base.id]);
    loop {
        let mut grew = false;
        for id in tx.closure_referencing(&purge)? {
            grew |= purge.insert(id);
        }
        if !grew {
            break;
        }
    }

    let deleted = tx.delete_closure_edges(&purge)?;
    debug!(parent, child, rows = deleted, "closure.delete.purge");
    Ok(())
}

/// Whether `child` is reachable from `parent` through one or more links.
pub fn is_reachable(tx: &mut dyn StorageTx, parent: NodeId, child: NodeId) -> Result<bool> {
    Ok(!tx.closure_between(parent, child)?.is_empty())
}

/// Number of distinct witnessed paths from `parent` to `child`.
pub fn path_count(tx: &mut dyn StorageTx, parent: NodeId, child: NodeId) -> Result<u64> {
    Ok(tx.closure_between(parent, child)?.len() as u64)
}
