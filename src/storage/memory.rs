//! In-process reference backend.
//!
//! State lives in plain ordered maps behind a `parking_lot` lock. Write
//! transactions operate on a copy of the state and swap it in on success,
//! which gives the same all-or-nothing guarantee a real transactional store
//! provides; reads snapshot the state, so long queries never observe a
//! half-applied mutation.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{ProvenaError, Result};
use crate::model::{
    ClosureEdgeId, ClosureEdgeRecord, GroupId, GroupRecord, LinkId, LinkRecord, NodeId,
    NodeRecord, NULL_ID,
};
use crate::storage::{StorageBackend, StorageTx};

#[derive(Clone, Default)]
struct MemState {
    nodes: BTreeMap<NodeId, NodeRecord>,
    links: BTreeMap<LinkId, LinkRecord>,
    closure: BTreeMap<ClosureEdgeId, ClosureEdgeRecord>,
    groups: BTreeMap<GroupId, GroupRecord>,
    members: BTreeSet<(GroupId, NodeId)>,
    next_node: NodeId,
    next_link: LinkId,
    next_closure: ClosureEdgeId,
    next_group: GroupId,
}

impl MemState {
    fn next(counter: &mut u64) -> u64 {
        if *counter == NULL_ID {
            *counter = 1;
        }
        let id = *counter;
        *counter += 1;
        id
    }
}

struct MemTx {
    state: MemState,
}

impl StorageTx for MemTx {
    fn insert_node(&mut self, rec: &NodeRecord) -> Result<NodeId> {
        let mut rec = rec.clone();
        if rec.id == NULL_ID {
            rec.id = MemState::next(&mut self.state.next_node);
        } else if self.state.nodes.contains_key(&rec.id) {
            return Err(ProvenaError::Storage(format!(
                "duplicate node id {}",
                rec.id
            )));
        }
        let id = rec.id;
        self.state.nodes.insert(id, rec);
        Ok(id)
    }

    fn update_node(&mut self, rec: &NodeRecord) -> Result<()> {
        match self.state.nodes.get_mut(&rec.id) {
            Some(slot) => {
                *slot = rec.clone();
                Ok(())
            }
            None => Err(ProvenaError::NotFound("node")),
        }
    }

    fn node(&self, id: NodeId) -> Result<Option<NodeRecord>> {
        Ok(self.state.nodes.get(&id).cloned())
    }

    fn node_by_uuid(&self, uuid: &Uuid) -> Result<Option<NodeRecord>> {
        Ok(self
            .state
            .nodes
            .values()
            .find(|n| &n.uuid == uuid)
            .cloned())
    }

    fn scan_nodes(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.state.nodes.values().cloned().collect())
    }

    fn insert_link(&mut self, rec: &LinkRecord) -> Result<LinkId> {
        let mut rec = rec.clone();
        if rec.id == NULL_ID {
            rec.id = MemState::next(&mut self.state.next_link);
        } else if self.state.links.contains_key(&rec.id) {
            return Err(ProvenaError::Storage(format!(
                "duplicate link id {}",
                rec.id
            )));
        }
        let id = rec.id;
        self.state.links.insert(id, rec);
        Ok(id)
    }

    fn delete_link(&mut self, id: LinkId) -> Result<Option<LinkRecord>> {
        Ok(self.state.links.remove(&id))
    }

    fn link(&self, id: LinkId) -> Result<Option<LinkRecord>> {
        Ok(self.state.links.get(&id).cloned())
    }

    fn links_from(&self, input: NodeId) -> Result<Vec<LinkRecord>> {
        Ok(self
            .state
            .links
            .values()
            .filter(|l| l.input_id == input)
            .cloned()
            .collect())
    }

    fn links_into(&self, output: NodeId) -> Result<Vec<LinkRecord>> {
        Ok(self
            .state
            .links
            .values()
            .filter(|l| l.output_id == output)
            .cloned()
            .collect())
    }

    fn scan_links(&self) -> Result<Vec<LinkRecord>> {
        Ok(self.state.links.values().cloned().collect())
    }

    fn insert_closure_edge(&mut self, rec: &ClosureEdgeRecord) -> Result<ClosureEdgeId> {
        let mut rec = rec.clone();
        if rec.id == NULL_ID {
            rec.id = MemState::next(&mut self.state.next_closure);
        } else if self.state.closure.contains_key(&rec.id) {
            return Err(ProvenaError::Storage(format!(
                "duplicate closure edge id {}",
                rec.id
            )));
        }
        let id = rec.id;
        self.state.closure.insert(id, rec);
        Ok(id)
    }

    fn update_closure_edge(&mut self, rec: &ClosureEdgeRecord) -> Result<()> {
        match self.state.closure.get_mut(&rec.id) {
            Some(slot) => {
                *slot = rec.clone();
                Ok(())
            }
            None => Err(ProvenaError::NotFound("closure edge")),
        }
    }

    fn delete_closure_edges(&mut self, ids: &BTreeSet<ClosureEdgeId>) -> Result<usize> {
        let before = self.state.closure.len();
        self.state.closure.retain(|id, _| !ids.contains(id));
        Ok(before - self.state.closure.len())
    }

    fn closure_into(&self, child: NodeId) -> Result<Vec<ClosureEdgeRecord>> {
        Ok(self
            .state
            .closure
            .values()
            .filter(|e| e.child_id == child)
            .cloned()
            .collect())
    }

    fn closure_from(&self, parent: NodeId) -> Result<Vec<ClosureEdgeRecord>> {
        Ok(self
            .state
            .closure
            .values()
            .filter(|e| e.parent_id == parent)
            .cloned()
            .collect())
    }

    fn closure_between(&self, parent: NodeId, child: NodeId) -> Result<Vec<ClosureEdgeRecord>> {
        Ok(self
            .state
            .closure
            .values()
            .filter(|e| e.parent_id == parent && e.child_id == child)
            .cloned()
            .collect())
    }

    fn closure_depth0(&self, parent: NodeId, child: NodeId) -> Result<Option<ClosureEdgeRecord>> {
        Ok(self
            .state
            .closure
            .values()
            .find(|e| e.parent_id == parent && e.child_id == child && e.depth == 0)
            .cloned())
    }

    fn closure_referencing(&self, ids: &BTreeSet<ClosureEdgeId>) -> Result<Vec<ClosureEdgeId>> {
        Ok(self
            .state
            .closure
            .values()
            .filter(|e| {
                ids.contains(&e.entry_edge_id)
                    || ids.contains(&e.direct_edge_id)
                    || ids.contains(&e.exit_edge_id)
            })
            .map(|e| e.id)
            .collect())
    }

    fn scan_closure(&self) -> Result<Vec<ClosureEdgeRecord>> {
        Ok(self.state.closure.values().cloned().collect())
    }

    fn insert_group(&mut self, rec: &GroupRecord) -> Result<GroupId> {
        let mut rec = rec.clone();
        if rec.id == NULL_ID {
            rec.id = MemState::next(&mut self.state.next_group);
        } else if self.state.groups.contains_key(&rec.id) {
            return Err(ProvenaError::Storage(format!(
                "duplicate group id {}",
                rec.id
            )));
        }
        let id = rec.id;
        self.state.groups.insert(id, rec);
        Ok(id)
    }

    fn group(&self, id: GroupId) -> Result<Option<GroupRecord>> {
        Ok(self.state.groups.get(&id).cloned())
    }

    fn scan_groups(&self) -> Result<Vec<GroupRecord>> {
        Ok(self.state.groups.values().cloned().collect())
    }

    fn add_group_member(&mut self, group: GroupId, node: NodeId) -> Result<bool> {
        Ok(self.state.members.insert((group, node)))
    }

    fn remove_group_member(&mut self, group: GroupId, node: NodeId) -> Result<bool> {
        Ok(self.state.members.remove(&(group, node)))
    }

    fn group_members(&self, group: GroupId) -> Result<Vec<NodeId>> {
        Ok(self
            .state
            .members
            .range((group, NodeId::MIN)..=(group, NodeId::MAX))
            .map(|(_, n)| *n)
            .collect())
    }

    fn groups_of(&self, node: NodeId) -> Result<Vec<GroupId>> {
        Ok(self
            .state
            .members
            .iter()
            .filter(|(_, n)| *n == node)
            .map(|(g, _)| *g)
            .collect())
    }
}

/// Reference backend backed by ordered in-memory maps.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemState>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn run_read(&self, f: &mut dyn FnMut(&mut dyn StorageTx) -> Result<()>) -> Result<()> {
        let snapshot = self.state.read().clone();
        let mut tx = MemTx { state: snapshot };
        f(&mut tx)
    }

    fn run_write(&self, f: &mut dyn FnMut(&mut dyn StorageTx) -> Result<()>) -> Result<()> {
        // The write lock is held for the whole transaction: concurrent
        // writers on the same backend serialize, readers keep snapshotting
        // the last committed state.
        let mut guard = self.state.write();
        let mut tx = MemTx {
            state: guard.clone(),
        };
        f(&mut tx)?;
        *guard = tx.state;
        Ok(())
    }
}
