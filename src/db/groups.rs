//! Minimal group support: enough surface for the membership join.

use uuid::Uuid;

use crate::db::ProvenaDb;
use crate::error::{ProvenaError, Result};
use crate::model::{GroupId, GroupRecord, NodeId, NULL_ID};

impl ProvenaDb {
    /// Creates a group and returns its id.
    pub fn create_group(
        &self,
        label: impl Into<String>,
        type_tag: impl Into<String>,
    ) -> Result<GroupId> {
        let rec = GroupRecord {
            id: NULL_ID,
            uuid: Uuid::new_v4(),
            label: label.into(),
            type_tag: type_tag.into(),
        };
        self.context().write(|tx| tx.insert_group(&rec))
    }

    /// Loads a group by id.
    pub fn group(&self, id: GroupId) -> Result<GroupRecord> {
        self.context()
            .read(|tx| tx.group(id))?
            .ok_or(ProvenaError::NotFound("group"))
    }

    /// Adds a node to a group. Returns false when it was already a member.
    pub fn add_group_member(&self, group: GroupId, node: NodeId) -> Result<bool> {
        self.context().write(|tx| {
            if tx.group(group)?.is_none() {
                return Err(ProvenaError::NotFound("group"));
            }
            if tx.node(node)?.is_none() {
                return Err(ProvenaError::NotFound("node"));
            }
            tx.add_group_member(group, node)
        })
    }

    /// Removes a node from a group. Returns false when it was not a member.
    pub fn remove_group_member(&self, group: GroupId, node: NodeId) -> Result<bool> {
        self.context()
            .write(|tx| tx.remove_group_member(group, node))
    }

    /// Node ids belonging to `group`.
    pub fn group_members(&self, group: GroupId) -> Result<Vec<NodeId>> {
        self.context().read(|tx| tx.group_members(group))
    }
}
