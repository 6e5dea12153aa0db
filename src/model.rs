//! Record definitions shared by the stores, the closure index and the query
//! engine.
//!
//! These structs mirror the persisted column layout one to one: any storage
//! backend must expose exactly these columns to remain interchangeable with
//! existing data.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier of a persisted node. Assigned on first persist, never reused.
pub type NodeId = u64;
/// Identifier of a link row.
pub type LinkId = u64;
/// Identifier of a closure-edge row.
pub type ClosureEdgeId = u64;
/// Identifier of a group row.
pub type GroupId = u64;

/// Sentinel for "no id assigned yet".
pub const NULL_ID: u64 = 0;

/// Attribute key that marks a node as sealed. Lives inside the attribute bag
/// so the persisted column layout stays fixed.
pub const SEALED_KEY: &str = "sealed";

/// Typed classification of a link between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Data input to a calculation.
    InputCalc,
    /// Data input to a workflow.
    InputWork,
    /// A workflow calling a calculation.
    CallCalc,
    /// A workflow calling a sub-workflow.
    CallWork,
    /// A calculation creating a data node.
    Create,
    /// A workflow returning a data node.
    Return,
}

impl LinkType {
    /// Stable string tag used in storage and in filter values.
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::InputCalc => "input_calc",
            LinkType::InputWork => "input_work",
            LinkType::CallCalc => "call_calc",
            LinkType::CallWork => "call_work",
            LinkType::Create => "create",
            LinkType::Return => "return",
        }
    }

    /// Parses the storage tag back into the enum.
    pub fn from_str(tag: &str) -> Option<Self> {
        Some(match tag {
            "input_calc" => LinkType::InputCalc,
            "input_work" => LinkType::InputWork,
            "call_calc" => LinkType::CallCalc,
            "call_work" => LinkType::CallWork,
            "create" => LinkType::Create,
            "return" => LinkType::Return,
            _ => return None,
        })
    }

    /// Whether at most one link of this type with a given label may target a
    /// given output node (the create/return exclusivity class, plus inputs,
    /// which are unique per label and type on their target).
    pub fn label_unique_on_output(self) -> bool {
        matches!(
            self,
            LinkType::Create | LinkType::Return | LinkType::InputCalc | LinkType::InputWork
        )
    }

    /// Whether a node may carry at most one incoming link of this type
    /// regardless of label (a process has a single caller).
    pub fn single_incoming(self) -> bool {
        matches!(self, LinkType::CallCalc | LinkType::CallWork)
    }
}

/// A versioned node record with two schemaless JSON bags.
///
/// `attributes` is mutable only while the node is unsealed (and after
/// persist only as far as the configured policy allows); `extras` stays
/// mutable for the node's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    /// Stable monotonic id, assigned on first persist.
    pub id: NodeId,
    /// Immutable identity assigned at creation.
    pub uuid: Uuid,
    /// Free-form type tag, e.g. `data.core.int`.
    pub type_tag: String,
    /// Schemaless attribute bag.
    pub attributes: Map<String, JsonValue>,
    /// Schemaless extras bag, mutable after persist.
    pub extras: Map<String, JsonValue>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub ctime: OffsetDateTime,
    /// Last-modification timestamp, bumped on every stored mutation.
    #[serde(with = "time::serde::rfc3339")]
    pub mtime: OffsetDateTime,
    /// Mutation counter, bumped together with `mtime`.
    pub version: u32,
}

impl NodeRecord {
    /// Whether the node's attributes are permanently frozen.
    pub fn is_sealed(&self) -> bool {
        matches!(self.attributes.get(SEALED_KEY), Some(JsonValue::Bool(true)))
    }
}

/// A directed, labeled edge. `input_id` feeds `output_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    /// Row id.
    pub id: LinkId,
    /// Source node (the input side).
    pub input_id: NodeId,
    /// Target node (the output side).
    pub output_id: NodeId,
    /// Link label, unique per output within some type classes.
    pub label: String,
    /// Typed classification.
    pub link_type: LinkType,
}

/// Derived reachability row: `child_id` is reachable from `parent_id` via
/// `depth + 1` links.
///
/// Depth-0 rows correspond one to one with link rows and are
/// self-referential in all three provenance pointers. For deeper rows,
/// `entry_edge_id` covers the prefix path into the pivot link's source,
/// `direct_edge_id` is the depth-0 row of the pivot link itself, and
/// `exit_edge_id` covers the suffix path out of the pivot link's target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosureEdgeRecord {
    /// Row id.
    pub id: ClosureEdgeId,
    /// Ancestor endpoint.
    pub parent_id: NodeId,
    /// Descendant endpoint.
    pub child_id: NodeId,
    /// Number of links on the witnessed path, minus one.
    pub depth: u32,
    /// Closure edge covering the prefix path.
    pub entry_edge_id: ClosureEdgeId,
    /// Depth-0 closure edge of the pivot link.
    pub direct_edge_id: ClosureEdgeId,
    /// Closure edge covering the suffix path.
    pub exit_edge_id: ClosureEdgeId,
}

/// A named collection of nodes, queryable through the membership join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    /// Row id.
    pub id: GroupId,
    /// Immutable identity.
    pub uuid: Uuid,
    /// Human-facing label.
    pub label: String,
    /// Free-form type tag.
    pub type_tag: String,
}
