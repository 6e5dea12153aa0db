//! Node lifecycle and attribute/extra mutation rules.

use serde_json::{Map, Value as JsonValue};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::db::{AttributePolicy, ProvenaDb};
use crate::error::{ProvenaError, Result};
use crate::model::{NodeId, NodeRecord, NULL_ID, SEALED_KEY};
use crate::storage::StorageTx;

/// An unsealed, not-yet-persisted node. Attributes are freely mutable until
/// the draft is handed to [`ProvenaDb::persist_node`].
#[derive(Debug, Clone)]
pub struct NodeDraft {
    uuid: Uuid,
    type_tag: String,
    attributes: Map<String, JsonValue>,
    extras: Map<String, JsonValue>,
}

impl NodeDraft {
    /// Starts a draft with a fresh uuid and the given type tag.
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            type_tag: type_tag.into(),
            attributes: Map::new(),
            extras: Map::new(),
        }
    }

    /// The identity the node will persist under.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Sets an attribute, replacing any previous value.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets an extra, replacing any previous value.
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

impl ProvenaDb {
    /// Persists a draft, assigning its id and timestamps. The id is
    /// monotonic and never reused, even after deletions.
    ///
    /// The reserved seal marker may not appear among the draft's
    /// attributes; nodes can only be sealed through [`ProvenaDb::seal`].
    pub fn persist_node(&self, draft: NodeDraft) -> Result<NodeId> {
        if draft.attributes.contains_key(SEALED_KEY) {
            return Err(ProvenaError::InvalidArgument(format!(
                "attribute '{SEALED_KEY}' is reserved; use seal()"
            )));
        }
        let now = OffsetDateTime::now_utc();
        let rec = NodeRecord {
            id: NULL_ID,
            uuid: draft.uuid,
            type_tag: draft.type_tag,
            attributes: draft.attributes,
            extras: draft.extras,
            ctime: now,
            mtime: now,
            version: 0,
        };
        let id = self.context().write(|tx| tx.insert_node(&rec))?;
        debug!(id, uuid = %rec.uuid, type_tag = %rec.type_tag, "node.persist");
        Ok(id)
    }

    /// Loads a node by id.
    pub fn node(&self, id: NodeId) -> Result<NodeRecord> {
        self.context()
            .read(|tx| tx.node(id))?
            .ok_or(ProvenaError::NotFound("node"))
    }

    /// Loads a node by uuid.
    pub fn node_by_uuid(&self, uuid: &Uuid) -> Result<NodeRecord> {
        self.context()
            .read(|tx| tx.node_by_uuid(uuid))?
            .ok_or(ProvenaError::NotFound("node"))
    }

    /// Sets an attribute on a persisted node, subject to the configured
    /// mutability policy and the seal.
    pub fn set_attribute(
        &self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Result<()> {
        let key = key.into();
        let value = value.into();
        let policy = self.config().attribute_policy;
        self.mutate_node(id, |rec| {
            if rec.is_sealed() {
                return Err(ProvenaError::Immutable(rec.id, "node is sealed".into()));
            }
            if key == SEALED_KEY {
                return Err(ProvenaError::InvalidArgument(format!(
                    "'{SEALED_KEY}' is reserved; use seal()"
                )));
            }
            match policy {
                AttributePolicy::Frozen => {
                    return Err(ProvenaError::Immutable(
                        rec.id,
                        "attributes are frozen after persist".into(),
                    ));
                }
                AttributePolicy::AppendOnly => {
                    if rec.attributes.contains_key(&key) {
                        return Err(ProvenaError::Immutable(
                            rec.id,
                            format!("attribute '{key}' already set (append-only policy)"),
                        ));
                    }
                }
            }
            rec.attributes.insert(key.clone(), value.clone());
            Ok(())
        })
    }

    /// Sets an extra. Extras stay mutable for the node's whole lifetime,
    /// sealed or not.
    pub fn set_extra(
        &self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Result<()> {
        let key = key.into();
        let value = value.into();
        self.mutate_node(id, |rec| {
            rec.extras.insert(key.clone(), value.clone());
            Ok(())
        })
    }

    /// Removes an extra; missing keys are a no-op.
    pub fn delete_extra(&self, id: NodeId, key: &str) -> Result<()> {
        self.mutate_node(id, |rec| {
            rec.extras.remove(key);
            Ok(())
        })
    }

    /// Permanently freezes the node's attributes. Idempotent.
    pub fn seal(&self, id: NodeId) -> Result<()> {
        self.mutate_node(id, |rec| {
            if rec.is_sealed() {
                return Ok(());
            }
            rec.attributes
                .insert(SEALED_KEY.to_string(), JsonValue::Bool(true));
            Ok(())
        })
    }

    /// Fetch-modify-update inside one write transaction, bumping `mtime`
    /// and `version` whenever the closure actually ran.
    fn mutate_node(
        &self,
        id: NodeId,
        mutate: impl Fn(&mut NodeRecord) -> Result<()>,
    ) -> Result<()> {
        self.context().write(|tx| {
            let mut rec = tx.node(id)?.ok_or(ProvenaError::NotFound("node"))?;
            mutate(&mut rec)?;
            rec.mtime = OffsetDateTime::now_utc();
            rec.version += 1;
            tx.update_node(&rec)
        })
    }

    /// Runs a read-only closure against the node table; test and audit use.
    pub fn with_nodes<T>(
        &self,
        f: impl FnOnce(&mut dyn StorageTx) -> Result<T>,
    ) -> Result<T> {
        self.context().read(f)
    }
}
