//! Durable backend on SQLite via `rusqlite`.
//!
//! The table layout matches the persisted column contract exactly; the JSON
//! bags are stored as serialized TEXT columns and timestamps as RFC-3339
//! strings. All mutations run inside real SQLite transactions, so a failing
//! closure rolls back every row it touched.

use std::collections::BTreeSet;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ProvenaError, Result};
use crate::model::{
    ClosureEdgeId, ClosureEdgeRecord, GroupId, GroupRecord, LinkId, LinkRecord, LinkType, NodeId,
    NodeRecord, NULL_ID,
};
use crate::storage::{StorageBackend, StorageTx};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    type_tag TEXT NOT NULL,
    attributes TEXT NOT NULL,
    extras TEXT NOT NULL,
    ctime TEXT NOT NULL,
    mtime TEXT NOT NULL,
    version INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    input_id INTEGER NOT NULL REFERENCES nodes (id),
    output_id INTEGER NOT NULL REFERENCES nodes (id),
    label TEXT NOT NULL,
    link_type TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_links_input ON links (input_id);
CREATE INDEX IF NOT EXISTS idx_links_output ON links (output_id);
CREATE TABLE IF NOT EXISTS closure (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER NOT NULL,
    child_id INTEGER NOT NULL,
    depth INTEGER NOT NULL,
    entry_edge_id INTEGER NOT NULL,
    direct_edge_id INTEGER NOT NULL,
    exit_edge_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_closure_parent ON closure (parent_id);
CREATE INDEX IF NOT EXISTS idx_closure_child ON closure (child_id);
CREATE INDEX IF NOT EXISTS idx_closure_entry ON closure (entry_edge_id);
CREATE INDEX IF NOT EXISTS idx_closure_direct ON closure (direct_edge_id);
CREATE INDEX IF NOT EXISTS idx_closure_exit ON closure (exit_edge_id);
CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL,
    type_tag TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS group_members (
    group_id INTEGER NOT NULL REFERENCES groups (id),
    node_id INTEGER NOT NULL REFERENCES nodes (id),
    PRIMARY KEY (group_id, node_id)
);
";

fn ts_to_sql(ts: OffsetDateTime) -> Result<String> {
    ts.format(&Rfc3339)
        .map_err(|err| ProvenaError::Storage(format!("timestamp encode: {err}")))
}

fn ts_from_sql(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|err| ProvenaError::Storage(format!("timestamp decode '{s}': {err}")))
}

fn uuid_from_sql(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|err| ProvenaError::Storage(format!("uuid decode '{s}': {err}")))
}

fn bag_from_sql(s: &str) -> Result<Map<String, JsonValue>> {
    Ok(serde_json::from_str(s)?)
}

fn link_type_from_sql(s: &str) -> Result<LinkType> {
    LinkType::from_str(s).ok_or_else(|| ProvenaError::Storage(format!("unknown link type '{s}'")))
}

struct SqliteTx<'a> {
    tx: &'a Transaction<'a>,
}

impl SqliteTx<'_> {
    fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, String, String, String, String, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    fn decode_node(
        raw: (i64, String, String, String, String, String, String, i64),
    ) -> Result<NodeRecord> {
        Ok(NodeRecord {
            id: raw.0 as NodeId,
            uuid: uuid_from_sql(&raw.1)?,
            type_tag: raw.2,
            attributes: bag_from_sql(&raw.3)?,
            extras: bag_from_sql(&raw.4)?,
            ctime: ts_from_sql(&raw.5)?,
            mtime: ts_from_sql(&raw.6)?,
            version: raw.7 as u32,
        })
    }

    fn query_nodes(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<NodeRecord>> {
        let mut stmt = self.tx.prepare(sql)?;
        let raws = stmt
            .query_map(params, Self::node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(Self::decode_node).collect()
    }

    fn decode_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, i64, i64, String, String)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    }

    fn link_from_raw(raw: (i64, i64, i64, String, String)) -> Result<LinkRecord> {
        Ok(LinkRecord {
            id: raw.0 as LinkId,
            input_id: raw.1 as NodeId,
            output_id: raw.2 as NodeId,
            label: raw.3,
            link_type: link_type_from_sql(&raw.4)?,
        })
    }

    fn query_links(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<LinkRecord>> {
        let mut stmt = self.tx.prepare(sql)?;
        let raws = stmt
            .query_map(params, Self::decode_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(Self::link_from_raw).collect()
    }

    fn closure_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClosureEdgeRecord> {
        Ok(ClosureEdgeRecord {
            id: row.get::<_, i64>(0)? as ClosureEdgeId,
            parent_id: row.get::<_, i64>(1)? as NodeId,
            child_id: row.get::<_, i64>(2)? as NodeId,
            depth: row.get::<_, i64>(3)? as u32,
            entry_edge_id: row.get::<_, i64>(4)? as ClosureEdgeId,
            direct_edge_id: row.get::<_, i64>(5)? as ClosureEdgeId,
            exit_edge_id: row.get::<_, i64>(6)? as ClosureEdgeId,
        })
    }

    fn query_closure(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ClosureEdgeRecord>> {
        let mut stmt = self.tx.prepare(sql)?;
        let rows = stmt
            .query_map(params, Self::closure_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Loads `ids` into a temp scratch table so set-based scans stay in SQL.
    fn fill_scratch(&self, ids: &BTreeSet<ClosureEdgeId>) -> Result<()> {
        self.tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS closure_scratch (id INTEGER PRIMARY KEY);
             DELETE FROM closure_scratch;",
        )?;
        let mut stmt = self
            .tx
            .prepare("INSERT OR IGNORE INTO closure_scratch (id) VALUES (?1)")?;
        for id in ids {
            stmt.execute(params![*id as i64])?;
        }
        Ok(())
    }
}

const NODE_COLS: &str = "id, uuid, type_tag, attributes, extras, ctime, mtime, version";
const LINK_COLS: &str = "id, input_id, output_id, label, link_type";
const CLOSURE_COLS: &str =
    "id, parent_id, child_id, depth, entry_edge_id, direct_edge_id, exit_edge_id";

impl StorageTx for SqliteTx<'_> {
    fn insert_node(&mut self, rec: &NodeRecord) -> Result<NodeId> {
        let id_param = if rec.id == NULL_ID {
            None
        } else {
            Some(rec.id as i64)
        };
        self.tx.execute(
            "INSERT INTO nodes (id, uuid, type_tag, attributes, extras, ctime, mtime, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id_param,
                rec.uuid.to_string(),
                rec.type_tag,
                serde_json::to_string(&rec.attributes)?,
                serde_json::to_string(&rec.extras)?,
                ts_to_sql(rec.ctime)?,
                ts_to_sql(rec.mtime)?,
                rec.version as i64,
            ],
        )?;
        Ok(self.tx.last_insert_rowid() as NodeId)
    }

    fn update_node(&mut self, rec: &NodeRecord) -> Result<()> {
        let changed = self.tx.execute(
            "UPDATE nodes SET type_tag = ?2, attributes = ?3, extras = ?4, mtime = ?5,
             version = ?6 WHERE id = ?1",
            params![
                rec.id as i64,
                rec.type_tag,
                serde_json::to_string(&rec.attributes)?,
                serde_json::to_string(&rec.extras)?,
                ts_to_sql(rec.mtime)?,
                rec.version as i64,
            ],
        )?;
        if changed == 0 {
            return Err(ProvenaError::NotFound("node"));
        }
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<Option<NodeRecord>> {
        let raw = self
            .tx
            .query_row(
                &format!("SELECT {NODE_COLS} FROM nodes WHERE id = ?1"),
                params![id as i64],
                Self::node_from_row,
            )
            .optional()?;
        raw.map(Self::decode_node).transpose()
    }

    fn node_by_uuid(&self, uuid: &Uuid) -> Result<Option<NodeRecord>> {
        let raw = self
            .tx
            .query_row(
                &format!("SELECT {NODE_COLS} FROM nodes WHERE uuid = ?1"),
                params![uuid.to_string()],
                Self::node_from_row,
            )
            .optional()?;
        raw.map(Self::decode_node).transpose()
    }

    fn scan_nodes(&self) -> Result<Vec<NodeRecord>> {
        self.query_nodes(&format!("SELECT {NODE_COLS} FROM nodes ORDER BY id"), &[])
    }

    fn insert_link(&mut self, rec: &LinkRecord) -> Result<LinkId> {
        let id_param = if rec.id == NULL_ID {
            None
        } else {
            Some(rec.id as i64)
        };
        self.tx.execute(
            "INSERT INTO links (id, input_id, output_id, label, link_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id_param,
                rec.input_id as i64,
                rec.output_id as i64,
                rec.label,
                rec.link_type.as_str(),
            ],
        )?;
        Ok(self.tx.last_insert_rowid() as LinkId)
    }

    fn delete_link(&mut self, id: LinkId) -> Result<Option<LinkRecord>> {
        let existing = self.link(id)?;
        if existing.is_some() {
            self.tx
                .execute("DELETE FROM links WHERE id = ?1", params![id as i64])?;
        }
        Ok(existing)
    }

    fn link(&self, id: LinkId) -> Result<Option<LinkRecord>> {
        let raw = self
            .tx
            .query_row(
                &format!("SELECT {LINK_COLS} FROM links WHERE id = ?1"),
                params![id as i64],
                Self::decode_link,
            )
            .optional()?;
        raw.map(Self::link_from_raw).transpose()
    }

    fn links_from(&self, input: NodeId) -> Result<Vec<LinkRecord>> {
        self.query_links(
            &format!("SELECT {LINK_COLS} FROM links WHERE input_id = ?1 ORDER BY id"),
            &[&(input as i64)],
        )
    }

    fn links_into(&self, output: NodeId) -> Result<Vec<LinkRecord>> {
        self.query_links(
            &format!("SELECT {LINK_COLS} FROM links WHERE output_id = ?1 ORDER BY id"),
            &[&(output as i64)],
        )
    }

    fn scan_links(&self) -> Result<Vec<LinkRecord>> {
        self.query_links(&format!("SELECT {LINK_COLS} FROM links ORDER BY id"), &[])
    }

    fn insert_closure_edge(&mut self, rec: &ClosureEdgeRecord) -> Result<ClosureEdgeId> {
        let id_param = if rec.id == NULL_ID {
            None
        } else {
            Some(rec.id as i64)
        };
        self.tx.execute(
            "INSERT INTO closure (id, parent_id, child_id, depth, entry_edge_id, direct_edge_id, exit_edge_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id_param,
                rec.parent_id as i64,
                rec.child_id as i64,
                rec.depth as i64,
                rec.entry_edge_id as i64,
                rec.direct_edge_id as i64,
                rec.exit_edge_id as i64,
            ],
        )?;
        Ok(self.tx.last_insert_rowid() as ClosureEdgeId)
    }

    fn update_closure_edge(&mut self, rec: &ClosureEdgeRecord) -> Result<()> {
        let changed = self.tx.execute(
            "UPDATE closure SET parent_id = ?2, child_id = ?3, depth = ?4,
             entry_edge_id = ?5, direct_edge_id = ?6, exit_edge_id = ?7 WHERE id = ?1",
            params![
                rec.id as i64,
                rec.parent_id as i64,
                rec.child_id as i64,
                rec.depth as i64,
                rec.entry_edge_id as i64,
                rec.direct_edge_id as i64,
                rec.exit_edge_id as i64,
            ],
        )?;
        if changed == 0 {
            return Err(ProvenaError::NotFound("closure edge"));
        }
        Ok(())
    }

    fn delete_closure_edges(&mut self, ids: &BTreeSet<ClosureEdgeId>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.fill_scratch(ids)?;
        let deleted = self.tx.execute(
            "DELETE FROM closure WHERE id IN (SELECT id FROM closure_scratch)",
            [],
        )?;
        Ok(deleted)
    }

    fn closure_into(&self, child: NodeId) -> Result<Vec<ClosureEdgeRecord>> {
        self.query_closure(
            &format!("SELECT {CLOSURE_COLS} FROM closure WHERE child_id = ?1 ORDER BY id"),
            &[&(child as i64)],
        )
    }

    fn closure_from(&self, parent: NodeId) -> Result<Vec<ClosureEdgeRecord>> {
        self.query_closure(
            &format!("SELECT {CLOSURE_COLS} FROM closure WHERE parent_id = ?1 ORDER BY id"),
            &[&(parent as i64)],
        )
    }

    fn closure_between(&self, parent: NodeId, child: NodeId) -> Result<Vec<ClosureEdgeRecord>> {
        self.query_closure(
            &format!(
                "SELECT {CLOSURE_COLS} FROM closure WHERE parent_id = ?1 AND child_id = ?2 ORDER BY id"
            ),
            &[&(parent as i64), &(child as i64)],
        )
    }

    fn closure_depth0(&self, parent: NodeId, child: NodeId) -> Result<Option<ClosureEdgeRecord>> {
        let row = self
            .tx
            .query_row(
                &format!(
                    "SELECT {CLOSURE_COLS} FROM closure
                     WHERE parent_id = ?1 AND child_id = ?2 AND depth = 0"
                ),
                params![parent as i64, child as i64],
                Self::closure_from_row,
            )
            .optional()?;
        Ok(row)
    }

    fn closure_referencing(&self, ids: &BTreeSet<ClosureEdgeId>) -> Result<Vec<ClosureEdgeId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fill_scratch(ids)?;
        let mut stmt = self.tx.prepare(
            "SELECT id FROM closure
             WHERE entry_edge_id IN (SELECT id FROM closure_scratch)
                OR direct_edge_id IN (SELECT id FROM closure_scratch)
                OR exit_edge_id IN (SELECT id FROM closure_scratch)",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(|id| id as ClosureEdgeId).collect())
    }

    fn scan_closure(&self) -> Result<Vec<ClosureEdgeRecord>> {
        self.query_closure(
            &format!("SELECT {CLOSURE_COLS} FROM closure ORDER BY id"),
            &[],
        )
    }

    fn insert_group(&mut self, rec: &GroupRecord) -> Result<GroupId> {
        let id_param = if rec.id == NULL_ID {
            None
        } else {
            Some(rec.id as i64)
        };
        self.tx.execute(
            "INSERT INTO groups (id, uuid, label, type_tag) VALUES (?1, ?2, ?3, ?4)",
            params![id_param, rec.uuid.to_string(), rec.label, rec.type_tag],
        )?;
        Ok(self.tx.last_insert_rowid() as GroupId)
    }

    fn group(&self, id: GroupId) -> Result<Option<GroupRecord>> {
        let row = self
            .tx
            .query_row(
                "SELECT id, uuid, label, type_tag FROM groups WHERE id = ?1",
                params![id as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(id, uuid, label, type_tag)| {
            Ok(GroupRecord {
                id: id as GroupId,
                uuid: uuid_from_sql(&uuid)?,
                label,
                type_tag,
            })
        })
        .transpose()
    }

    fn scan_groups(&self) -> Result<Vec<GroupRecord>> {
        let mut stmt = self
            .tx
            .prepare("SELECT id, uuid, label, type_tag FROM groups ORDER BY id")?;
        let raws = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter()
            .map(|(id, uuid, label, type_tag)| {
                Ok(GroupRecord {
                    id: id as GroupId,
                    uuid: uuid_from_sql(&uuid)?,
                    label,
                    type_tag,
                })
            })
            .collect()
    }

    fn add_group_member(&mut self, group: GroupId, node: NodeId) -> Result<bool> {
        let changed = self.tx.execute(
            "INSERT OR IGNORE INTO group_members (group_id, node_id) VALUES (?1, ?2)",
            params![group as i64, node as i64],
        )?;
        Ok(changed > 0)
    }

    fn remove_group_member(&mut self, group: GroupId, node: NodeId) -> Result<bool> {
        let changed = self.tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND node_id = ?2",
            params![group as i64, node as i64],
        )?;
        Ok(changed > 0)
    }

    fn group_members(&self, group: GroupId) -> Result<Vec<NodeId>> {
        let mut stmt = self
            .tx
            .prepare("SELECT node_id FROM group_members WHERE group_id = ?1 ORDER BY node_id")?;
        let rows = stmt
            .query_map(params![group as i64], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(|id| id as NodeId).collect())
    }

    fn groups_of(&self, node: NodeId) -> Result<Vec<GroupId>> {
        let mut stmt = self
            .tx
            .prepare("SELECT group_id FROM group_members WHERE node_id = ?1 ORDER BY group_id")?;
        let rows = stmt
            .query_map(params![node as i64], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(|id| id as GroupId).collect())
    }
}

/// SQLite-backed durable store.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) a database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StorageBackend for SqliteBackend {
    fn run_read(&self, f: &mut dyn FnMut(&mut dyn StorageTx) -> Result<()>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut stx = SqliteTx { tx: &tx };
        f(&mut stx)?;
        // Dropping the transaction rolls back; reads have nothing to keep.
        Ok(())
    }

    fn run_write(&self, f: &mut dyn FnMut(&mut dyn StorageTx) -> Result<()>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stx = SqliteTx { tx: &tx };
            f(&mut stx)?;
        }
        tx.commit()?;
        Ok(())
    }
}
