//! Query-path execution and row projection.
//!
//! Execution materializes the step combinations inside a single read
//! snapshot, walking the path left to right and extending partial
//! bindings through the declared joins. Joins that can fan out are
//! deduplicated so each physical entity combination appears once. Result
//! sets can be arbitrarily large, so the cancellation flag is consulted
//! while bindings are still being expanded, not just between yielded
//! rows: a cancel issued mid-query abandons the remaining join work
//! inside the read snapshot.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde_json::Value as JsonValue;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{ProvenaError, Result};
use crate::model::{GroupRecord, LinkRecord, NodeRecord};
use crate::query::eval::{eval, parse_datetime, EntityRow};
use crate::query::filter::{Column, FieldPath};
use crate::query::path::{
    CastTag, EntityKind, Join, LinkDirection, OrderBy, ProjectedField, Projection, QueryPath,
};
use crate::storage::StorageTx;

/// Runtime value appearing in result rows.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    /// Absent or uncastable value.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Float scalar.
    Float(f64),
    /// Text scalar.
    Text(String),
    /// Raw JSON payload.
    Json(JsonValue),
    /// Datetime scalar.
    Date(OffsetDateTime),
    /// A whole node entity (projection `"*"`).
    Node(NodeRecord),
    /// A whole link entity.
    Link(LinkRecord),
    /// A whole group entity.
    Group(GroupRecord),
}

/// One positional result row, one slot per projection in declaration order.
pub type Row = Vec<QueryValue>;

/// Shared cooperative-cancellation flag checked between yielded rows.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the stream stops at the next row boundary.
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

/// Lazy, finite sequence of result rows. Restartable only by re-executing
/// the path.
#[derive(Debug)]
pub struct RowStream {
    batches: VecDeque<Vec<Row>>,
    current: std::vec::IntoIter<Row>,
    cancel: CancelFlag,
}

impl Iterator for RowStream {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            return Some(Err(ProvenaError::Cancelled));
        }
        loop {
            if let Some(row) = self.current.next() {
                return Some(Ok(row));
            }
            match self.batches.pop_front() {
                Some(batch) => self.current = batch.into_iter(),
                None => return None,
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Entity {
    Node(NodeRecord),
    Link(LinkRecord),
    Group(GroupRecord),
}

impl Entity {
    fn key(&self) -> (u8, u64) {
        match self {
            Entity::Node(n) => (0, n.id),
            Entity::Link(l) => (1, l.id),
            Entity::Group(g) => (2, g.id),
        }
    }

    fn row(&self) -> EntityRow<'_> {
        match self {
            Entity::Node(n) => EntityRow::Node(n),
            Entity::Link(l) => EntityRow::Link(l),
            Entity::Group(g) => EntityRow::Group(g),
        }
    }
}

impl QueryPath {
    /// Executes the path and returns the row stream. `batch_size` controls
    /// internal chunking of the materialized rows.
    pub fn execute(self, batch_size: usize) -> Result<RowStream> {
        self.execute_with_cancel(batch_size, CancelFlag::new())
    }

    /// Executes with an externally controlled cancellation flag. The flag
    /// is checked per binding while the joins expand and again per yielded
    /// row, so cancelling stops in-flight work, not just delivery.
    pub fn execute_with_cancel(
        mut self,
        batch_size: usize,
        cancel: CancelFlag,
    ) -> Result<RowStream> {
        let rows = self.materialize(&cancel)?;
        let batch_size = batch_size.max(1);
        let mut batches: VecDeque<Vec<Row>> = VecDeque::new();
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            batches.push_back(rows.by_ref().take(batch_size).collect());
        }
        Ok(RowStream {
            batches,
            current: Vec::new().into_iter(),
            cancel,
        })
    }

    /// Number of rows the path yields (after dedup, offset and limit).
    pub fn count(mut self) -> Result<u64> {
        Ok(self.materialize(&CancelFlag::new())?.len() as u64)
    }

    /// First row, if any.
    pub fn first(mut self) -> Result<Option<Row>> {
        self.limit = Some(1);
        Ok(self.materialize(&CancelFlag::new())?.into_iter().next())
    }

    fn materialize(&mut self, cancel: &CancelFlag) -> Result<Vec<Row>> {
        self.take_error()?;
        if self.steps.is_empty() {
            return Err(ProvenaError::JoinOrder(
                "query path requires at least one step".into(),
            ));
        }
        if self.projections.is_empty() {
            // Default to the whole entity of the final step.
            let last = self
                .steps
                .last()
                .map(|s| s.alias.clone())
                .unwrap_or_default();
            self.projections.push(Projection {
                alias: last,
                field: ProjectedField::Entity,
                cast: None,
            });
        }

        let steps = std::mem::take(&mut self.steps);
        let projections = std::mem::take(&mut self.projections);
        let order = std::mem::take(&mut self.order);
        let limit = self.limit;
        let offset = self.offset;

        let ctx = self.ctx.clone();
        let cancel = cancel.clone();
        ctx.read(move |tx| {
            let mut combos: Vec<Vec<Entity>> = vec![Vec::new()];
            for step in &steps {
                let mut extended = Vec::new();
                for combo in &combos {
                    if cancel.is_cancelled() {
                        return Err(ProvenaError::Cancelled);
                    }
                    let candidates = candidates_for(tx, step.kind, &step.join, &steps, combo)?;
                    for cand in candidates {
                        if eval(&step.filter, &cand.row()) {
                            let mut next = combo.clone();
                            next.push(cand);
                            extended.push(next);
                        }
                    }
                }
                combos = extended;
                if combos.is_empty() {
                    break;
                }
            }

            // Fan-out joins may surface the same physical combination more
            // than once; keep the first occurrence of each.
            if steps.iter().any(|s| s.join.fans_out()) {
                let mut seen: FxHashSet<Vec<(u8, u64)>> = FxHashSet::default();
                combos.retain(|combo| seen.insert(combo.iter().map(Entity::key).collect()));
            }

            if !order.is_empty() {
                sort_combos(&mut combos, &steps, &order);
            }

            let combos: Vec<_> = combos
                .into_iter()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .collect();

            debug!(rows = combos.len(), steps = steps.len(), "query.execute");

            let mut rows = Vec::with_capacity(combos.len());
            for combo in combos {
                if cancel.is_cancelled() {
                    return Err(ProvenaError::Cancelled);
                }
                let mut row = Vec::with_capacity(projections.len());
                for proj in &projections {
                    row.push(project_value(&combo, &steps, proj));
                }
                rows.push(row);
            }
            Ok(rows)
        })
    }
}

fn step_index(steps: &[crate::query::path::Step], alias: &str) -> Option<usize> {
    steps.iter().position(|s| s.alias == alias)
}

fn candidates_for(
    tx: &mut dyn StorageTx,
    kind: EntityKind,
    join: &Join,
    steps: &[crate::query::path::Step],
    combo: &[Entity],
) -> Result<Vec<Entity>> {
    let via_entity = |via: &str| -> Result<&Entity> {
        let idx = step_index(steps, via).ok_or_else(|| {
            ProvenaError::JoinOrder(format!("join references unknown alias '{via}'"))
        })?;
        combo.get(idx).ok_or_else(|| {
            ProvenaError::JoinOrder(format!("alias '{via}' not bound before use"))
        })
    };

    match join {
        Join::None => scan_kind(tx, kind),
        Join::DirectLink { via, direction } => {
            let Entity::Node(via_node) = via_entity(via)? else {
                return Err(ProvenaError::JoinOrder(format!(
                    "direct-link join target '{via}' is not a node"
                )));
            };
            let links = match direction {
                LinkDirection::Outgoing => tx.links_from(via_node.id)?,
                LinkDirection::Incoming => tx.links_into(via_node.id)?,
            };
            match kind {
                EntityKind::Link => Ok(links.into_iter().map(Entity::Link).collect()),
                EntityKind::Node => {
                    let mut seen = FxHashSet::default();
                    let mut out = Vec::new();
                    for link in links {
                        let neighbor = match direction {
                            LinkDirection::Outgoing => link.output_id,
                            LinkDirection::Incoming => link.input_id,
                        };
                        if seen.insert(neighbor) {
                            if let Some(node) = tx.node(neighbor)? {
                                out.push(Entity::Node(node));
                            }
                        }
                    }
                    Ok(out)
                }
                EntityKind::Group => Err(ProvenaError::JoinOrder(
                    "direct-link join cannot produce groups".into(),
                )),
            }
        }
        Join::ClosureAncestor { via } => {
            let Entity::Node(via_node) = via_entity(via)? else {
                return Err(ProvenaError::JoinOrder(format!(
                    "closure join target '{via}' is not a node"
                )));
            };
            let edges = tx.closure_into(via_node.id)?;
            nodes_from_ids(tx, edges.into_iter().map(|e| e.parent_id))
        }
        Join::ClosureDescendant { via } => {
            let Entity::Node(via_node) = via_entity(via)? else {
                return Err(ProvenaError::JoinOrder(format!(
                    "closure join target '{via}' is not a node"
                )));
            };
            let edges = tx.closure_from(via_node.id)?;
            nodes_from_ids(tx, edges.into_iter().map(|e| e.child_id))
        }
        Join::GroupMembership { via } => match (kind, via_entity(via)?) {
            (EntityKind::Node, Entity::Group(group)) => {
                let members = tx.group_members(group.id)?;
                nodes_from_ids(tx, members.into_iter())
            }
            (EntityKind::Group, Entity::Node(node)) => {
                let mut out = Vec::new();
                for gid in tx.groups_of(node.id)? {
                    if let Some(group) = tx.group(gid)? {
                        out.push(Entity::Group(group));
                    }
                }
                Ok(out)
            }
            _ => Err(ProvenaError::JoinOrder(
                "group-membership join requires a node/group pair".into(),
            )),
        },
    }
}

fn scan_kind(tx: &mut dyn StorageTx, kind: EntityKind) -> Result<Vec<Entity>> {
    Ok(match kind {
        EntityKind::Node => tx.scan_nodes()?.into_iter().map(Entity::Node).collect(),
        EntityKind::Link => tx.scan_links()?.into_iter().map(Entity::Link).collect(),
        EntityKind::Group => tx.scan_groups()?.into_iter().map(Entity::Group).collect(),
    })
}

fn nodes_from_ids(
    tx: &mut dyn StorageTx,
    ids: impl Iterator<Item = u64>,
) -> Result<Vec<Entity>> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for id in ids {
        if seen.insert(id) {
            if let Some(node) = tx.node(id)? {
                out.push(Entity::Node(node));
            }
        }
    }
    Ok(out)
}

fn sort_combos(combos: &mut [Vec<Entity>], steps: &[crate::query::path::Step], order: &[OrderBy]) {
    combos.sort_by(|a, b| {
        for key in order {
            let idx = match step_index(steps, &key.alias) {
                Some(idx) => idx,
                None => continue,
            };
            let va = sort_key_value(&a[idx], key);
            let vb = sort_key_value(&b[idx], key);
            let ord = cmp_values(&va, &vb);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn sort_key_value(entity: &Entity, key: &OrderBy) -> QueryValue {
    let value = field_value(entity, &key.field);
    match key.cast {
        Some(tag) => apply_cast(value, tag),
        None => value,
    }
}

fn project_value(
    combo: &[Entity],
    steps: &[crate::query::path::Step],
    proj: &Projection,
) -> QueryValue {
    let Some(idx) = step_index(steps, &proj.alias) else {
        return QueryValue::Null;
    };
    let entity = &combo[idx];
    match &proj.field {
        ProjectedField::Entity => match entity {
            Entity::Node(n) => QueryValue::Node(n.clone()),
            Entity::Link(l) => QueryValue::Link(l.clone()),
            Entity::Group(g) => QueryValue::Group(g.clone()),
        },
        ProjectedField::Path(path) => {
            let value = field_value(entity, path);
            match proj.cast {
                Some(tag) => apply_cast(value, tag),
                None => value,
            }
        }
    }
}

fn field_value(entity: &Entity, path: &FieldPath) -> QueryValue {
    match path {
        FieldPath::Column(col) => column_value(entity, *col),
        FieldPath::Json { column, segments } => {
            match entity.row().json_value(*column, segments) {
                Some(value) => json_to_value(value),
                None => QueryValue::Null,
            }
        }
    }
}

fn column_value(entity: &Entity, col: Column) -> QueryValue {
    match (entity, col) {
        (Entity::Node(n), Column::Id) => QueryValue::Int(n.id as i64),
        (Entity::Node(n), Column::Uuid) => QueryValue::Text(n.uuid.to_string()),
        (Entity::Node(n), Column::TypeTag) => QueryValue::Text(n.type_tag.clone()),
        (Entity::Node(n), Column::Ctime) => QueryValue::Date(n.ctime),
        (Entity::Node(n), Column::Mtime) => QueryValue::Date(n.mtime),
        (Entity::Node(n), Column::Version) => QueryValue::Int(n.version as i64),
        (Entity::Link(l), Column::Id) => QueryValue::Int(l.id as i64),
        (Entity::Link(l), Column::Label) => QueryValue::Text(l.label.clone()),
        (Entity::Link(l), Column::LinkTypeTag) => {
            QueryValue::Text(l.link_type.as_str().to_string())
        }
        (Entity::Group(g), Column::Id) => QueryValue::Int(g.id as i64),
        (Entity::Group(g), Column::Uuid) => QueryValue::Text(g.uuid.to_string()),
        (Entity::Group(g), Column::TypeTag) => QueryValue::Text(g.type_tag.clone()),
        (Entity::Group(g), Column::Label) => QueryValue::Text(g.label.clone()),
        _ => QueryValue::Null,
    }
}

/// Default JSON-to-scalar conversion when no explicit cast tag is given.
fn json_to_value(value: JsonValue) -> QueryValue {
    match value {
        JsonValue::Null => QueryValue::Null,
        JsonValue::Bool(b) => QueryValue::Bool(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                QueryValue::Int(i)
            } else {
                QueryValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => QueryValue::Text(s),
        other => QueryValue::Json(other),
    }
}

/// Explicit cast, best effort; anything unconvertible becomes `Null`.
fn apply_cast(value: QueryValue, tag: CastTag) -> QueryValue {
    match tag {
        CastTag::Json => match value {
            QueryValue::Null => QueryValue::Json(JsonValue::Null),
            QueryValue::Bool(b) => QueryValue::Json(JsonValue::Bool(b)),
            QueryValue::Int(i) => QueryValue::Json(JsonValue::from(i)),
            QueryValue::Float(f) => QueryValue::Json(JsonValue::from(f)),
            QueryValue::Text(s) => QueryValue::Json(JsonValue::String(s)),
            other => other,
        },
        CastTag::Int => match value {
            QueryValue::Int(i) => QueryValue::Int(i),
            QueryValue::Float(f) => QueryValue::Int(f as i64),
            QueryValue::Bool(b) => QueryValue::Int(b as i64),
            QueryValue::Text(s) => s
                .parse::<i64>()
                .map(QueryValue::Int)
                .unwrap_or(QueryValue::Null),
            _ => QueryValue::Null,
        },
        CastTag::Float => match value {
            QueryValue::Float(f) => QueryValue::Float(f),
            QueryValue::Int(i) => QueryValue::Float(i as f64),
            QueryValue::Text(s) => s
                .parse::<f64>()
                .map(QueryValue::Float)
                .unwrap_or(QueryValue::Null),
            _ => QueryValue::Null,
        },
        CastTag::Bool => match value {
            QueryValue::Bool(b) => QueryValue::Bool(b),
            _ => QueryValue::Null,
        },
        CastTag::Text => match value {
            QueryValue::Text(s) => QueryValue::Text(s),
            QueryValue::Int(i) => QueryValue::Text(i.to_string()),
            QueryValue::Float(f) => QueryValue::Text(f.to_string()),
            QueryValue::Bool(b) => QueryValue::Text(b.to_string()),
            QueryValue::Date(dt) => dt
                .format(&Rfc3339)
                .map(QueryValue::Text)
                .unwrap_or(QueryValue::Null),
            QueryValue::Json(j) => QueryValue::Text(j.to_string()),
            _ => QueryValue::Null,
        },
        CastTag::Date => match value {
            QueryValue::Date(dt) => QueryValue::Date(dt),
            QueryValue::Text(s) => parse_datetime(&s)
                .map(QueryValue::Date)
                .unwrap_or(QueryValue::Null),
            _ => QueryValue::Null,
        },
    }
}

/// Total-enough ordering for sort keys: nulls first, then grouped by type.
fn cmp_values(a: &QueryValue, b: &QueryValue) -> Ordering {
    fn rank(v: &QueryValue) -> u8 {
        match v {
            QueryValue::Null => 0,
            QueryValue::Bool(_) => 1,
            QueryValue::Int(_) | QueryValue::Float(_) => 2,
            QueryValue::Text(_) => 3,
            QueryValue::Date(_) => 4,
            QueryValue::Json(_) => 5,
            QueryValue::Node(_) => 6,
            QueryValue::Link(_) => 7,
            QueryValue::Group(_) => 8,
        }
    }
    match (a, b) {
        (QueryValue::Bool(x), QueryValue::Bool(y)) => x.cmp(y),
        (QueryValue::Int(x), QueryValue::Int(y)) => x.cmp(y),
        (QueryValue::Float(x), QueryValue::Float(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (QueryValue::Int(x), QueryValue::Float(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (QueryValue::Float(x), QueryValue::Int(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (QueryValue::Text(x), QueryValue::Text(y)) => x.cmp(y),
        (QueryValue::Date(x), QueryValue::Date(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
