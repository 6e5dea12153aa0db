//! Multi-hop query paths.
//!
//! A path is an ordered list of steps, each naming an entity kind, an
//! alias, a join back to an earlier alias, and a filter. Construction is
//! fluent in the builder style used across the crate: the first validation
//! failure is recorded and surfaced when the path is executed, so chains
//! read linearly.

use serde_json::Value as JsonValue;

use crate::error::{ProvenaError, Result};
use crate::query::filter::{FieldPath, FilterExpr};
use crate::storage::StorageContext;

/// Entity classes addressable by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Graph nodes.
    Node,
    /// Links between nodes.
    Link,
    /// Groups of nodes.
    Group,
}

/// Direction of a direct-link join relative to the `via` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// Follow links leaving the `via` node (its outputs).
    Outgoing,
    /// Follow links entering the `via` node (its inputs).
    Incoming,
}

/// Join relationship of a step to a previously declared alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Join {
    /// No join: the step ranges over the whole entity class.
    None,
    /// One link away from the `via` node.
    DirectLink {
        /// Earlier alias to join against.
        via: String,
        /// Which side of the `via` node to follow.
        direction: LinkDirection,
    },
    /// Transitive ancestors of the `via` node.
    ClosureAncestor {
        /// Earlier alias to join against.
        via: String,
    },
    /// Transitive descendants of the `via` node.
    ClosureDescendant {
        /// Earlier alias to join against.
        via: String,
    },
    /// Group membership, in either direction depending on the step kinds.
    GroupMembership {
        /// Earlier alias to join against.
        via: String,
    },
}

impl Join {
    pub(crate) fn via(&self) -> Option<&str> {
        match self {
            Join::None => None,
            Join::DirectLink { via, .. }
            | Join::ClosureAncestor { via }
            | Join::ClosureDescendant { via }
            | Join::GroupMembership { via } => Some(via),
        }
    }

    /// Whether this join can produce several rows per `via` entity, which
    /// forces deduplication of the result set.
    pub(crate) fn fans_out(&self) -> bool {
        !matches!(self, Join::None)
    }
}

/// Explicit cast applied to a projected scalar, overriding type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastTag {
    /// Integer.
    Int,
    /// Double-precision float.
    Float,
    /// Boolean.
    Bool,
    /// Text.
    Text,
    /// Raw JSON, no conversion.
    Json,
    /// Datetime parsed from an ISO-8601 string.
    Date,
}

impl CastTag {
    /// Parses the wire tag.
    pub fn parse(tag: &str) -> Result<CastTag> {
        Ok(match tag {
            "int" => CastTag::Int,
            "float" => CastTag::Float,
            "bool" => CastTag::Bool,
            "text" => CastTag::Text,
            "json" => CastTag::Json,
            "date" => CastTag::Date,
            _ => {
                return Err(ProvenaError::InvalidFilter(format!(
                    "unknown cast tag '{tag}'"
                )))
            }
        })
    }
}

/// What a projection slot yields.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectedField {
    /// `"*"`: the whole entity, converted to its domain record.
    Entity,
    /// A column or JSON sub-path, cast to a scalar.
    Path(FieldPath),
}

/// One output slot of the result rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Step alias the slot reads from.
    pub alias: String,
    /// Field or sub-path to materialize.
    pub field: ProjectedField,
    /// Optional explicit cast.
    pub cast: Option<CastTag>,
}

/// Sort key for result ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Step alias the key reads from.
    pub alias: String,
    /// Column or JSON sub-path to sort on.
    pub field: FieldPath,
    /// Descending instead of ascending.
    pub descending: bool,
    /// Optional explicit cast applied before comparison.
    pub cast: Option<CastTag>,
}

#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub kind: EntityKind,
    pub alias: String,
    pub join: Join,
    pub filter: FilterExpr,
}

/// Ordered composition of joined entity-selection steps.
pub struct QueryPath {
    pub(crate) ctx: StorageContext,
    pub(crate) steps: Vec<Step>,
    pub(crate) projections: Vec<Projection>,
    pub(crate) order: Vec<OrderBy>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: usize,
    pub(crate) error: Option<ProvenaError>,
}

impl QueryPath {
    /// Starts an empty path over the given storage context.
    pub fn new(ctx: StorageContext) -> Self {
        Self {
            ctx,
            steps: Vec::new(),
            projections: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: 0,
            error: None,
        }
    }

    /// Appends a step. Join targets must reference an alias declared by an
    /// earlier step, and the entity-kind/join combination must be legal.
    pub fn append(
        mut self,
        kind: EntityKind,
        alias: impl Into<String>,
        filter: FilterExpr,
        join: Join,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        let alias = alias.into();
        if self.steps.iter().any(|s| s.alias == alias) {
            self.record(ProvenaError::JoinOrder(format!(
                "alias '{alias}' declared twice"
            )));
            return self;
        }
        if let Some(via) = join.via() {
            let Some(target) = self.steps.iter().find(|s| s.alias == via) else {
                self.record(ProvenaError::JoinOrder(format!(
                    "step '{alias}' joins against undeclared alias '{via}'"
                )));
                return self;
            };
            if let Err(err) = check_join_legality(kind, &join, target.kind, &alias) {
                self.record(err);
                return self;
            }
        }
        self.steps.push(Step {
            kind,
            alias,
            join,
            filter,
        });
        self
    }

    /// Appends a step with a filter given in the JSON wire format.
    pub fn append_spec(
        mut self,
        kind: EntityKind,
        alias: impl Into<String>,
        filter_spec: &JsonValue,
        join: Join,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        match FilterExpr::parse(filter_spec) {
            Ok(filter) => self.append(kind, alias, filter, join),
            Err(err) => {
                self.record(err);
                self
            }
        }
    }

    /// Adds a projection slot: `"*"` for the whole entity, or a dotted
    /// column/JSON path.
    pub fn project(mut self, alias: impl Into<String>, field: &str) -> Self {
        self.push_projection(alias.into(), field, None);
        self
    }

    /// Adds a projection slot with an explicit cast tag.
    pub fn project_cast(mut self, alias: impl Into<String>, field: &str, cast: &str) -> Self {
        match CastTag::parse(cast) {
            Ok(tag) => self.push_projection(alias.into(), field, Some(tag)),
            Err(err) => self.record(err),
        }
        self
    }

    /// Adds an ascending sort key.
    pub fn order_by(mut self, alias: impl Into<String>, field: &str) -> Self {
        self.push_order(alias.into(), field, false, None);
        self
    }

    /// Adds a descending sort key.
    pub fn order_by_desc(mut self, alias: impl Into<String>, field: &str) -> Self {
        self.push_order(alias.into(), field, true, None);
        self
    }

    /// Adds a sort key with an explicit cast tag applied before comparison,
    /// overriding the stored value's type inference.
    pub fn order_by_cast(
        mut self,
        alias: impl Into<String>,
        field: &str,
        cast: &str,
        descending: bool,
    ) -> Self {
        match CastTag::parse(cast) {
            Ok(tag) => self.push_order(alias.into(), field, descending, Some(tag)),
            Err(err) => self.record(err),
        }
        self
    }

    /// Caps the number of returned rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` rows.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn push_projection(&mut self, alias: String, field: &str, cast: Option<CastTag>) {
        if self.error.is_some() {
            return;
        }
        if !self.steps.iter().any(|s| s.alias == alias) {
            self.record(ProvenaError::JoinOrder(format!(
                "projection references undeclared alias '{alias}'"
            )));
            return;
        }
        let field = if field == "*" {
            ProjectedField::Entity
        } else {
            match FieldPath::parse(field) {
                Ok(path) => ProjectedField::Path(path),
                Err(err) => {
                    self.record(err);
                    return;
                }
            }
        };
        self.projections.push(Projection { alias, field, cast });
    }

    fn push_order(&mut self, alias: String, field: &str, descending: bool, cast: Option<CastTag>) {
        if self.error.is_some() {
            return;
        }
        if !self.steps.iter().any(|s| s.alias == alias) {
            self.record(ProvenaError::JoinOrder(format!(
                "order key references undeclared alias '{alias}'"
            )));
            return;
        }
        match FieldPath::parse(field) {
            Ok(path) => self.order.push(OrderBy {
                alias,
                field: path,
                descending,
                cast,
            }),
            Err(err) => self.record(err),
        }
    }

    fn record(&mut self, err: ProvenaError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Surfaces the first recorded construction error, if any.
    pub(crate) fn take_error(&mut self) -> Result<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn check_join_legality(
    kind: EntityKind,
    join: &Join,
    target_kind: EntityKind,
    alias: &str,
) -> Result<()> {
    let ok = match join {
        Join::None => true,
        Join::DirectLink { .. } => {
            target_kind == EntityKind::Node
                && matches!(kind, EntityKind::Node | EntityKind::Link)
        }
        Join::ClosureAncestor { .. } | Join::ClosureDescendant { .. } => {
            kind == EntityKind::Node && target_kind == EntityKind::Node
        }
        Join::GroupMembership { .. } => matches!(
            (kind, target_kind),
            (EntityKind::Node, EntityKind::Group) | (EntityKind::Group, EntityKind::Node)
        ),
    };
    if ok {
        Ok(())
    } else {
        Err(ProvenaError::JoinOrder(format!(
            "step '{alias}': join {join:?} is not legal from {kind:?} to {target_kind:?}"
        )))
    }
}
