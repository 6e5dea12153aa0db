//! Filter expressions: the boolean AST and its JSON wire format.
//!
//! A filter is a tree of `And`/`Or`/`Not` combinators over atomic
//! comparisons. Each atom addresses either a plain column or a dotted path
//! into one of the JSON bags, carries a typed operator, a literal, and an
//! optional per-atom negation (the `~` prefix, independent of the `Not`
//! combinator). Everything that can be rejected without touching storage is
//! rejected here, at compile time.

use std::mem;

use serde_json::{Map, Value as JsonValue};
use smallvec::SmallVec;

use crate::error::{ProvenaError, Result};

/// Dotted JSON sub-path segments. Short paths dominate, so keep them inline.
pub type JsonSegments = SmallVec<[String; 4]>;

/// Plain (non-JSON) columns addressable in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Numeric row id.
    Id,
    /// Node or group uuid, compared as text.
    Uuid,
    /// Node or group type tag.
    TypeTag,
    /// Creation timestamp.
    Ctime,
    /// Modification timestamp.
    Mtime,
    /// Node mutation counter.
    Version,
    /// Link or group label.
    Label,
    /// Link type tag.
    LinkTypeTag,
}

/// Which JSON bag a sub-path traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BagColumn {
    /// The `attributes` bag.
    Attributes,
    /// The `extras` bag.
    Extras,
}

/// Target of an atomic comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPath {
    /// A plain column.
    Column(Column),
    /// A dotted path into a JSON bag; empty segments address the whole bag.
    Json {
        /// The bag being traversed.
        column: BagColumn,
        /// Path segments below the bag.
        segments: JsonSegments,
    },
}

impl FieldPath {
    /// Parses a dotted path string (`"id"`, `"attributes.a.b"`, ...).
    pub fn parse(path: &str) -> Result<FieldPath> {
        let mut parts = path.split('.');
        let head = parts.next().unwrap_or_default();
        let rest: JsonSegments = parts.map(str::to_owned).collect();
        let plain = |col| {
            if rest.is_empty() {
                Ok(FieldPath::Column(col))
            } else {
                Err(ProvenaError::InvalidFilter(format!(
                    "column '{head}' has no sub-paths (got '{path}')"
                )))
            }
        };
        match head {
            "id" => plain(Column::Id),
            "uuid" => plain(Column::Uuid),
            "type_tag" | "node_type" => plain(Column::TypeTag),
            "ctime" => plain(Column::Ctime),
            "mtime" => plain(Column::Mtime),
            "version" => plain(Column::Version),
            "label" => plain(Column::Label),
            "link_type" => plain(Column::LinkTypeTag),
            "attributes" => Ok(FieldPath::Json {
                column: BagColumn::Attributes,
                segments: rest,
            }),
            "extras" => Ok(FieldPath::Json {
                column: BagColumn::Extras,
                segments: rest,
            }),
            _ => Err(ProvenaError::InvalidFilter(format!(
                "unknown column '{head}' in path '{path}'"
            ))),
        }
    }

    fn is_json(&self) -> bool {
        matches!(self, FieldPath::Json { .. })
    }
}

/// Comparison operators available in filter atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equality after type-aware cast.
    Eq,
    /// Strictly greater.
    Gt,
    /// Strictly smaller.
    Lt,
    /// Greater or equal.
    Ge,
    /// Smaller or equal.
    Le,
    /// Membership in a homogeneous literal list.
    In,
    /// SQL-style wildcard match, case sensitive.
    Like,
    /// SQL-style wildcard match, case insensitive.
    Ilike,
    /// JSON containment: the stored array/object holds all elements/keys
    /// of the literal.
    Contains,
    /// The stored object has the literal key.
    HasKey,
    /// Stored array length equals the literal.
    OfLength,
    /// Stored array length is greater than the literal.
    Longer,
    /// Stored array length is smaller than the literal.
    Shorter,
}

impl CompareOp {
    /// Parses an operator string without the `~` prefix.
    pub fn parse(op: &str) -> Result<CompareOp> {
        Ok(match op {
            "==" => CompareOp::Eq,
            ">" => CompareOp::Gt,
            "<" => CompareOp::Lt,
            ">=" => CompareOp::Ge,
            "<=" => CompareOp::Le,
            "in" => CompareOp::In,
            "like" => CompareOp::Like,
            "ilike" => CompareOp::Ilike,
            "contains" => CompareOp::Contains,
            "has_key" => CompareOp::HasKey,
            "of_length" => CompareOp::OfLength,
            "longer" => CompareOp::Longer,
            "shorter" => CompareOp::Shorter,
            _ => {
                return Err(ProvenaError::InvalidFilter(format!(
                    "unknown operator '{op}'"
                )))
            }
        })
    }

    fn json_only(self) -> bool {
        matches!(
            self,
            CompareOp::Contains
                | CompareOp::HasKey
                | CompareOp::OfLength
                | CompareOp::Longer
                | CompareOp::Shorter
        )
    }
}

/// One atomic comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Column or JSON sub-path being tested.
    pub path: FieldPath,
    /// Operator.
    pub op: CompareOp,
    /// Comparison literal; its runtime type picks the cast rule.
    pub value: JsonValue,
    /// Per-atom negation (`~` prefix on the operator).
    pub negated: bool,
}

impl Comparison {
    /// Builds a validated atom.
    pub fn new(path: FieldPath, op: CompareOp, value: JsonValue, negated: bool) -> Result<Self> {
        if op.json_only() && !path.is_json() {
            return Err(ProvenaError::InvalidFilter(format!(
                "operator {op:?} only applies to JSON paths"
            )));
        }
        match op {
            CompareOp::In => {
                let list = value.as_array().ok_or_else(|| {
                    ProvenaError::InvalidFilter("'in' requires a list literal".into())
                })?;
                if list.is_empty() && path.is_json() {
                    return Err(ProvenaError::InvalidFilter(
                        "'in' against a JSON path requires a non-empty list".into(),
                    ));
                }
                if let Some(first) = list.first() {
                    let tag = mem::discriminant(first);
                    if !list.iter().all(|v| mem::discriminant(v) == tag) {
                        return Err(ProvenaError::InvalidFilter(
                            "'in' requires all list elements to share one type".into(),
                        ));
                    }
                }
            }
            CompareOp::Like | CompareOp::Ilike => {
                if !value.is_string() {
                    return Err(ProvenaError::InvalidFilter(
                        "'like'/'ilike' require a string pattern".into(),
                    ));
                }
            }
            CompareOp::Contains => {
                if !value.is_array() && !value.is_object() {
                    return Err(ProvenaError::InvalidFilter(
                        "'contains' requires a list or object literal".into(),
                    ));
                }
            }
            CompareOp::HasKey => {
                if !value.is_string() {
                    return Err(ProvenaError::InvalidFilter(
                        "'has_key' requires a string literal".into(),
                    ));
                }
            }
            CompareOp::OfLength | CompareOp::Longer | CompareOp::Shorter => {
                if !value.is_i64() && !value.is_u64() {
                    return Err(ProvenaError::InvalidFilter(
                        "length operators require an integer literal".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(Self {
            path,
            op,
            value,
            negated,
        })
    }
}

/// Boolean filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// All children must hold; vacuously true when empty.
    And(Vec<FilterExpr>),
    /// At least one child must hold; vacuously false when empty.
    Or(Vec<FilterExpr>),
    /// Negation of the child.
    Not(Box<FilterExpr>),
    /// An atomic comparison.
    Cmp(Comparison),
}

impl FilterExpr {
    /// The filter that matches everything.
    pub fn all() -> FilterExpr {
        FilterExpr::And(Vec::new())
    }

    /// Convenience constructor for a single comparison.
    pub fn cmp(path: &str, op: CompareOp, value: impl Into<JsonValue>) -> Result<FilterExpr> {
        Ok(FilterExpr::Cmp(Comparison::new(
            FieldPath::parse(path)?,
            op,
            value.into(),
            false,
        )?))
    }

    /// Parses the JSON wire format.
    ///
    /// An object maps `"and" | "or" | "~and" | "~or"` to lists of
    /// sub-specifications, or a dotted path to either a literal (implicit
    /// `==`) or an object of operator:value pairs. Several pairs on one
    /// path AND together; operators may carry a `~` prefix.
    pub fn parse(spec: &JsonValue) -> Result<FilterExpr> {
        let obj = spec.as_object().ok_or_else(|| {
            ProvenaError::InvalidFilter("filter specification must be an object".into())
        })?;
        let mut exprs = Vec::with_capacity(obj.len());
        for (key, val) in obj {
            exprs.push(match key.as_str() {
                "and" => FilterExpr::And(Self::parse_list(val)?),
                "or" => FilterExpr::Or(Self::parse_list(val)?),
                "~and" => FilterExpr::Not(Box::new(FilterExpr::And(Self::parse_list(val)?))),
                "~or" => FilterExpr::Not(Box::new(FilterExpr::Or(Self::parse_list(val)?))),
                path => Self::parse_path_clause(path, val)?,
            });
        }
        Ok(Self::flatten_and(exprs))
    }

    fn parse_list(val: &JsonValue) -> Result<Vec<FilterExpr>> {
        let list = val.as_array().ok_or_else(|| {
            ProvenaError::InvalidFilter("combinator requires a list of sub-filters".into())
        })?;
        list.iter().map(Self::parse).collect()
    }

    fn parse_path_clause(path: &str, val: &JsonValue) -> Result<FilterExpr> {
        let field = FieldPath::parse(path)?;
        match val {
            JsonValue::Object(ops) => Self::parse_op_object(&field, ops),
            literal => Ok(FilterExpr::Cmp(Comparison::new(
                field.clone(),
                CompareOp::Eq,
                literal.clone(),
                false,
            )?)),
        }
    }

    fn parse_op_object(field: &FieldPath, ops: &Map<String, JsonValue>) -> Result<FilterExpr> {
        let mut exprs = Vec::with_capacity(ops.len());
        for (op_key, op_val) in ops {
            let (negated, bare) = match op_key.strip_prefix('~') {
                Some(rest) => (true, rest),
                None => (false, op_key.as_str()),
            };
            // "and"/"or" as operator values chain several conditions on the
            // same path without repeating it.
            if bare == "and" || bare == "or" {
                let list = op_val.as_array().ok_or_else(|| {
                    ProvenaError::InvalidFilter(format!(
                        "'{bare}' on a path requires a list of operator objects"
                    ))
                })?;
                let mut subs = Vec::with_capacity(list.len());
                for item in list {
                    let sub_ops = item.as_object().ok_or_else(|| {
                        ProvenaError::InvalidFilter(format!(
                            "'{bare}' list entries must be operator objects"
                        ))
                    })?;
                    subs.push(Self::parse_op_object(field, sub_ops)?);
                }
                let combined = if bare == "and" {
                    FilterExpr::And(subs)
                } else {
                    FilterExpr::Or(subs)
                };
                exprs.push(if negated {
                    FilterExpr::Not(Box::new(combined))
                } else {
                    combined
                });
                continue;
            }
            exprs.push(FilterExpr::Cmp(Comparison::new(
                field.clone(),
                CompareOp::parse(bare)?,
                op_val.clone(),
                negated,
            )?));
        }
        Ok(Self::flatten_and(exprs))
    }

    fn flatten_and(mut exprs: Vec<FilterExpr>) -> FilterExpr {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            FilterExpr::And(exprs)
        }
    }
}
