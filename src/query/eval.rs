//! Filter evaluation over stored rows.
//!
//! Atoms are evaluated with a type gate in front of the comparison: the
//! literal's runtime type picks the test (boolean, numeric, text, datetime
//! or structural), and a stored value of a different dynamic type makes the
//! atom false without ever raising. Queries stay robust over heterogeneous
//! attribute bags.

use serde_json::Value as JsonValue;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::model::{GroupRecord, LinkRecord, NodeRecord};
use crate::query::filter::{BagColumn, Column, CompareOp, Comparison, FieldPath, FilterExpr};

/// Borrowed view of any entity a filter can run against.
#[derive(Debug, Clone, Copy)]
pub enum EntityRow<'a> {
    /// A node row.
    Node(&'a NodeRecord),
    /// A link row.
    Link(&'a LinkRecord),
    /// A group row.
    Group(&'a GroupRecord),
}

/// Typed value of a plain column.
enum ColumnValue {
    Int(i64),
    Text(String),
    DateTime(OffsetDateTime),
}

impl EntityRow<'_> {
    fn column(&self, col: Column) -> Option<ColumnValue> {
        match (self, col) {
            (EntityRow::Node(n), Column::Id) => Some(ColumnValue::Int(n.id as i64)),
            (EntityRow::Node(n), Column::Uuid) => Some(ColumnValue::Text(n.uuid.to_string())),
            (EntityRow::Node(n), Column::TypeTag) => Some(ColumnValue::Text(n.type_tag.clone())),
            (EntityRow::Node(n), Column::Ctime) => Some(ColumnValue::DateTime(n.ctime)),
            (EntityRow::Node(n), Column::Mtime) => Some(ColumnValue::DateTime(n.mtime)),
            (EntityRow::Node(n), Column::Version) => Some(ColumnValue::Int(n.version as i64)),
            (EntityRow::Link(l), Column::Id) => Some(ColumnValue::Int(l.id as i64)),
            (EntityRow::Link(l), Column::Label) => Some(ColumnValue::Text(l.label.clone())),
            (EntityRow::Link(l), Column::LinkTypeTag) => {
                Some(ColumnValue::Text(l.link_type.as_str().to_string()))
            }
            (EntityRow::Group(g), Column::Id) => Some(ColumnValue::Int(g.id as i64)),
            (EntityRow::Group(g), Column::Uuid) => Some(ColumnValue::Text(g.uuid.to_string())),
            (EntityRow::Group(g), Column::TypeTag) => Some(ColumnValue::Text(g.type_tag.clone())),
            (EntityRow::Group(g), Column::Label) => Some(ColumnValue::Text(g.label.clone())),
            _ => None,
        }
    }

    /// Resolves a JSON sub-path; only node rows carry bags.
    pub fn json_value(&self, column: BagColumn, segments: &[String]) -> Option<JsonValue> {
        let EntityRow::Node(node) = self else {
            return None;
        };
        let bag = match column {
            BagColumn::Attributes => &node.attributes,
            BagColumn::Extras => &node.extras,
        };
        let mut current = JsonValue::Object(bag.clone());
        for seg in segments {
            current = match current {
                JsonValue::Object(mut map) => map.remove(seg)?,
                JsonValue::Array(mut arr) => {
                    let idx: usize = seg.parse().ok()?;
                    if idx >= arr.len() {
                        return None;
                    }
                    arr.swap_remove(idx)
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Evaluates a filter tree against one row, short-circuiting combinators.
pub fn eval(expr: &FilterExpr, row: &EntityRow<'_>) -> bool {
    match expr {
        FilterExpr::And(subs) => subs.iter().all(|e| eval(e, row)),
        FilterExpr::Or(subs) => subs.iter().any(|e| eval(e, row)),
        FilterExpr::Not(inner) => !eval(inner, row),
        FilterExpr::Cmp(cmp) => eval_cmp(cmp, row),
    }
}

fn eval_cmp(cmp: &Comparison, row: &EntityRow<'_>) -> bool {
    let outcome = match &cmp.path {
        FieldPath::Column(col) => eval_column(*col, cmp, row),
        FieldPath::Json { column, segments } => {
            let stored = row.json_value(*column, segments);
            stored.and_then(|stored| eval_json(&stored, cmp))
        }
    };
    // A missing value or failed type gate is false whether or not the atom
    // carries `~`: the comparison itself never ran.
    match outcome {
        Some(result) => result != cmp.negated,
        None => false,
    }
}

fn eval_column(col: Column, cmp: &Comparison, row: &EntityRow<'_>) -> Option<bool> {
    let stored = row.column(col)?;
    match cmp.op {
        CompareOp::In => {
            let list = cmp.value.as_array()?;
            Some(
                list.iter()
                    .any(|lit| column_cmp(&stored, lit) == Some(std::cmp::Ordering::Equal)),
            )
        }
        CompareOp::Like | CompareOp::Ilike => {
            let ColumnValue::Text(text) = &stored else {
                return None;
            };
            let pattern = cmp.value.as_str()?;
            Some(like_match(pattern, text, cmp.op == CompareOp::Ilike))
        }
        CompareOp::Eq | CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le => {
            let ord = column_cmp(&stored, &cmp.value)?;
            Some(ord_matches(cmp.op, ord))
        }
        // JSON-only operators are rejected at compile time.
        _ => None,
    }
}

fn column_cmp(stored: &ColumnValue, literal: &JsonValue) -> Option<std::cmp::Ordering> {
    match stored {
        ColumnValue::Int(i) => {
            let lit = literal.as_f64()?;
            (*i as f64).partial_cmp(&lit)
        }
        ColumnValue::Text(s) => {
            let lit = literal.as_str()?;
            Some(s.as_str().cmp(lit))
        }
        ColumnValue::DateTime(dt) => {
            let lit = parse_datetime(literal.as_str()?)?;
            Some(dt.cmp(&lit))
        }
    }
}

fn eval_json(stored: &JsonValue, cmp: &Comparison) -> Option<bool> {
    match cmp.op {
        CompareOp::In => {
            let list = cmp.value.as_array()?;
            Some(list.iter().any(|lit| json_eq_with_cast(stored, lit) == Some(true)))
        }
        CompareOp::Like | CompareOp::Ilike => {
            let text = stored.as_str()?;
            let pattern = cmp.value.as_str()?;
            Some(like_match(pattern, text, cmp.op == CompareOp::Ilike))
        }
        CompareOp::Contains => Some(json_contains(stored, &cmp.value)),
        CompareOp::HasKey => {
            let obj = stored.as_object()?;
            Some(obj.contains_key(cmp.value.as_str()?))
        }
        CompareOp::OfLength => Some(stored.as_array()?.len() as i64 == cmp.value.as_i64()?),
        CompareOp::Longer => Some(stored.as_array()?.len() as i64 > cmp.value.as_i64()?),
        CompareOp::Shorter => Some((stored.as_array()?.len() as i64) < cmp.value.as_i64()?),
        CompareOp::Eq | CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le => {
            let ord = json_cmp_with_cast(stored, &cmp.value)?;
            Some(ord_matches(cmp.op, ord))
        }
    }
}

fn ord_matches(op: CompareOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CompareOp::Eq => ord == Equal,
        CompareOp::Gt => ord == Greater,
        CompareOp::Lt => ord == Less,
        CompareOp::Ge => ord != Less,
        CompareOp::Le => ord != Greater,
        _ => false,
    }
}

/// Equality under the cast rules; `None` when the type gate fails.
fn json_eq_with_cast(stored: &JsonValue, literal: &JsonValue) -> Option<bool> {
    match json_cmp_with_cast(stored, literal) {
        Some(ord) => Some(ord == std::cmp::Ordering::Equal),
        // Structural types fall back to plain equality for `in` lists.
        None if stored == literal => Some(true),
        None => None,
    }
}

/// Ordering comparison driven by the literal's runtime type. `None` means
/// the stored value's dynamic type does not match the inferred test.
fn json_cmp_with_cast(stored: &JsonValue, literal: &JsonValue) -> Option<std::cmp::Ordering> {
    match literal {
        JsonValue::Bool(lit) => {
            let b = stored.as_bool()?;
            Some(b.cmp(lit))
        }
        JsonValue::Number(lit) => {
            let s = stored.as_f64()?;
            s.partial_cmp(&lit.as_f64()?)
        }
        JsonValue::String(lit) => {
            let s = stored.as_str()?;
            // An ISO-8601 looking literal switches to the datetime test.
            match parse_datetime(lit) {
                Some(lit_dt) => {
                    let stored_dt = parse_datetime(s)?;
                    Some(stored_dt.cmp(&lit_dt))
                }
                None => Some(s.cmp(lit.as_str())),
            }
        }
        JsonValue::Null => {
            if stored.is_null() {
                Some(std::cmp::Ordering::Equal)
            } else {
                None
            }
        }
        // Structural literals only support equality.
        JsonValue::Array(_) | JsonValue::Object(_) => {
            if stored == literal {
                Some(std::cmp::Ordering::Equal)
            } else {
                None
            }
        }
    }
}

/// JSONB-style containment: every element/entry of `needle` is contained
/// in `haystack`, recursively.
fn json_contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    match (haystack, needle) {
        (JsonValue::Object(h), JsonValue::Object(n)) => n
            .iter()
            .all(|(k, v)| h.get(k).map(|hv| json_contains(hv, v)).unwrap_or(false)),
        (JsonValue::Array(h), JsonValue::Array(n)) => {
            n.iter().all(|nv| h.iter().any(|hv| json_contains(hv, nv)))
        }
        (h, n) => h == n,
    }
}

/// SQL `LIKE` wildcard matching with `%`, `_` and backslash escapes.
pub(crate) fn like_match(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    let (pattern, text) = if case_insensitive {
        (pattern.to_lowercase(), text.to_lowercase())
    } else {
        (pattern.to_string(), text.to_string())
    };
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    // Iterative matcher with single-level backtracking on the last `%`.
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star_p, mut star_t) = (usize::MAX, 0usize);
    while t < txt.len() {
        if p < pat.len() {
            match pat[p] {
                '%' => {
                    star_p = p;
                    star_t = t;
                    p += 1;
                    continue;
                }
                '_' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '\\' if p + 1 < pat.len() => {
                    if pat[p + 1] == txt[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c if c == txt[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }
        if star_p != usize::MAX {
            star_t += 1;
            p = star_p + 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '%' {
        p += 1;
    }
    p == pat.len()
}

/// Parses datetime literals: RFC-3339, general ISO-8601, a naive
/// `YYYY-MM-DDTHH:MM:SS`, or a bare date assumed midnight UTC.
pub(crate) fn parse_datetime(s: &str) -> Option<OffsetDateTime> {
    // Cheap shape check so ordinary strings skip the parser entirely.
    let bytes = s.as_bytes();
    if bytes.len() < 10
        || !bytes[..4].iter().all(u8::is_ascii_digit)
        || bytes[4] != b'-'
        || bytes[7] != b'-'
    {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(dt);
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Iso8601::DEFAULT) {
        return Some(dt);
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(pdt) = PrimitiveDateTime::parse(s, &naive) {
        return Some(pdt.assume_utc());
    }
    let date_only = format_description!("[year]-[month]-[day]");
    if let Ok(d) = Date::parse(s, &date_only) {
        return Some(d.midnight().assume_utc());
    }
    None
}
