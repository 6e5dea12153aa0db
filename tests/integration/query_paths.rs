#![allow(missing_docs)]

//! Multi-hop query paths over a small provenance graph: joins, projections,
//! ordering, pagination and cancellation.

use std::sync::Arc;

use serde_json::json;
use provena::db::{NodeDraft, ProvenaDb};
use provena::model::LinkType;
use provena::query::{CancelFlag, EntityKind, FilterExpr, Join, LinkDirection, QueryValue};
use provena::storage::MemoryBackend;

/// calc consumes two ints and creates one result; a second calc consumes
/// the result downstream.
struct Fixture {
    db: ProvenaDb,
    x: u64,
    y: u64,
    calc: u64,
    result: u64,
    calc2: u64,
}

fn fixture() -> Fixture {
    let db = ProvenaDb::open(Arc::new(MemoryBackend::new()));
    let x = db
        .persist_node(NodeDraft::new("data.core.int").attribute("value", 2))
        .unwrap();
    let y = db
        .persist_node(NodeDraft::new("data.core.int").attribute("value", 3))
        .unwrap();
    let calc = db
        .persist_node(NodeDraft::new("process.calc").attribute("function", "add"))
        .unwrap();
    let result = db
        .persist_node(NodeDraft::new("data.core.int").attribute("value", 5))
        .unwrap();
    let calc2 = db
        .persist_node(NodeDraft::new("process.calc").attribute("function", "double"))
        .unwrap();
    db.add_link(x, calc, LinkType::InputCalc, "x").unwrap();
    db.add_link(y, calc, LinkType::InputCalc, "y").unwrap();
    db.add_link(calc, result, LinkType::Create, "result").unwrap();
    db.add_link(result, calc2, LinkType::InputCalc, "n").unwrap();
    Fixture {
        db,
        x,
        y,
        calc,
        result,
        calc2,
    }
}

fn ids(rows: Vec<Vec<QueryValue>>) -> Vec<i64> {
    let mut out: Vec<i64> = rows
        .into_iter()
        .map(|mut row| match row.remove(0) {
            QueryValue::Int(id) => id,
            other => panic!("expected id, got {other:?}"),
        })
        .collect();
    out.sort_unstable();
    out
}

fn collect(path: provena::QueryPath) -> Vec<Vec<QueryValue>> {
    path.execute(8).unwrap().map(|r| r.unwrap()).collect()
}

#[test]
fn direct_link_join_finds_calc_inputs() {
    let f = fixture();
    let rows = collect(
        f.db.query()
            .append_spec(
                EntityKind::Node,
                "calc",
                &json!({"attributes.function": "add"}),
                Join::None,
            )
            .append(
                EntityKind::Node,
                "input",
                FilterExpr::all(),
                Join::DirectLink {
                    via: "calc".into(),
                    direction: LinkDirection::Incoming,
                },
            )
            .project("input", "id"),
    );
    assert_eq!(ids(rows), vec![f.x as i64, f.y as i64]);
}

#[test]
fn link_step_projects_labels() {
    let f = fixture();
    let mut labels: Vec<String> = collect(
        f.db.query()
            .append_spec(EntityKind::Node, "calc", &json!({"id": f.calc}), Join::None)
            .append(
                EntityKind::Link,
                "in_link",
                FilterExpr::all(),
                Join::DirectLink {
                    via: "calc".into(),
                    direction: LinkDirection::Incoming,
                },
            )
            .project("in_link", "label"),
    )
    .into_iter()
    .map(|mut row| match row.remove(0) {
        QueryValue::Text(s) => s,
        other => panic!("expected label, got {other:?}"),
    })
    .collect();
    labels.sort();
    assert_eq!(labels, vec!["x", "y"]);
}

#[test]
fn closure_descendant_join_spans_hops() {
    let f = fixture();
    let rows = collect(
        f.db.query()
            .append_spec(EntityKind::Node, "src", &json!({"id": f.x}), Join::None)
            .append(
                EntityKind::Node,
                "desc",
                FilterExpr::all(),
                Join::ClosureDescendant { via: "src".into() },
            )
            .project("desc", "id"),
    );
    assert_eq!(
        ids(rows),
        vec![f.calc as i64, f.result as i64, f.calc2 as i64]
    );
}

#[test]
fn closure_ancestor_join_with_filter() {
    let f = fixture();
    // Ancestors of calc2 that are plain data nodes.
    let rows = collect(
        f.db.query()
            .append_spec(EntityKind::Node, "sink", &json!({"id": f.calc2}), Join::None)
            .append_spec(
                EntityKind::Node,
                "anc",
                &json!({"type_tag": {"like": "data.%"}}),
                Join::ClosureAncestor { via: "sink".into() },
            )
            .project("anc", "id"),
    );
    assert_eq!(ids(rows), vec![f.x as i64, f.y as i64, f.result as i64]);
}

#[test]
fn group_membership_join() {
    let f = fixture();
    let group = f.db.create_group("inputs", "core").unwrap();
    f.db.add_group_member(group, f.x).unwrap();
    f.db.add_group_member(group, f.y).unwrap();

    let rows = collect(
        f.db.query()
            .append_spec(EntityKind::Group, "g", &json!({"label": "inputs"}), Join::None)
            .append(
                EntityKind::Node,
                "member",
                FilterExpr::all(),
                Join::GroupMembership { via: "g".into() },
            )
            .project("member", "id"),
    );
    assert_eq!(ids(rows), vec![f.x as i64, f.y as i64]);
}

#[test]
fn projection_casts() {
    let f = fixture();
    let rows = collect(
        f.db.query()
            .append_spec(EntityKind::Node, "n", &json!({"id": f.x}), Join::None)
            .project("n", "attributes.value")
            .project_cast("n", "attributes.value", "float")
            .project_cast("n", "attributes.value", "text")
            .project_cast("n", "attributes.missing", "int"),
    );
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row[0], QueryValue::Int(2));
    assert_eq!(row[1], QueryValue::Float(2.0));
    assert_eq!(row[2], QueryValue::Text("2".into()));
    assert_eq!(row[3], QueryValue::Null);
}

#[test]
fn default_projection_yields_final_entity() {
    let f = fixture();
    let rows = collect(
        f.db.query()
            .append_spec(EntityKind::Node, "n", &json!({"id": f.calc}), Join::None),
    );
    assert_eq!(rows.len(), 1);
    match &rows[0][0] {
        QueryValue::Node(rec) => assert_eq!(rec.id, f.calc),
        other => panic!("expected whole node, got {other:?}"),
    }
}

#[test]
fn order_limit_offset_and_count() {
    let f = fixture();
    let all = f
        .db
        .query()
        .append_spec(EntityKind::Node, "n", &json!({"type_tag": "data.core.int"}), Join::None)
        .project("n", "attributes.value")
        .order_by_desc("n", "attributes.value");
    let rows = collect(all);
    assert_eq!(
        rows.into_iter().map(|mut r| r.remove(0)).collect::<Vec<_>>(),
        vec![QueryValue::Int(5), QueryValue::Int(3), QueryValue::Int(2)]
    );

    let page = f
        .db
        .query()
        .append_spec(EntityKind::Node, "n", &json!({"type_tag": "data.core.int"}), Join::None)
        .project("n", "attributes.value")
        .order_by("n", "attributes.value")
        .offset(1)
        .limit(1);
    let rows = collect(page);
    assert_eq!(rows, vec![vec![QueryValue::Int(3)]]);

    // count honors limit and offset.
    let counted = f
        .db
        .query()
        .append_spec(EntityKind::Node, "n", &json!({"type_tag": "data.core.int"}), Join::None)
        .offset(1)
        .limit(10)
        .count()
        .unwrap();
    assert_eq!(counted, 2);
}

#[test]
fn first_returns_lowest_ordered_row() {
    let f = fixture();
    let row = f
        .db
        .query()
        .append_spec(EntityKind::Node, "n", &json!({"type_tag": "data.core.int"}), Join::None)
        .project("n", "id")
        .order_by("n", "id")
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(row, vec![QueryValue::Int(f.x as i64)]);

    let none = f
        .db
        .query()
        .append_spec(EntityKind::Node, "n", &json!({"type_tag": "no.such"}), Join::None)
        .first()
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn construction_errors_surface_at_execute() {
    let f = fixture();
    let err = f
        .db
        .query()
        .append(
            EntityKind::Node,
            "desc",
            FilterExpr::all(),
            Join::ClosureDescendant { via: "missing".into() },
        )
        .execute(8)
        .unwrap_err();
    assert_eq!(err.code(), "JoinOrder");

    let err = f
        .db
        .query()
        .append_spec(EntityKind::Node, "n", &json!({"attributes.a": {"bogus": 1}}), Join::None)
        .count()
        .unwrap_err();
    assert_eq!(err.code(), "InvalidFilter");
}

#[test]
fn cancellation_aborts_join_expansion() {
    let f = fixture();
    let cancel = CancelFlag::new();
    // Cancel before execution: the join expansion must bail out instead of
    // materializing the closure cross-product first.
    cancel.cancel();
    let err = f
        .db
        .query()
        .append(EntityKind::Node, "n", FilterExpr::all(), Join::None)
        .append(
            EntityKind::Node,
            "desc",
            FilterExpr::all(),
            Join::ClosureDescendant { via: "n".into() },
        )
        .execute_with_cancel(4, cancel)
        .unwrap_err();
    assert_eq!(err.code(), "Cancelled");
}

#[test]
fn order_by_cast_compares_numerically() {
    let db = ProvenaDb::open(Arc::new(MemoryBackend::new()));
    for rank in ["10", "2", "1"] {
        db.persist_node(NodeDraft::new("t").attribute("rank", rank))
            .unwrap();
    }

    let ranks = |path: provena::QueryPath| -> Vec<QueryValue> {
        collect(path.project("n", "attributes.rank"))
            .into_iter()
            .map(|mut r| r.remove(0))
            .collect()
    };

    // Lexicographic order on the stored strings puts "10" before "2".
    let text_order = ranks(
        db.query()
            .append(EntityKind::Node, "n", FilterExpr::all(), Join::None)
            .order_by("n", "attributes.rank"),
    );
    assert_eq!(
        text_order,
        vec![
            QueryValue::Text("1".into()),
            QueryValue::Text("10".into()),
            QueryValue::Text("2".into())
        ]
    );

    // An explicit int cast on the sort key compares numerically.
    let numeric_order = ranks(
        db.query()
            .append(EntityKind::Node, "n", FilterExpr::all(), Join::None)
            .order_by_cast("n", "attributes.rank", "int", false),
    );
    assert_eq!(
        numeric_order,
        vec![
            QueryValue::Text("1".into()),
            QueryValue::Text("2".into()),
            QueryValue::Text("10".into())
        ]
    );

    // Unknown cast tags surface as construction errors.
    let err = db
        .query()
        .append(EntityKind::Node, "n", FilterExpr::all(), Join::None)
        .order_by_cast("n", "attributes.rank", "decimal", false)
        .count()
        .unwrap_err();
    assert_eq!(err.code(), "InvalidFilter");
}

#[test]
fn cancellation_stops_the_stream() {
    let f = fixture();
    let cancel = CancelFlag::new();
    let mut stream = f
        .db
        .query()
        .append(EntityKind::Node, "n", FilterExpr::all(), Join::None)
        .project("n", "id")
        .execute_with_cancel(2, cancel.clone())
        .unwrap();

    assert!(stream.next().unwrap().is_ok());
    cancel.cancel();
    let err = stream.next().unwrap().unwrap_err();
    assert_eq!(err.code(), "Cancelled");
}
