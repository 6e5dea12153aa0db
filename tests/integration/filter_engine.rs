#![allow(missing_docs)]

//! Filter engine exercised end to end: wire-format parsing, compile-time
//! rejection, and type-gated evaluation against stored nodes.

use std::sync::Arc;

use serde_json::json;
use provena::db::{NodeDraft, ProvenaDb};
use provena::query::{EntityKind, FilterExpr, Join, QueryValue};
use provena::storage::MemoryBackend;

fn db() -> ProvenaDb {
    ProvenaDb::open(Arc::new(MemoryBackend::new()))
}

/// Ids of nodes matching `spec`, ascending.
fn matching(db: &ProvenaDb, spec: serde_json::Value) -> Vec<i64> {
    let mut rows: Vec<i64> = db
        .query()
        .append_spec(EntityKind::Node, "n", &spec, Join::None)
        .project("n", "id")
        .execute(16)
        .unwrap()
        .map(|row| match row.unwrap().remove(0) {
            QueryValue::Int(id) => id,
            other => panic!("expected integer id, got {other:?}"),
        })
        .collect();
    rows.sort_unstable();
    rows
}

#[test]
fn nested_json_path_and_negation() {
    let db = db();
    let id = db
        .persist_node(
            NodeDraft::new("data.dict")
                .attribute("a", 1)
                .attribute("b", json!({"c": "x"})),
        )
        .unwrap() as i64;

    assert_eq!(matching(&db, json!({"attributes.b.c": "x"})), vec![id]);
    assert!(matching(&db, json!({"attributes.a": {">": 5}})).is_empty());
    // Negated true comparison is false.
    assert!(matching(&db, json!({"attributes.a": {"~==": 1}})).is_empty());
    assert_eq!(matching(&db, json!({"attributes.a": {"~==": 2}})), vec![id]);
}

#[test]
fn type_mismatch_is_false_not_an_error() {
    let db = db();
    db.persist_node(NodeDraft::new("t").attribute("x", "text"))
        .unwrap();
    let id = db
        .persist_node(NodeDraft::new("t").attribute("x", 3))
        .unwrap() as i64;

    // The integer literal gates out the string-valued node.
    assert_eq!(matching(&db, json!({"attributes.x": {">": 1}})), vec![id]);
    // Negation does not resurrect type-gated rows: the string-valued node
    // fails the type gate, so only the false numeric comparison negates.
    assert!(matching(&db, json!({"attributes.x": {"~>": 1}})).is_empty());
}

#[test]
fn missing_value_under_negated_op_is_false() {
    let db = db();
    db.persist_node(NodeDraft::new("t").attribute("other", 1))
        .unwrap();
    assert!(matching(&db, json!({"attributes.x": {"~==": 7}})).is_empty());
}

#[test]
fn implicit_and_on_one_path() {
    let db = db();
    let a = db
        .persist_node(NodeDraft::new("t").attribute("v", 5))
        .unwrap() as i64;
    db.persist_node(NodeDraft::new("t").attribute("v", 50))
        .unwrap();

    assert_eq!(
        matching(&db, json!({"attributes.v": {">": 1, "<": 10}})),
        vec![a]
    );
}

#[test]
fn combinators_and_de_morgan() {
    let db = db();
    let a = db
        .persist_node(NodeDraft::new("t").attribute("v", 1))
        .unwrap() as i64;
    let b = db
        .persist_node(NodeDraft::new("t").attribute("v", 2))
        .unwrap() as i64;

    let or = json!({"or": [{"attributes.v": 1}, {"attributes.v": 2}]});
    assert_eq!(matching(&db, or), vec![a, b]);

    // ~or matches rows where neither branch holds.
    let neither = json!({"~or": [{"attributes.v": 1}, {"attributes.v": 2}]});
    assert!(matching(&db, neither).is_empty());

    // De Morgan: ~and of the two equals or of the single negations.
    let nand = json!({"~and": [{"attributes.v": 1}, {"attributes.v": 2}]});
    assert_eq!(matching(&db, nand), vec![a, b]);
}

#[test]
fn string_operators() {
    let db = db();
    let a = db
        .persist_node(NodeDraft::new("t").attribute("name", "Quantum ESPRESSO"))
        .unwrap() as i64;
    db.persist_node(NodeDraft::new("t").attribute("name", "vasp"))
        .unwrap();

    assert_eq!(
        matching(&db, json!({"attributes.name": {"like": "Quantum%"}})),
        vec![a]
    );
    assert!(matching(&db, json!({"attributes.name": {"like": "quantum%"}})).is_empty());
    assert_eq!(
        matching(&db, json!({"attributes.name": {"ilike": "quantum_espresso"}})),
        vec![a]
    );
    assert_eq!(
        matching(&db, json!({"attributes.name": {"in": ["vasp", "Quantum ESPRESSO"]}})).len(),
        2
    );
}

#[test]
fn structural_operators() {
    let db = db();
    let a = db
        .persist_node(
            NodeDraft::new("t")
                .attribute("kinds", json!(["Ba", "Ti", "O"]))
                .attribute("meta", json!({"source": "icsd", "id": 9001})),
        )
        .unwrap() as i64;
    db.persist_node(NodeDraft::new("t").attribute("kinds", json!(["Si"])))
        .unwrap();

    assert_eq!(
        matching(&db, json!({"attributes.kinds": {"contains": ["Ti", "Ba"]}})),
        vec![a]
    );
    assert_eq!(
        matching(&db, json!({"attributes.meta": {"has_key": "source"}})),
        vec![a]
    );
    assert_eq!(
        matching(&db, json!({"attributes.kinds": {"of_length": 3}})),
        vec![a]
    );
    assert_eq!(
        matching(&db, json!({"attributes.kinds": {"longer": 1}})),
        vec![a]
    );
    assert_eq!(matching(&db, json!({"attributes.kinds": {"shorter": 4}})).len(), 2);
}

#[test]
fn plain_column_filters() {
    let db = db();
    let a = db.persist_node(NodeDraft::new("data.core.int")).unwrap() as i64;
    db.persist_node(NodeDraft::new("process.calc")).unwrap();

    assert_eq!(matching(&db, json!({"type_tag": {"like": "data.%"}})), vec![a]);
    assert_eq!(matching(&db, json!({"id": a})), vec![a]);
    // Empty in-list on a plain column matches nothing and is not an error.
    assert!(matching(&db, json!({"id": {"in": []}})).is_empty());
}

#[test]
fn compile_time_rejections() {
    let bad = [
        // Unknown operator.
        json!({"attributes.a": {"===": 1}}),
        // Heterogeneous in-list.
        json!({"attributes.a": {"in": [1, "x"]}}),
        // Empty in-list on a JSON path.
        json!({"attributes.a": {"in": []}}),
        // JSON-only operator on a plain column.
        json!({"type_tag": {"has_key": "a"}}),
        json!({"id": {"of_length": 2}}),
        // Sub-path under a plain column.
        json!({"id.sub": 1}),
        // Unknown column.
        json!({"bogus_column": 1}),
    ];
    for spec in bad {
        let err = FilterExpr::parse(&spec).unwrap_err();
        assert_eq!(err.code(), "InvalidFilter", "spec {spec}");
    }
}

#[test]
fn datetime_literals_compare_as_dates() {
    let db = db();
    let id = db.persist_node(NodeDraft::new("t")).unwrap() as i64;

    assert_eq!(
        matching(&db, json!({"ctime": {">": "2000-01-01T00:00:00Z"}})),
        vec![id]
    );
    assert!(matching(&db, json!({"ctime": {"<": "2000-01-01T00:00:00Z"}})).is_empty());
}
