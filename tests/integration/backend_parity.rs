#![allow(missing_docs)]

//! The memory and SQLite backends must be observationally identical: the
//! same edit script leaves the same closure table and answers the same
//! queries on both.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tempfile::tempdir;

use provena::db::{NodeDraft, ProvenaDb};
use provena::model::{LinkType, NodeId};
use provena::query::{EntityKind, Join, QueryValue};
use provena::storage::{MemoryBackend, SqliteBackend};

/// Closure table reduced to backend-independent shape.
fn closure_shape(db: &ProvenaDb) -> Vec<(u64, u64, u32)> {
    let mut rows: Vec<_> = db
        .with_nodes(|tx| tx.scan_closure())
        .unwrap()
        .into_iter()
        .map(|e| (e.parent_id, e.child_id, e.depth))
        .collect();
    rows.sort_unstable();
    rows
}

fn apply_script(db: &ProvenaDb, seed: u64) -> Vec<NodeId> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let ids: Vec<NodeId> = (0..10u32)
        .map(|i| {
            db.persist_node(
                NodeDraft::new(if i % 2 == 0 { "data.core" } else { "process.calc" })
                    .attribute("seq", i),
            )
            .unwrap()
        })
        .collect();

    let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
    for _ in 0..80 {
        let a = rng.gen_range(0..ids.len());
        let b = rng.gen_range(0..ids.len());
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        if a == b {
            continue;
        }
        if rng.gen_bool(0.7) {
            if edges.insert((a, b)) {
                db.add_link(ids[a], ids[b], LinkType::InputWork, format!("l{a}_{b}"))
                    .unwrap();
            }
        } else if edges.remove(&(a, b)) {
            db.remove_link_between(ids[a], ids[b], &format!("l{a}_{b}"))
                .unwrap();
        }
    }
    ids
}

fn descendants_of(db: &ProvenaDb, root: NodeId) -> Vec<u32> {
    let mut seqs: Vec<u32> = db
        .query()
        .append_spec(EntityKind::Node, "root", &json!({"id": root}), Join::None)
        .append_spec(
            EntityKind::Node,
            "desc",
            &json!({}),
            Join::ClosureDescendant { via: "root".into() },
        )
        .project("desc", "attributes.seq")
        .execute(32)
        .unwrap()
        .map(|row| match row.unwrap().remove(0) {
            QueryValue::Int(v) => v as u32,
            other => panic!("expected seq, got {other:?}"),
        })
        .collect();
    seqs.sort_unstable();
    seqs
}

#[test]
fn closure_tables_agree_after_random_edits() {
    let dir = tempdir().unwrap();

    for seed in [7u64, 1312, 90210] {
        let mem = ProvenaDb::open(Arc::new(MemoryBackend::new()));
        let sql = ProvenaDb::open(Arc::new(
            SqliteBackend::open(dir.path().join(format!("parity_{seed}.db"))).unwrap(),
        ));
        let mem_ids = apply_script(&mem, seed);
        let sql_ids = apply_script(&sql, seed);

        assert_eq!(closure_shape(&mem), closure_shape(&sql), "seed {seed}");

        for (m, s) in mem_ids.iter().zip(&sql_ids) {
            assert_eq!(descendants_of(&mem, *m), descendants_of(&sql, *s));
        }
    }
}

#[test]
fn queries_agree_between_backends() {
    let mem = ProvenaDb::open(Arc::new(MemoryBackend::new()));
    let sql = ProvenaDb::open(Arc::new(SqliteBackend::open_in_memory().unwrap()));

    for db in [&mem, &sql] {
        let a = db
            .persist_node(NodeDraft::new("data.core").attribute("v", 1))
            .unwrap();
        let b = db
            .persist_node(NodeDraft::new("data.core").attribute("v", 2))
            .unwrap();
        let c = db
            .persist_node(NodeDraft::new("process.calc").attribute("v", 3))
            .unwrap();
        db.add_link(a, c, LinkType::InputCalc, "a").unwrap();
        db.add_link(b, c, LinkType::InputCalc, "b").unwrap();
        let g = db.create_group("inputs", "core").unwrap();
        db.add_group_member(g, a).unwrap();
        db.add_group_member(g, b).unwrap();
    }

    let run = |db: &ProvenaDb| -> Vec<i64> {
        let mut out: Vec<i64> = db
            .query()
            .append_spec(EntityKind::Group, "g", &json!({"label": "inputs"}), Join::None)
            .append_spec(
                EntityKind::Node,
                "n",
                &json!({"attributes.v": {"<": 3}}),
                Join::GroupMembership { via: "g".into() },
            )
            .project("n", "attributes.v")
            .execute(8)
            .unwrap()
            .map(|row| match row.unwrap().remove(0) {
                QueryValue::Int(v) => v,
                other => panic!("expected int, got {other:?}"),
            })
            .collect();
        out.sort_unstable();
        out
    };
    assert_eq!(run(&mem), run(&sql));
    assert_eq!(run(&mem), vec![1, 2]);
}

#[test]
fn sqlite_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reopen.db");

    let a;
    let b;
    {
        let db = ProvenaDb::open(Arc::new(SqliteBackend::open(&path).unwrap()));
        a = db.persist_node(NodeDraft::new("data.core")).unwrap();
        b = db.persist_node(NodeDraft::new("process.calc")).unwrap();
        db.add_link(a, b, LinkType::InputCalc, "x").unwrap();
    }

    let db = ProvenaDb::open(Arc::new(SqliteBackend::open(&path).unwrap()));
    assert!(db.is_reachable(a, b).unwrap());
    assert_eq!(db.node(a).unwrap().type_tag, "data.core");
}
