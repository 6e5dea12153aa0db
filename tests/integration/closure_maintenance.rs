#![allow(missing_docs)]

//! End-to-end closure maintenance over the public database API, including a
//! randomized equivalence check against breadth-first search.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use proptest::prelude::*;
use provena::db::{NodeDraft, ProvenaDb};
use provena::model::{LinkType, NodeId};
use provena::storage::MemoryBackend;

fn db() -> ProvenaDb {
    ProvenaDb::open(Arc::new(MemoryBackend::new()))
}

fn nodes(db: &ProvenaDb, count: usize) -> Vec<NodeId> {
    (0..count)
        .map(|i| {
            db.persist_node(NodeDraft::new("data.core").attribute("seq", i as i64))
                .unwrap()
        })
        .collect()
}

fn wire(db: &ProvenaDb, n: &[NodeId], from: usize, to: usize) {
    db.add_link(n[from], n[to], LinkType::InputWork, format!("l{from}_{to}"))
        .unwrap();
}

/// The nine-node diamond-and-tail graph used throughout this file:
/// 1->2->3->5, 2->4->5, 5->6->7->8 and the extra root 9->6.
fn worked_graph(db: &ProvenaDb) -> Vec<NodeId> {
    let n = nodes(db, 10); // n[0] unused so indices match node names
    wire(db, &n, 1, 2);
    wire(db, &n, 2, 3);
    wire(db, &n, 3, 5);
    wire(db, &n, 2, 4);
    wire(db, &n, 4, 5);
    wire(db, &n, 5, 6);
    wire(db, &n, 6, 7);
    wire(db, &n, 7, 8);
    wire(db, &n, 9, 6);
    n
}

#[test]
fn worked_graph_counts_distinct_paths() {
    let db = db();
    let n = worked_graph(&db);

    // Two routes from n1 to n8: through n3 and through n4.
    assert_eq!(db.path_count(n[1], n[8]).unwrap(), 2);
    assert_eq!(db.path_count(n[4], n[8]).unwrap(), 1);
    assert_eq!(db.path_count(n[5], n[7]).unwrap(), 1);
    assert_eq!(db.path_count(n[9], n[8]).unwrap(), 1);
    // No reverse reachability anywhere.
    assert!(!db.is_reachable(n[8], n[1]).unwrap());
}

#[test]
fn deleting_shared_prefix_removes_both_paths() {
    let db = db();
    let n = worked_graph(&db);

    // Both n1->n8 routes go through the n1->n2 link, nothing else does.
    db.remove_link_between(n[1], n[2], "l1_2").unwrap();
    assert_eq!(db.path_count(n[1], n[8]).unwrap(), 0);
    assert_eq!(db.path_count(n[4], n[8]).unwrap(), 1);
    assert_eq!(db.path_count(n[5], n[7]).unwrap(), 1);
    assert_eq!(db.path_count(n[2], n[8]).unwrap(), 2);
}

#[test]
fn deleting_side_root_link_is_minimal() {
    let db = db();
    let n = worked_graph(&db);

    // n9->n6 carries only the paths rooted at n9.
    db.remove_link_between(n[9], n[6], "l9_6").unwrap();
    assert!(!db.is_reachable(n[9], n[8]).unwrap());
    assert_eq!(db.path_count(n[1], n[8]).unwrap(), 2);
    assert_eq!(db.path_count(n[4], n[8]).unwrap(), 1);
}

#[test]
fn reinserting_a_deleted_link_restores_counts() {
    let db = db();
    let n = worked_graph(&db);

    db.remove_link_between(n[5], n[6], "l5_6").unwrap();
    assert_eq!(db.path_count(n[1], n[8]).unwrap(), 0);
    assert_eq!(db.path_count(n[1], n[5]).unwrap(), 2);

    db.add_link(n[5], n[6], LinkType::InputWork, "l5_6").unwrap();
    assert_eq!(db.path_count(n[1], n[8]).unwrap(), 2);
    assert_eq!(db.path_count(n[9], n[8]).unwrap(), 1);
}

#[test]
fn cycle_rejection_is_atomic() {
    let db = db();
    let n = worked_graph(&db);

    let err = db
        .add_link(n[8], n[1], LinkType::InputWork, "back")
        .unwrap_err();
    assert_eq!(err.code(), "Cycle");
    // Neither the link nor any closure row survived the rollback.
    assert!(db.incoming_links(n[1]).unwrap().is_empty());
    assert_eq!(db.path_count(n[1], n[8]).unwrap(), 2);
}

// --- randomized equivalence against BFS ------------------------------------

#[derive(Debug, Clone)]
enum EditOp {
    /// Add a forward link low -> high; index ordering keeps scripts acyclic.
    Add(usize, usize),
    Remove(usize, usize),
}

fn arb_script(node_count: usize) -> impl Strategy<Value = Vec<EditOp>> {
    let edge = (0..node_count, 0..node_count).prop_filter_map("distinct ordered pair", |(a, b)| {
        if a < b {
            Some((a, b))
        } else if b < a {
            Some((b, a))
        } else {
            None
        }
    });
    prop::collection::vec(
        prop_oneof![
            3 => edge.clone().prop_map(|(a, b)| EditOp::Add(a, b)),
            1 => edge.prop_map(|(a, b)| EditOp::Remove(a, b)),
        ],
        1..60,
    )
}

fn bfs_reachable(edges: &BTreeSet<(usize, usize)>, from: usize, to: usize) -> bool {
    let mut seen = BTreeSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(cur) = queue.pop_front() {
        for &(a, b) in edges {
            if a == cur && seen.insert(b) {
                if b == to {
                    return true;
                }
                queue.push_back(b);
            }
        }
    }
    false
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn closure_matches_bfs_after_any_edit_script(script in arb_script(8)) {
        let db = db();
        let ids = nodes(&db, 8);
        let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();

        for op in script {
            match op {
                EditOp::Add(a, b) => {
                    if edges.insert((a, b)) {
                        db.add_link(ids[a], ids[b], LinkType::InputWork, format!("l{a}_{b}"))
                            .unwrap();
                    }
                }
                EditOp::Remove(a, b) => {
                    if edges.remove(&(a, b)) {
                        db.remove_link_between(ids[a], ids[b], &format!("l{a}_{b}")).unwrap();
                    }
                }
            }
        }

        for a in 0..8 {
            for b in 0..8 {
                if a == b {
                    continue;
                }
                let expected = bfs_reachable(&edges, a, b);
                let got = db.is_reachable(ids[a], ids[b]).unwrap();
                prop_assert_eq!(got, expected, "reachability ({}, {})", a, b);
            }
        }
    }
}
