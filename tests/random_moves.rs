//! Randomized re-parenting against a real tree file.
//!
//! Builds a seeded random forest, then applies a long run of random overview
//! drops and checks after each one that nothing was lost, that subtrees moved
//! whole, and that every cyclic move was refused without touching the file.

use issuetree::focus::FocusStore;
use issuetree::reorganize::Reorganizer;
use issuetree::tree_store::TreeStore;
use issuetree::types::{Node, TreeData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use similar_asserts::assert_eq;
use std::collections::BTreeSet;
use std::fs;

const SEEDS: [u64; 4] = [7, 42, 1234, 98765];
const NODES: usize = 40;
const MOVES: usize = 150;

/// Random forest with ids n0..n{count-1}; each node hangs under an earlier
/// one or starts a new root
fn random_forest(rng: &mut StdRng, count: usize) -> TreeData {
    let mut parents: Vec<Option<usize>> = Vec::with_capacity(count);
    for i in 0..count {
        let parent = if i == 0 || rng.gen_bool(0.2) {
            None
        } else {
            Some(rng.gen_range(0..i))
        };
        parents.push(parent);
    }

    fn build(i: usize, parents: &[Option<usize>]) -> Node {
        let children = (0..parents.len())
            .filter(|&c| parents[c] == Some(i))
            .map(|c| build(c, parents))
            .collect();
        Node::new(format!("n{}", i), format!("doc-{}.md", i)).with_children(children)
    }

    TreeData {
        root_nodes: (0..count)
            .filter(|&i| parents[i].is_none())
            .map(|i| build(i, &parents))
            .collect(),
        ..TreeData::default()
    }
}

fn subtree_set(tree: &TreeData, id: &str) -> BTreeSet<String> {
    tree.find_node(id)
        .map(|n| n.subtree_ids().into_iter().collect())
        .unwrap_or_default()
}

fn run_seed(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join(".issuetree");
    let tree_store = TreeStore::in_dir(&state);
    let mut initial = random_forest(&mut rng, NODES);
    tree_store.save(&mut initial).unwrap();

    let reorganizer = Reorganizer::new(
        TreeStore::in_dir(&state),
        FocusStore::in_dir(&state),
        Some(dir.path().to_path_buf()),
    );

    let mut accepted = 0;
    let mut refused = 0;
    for step in 0..MOVES {
        let before = tree_store.load();
        let before_bytes = fs::read(tree_store.path()).unwrap();

        let dragged = format!("n{}", rng.gen_range(0..NODES));
        let moved_subtree = subtree_set(&before, &dragged);
        let target = if step % 5 == 0 {
            // Aim inside the dragged subtree on purpose
            let inside: Vec<&String> = moved_subtree.iter().collect();
            Some(inside[rng.gen_range(0..inside.len())].clone())
        } else if rng.gen_bool(0.15) {
            None
        } else {
            Some(format!("n{}", rng.gen_range(0..NODES)))
        };
        let cyclic = target
            .as_deref()
            .map(|t| before.contains_in_subtree(&dragged, t))
            .unwrap_or(false);

        let report = reorganizer
            .move_nodes(&[dragged.clone()], target.as_deref())
            .unwrap();
        let after = tree_store.load();
        let context = format!("seed {} step {}: {} -> {:?}", seed, step, dragged, target);

        assert_eq!(after.node_count(), NODES, "{}", context);
        assert_eq!(after.all_ids(), before.all_ids(), "{}", context);

        if cyclic {
            refused += 1;
            assert!(report.moved.is_empty(), "{}", context);
            assert_eq!(report.rejected.len(), 1, "{}", context);
            assert_eq!(fs::read(tree_store.path()).unwrap(), before_bytes, "{}", context);
            continue;
        }

        accepted += 1;
        assert_eq!(report.moved, vec![dragged.clone()], "{}", context);
        assert!(report.rejected.is_empty(), "{}", context);
        assert_eq!(after.revision, before.revision + 1, "{}", context);
        assert_eq!(subtree_set(&after, &dragged), moved_subtree, "{}", context);

        match target.as_deref() {
            None => assert_eq!(after.root_nodes[0].id, dragged, "{}", context),
            Some(t) => {
                let parent = after.find_node(t).unwrap();
                assert_eq!(parent.children[0].id, dragged, "{}", context);
                assert!(parent.expanded, "{}", context);
            }
        }
    }

    // Both branches have to be exercised for the run to mean anything
    assert!(accepted > 0, "seed {} never moved anything", seed);
    assert!(refused > 0, "seed {} never attempted a cycle", seed);
}

#[test]
fn test_random_moves_preserve_forest() {
    for seed in SEEDS {
        run_seed(seed);
    }
}

#[test]
fn test_random_batch_drop_moves_each_item_once() {
    let mut rng = StdRng::seed_from_u64(2024);
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join(".issuetree");
    let tree_store = TreeStore::in_dir(&state);
    let mut initial = random_forest(&mut rng, NODES);
    tree_store.save(&mut initial).unwrap();
    let reorganizer = Reorganizer::new(
        TreeStore::in_dir(&state),
        FocusStore::in_dir(&state),
        None,
    );

    // Dropping a batch onto the forest root can never form a cycle
    let mut batch: Vec<String> = (0..NODES).map(|i| format!("n{}", i)).collect();
    for i in (1..batch.len()).rev() {
        batch.swap(i, rng.gen_range(0..=i));
    }
    batch.truncate(10);

    let report = reorganizer.move_nodes(&batch, None).unwrap();
    assert!(report.rejected.is_empty());
    assert_eq!(report.moved, batch);

    let after = tree_store.load();
    assert_eq!(after.node_count(), NODES);
    // Later items land in front of earlier ones
    assert_eq!(after.root_nodes[0].id, batch[batch.len() - 1]);
}
