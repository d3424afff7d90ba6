//! Property-based tests for the structural operations.
//!
//! Random sequences of inserts, moves, promotions and deletions run against the in-memory store;
//! every scope has to verify after every operation, and the node count has to match what the
//! operations claim to have done.

use std::time::Duration;

use arbor::{
    Arbor,
    base::{InsertError, MoveError, Node, NodeDraft, PromoteError},
    config::{ArborConfig, LockConfig},
    store::{InMemoryRangeStore, RangeStore},
    tree::Placement,
};
use proptest::prelude::*;

// ============================================================================
//  Strategies
// ============================================================================

/// Node and anchor are indexes into the current preorder listing of all nodes, taken modulo
/// its length.
#[derive(Debug, Clone)]
enum Op {
    InsertRoot,
    Insert { anchor: usize, placement: usize },
    Move { node: usize, anchor: usize, placement: usize },
    Promote { node: usize },
    Delete { node: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::InsertRoot),
        6 => (any::<usize>(), 0..4usize)
            .prop_map(|(anchor, placement)| Op::Insert { anchor, placement }),
        4 => (any::<usize>(), any::<usize>(), 0..4usize)
            .prop_map(|(node, anchor, placement)| Op::Move { node, anchor, placement }),
        1 => any::<usize>().prop_map(|node| Op::Promote { node }),
        1 => any::<usize>().prop_map(|node| Op::Delete { node }),
    ]
}

// ============================================================================
//  Harness
// ============================================================================

fn config() -> ArborConfig {
    ArborConfig {
        lock: LockConfig {
            max_skip_tolerance: 8,
            acquire_timeout: Some(Duration::from_secs(1)),
        },
        ..Default::default()
    }
}

fn pick(nodes: &[Node], index: usize) -> &Node {
    &nodes[index % nodes.len()]
}

/// Applies `op` and returns the change in the total node count.
async fn apply(arbor: &Arbor<InMemoryRangeStore>, op: &Op) -> i64 {
    let nodes = arbor.full_tree(None, None).await.unwrap();
    if nodes.is_empty() {
        arbor.insert_root(NodeDraft::new("seed"), None).await.unwrap();
        return 1;
    }

    match *op {
        Op::InsertRoot => {
            arbor.insert_root(NodeDraft::new("root"), None).await.unwrap();
            1
        }
        Op::Insert { anchor, placement } => {
            let anchor = pick(&nodes, anchor);
            let placement = Placement::ALL[placement];
            match arbor.insert(NodeDraft::new("leaf"), anchor.id(), placement).await {
                Ok(_) => 1,
                Err(InsertError::InvalidAnchor(_)) => {
                    assert!(anchor.is_root() && placement.is_sibling());
                    0
                }
                Err(err) => panic!("insert failed: {err}"),
            }
        }
        Op::Move { node, anchor, placement } => {
            let (node, anchor) = (pick(&nodes, node), pick(&nodes, anchor));
            let placement = Placement::ALL[placement];
            match arbor.move_node(node.id(), anchor.id(), placement).await {
                Ok(moved) => {
                    assert_eq!(moved.size(), node.size(), "a move keeps the subtree");
                    0
                }
                Err(MoveError::InvalidMove(_)) => {
                    assert!(
                        node.id() == anchor.id()
                            || anchor.is_descendant_of(node)
                            || (anchor.is_root() && placement.is_sibling())
                    );
                    0
                }
                Err(err) => panic!("move failed: {err}"),
            }
        }
        Op::Promote { node } => {
            let node = pick(&nodes, node);
            match arbor.promote_to_root(node.id(), None).await {
                Ok(root) => {
                    assert_eq!((root.left(), root.right()), (1, node.size()));
                    0
                }
                Err(PromoteError::AlreadyRoot(_)) => {
                    assert!(node.is_root());
                    0
                }
                Err(err) => panic!("promote failed: {err}"),
            }
        }
        Op::Delete { node } => {
            let node = pick(&nodes, node);
            arbor.delete_subtree(node.id()).await.unwrap();
            -(node.descendant_count() + 1)
        }
    }
}

async fn assert_intact(arbor: &Arbor<InMemoryRangeStore>) {
    for scope in arbor.store().scopes().await.unwrap() {
        if let Err(err) = arbor.verify(scope).await {
            panic!("scope {scope} is corrupt: {err}");
        }
    }
}

// ============================================================================
//  Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every committed operation leaves every scope intact.
    #[test]
    fn operations_preserve_invariants(ops in prop::collection::vec(op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let arbor = Arbor::init(InMemoryRangeStore::new(), config()).await;
            let mut expected = 0;
            for op in &ops {
                expected += apply(&arbor, op).await;
                assert_intact(&arbor).await;
                assert_eq!(arbor.store().len() as i64, expected, "after {op:?}");
            }
        });
    }

    /// Rebuilding an intact forest writes nothing.
    #[test]
    fn rebuild_is_idempotent(ops in prop::collection::vec(op(), 1..30)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let arbor = Arbor::init(InMemoryRangeStore::new(), config()).await;
            for op in &ops {
                apply(&arbor, op).await;
            }
            let before = arbor.store().snapshot().unwrap();
            arbor.rebuild_all().await.unwrap();
            assert_eq!(arbor.store().snapshot().unwrap(), before);
        });
    }
}
