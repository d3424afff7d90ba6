use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::instrument;

use crate::{
    Arbor,
    base::{Node, NodeId, ROOT_LEVEL, ScopeId, VerifyError},
    store::{Predicate, RangeStore},
};

/// One broken property of a scope's encoding.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ViolatedInvariant {
    #[display("scope has nodes but no root")]
    MissingRoot,

    #[display("multiple roots: {}", _0.iter().join(", "))]
    MultipleRoots(Vec<NodeId>),

    #[display("root {id} starts at {left} instead of 1")]
    RootNotAtOrigin { id: NodeId, left: i64 },

    #[display("node {id} spans {left}..{right} outside of 1..{bound}")]
    OutOfBounds {
        id: NodeId,
        left: i64,
        right: i64,
        bound: i64,
    },

    #[display("node {id} has inverted range {left}..{right}")]
    InvertedRange { id: NodeId, left: i64, right: i64 },

    #[display("position {position} is used by nodes {}", nodes.iter().join(", "))]
    DuplicatePosition { position: i64, nodes: Vec<NodeId> },

    #[display("position {_0} is unused")]
    UnusedPosition(i64),

    #[display("ranges of {outer} and {inner} partially overlap")]
    PartialOverlap { outer: NodeId, inner: NodeId },

    #[display("node {id} has level {level}, expected {expected}")]
    LevelMismatch {
        id: NodeId,
        level: i64,
        expected: i64,
    },

    #[display("node {id} has parent {parent:?}, its range implies {expected:?}")]
    ParentMismatch {
        id: NodeId,
        parent: Option<NodeId>,
        expected: Option<NodeId>,
    },
}

/// Checks every encoding invariant of one scope. `nodes` must be ordered by `(left, id)`.
///
/// An empty scope is valid.
pub(crate) fn check(nodes: &[Node]) -> Vec<ViolatedInvariant> {
    let mut violations = Vec::new();
    if nodes.is_empty() {
        return violations;
    }

    let roots = nodes.iter().filter(|n| n.is_root()).collect_vec();
    match roots.as_slice() {
        [] => violations.push(ViolatedInvariant::MissingRoot),
        [root] if root.left != 1 => violations.push(ViolatedInvariant::RootNotAtOrigin {
            id: root.id,
            left: root.left,
        }),
        [_] => {}
        roots => violations.push(ViolatedInvariant::MultipleRoots(
            roots.iter().map(|n| n.id).collect(),
        )),
    }

    // every position in 1..=2N is an endpoint of exactly one range
    let bound = 2 * nodes.len() as i64;
    let mut positions: BTreeMap<i64, Vec<NodeId>> = BTreeMap::new();
    for node in nodes {
        if node.left >= node.right {
            violations.push(ViolatedInvariant::InvertedRange {
                id: node.id,
                left: node.left,
                right: node.right,
            });
        }
        if node.left < 1 || node.right > bound {
            violations.push(ViolatedInvariant::OutOfBounds {
                id: node.id,
                left: node.left,
                right: node.right,
                bound,
            });
        }
        positions.entry(node.left).or_default().push(node.id);
        positions.entry(node.right).or_default().push(node.id);
    }
    for position in 1..=bound {
        match positions.get(&position).map(Vec::as_slice) {
            None => violations.push(ViolatedInvariant::UnusedPosition(position)),
            Some([_]) => {}
            Some(nodes) => violations.push(ViolatedInvariant::DuplicatePosition {
                position,
                nodes: nodes.to_vec(),
            }),
        }
    }

    // walking in preorder, the stack holds the chain of ranges enclosing the current node
    let mut enclosing: Vec<&Node> = Vec::new();
    for node in nodes.iter().filter(|n| n.left < n.right) {
        while enclosing.last().is_some_and(|top| top.right < node.left) {
            enclosing.pop();
        }
        let derived_parent = enclosing.last().copied();
        if let Some(outer) = derived_parent {
            if node.right > outer.right {
                violations.push(ViolatedInvariant::PartialOverlap {
                    outer: outer.id,
                    inner: node.id,
                });
            }
        }

        let expected_parent = derived_parent.map(|n| n.id);
        if node.parent_id != expected_parent {
            violations.push(ViolatedInvariant::ParentMismatch {
                id: node.id,
                parent: node.parent_id,
                expected: expected_parent,
            });
        }
        let expected_level = ROOT_LEVEL + enclosing.len() as i64;
        if node.level != expected_level {
            violations.push(ViolatedInvariant::LevelMismatch {
                id: node.id,
                level: node.level,
                expected: expected_level,
            });
        }
        enclosing.push(node);
    }

    violations
}

impl<S: RangeStore> Arbor<S> {
    /// Checks the encoding of `scope` without changing it. Violations are returned as
    /// [`VerifyError::Violated`]; the repair path is [`Arbor::rebuild`].
    #[instrument(skip_all, level = "debug", fields(%scope))]
    pub async fn verify(&self, scope: ScopeId) -> Result<(), VerifyError> {
        let _guard = self.lock_scope_shared(scope).await?;
        let nodes = self.store.find(scope, &Predicate::All).await?;
        let violations = check(&nodes);
        if violations.is_empty() {
            return Ok(());
        }
        debug!(violations = violations.len(), "Scope is corrupt");
        Err(VerifyError::Violated(violations))
    }
}
