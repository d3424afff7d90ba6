use std::ops;

use crate::base::{Node, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    #[inline]
    fn apply(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::NotEq => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::LtEq => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::GtEq => lhs >= rhs,
        }
    }

    /// `Lt` or `LtEq` depending on `inclusive`.
    pub(crate) fn lt(inclusive: bool) -> Self {
        if inclusive {
            CompareOp::LtEq
        } else {
            CompareOp::Lt
        }
    }

    /// `Gt` or `GtEq` depending on `inclusive`.
    pub(crate) fn gt(inclusive: bool) -> Self {
        if inclusive {
            CompareOp::GtEq
        } else {
            CompareOp::Gt
        }
    }
}

/// A row filter understood by every [`RangeStore`]. Scope is always passed separately.
///
/// [`RangeStore`]: crate::store::RangeStore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    All,
    Id(NodeId),
    Parent(Option<NodeId>),
    Left(CompareOp, i64),
    Right(CompareOp, i64),
    Level(CompareOp, i64),
    /// `right == left + 1`
    Leaf,
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Id(id) => node.id == *id,
            Predicate::Parent(parent) => node.parent_id == *parent,
            Predicate::Left(op, val) => op.apply(node.left, *val),
            Predicate::Right(op, val) => op.apply(node.right, *val),
            Predicate::Level(op, val) => op.apply(node.level, *val),
            Predicate::Leaf => node.right == node.left + 1,
            Predicate::Not(inner) => !inner.matches(node),
            Predicate::And(all) => all.iter().all(|p| p.matches(node)),
            Predicate::Or(any) => any.iter().any(|p| p.matches(node)),
        }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::All => other,
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            this => Predicate::And(vec![this, other]),
        }
    }

    /// Strict ancestors of `node`, or including `node` when `inclusive`.
    pub fn ancestors_of(node: &Node, inclusive: bool) -> Predicate {
        Predicate::And(vec![
            Predicate::Left(CompareOp::lt(inclusive), node.left),
            Predicate::Right(CompareOp::gt(inclusive), node.right),
        ])
    }

    /// Strict descendants of `node`, or including `node` when `inclusive`.
    pub fn descendants_of(node: &Node, inclusive: bool) -> Predicate {
        Predicate::And(vec![
            Predicate::Left(CompareOp::gt(inclusive), node.left),
            Predicate::Right(CompareOp::lt(inclusive), node.right),
        ])
    }
}

impl ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}
