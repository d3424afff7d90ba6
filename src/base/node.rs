use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::base::{LEAF_SIZE, NodeId, ScopeId};

/// A single element of a nested-set tree.
///
/// The range `left..=right` strictly contains the ranges of all descendants, and sibling ranges
/// never overlap. Everything structural about the node can therefore be derived from the range
/// alone; `parent_id` is a cached shortcut for the immediate-parent relation.
///
/// Nodes are read-only views of the backing table. Range columns are only ever written by the
/// gap engine in [`crate::tree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) parent_id: Option<NodeId>,
    pub(crate) left: i64,
    pub(crate) right: i64,
    pub(crate) level: i64,
    pub(crate) scope: ScopeId,
    /// Opaque record data owned by the persistence layer.
    #[debug("{} bytes", payload.len())]
    pub(crate) payload: Bytes,
}

impl Node {
    /// Reassembles a node from its stored column values.
    ///
    /// Meant for [`RangeStore`] implementations that materialize rows from their own backend.
    ///
    /// [`RangeStore`]: crate::store::RangeStore
    pub fn from_parts(
        id: NodeId,
        parent_id: Option<NodeId>,
        (left, right): (i64, i64),
        level: i64,
        scope: ScopeId,
        payload: Bytes,
    ) -> Self {
        Self {
            id,
            parent_id,
            left,
            right,
            level,
            scope,
            payload,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.parent_id
    }

    #[inline]
    pub fn left(&self) -> i64 {
        self.left
    }

    #[inline]
    pub fn right(&self) -> i64 {
        self.right
    }

    #[inline]
    pub fn level(&self) -> i64 {
        self.level
    }

    #[inline]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The width of the block this node and its descendants occupy. Always even.
    #[inline]
    pub fn size(&self) -> i64 {
        self.right - self.left + 1
    }

    /// Number of descendants, derived from the range width alone.
    pub fn descendant_count(&self) -> i64 {
        ((self.size() - LEAF_SIZE) / 2).max(0)
    }

    pub fn has_children(&self) -> bool {
        self.size() > LEAF_SIZE
    }

    pub fn is_leaf(&self) -> bool {
        !self.has_children()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Strict range containment within the same scope.
    pub fn contains(&self, other: &Node) -> bool {
        self.scope == other.scope && self.left < other.left && self.right > other.right
    }

    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        self.contains(other)
    }

    pub fn is_descendant_of(&self, other: &Node) -> bool {
        other.contains(self)
    }

    pub fn is_child_of(&self, other: &Node) -> bool {
        self.parent_id == Some(other.id)
    }

    pub fn is_parent_of(&self, other: &Node) -> bool {
        other.is_child_of(self)
    }

    /// A node is never its own sibling.
    pub fn is_sibling_of(&self, other: &Node) -> bool {
        self.id != other.id && self.scope == other.scope && self.parent_id == other.parent_id
    }

    pub(crate) fn to_row(&self) -> Row {
        Row {
            id: Some(self.id),
            parent_id: self.parent_id,
            left: self.left,
            right: self.right,
            level: self.level,
            scope: self.scope,
            payload: self.payload.clone(),
        }
    }
}

/// The column values of a node as handed to [`RangeTxn::persist`].
///
/// A row without `id` is created, a row with `id` overwrites the stored node.
///
/// [`RangeTxn::persist`]: crate::store::RangeTxn::persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: Option<NodeId>,
    pub parent_id: Option<NodeId>,
    pub left: i64,
    pub right: i64,
    pub level: i64,
    pub scope: ScopeId,
    #[debug("{} bytes", payload.len())]
    pub payload: Bytes,
}

impl Row {
    pub(crate) fn with_parent(mut self, parent_id: Option<NodeId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Turns a row without identity into a node.
    pub fn into_node(self, id: NodeId) -> Node {
        Node {
            id,
            parent_id: self.parent_id,
            left: self.left,
            right: self.right,
            level: self.level,
            scope: self.scope,
            payload: self.payload,
        }
    }
}

/// A node that is about to be inserted.
///
/// Drafts built from an existing [`Node`] keep its identity and are rejected by insert
/// operations; existing nodes have to be moved instead.
#[derive(Debug, Clone, Default)]
pub struct NodeDraft {
    id: Option<NodeId>,
    #[debug("{} bytes", payload.len())]
    payload: Bytes,
}

impl NodeDraft {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: None,
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub(crate) fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl From<Node> for NodeDraft {
    fn from(node: Node) -> Self {
        Self {
            id: Some(node.id),
            payload: node.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, parent: Option<u64>, left: i64, right: i64, level: i64) -> Node {
        Node::from_parts(
            NodeId::new(id).unwrap(),
            parent.map(|p| NodeId::new(p).unwrap()),
            (left, right),
            level,
            ScopeId::new(1),
            Bytes::new(),
        )
    }

    #[test]
    fn test_size_and_descendant_count() {
        let leaf = node(2, Some(1), 2, 3, 2);
        assert_eq!(leaf.size(), 2);
        assert_eq!(leaf.descendant_count(), 0);
        assert!(leaf.is_leaf());

        let root = node(1, None, 1, 10, 1);
        assert_eq!(root.size() % 2, 0);
        assert_eq!(root.descendant_count(), (root.size() - 2) / 2);
        assert_eq!(root.descendant_count(), 4);
        assert!(root.has_children());
        assert!(root.is_root());
    }

    #[test]
    fn test_relations() {
        let root = node(1, None, 1, 8, 1);
        let a = node(2, Some(1), 2, 5, 2);
        let a1 = node(3, Some(2), 3, 4, 3);
        let b = node(4, Some(1), 6, 7, 2);

        assert!(root.is_ancestor_of(&a1));
        assert!(a1.is_descendant_of(&root));
        assert!(!a.is_descendant_of(&a));
        assert!(a1.is_child_of(&a));
        assert!(a.is_parent_of(&a1));
        assert!(!root.is_parent_of(&a1));
        assert!(a.is_sibling_of(&b));
        assert!(!a.is_sibling_of(&a));
        assert!(!a1.is_sibling_of(&b));
    }

    #[test]
    fn test_containment_respects_scope() {
        let root = node(1, None, 1, 8, 1);
        let mut other = node(9, None, 2, 3, 1);
        other.scope = ScopeId::new(2);
        assert!(!root.contains(&other));
    }

    #[test]
    fn test_draft_from_existing_node_keeps_identity() {
        let existing = node(7, None, 1, 2, 1);
        assert_eq!(NodeDraft::from(existing).id(), NodeId::new(7));
        assert_eq!(NodeDraft::new("x").id(), None);
    }
}
