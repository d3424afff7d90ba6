use crate::base::{Node, NodeId, ScopeId};

/// Where a node goes relative to its anchor.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    #[display("first child")]
    FirstChild,
    #[display("last child")]
    LastChild,
    #[display("previous sibling")]
    PrevSibling,
    #[display("next sibling")]
    NextSibling,
}

impl Placement {
    pub const ALL: [Placement; 4] = [
        Placement::FirstChild,
        Placement::LastChild,
        Placement::PrevSibling,
        Placement::NextSibling,
    ];

    #[inline]
    pub fn is_sibling(&self) -> bool {
        matches!(self, Placement::PrevSibling | Placement::NextSibling)
    }

    /// Level of the placed node relative to the anchor's level.
    #[inline]
    pub fn level_delta(&self) -> i64 {
        if self.is_sibling() { 0 } else { 1 }
    }
}

/// Resolved destination of a placement, computed before any gap is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target {
    /// The `left` value the first slot of the placed block takes.
    pub(crate) position: i64,
    pub(crate) level: i64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) scope: ScopeId,
}

/// Returns `None` for a sibling placement next to a root; a scope holds exactly one root.
pub(crate) fn resolve(anchor: &Node, placement: Placement) -> Option<Target> {
    if placement.is_sibling() && anchor.is_root() {
        return None;
    }

    let (position, parent) = match placement {
        Placement::FirstChild => (anchor.left + 1, Some(anchor.id)),
        Placement::LastChild => (anchor.right, Some(anchor.id)),
        Placement::PrevSibling => (anchor.left, anchor.parent_id),
        Placement::NextSibling => (anchor.right + 1, anchor.parent_id),
    };
    Some(Target {
        position,
        level: anchor.level + placement.level_delta(),
        parent,
        scope: anchor.scope,
    })
}
