//! Read-only navigation. Queries take no lock and may observe a tree mid-mutation.
//!
//! Every query works on the ranges of the [`Node`] it is handed. Reload nodes after structural
//! changes before querying relative to them.

use crate::{
    Arbor,
    base::{ArborError, ArborResult, Node, NodeId, ROOT_LEVEL, ScopeId},
    store::{CompareOp, Predicate, RangeStore},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Preorder, i.e. by `left` ascending.
    #[default]
    Ascending,
    Descending,
}

/// Shape of a list query result.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Listing {
    pub with_self: bool,
    pub direction: Direction,
    pub limit: Option<usize>,
}

impl Listing {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_self(mut self) -> Self {
        self.with_self = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.direction = Direction::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn apply(&self, mut nodes: Vec<Node>) -> Vec<Node> {
        if self.direction == Direction::Descending {
            nodes.reverse();
        }
        if let Some(limit) = self.limit {
            nodes.truncate(limit);
        }
        nodes
    }
}

fn children_of(node: &Node) -> Predicate {
    Predicate::descendants_of(node, false).and(Predicate::Level(CompareOp::Eq, node.level + 1))
}

/// Adds `node` itself to `predicate` when requested.
fn or_self(predicate: Predicate, node: &Node, with_self: bool) -> Predicate {
    if with_self {
        Predicate::Or(vec![Predicate::Id(node.id), predicate])
    } else {
        predicate
    }
}

impl<S: RangeStore> Arbor<S> {
    pub async fn node(&self, id: NodeId) -> ArborResult<Node> {
        self.store.load(id).await?.ok_or(ArborError::NotFound(id))
    }

    pub async fn root(&self, scope: ScopeId) -> ArborResult<Option<Node>> {
        let roots = self.store.find(scope, &Predicate::Parent(None)).await?;
        Ok(roots.into_iter().next())
    }

    /// The roots of every scope, ordered by scope.
    pub async fn roots(&self) -> ArborResult<Vec<Node>> {
        Ok(self.store.find_all(&Predicate::Parent(None)).await?)
    }

    pub async fn parent(&self, node: &Node) -> ArborResult<Option<Node>> {
        match node.parent_id {
            Some(parent) => Ok(self.store.load(parent).await?),
            None => Ok(None),
        }
    }

    /// Nodes enclosing `node`, the root first unless `with_root` is unset.
    pub async fn ancestors(
        &self,
        node: &Node,
        with_root: bool,
        listing: Listing,
    ) -> ArborResult<Vec<Node>> {
        let mut predicate = Predicate::ancestors_of(node, listing.with_self);
        if !with_root {
            predicate = predicate.and(!Predicate::Parent(None));
        }
        let ancestors = self.store.find(node.scope, &predicate).await?;
        Ok(listing.apply(ancestors))
    }

    pub async fn children(&self, node: &Node, listing: Listing) -> ArborResult<Vec<Node>> {
        let predicate = or_self(children_of(node), node, listing.with_self);
        let children = self.store.find(node.scope, &predicate).await?;
        Ok(listing.apply(children))
    }

    pub async fn first_child(&self, node: &Node) -> ArborResult<Option<Node>> {
        let children = self.children(node, Listing::new().limit(1)).await?;
        Ok(children.into_iter().next())
    }

    pub async fn last_child(&self, node: &Node) -> ArborResult<Option<Node>> {
        let children = self
            .children(node, Listing::new().descending().limit(1))
            .await?;
        Ok(children.into_iter().next())
    }

    pub async fn descendants(&self, node: &Node, listing: Listing) -> ArborResult<Vec<Node>> {
        let predicate = Predicate::descendants_of(node, listing.with_self);
        let descendants = self.store.find(node.scope, &predicate).await?;
        Ok(listing.apply(descendants))
    }

    /// Nodes sharing the parent of `node`. A root has no siblings.
    pub async fn siblings(&self, node: &Node, listing: Listing) -> ArborResult<Vec<Node>> {
        let mut predicate = Predicate::Parent(node.parent_id);
        if !listing.with_self {
            predicate = predicate.and(!Predicate::Id(node.id));
        }
        let siblings = self.store.find(node.scope, &predicate).await?;
        Ok(listing.apply(siblings))
    }

    /// Leaves below `node`; only its own children with `direct_children_only`.
    pub async fn leaves(
        &self,
        node: &Node,
        direct_children_only: bool,
        listing: Listing,
    ) -> ArborResult<Vec<Node>> {
        let below = if direct_children_only {
            children_of(node)
        } else {
            Predicate::descendants_of(node, false)
        };
        let predicate = or_self(below, node, listing.with_self).and(Predicate::Leaf);
        let leaves = self.store.find(node.scope, &predicate).await?;
        Ok(listing.apply(leaves))
    }

    /// Every node of `scope`, or of all scopes, down to `max_depth` levels. Ordered by
    /// `(scope, left, id)`.
    pub async fn full_tree(
        &self,
        scope: Option<ScopeId>,
        max_depth: Option<i64>,
    ) -> ArborResult<Vec<Node>> {
        let predicate = match max_depth {
            Some(depth) => Predicate::Level(CompareOp::Lt, ROOT_LEVEL + depth),
            None => Predicate::All,
        };
        let nodes = match scope {
            Some(scope) => self.store.find(scope, &predicate).await?,
            None => self.store.find_all(&predicate).await?,
        };
        Ok(nodes)
    }

    /// The tree of `scope` as `(node, depth)` pairs in preorder, for rendering indented lists.
    ///
    /// With `exclude`, that node and its subtree are left out, which leaves exactly the nodes
    /// it could be moved below.
    pub async fn outline(
        &self,
        scope: ScopeId,
        exclude: Option<&Node>,
    ) -> ArborResult<Vec<(Node, i64)>> {
        let predicate = match exclude {
            Some(node) if node.scope == scope => !Predicate::descendants_of(node, true),
            _ => Predicate::All,
        };
        let nodes = self.store.find(scope, &predicate).await?;
        Ok(nodes
            .into_iter()
            .map(|node| {
                let depth = node.level - ROOT_LEVEL;
                (node, depth)
            })
            .collect())
    }
}
