use tracing::instrument;

use crate::{
    Arbor,
    base::{InvalidMove, MoveError, Node, NodeId},
    store::{RangeStore, RangeTxn, Relocation},
    tree::{Placement, ensure_unmoved, gap, placement},
};

impl<S: RangeStore> Arbor<S> {
    /// Moves the subtree of `node_id` next to or below `anchor_id`, possibly into another scope.
    ///
    /// Opens a gap at the destination, shifts the whole block into it, then closes the band it
    /// left behind. Nothing is committed unless every step succeeds.
    #[instrument(
        skip_all,
        level = "debug",
        fields(node = %node_id, anchor = %anchor_id, %placement)
    )]
    pub async fn move_node(
        &self,
        node_id: NodeId,
        anchor_id: NodeId,
        placement: Placement,
    ) -> Result<Node, MoveError> {
        let node = self
            .store
            .load(node_id)
            .await?
            .ok_or(MoveError::NotFound(node_id))?;
        let anchor = self
            .store
            .load(anchor_id)
            .await?
            .ok_or(MoveError::InvalidAnchor(anchor_id))?;
        if node_id == anchor_id {
            return Err(InvalidMove::SelfAnchor.into());
        }
        let (source_scope, dest_scope) = (node.scope, anchor.scope);
        let _guard = self.lock_scopes([source_scope, dest_scope]).await?;

        let mut txn = self.store.begin().await?;
        let node = txn
            .load(node_id)
            .await?
            .ok_or(MoveError::NotFound(node_id))?;
        let anchor = txn
            .load(anchor_id)
            .await?
            .ok_or(MoveError::InvalidAnchor(anchor_id))?;
        ensure_unmoved(&node, source_scope)?;
        ensure_unmoved(&anchor, dest_scope)?;

        if anchor.is_descendant_of(&node) {
            return Err(InvalidMove::IntoDescendant.into());
        }
        let target = placement::resolve(&anchor, placement).ok_or(InvalidMove::RootSibling)?;
        debug!(?target, "Resolved placement");

        let size = node.size();
        gap::open(&mut txn, target.scope, target.position, size).await?;

        // the gap may have shifted the block itself
        let node = txn
            .load(node_id)
            .await?
            .ok_or(MoveError::NotFound(node_id))?;
        let relocation = Relocation {
            source_scope: node.scope,
            left_lo: node.left,
            left_hi: node.right,
            left_delta: target.position - node.left,
            level_delta: target.level - node.level,
            dest_scope: target.scope,
        };
        gap::relocate(&mut txn, &relocation).await?;
        gap::close(&mut txn, node.scope, node.left, size).await?;

        let mut moved = txn
            .load(node_id)
            .await?
            .ok_or(MoveError::NotFound(node_id))?;
        if moved.parent_id != target.parent {
            moved = txn.persist(moved.to_row().with_parent(target.parent)).await?;
        }
        txn.commit().await?;
        Ok(moved)
    }
}
