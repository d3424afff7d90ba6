use tracing::instrument;

use crate::{
    Arbor,
    base::{Node, NodeId, PromoteError, ROOT_LEVEL, ScopeId},
    store::{RangeStore, RangeTxn, Relocation},
    tree::{ensure_unmoved, gap},
};

impl<S: RangeStore> Arbor<S> {
    /// Detaches the subtree of `node_id` and makes it the tree of an empty scope.
    ///
    /// The node becomes the root at `left == 1`; its descendants keep their relative layout.
    #[instrument(skip_all, level = "debug", fields(node = %node_id, scope = ?scope))]
    pub async fn promote_to_root(
        &self,
        node_id: NodeId,
        scope: Option<ScopeId>,
    ) -> Result<Node, PromoteError> {
        let node = self
            .store
            .load(node_id)
            .await?
            .ok_or(PromoteError::NotFound(node_id))?;
        if node.is_root() {
            return Err(PromoteError::AlreadyRoot(node_id));
        }
        let source_scope = node.scope;
        let (dest_scope, _guard) = self.claim_scope(scope, Some(source_scope)).await?;

        let mut txn = self.store.begin().await?;
        let node = txn
            .load(node_id)
            .await?
            .ok_or(PromoteError::NotFound(node_id))?;
        ensure_unmoved(&node, source_scope)?;
        if node.is_root() {
            return Err(PromoteError::AlreadyRoot(node_id));
        }

        let size = node.size();
        let relocation = Relocation {
            source_scope,
            left_lo: node.left,
            left_hi: node.right,
            left_delta: 1 - node.left,
            level_delta: ROOT_LEVEL - node.level,
            dest_scope,
        };
        gap::relocate(&mut txn, &relocation).await?;
        gap::close(&mut txn, source_scope, node.left, size).await?;

        let root = txn
            .load(node_id)
            .await?
            .ok_or(PromoteError::NotFound(node_id))?;
        let root = txn.persist(root.to_row().with_parent(None)).await?;
        txn.commit().await?;
        debug!(%source_scope, %dest_scope, "Promoted node to root");
        Ok(root)
    }
}
