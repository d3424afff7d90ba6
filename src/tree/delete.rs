use tracing::instrument;

use crate::{
    Arbor,
    base::{ArborError, ArborResult, NodeId},
    store::{Predicate, RangeStore, RangeTxn},
    tree::{ensure_unmoved, gap},
};

impl<S: RangeStore> Arbor<S> {
    /// Removes `node_id` together with all of its descendants, deepest first, and closes the
    /// band they occupied.
    #[instrument(skip_all, level = "debug", fields(node = %node_id))]
    pub async fn delete_subtree(&self, node_id: NodeId) -> ArborResult<()> {
        let node = self
            .store
            .load(node_id)
            .await?
            .ok_or(ArborError::NotFound(node_id))?;
        let scope = node.scope;
        let _guard = self.lock_scopes([scope]).await?;

        let mut txn = self.store.begin().await?;
        let node = txn
            .load(node_id)
            .await?
            .ok_or(ArborError::NotFound(node_id))?;
        ensure_unmoved(&node, scope)?;

        let descendants = txn
            .find(scope, &Predicate::descendants_of(&node, false))
            .await?;
        // reverse preorder visits children before their parents
        for descendant in descendants.iter().rev() {
            txn.remove(descendant.id).await?;
        }
        txn.remove(node.id).await?;
        gap::close(&mut txn, scope, node.left, node.size()).await?;
        txn.commit().await?;

        debug!(removed = descendants.len() + 1, "Deleted subtree");
        Ok(())
    }
}
