use std::collections::HashMap;

use itertools::Itertools;
use tracing::instrument;

use crate::{
    Arbor,
    base::{ArborError, ArborResult, Node, NodeId, ROOT_LEVEL, ScopeId},
    config::ChildOrder,
    scheduler::AccessMode,
    store::{Predicate, RangeStore, RangeTxn},
    tree::{gap, verify},
};

enum Frame<'a> {
    Enter(&'a Node, i64),
    Exit(&'a Node),
}

/// Recomputes every range and level of `scope` from its `parent_id` links.
///
/// Only rows whose values change are written. Returns the number of written rows.
async fn rebuild_scope<T: RangeTxn>(
    txn: &mut T,
    scope: ScopeId,
    order: ChildOrder,
) -> ArborResult<usize> {
    let nodes = txn.find(scope, &Predicate::All).await?;
    if nodes.is_empty() {
        return Ok(0);
    }

    let root = match nodes.iter().filter(|n| n.is_root()).collect_vec().as_slice() {
        [root] => *root,
        [] => return Err(ArborError::MissingRoot(scope)),
        roots => {
            return Err(ArborError::MultipleRoots {
                scope,
                roots: roots.iter().map(|n| n.id).collect(),
            });
        }
    };

    let mut children: HashMap<NodeId, Vec<&Node>> = nodes
        .iter()
        .filter_map(|n| n.parent_id.map(|parent| (parent, n)))
        .into_group_map();
    for siblings in children.values_mut() {
        match order {
            ChildOrder::Left => siblings.sort_by_key(|n| (n.left, n.id)),
            ChildOrder::Id => siblings.sort_by_key(|n| n.id),
        }
    }

    // (node, left, right, level) in post order
    let mut assigned = Vec::with_capacity(nodes.len());
    let mut entered: HashMap<NodeId, (i64, i64)> = HashMap::with_capacity(nodes.len());
    let mut counter = 0;
    let mut stack = vec![Frame::Enter(root, ROOT_LEVEL)];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(node, level) => {
                counter += 1;
                entered.insert(node.id, (counter, level));
                stack.push(Frame::Exit(node));
                if let Some(kids) = children.get(&node.id) {
                    stack.extend(kids.iter().rev().map(|kid| Frame::Enter(*kid, level + 1)));
                }
            }
            Frame::Exit(node) => {
                counter += 1;
                let (left, level) = entered[&node.id];
                assigned.push((node, left, counter, level));
            }
        }
    }

    if assigned.len() != nodes.len() {
        let unreachable = nodes
            .iter()
            .filter(|n| !entered.contains_key(&n.id))
            .map(|n| n.id)
            .sorted()
            .collect();
        return Err(ArborError::Unreachable {
            scope,
            nodes: unreachable,
        });
    }

    let mut written = 0;
    for (node, left, right, level) in assigned {
        if (node.left, node.right, node.level) != (left, right, level) {
            gap::assign(txn, node, (left, right), level).await?;
            written += 1;
        }
    }
    Ok(written)
}

impl<S: RangeStore> Arbor<S> {
    /// Recomputes the encoding of `scope` from its `parent_id` links, repairing any corruption of
    /// the range columns.
    ///
    /// Rebuilding an intact tree changes nothing.
    #[instrument(skip_all, level = "debug", fields(%scope))]
    pub async fn rebuild(&self, scope: ScopeId) -> ArborResult<()> {
        let mut guard = self.lock_scopes([scope]).await?;

        let mut txn = self.store.begin().await?;
        let written = rebuild_scope(&mut txn, scope, self.config.rebuild.child_order).await?;
        txn.commit().await?;
        info!(%scope, written, "Rebuilt scope");

        if self.config.rebuild.verify_after {
            guard.downgrade(AccessMode::Shared);
            self.ensure_intact([scope]).await?;
        }
        Ok(())
    }

    /// Rebuilds every scope in one transaction while holding the whole forest.
    ///
    /// A scope that cannot be rebuilt is left as it was; the others are still committed and the
    /// failed ones are reported as [`ArborError::RebuildIncomplete`].
    #[instrument(skip_all, level = "debug")]
    pub async fn rebuild_all(&self) -> ArborResult<()> {
        let _guard = self.lock_forest().await?;

        let scopes = self.store.scopes().await?;
        let mut txn = self.store.begin().await?;
        let mut failed = Vec::new();
        for &scope in &scopes {
            let savepoint = txn.savepoint().await?;
            match rebuild_scope(&mut txn, scope, self.config.rebuild.child_order).await {
                Ok(written) => debug!(%scope, written, "Rebuilt scope"),
                Err(err) => {
                    warn!(%scope, %err, "Could not rebuild scope");
                    txn.rollback_to(savepoint).await?;
                    failed.push(scope);
                }
            }
        }
        txn.commit().await?;
        info!(scopes = scopes.len(), failed = failed.len(), "Rebuilt all scopes");

        if !failed.is_empty() {
            return Err(ArborError::RebuildIncomplete(failed));
        }
        if self.config.rebuild.verify_after {
            self.ensure_intact(scopes).await?;
        }
        Ok(())
    }

    async fn ensure_intact(&self, scopes: impl IntoIterator<Item = ScopeId>) -> ArborResult<()> {
        let mut violations = Vec::new();
        for scope in scopes {
            let nodes = self.store.find(scope, &Predicate::All).await?;
            violations.extend(verify::check(&nodes));
        }
        if !violations.is_empty() {
            error!(violations = violations.len(), "Rebuilt tree does not verify");
            return Err(ArborError::Corrupt(violations));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{
        config::ArborConfig,
        store::InMemoryRangeStore,
        tests::setup_tracing,
        tree::{Placement, testing::*},
    };

    fn id(val: u64) -> NodeId {
        NodeId::new(val).unwrap()
    }

    /// Correct parent links with garbage ranges and levels.
    fn scrambled(scope: u64, ids: [u64; 4]) -> Vec<Node> {
        let [root, a, a1, b] = ids;
        let node = |val: u64, parent: Option<u64>, range: (i64, i64)| {
            Node::from_parts(
                id(val),
                parent.map(id),
                range,
                9,
                ScopeId::new(scope),
                Bytes::from(format!("n{val}")),
            )
        };
        vec![
            node(root, None, (1, 100)),
            node(a, Some(root), (20, 21)),
            node(a1, Some(a), (-5, 3)),
            node(b, Some(root), (40, 41)),
        ]
    }

    #[tokio::test]
    async fn test_rebuild_repairs_ranges() {
        let store = InMemoryRangeStore::from_nodes(scrambled(1, [1, 2, 3, 4]));
        let arbor = engine_with(store).await;
        assert!(arbor.verify(ScopeId::new(1)).await.is_err());

        arbor.rebuild(ScopeId::new(1)).await.unwrap();
        assert_eq!(
            layout(&arbor, ScopeId::new(1)).await,
            vec![
                ("n1".into(), 1, 8, 1),
                ("n2".into(), 2, 5, 2),
                ("n3".into(), 3, 4, 3),
                ("n4".into(), 6, 7, 2),
            ]
        );
        arbor.verify(ScopeId::new(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let arbor = engine().await;
        let sample = sample(&arbor).await;
        arbor
            .move_node(sample.b.id(), sample.a1.id(), Placement::FirstChild)
            .await
            .unwrap();
        let before = arbor.store().snapshot().unwrap();

        arbor.rebuild(sample.scope()).await.unwrap();
        assert_eq!(arbor.store().snapshot().unwrap(), before);
        arbor.rebuild(sample.scope()).await.unwrap();
        assert_eq!(arbor.store().snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_rebuild_rejects_broken_links() {
        let mut nodes = scrambled(1, [1, 2, 3, 4]);
        nodes[0].parent_id = Some(id(4));
        let arbor = engine_with(InMemoryRangeStore::from_nodes(nodes)).await;
        let before = arbor.store().snapshot().unwrap();

        let err = arbor.rebuild(ScopeId::new(1)).await.unwrap_err();
        assert!(matches!(err, ArborError::MissingRoot(_)));
        assert_eq!(arbor.store().snapshot().unwrap(), before);

        let mut nodes = scrambled(1, [1, 2, 3, 4]);
        nodes[1].parent_id = Some(id(77));
        let arbor = engine_with(InMemoryRangeStore::from_nodes(nodes)).await;
        let err = arbor.rebuild(ScopeId::new(1)).await.unwrap_err();
        assert!(matches!(
            err,
            ArborError::Unreachable { ref nodes, .. } if *nodes == vec![id(2), id(3)]
        ));
    }

    #[tokio::test]
    async fn test_rebuild_all_isolates_failing_scopes() {
        let mut nodes = scrambled(1, [1, 2, 3, 4]);
        let mut broken = scrambled(2, [5, 6, 7, 8]);
        broken[0].parent_id = Some(id(6));
        nodes.extend(broken);
        let arbor = engine_with(InMemoryRangeStore::from_nodes(nodes)).await;
        let broken_before = layout(&arbor, ScopeId::new(2)).await;

        let err = arbor.rebuild_all().await.unwrap_err();
        assert!(matches!(
            err,
            ArborError::RebuildIncomplete(ref scopes) if *scopes == vec![ScopeId::new(2)]
        ));

        arbor.verify(ScopeId::new(1)).await.unwrap();
        assert_eq!(layout(&arbor, ScopeId::new(2)).await, broken_before);
    }

    #[tokio::test]
    async fn test_child_order_by_id() {
        let store = InMemoryRangeStore::from_nodes(scrambled(1, [1, 4, 2, 3]));
        let mut config = ArborConfig::for_testing();
        config.rebuild.child_order = ChildOrder::Id;
        setup_tracing();
        let arbor = Arbor::init(store, config).await;

        arbor.rebuild(ScopeId::new(1)).await.unwrap();
        let names = layout(&arbor, ScopeId::new(1))
            .await
            .into_iter()
            .map(|(name, ..)| name)
            .collect_vec();
        // `b` (id 3) now precedes `a` (id 4) and its child (id 2)
        assert_eq!(names, ["n1", "n3", "n4", "n2"]);
    }
}
