use tracing::instrument;

use crate::{
    Arbor,
    base::{InsertError, LEAF_SIZE, Node, NodeDraft, NodeId, ROOT_LEVEL, Row, ScopeId, StoreError},
    store::{RangeStore, RangeTxn},
    tree::{Placement, ensure_unmoved, gap, placement},
};

/// Validation rejections keep their own variant, everything else is a store failure.
fn rejected(err: StoreError) -> InsertError {
    match err {
        StoreError::Validation(err) => InsertError::ValidationFailed(err),
        err => InsertError::Store(err),
    }
}

impl<S: RangeStore> Arbor<S> {
    /// Inserts `draft` as a new leaf next to or below `anchor_id`.
    ///
    /// When the store rejects the new row, the gap opened for it is closed again before the
    /// error is returned.
    #[instrument(skip_all, level = "debug", fields(anchor = %anchor_id, %placement))]
    pub async fn insert(
        &self,
        draft: NodeDraft,
        anchor_id: NodeId,
        placement: Placement,
    ) -> Result<Node, InsertError> {
        if let Some(id) = draft.id() {
            return Err(InsertError::AlreadyExists(id));
        }

        let anchor = self
            .store
            .load(anchor_id)
            .await?
            .ok_or(InsertError::InvalidAnchor(anchor_id))?;
        let scope = anchor.scope;
        let _guard = self.lock_scopes([scope]).await?;

        let mut txn = self.store.begin().await?;
        let anchor = txn
            .load(anchor_id)
            .await?
            .ok_or(InsertError::InvalidAnchor(anchor_id))?;
        ensure_unmoved(&anchor, scope)?;

        let target =
            placement::resolve(&anchor, placement).ok_or(InsertError::InvalidAnchor(anchor_id))?;
        debug!(?target, "Resolved placement");

        gap::open(&mut txn, scope, target.position, LEAF_SIZE).await?;
        let row = Row {
            id: None,
            parent_id: target.parent,
            left: target.position,
            right: target.position + LEAF_SIZE - 1,
            level: target.level,
            scope,
            payload: draft.into_payload(),
        };
        match gap::fill(&mut txn, row).await {
            Ok(node) => {
                txn.commit().await?;
                Ok(node)
            }
            Err(StoreError::Validation(err)) => {
                warn!(%err, "New node was rejected, closing its gap");
                gap::close(&mut txn, scope, target.position, LEAF_SIZE).await?;
                txn.commit().await?;
                Err(InsertError::ValidationFailed(err))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Inserts `draft` as the root of an empty scope.
    ///
    /// Without an explicit `scope`, one is reserved from the allocator.
    #[instrument(skip_all, level = "debug", fields(scope = ?scope))]
    pub async fn insert_root(
        &self,
        draft: NodeDraft,
        scope: Option<ScopeId>,
    ) -> Result<Node, InsertError> {
        if let Some(id) = draft.id() {
            return Err(InsertError::AlreadyExists(id));
        }

        let (scope, _guard) = self.claim_scope(scope, None).await?;
        let mut txn = self.store.begin().await?;
        let row = Row {
            id: None,
            parent_id: None,
            left: 1,
            right: LEAF_SIZE,
            level: ROOT_LEVEL,
            scope,
            payload: draft.into_payload(),
        };
        let root = gap::fill(&mut txn, row).await.map_err(rejected)?;
        txn.commit().await?;
        debug!(%scope, id = %root.id, "Inserted root");
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        base::{InsertError, NodeDraft, NodeId, ValidationError},
        store::InMemoryRangeStore,
        tree::{Placement, testing::*},
    };

    /// ```text
    /// root (1, 12)
    /// └── p (2, 11)
    ///     ├── q (3, 4)
    ///     └── x (5, 10)
    ///         ├── x1 (6, 7)
    ///         └── x2 (8, 9)
    /// ```
    #[tokio::test]
    async fn test_first_child_shifts_following_ranges() {
        let arbor = engine().await;
        let root = arbor.insert_root(draft("root"), None).await.unwrap();
        let p = child(&arbor, "p", &root).await;
        child(&arbor, "q", &p).await;
        let x = child(&arbor, "x", &p).await;
        child(&arbor, "x1", &x).await;
        child(&arbor, "x2", &x).await;
        let x = reload(&arbor, &x).await;
        assert_eq!((x.left(), x.right()), (5, 10));

        let new = arbor
            .insert(draft("new"), x.id(), Placement::FirstChild)
            .await
            .unwrap();
        assert_eq!((new.left(), new.right(), new.level()), (6, 7, 4));
        assert_eq!(new.parent_id(), Some(x.id()));
        assert_eq!(reload(&arbor, &x).await.right(), 12);
        assert_eq!(
            layout(&arbor, root.scope()).await,
            vec![
                ("root".into(), 1, 14, 1),
                ("p".into(), 2, 13, 2),
                ("q".into(), 3, 4, 3),
                ("x".into(), 5, 12, 3),
                ("new".into(), 6, 7, 4),
                ("x1".into(), 8, 9, 4),
                ("x2".into(), 10, 11, 4),
            ]
        );
        arbor.verify(root.scope()).await.unwrap();
    }

    #[tokio::test]
    async fn test_sibling_placements() {
        let arbor = engine().await;
        let sample = sample(&arbor).await;

        let before_a = arbor
            .insert(draft("before_a"), sample.a.id(), Placement::PrevSibling)
            .await
            .unwrap();
        let after_a1 = arbor
            .insert(draft("after_a1"), sample.a1.id(), Placement::NextSibling)
            .await
            .unwrap();
        assert_eq!(before_a.parent_id(), Some(sample.root.id()));
        assert_eq!(after_a1.parent_id(), Some(sample.a.id()));
        assert_eq!(after_a1.level(), sample.a1.level());

        let names = layout(&arbor, sample.scope())
            .await
            .into_iter()
            .map(|(name, ..)| name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["root", "before_a", "a", "a1", "after_a1", "a2", "b"]);
        arbor.verify(sample.scope()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_existing_nodes_and_bad_anchors() {
        let arbor = engine().await;
        let sample = sample(&arbor).await;

        let err = arbor
            .insert(NodeDraft::from(sample.b.clone()), sample.a.id(), Placement::LastChild)
            .await
            .unwrap_err();
        assert!(matches!(err, InsertError::AlreadyExists(id) if id == sample.b.id()));

        let missing = NodeId::new(999).unwrap();
        let err = arbor
            .insert(draft("x"), missing, Placement::LastChild)
            .await
            .unwrap_err();
        assert!(matches!(err, InsertError::InvalidAnchor(id) if id == missing));

        let before = arbor.store().snapshot().unwrap();
        let err = arbor
            .insert(draft("x"), sample.root.id(), Placement::NextSibling)
            .await
            .unwrap_err();
        assert!(matches!(err, InsertError::InvalidAnchor(_)));
        assert_eq!(arbor.store().snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_validation_failure_closes_gap() {
        let store = InMemoryRangeStore::new().with_validator(|row: &crate::base::Row| {
            if row.payload.as_ref() == b"bad" {
                return Err(ValidationError::new("payload must not be bad"));
            }
            Ok(())
        });
        let arbor = engine_with(store).await;
        let sample = sample(&arbor).await;
        let before = arbor.store().snapshot().unwrap();

        let err = arbor
            .insert(draft("bad"), sample.a.id(), Placement::FirstChild)
            .await
            .unwrap_err();
        assert!(matches!(err, InsertError::ValidationFailed(_)));
        assert_eq!(arbor.store().snapshot().unwrap(), before);
        arbor.verify(sample.scope()).await.unwrap();

        let err = arbor.insert_root(draft("bad"), None).await.unwrap_err();
        assert!(matches!(err, InsertError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_store_failure_rolls_back() {
        let arbor = engine().await;
        let sample = sample(&arbor).await;
        let before = arbor.store().snapshot().unwrap();

        // both shifts succeed, persisting the row fails
        arbor.store().fail_after_writes(2);
        let err = arbor
            .insert(draft("x"), sample.b.id(), Placement::FirstChild)
            .await
            .unwrap_err();
        assert!(matches!(err, InsertError::Store(_)));
        assert_eq!(arbor.store().snapshot().unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_keep_invariants() {
        let arbor = Arc::new(engine().await);
        let first = sample(&arbor).await;
        let second = sample(&arbor).await;

        let tasks = (0..32).map(|i| {
            let arbor = arbor.clone();
            let anchor = if i % 2 == 0 { first.a.id() } else { second.b.id() };
            let placement = Placement::ALL[i % 4];
            tokio::spawn(async move {
                arbor
                    .insert(draft(&format!("n{i}")), anchor, placement)
                    .await
                    .map(|_| ())
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        arbor.verify(first.scope()).await.unwrap();
        arbor.verify(second.scope()).await.unwrap();
        assert_eq!(arbor.store().len(), 10 + 32);
    }
}
