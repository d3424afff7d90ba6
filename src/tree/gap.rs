//! The gap engine. Nothing else in the crate writes `left` or `right`.

use crate::{
    base::{Node, RangeColumn, Row, ScopeId, StoreResult},
    store::{RangeTxn, Relocation},
};

/// Makes room for a block of `size` positions starting at `start`.
///
/// Every range at or after `start` moves up by `size`, and ranges straddling `start` grow by
/// it. Afterwards `start..start + size` is unoccupied.
pub(super) async fn open<T: RangeTxn>(
    txn: &mut T,
    scope: ScopeId,
    start: i64,
    size: i64,
) -> StoreResult<()> {
    debug_assert!(size > 0 && size % 2 == 0, "gap size must be positive and even");
    let lefts = txn.bulk_shift(scope, RangeColumn::Left, start, size).await?;
    let rights = txn.bulk_shift(scope, RangeColumn::Right, start, size).await?;
    trace!(%scope, start, size, lefts, rights, "Opened gap");
    Ok(())
}

/// Reclaims the unoccupied band `start..start + size`. Inverse of [`open`].
pub(super) async fn close<T: RangeTxn>(
    txn: &mut T,
    scope: ScopeId,
    start: i64,
    size: i64,
) -> StoreResult<()> {
    debug_assert!(size > 0 && size % 2 == 0, "gap size must be positive and even");
    let lefts = txn.bulk_shift(scope, RangeColumn::Left, start, -size).await?;
    let rights = txn.bulk_shift(scope, RangeColumn::Right, start, -size).await?;
    trace!(%scope, start, size, lefts, rights, "Closed gap");
    Ok(())
}

/// Shifts one contiguous block as a whole, keeping its inner structure.
pub(super) async fn relocate<T: RangeTxn>(
    txn: &mut T,
    relocation: &Relocation,
) -> StoreResult<()> {
    let rows = txn.bulk_relocate(relocation).await?;
    trace!(?relocation, rows, "Relocated block");
    Ok(())
}

/// Persists a new row into an already opened gap.
pub(super) async fn fill<T: RangeTxn>(txn: &mut T, row: Row) -> StoreResult<Node> {
    debug_assert!(row.id.is_none());
    let node = txn.persist(row).await?;
    trace!(id = %node.id, left = node.left, right = node.right, "Filled gap");
    Ok(node)
}

/// Overwrites the range and level of `node`. Only used when recomputing a whole scope.
pub(super) async fn assign<T: RangeTxn>(
    txn: &mut T,
    node: &Node,
    (left, right): (i64, i64),
    level: i64,
) -> StoreResult<Node> {
    let row = Row {
        left,
        right,
        level,
        ..node.to_row()
    };
    txn.persist(row).await
}
