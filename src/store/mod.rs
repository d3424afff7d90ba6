//! # Range Store
//!
//! This module contains the storage boundary of arbor. The tree engine never materializes or
//! validates records itself: it reads nodes by scope and predicate, persists single rows, and
//! issues conditional bulk updates of the range columns, all inside a transaction.
//!
//! [`InMemoryRangeStore`] is the reference implementation, used by the tests and usable as an
//! embedded store.

use async_trait::async_trait;

use crate::base::{Node, NodeId, RangeColumn, Row, ScopeId, StoreResult};

mod memory;
mod predicate;

pub use memory::*;
pub use predicate::*;

/// A bulk move of one contiguous preorder block, optionally into another scope.
///
/// Every row of `source_scope` with `left` in `left_lo..=left_hi` gets `left_delta` added to both
/// range columns, `level_delta` added to its level, and its scope set to `dest_scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub source_scope: ScopeId,
    pub left_lo: i64,
    pub left_hi: i64,
    pub left_delta: i64,
    pub level_delta: i64,
    pub dest_scope: ScopeId,
}

/// A position inside a transaction that can be rolled back to without ending the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(pub(crate) usize);

#[async_trait]
pub trait RangeStore: Send + Sync + 'static {
    type Txn: RangeTxn;

    /// Opens a transaction. Dropping it without [`RangeTxn::commit`] rolls it back.
    async fn begin(&self) -> StoreResult<Self::Txn>;

    async fn load(&self, id: NodeId) -> StoreResult<Option<Node>>;

    /// Nodes of `scope` matching `predicate`, ordered by `left`, ties broken by id.
    async fn find(&self, scope: ScopeId, predicate: &Predicate) -> StoreResult<Vec<Node>>;

    /// Nodes of every scope matching `predicate`, ordered by `(scope, left, id)`.
    async fn find_all(&self, predicate: &Predicate) -> StoreResult<Vec<Node>>;

    /// All scopes that currently hold at least one node, ascending.
    async fn scopes(&self) -> StoreResult<Vec<ScopeId>>;
}

#[async_trait]
pub trait RangeTxn: Send {
    async fn load(&mut self, id: NodeId) -> StoreResult<Option<Node>>;

    async fn find(&mut self, scope: ScopeId, predicate: &Predicate) -> StoreResult<Vec<Node>>;

    async fn count(&mut self, scope: ScopeId) -> StoreResult<usize> {
        Ok(self.find(scope, &Predicate::All).await?.len())
    }

    /// Creates the row when it has no id, otherwise overwrites the stored node. Fails with
    /// [`StoreError::Validation`] when the record is rejected.
    ///
    /// [`StoreError::Validation`]: crate::base::StoreError::Validation
    async fn persist(&mut self, row: Row) -> StoreResult<Node>;

    async fn remove(&mut self, id: NodeId) -> StoreResult<()>;

    /// For every row of `scope` with `column >= threshold`, sets `column += delta`.
    /// Returns the number of updated rows.
    async fn bulk_shift(
        &mut self,
        scope: ScopeId,
        column: RangeColumn,
        threshold: i64,
        delta: i64,
    ) -> StoreResult<usize>;

    /// Applies a [`Relocation`]. Returns the number of updated rows.
    async fn bulk_relocate(&mut self, relocation: &Relocation) -> StoreResult<usize>;

    async fn savepoint(&mut self) -> StoreResult<Savepoint>;

    async fn rollback_to(&mut self, savepoint: Savepoint) -> StoreResult<()>;

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}
