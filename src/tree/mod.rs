//! # Tree Engine
//!
//! Structural operations on nested-set trees, split by concern:
//!
//! - `gap`: the only code that writes range columns
//! - `placement`: where a node goes relative to an anchor
//! - `insert`, `relocate`, `promote`, `delete`: single-node structural operations
//! - `rebuild`, `verify`: whole-scope repair and consistency checks
//! - `query`: read-only navigation
//!
//! Every mutating operation locks the scopes it touches, opens one store transaction, re-reads
//! the nodes it acts on and commits once. Returning early drops the transaction, which rolls it
//! back.

use std::{collections::HashSet, iter};

use crate::{
    Arbor,
    base::{ArborResult, InsertError, LockError, Node, PromoteError, ScopeId, StoreError},
    scheduler::{AccessGuard, AccessMode, Resource, exclusive_scopes},
    store::{Predicate, RangeStore},
};

mod delete;
mod gap;
mod insert;
mod placement;
mod promote;
mod query;
mod rebuild;
mod relocate;
mod verify;

pub use placement::Placement;
pub use query::{Direction, Listing};
pub use verify::ViolatedInvariant;

/// Failure to claim an empty scope for a new root.
#[derive(Debug, Display, From)]
pub(crate) enum ClaimError {
    #[from(skip)]
    #[display("Scope {_0} already holds a tree")]
    Taken(ScopeId),
    #[from(skip)]
    #[display("No scope id is left to allocate")]
    Exhausted,
    Lock(LockError),
    Store(StoreError),
}

impl From<ClaimError> for InsertError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::Taken(scope) => InsertError::ScopeTaken(scope),
            ClaimError::Exhausted => InsertError::ScopesExhausted,
            ClaimError::Lock(err) => InsertError::Lock(err),
            ClaimError::Store(err) => InsertError::Store(err),
        }
    }
}

impl From<ClaimError> for PromoteError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::Taken(scope) => PromoteError::ScopeTaken(scope),
            ClaimError::Exhausted => PromoteError::ScopesExhausted,
            ClaimError::Lock(err) => PromoteError::Lock(err),
            ClaimError::Store(err) => PromoteError::Store(err),
        }
    }
}

/// Fails when `node` left `locked` while its lock was pending.
fn ensure_unmoved(node: &Node, locked: ScopeId) -> Result<(), LockError> {
    if node.scope != locked {
        return Err(LockError::Stale(node.id));
    }
    Ok(())
}

impl<S: RangeStore> Arbor<S> {
    async fn lock_scopes(
        &self,
        scopes: impl IntoIterator<Item = ScopeId>,
    ) -> Result<AccessGuard, LockError> {
        self.access.acquire(exclusive_scopes(scopes)).await
    }

    async fn lock_scope_shared(&self, scope: ScopeId) -> Result<AccessGuard, LockError> {
        self.access
            .acquire(HashSet::from([(Resource::Scope(scope), AccessMode::Shared)]))
            .await
    }

    async fn lock_forest(&self) -> Result<AccessGuard, LockError> {
        self.access
            .acquire(HashSet::from([(Resource::Forest, AccessMode::Exclusive)]))
            .await
    }

    /// Locks an empty scope for a new root, together with `also_lock`.
    ///
    /// An explicitly `requested` scope that holds nodes fails with [`ClaimError::Taken`]. Without
    /// a request, scopes are reserved from the allocator until an empty one is found, or
    /// [`ClaimError::Exhausted`] once the sequence has run past `u64::MAX`.
    async fn claim_scope(
        &self,
        requested: Option<ScopeId>,
        also_lock: Option<ScopeId>,
    ) -> Result<(ScopeId, AccessGuard), ClaimError> {
        loop {
            let scope = match requested {
                Some(scope) => scope,
                None => self
                    .scopes
                    .reserve(&*self.store)
                    .await?
                    .ok_or(ClaimError::Exhausted)?,
            };
            let guard = self
                .lock_scopes(iter::once(scope).chain(also_lock))
                .await?;
            if self.store.find(scope, &Predicate::All).await?.is_empty() {
                return Ok((scope, guard));
            }
            if requested.is_some() {
                return Err(ClaimError::Taken(scope));
            }
            debug!(%scope, "Reserved scope is already in use");
        }
    }

    /// Whether `scope` holds no nodes and can take a new root.
    pub async fn scope_available(&self, scope: ScopeId) -> ArborResult<bool> {
        Ok(self.store.find(scope, &Predicate::All).await?.is_empty())
    }
}
