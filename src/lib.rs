use std::sync::Arc;

#[macro_use]
extern crate derive_more;
#[macro_use]
extern crate tracing;

use crate::{
    config::ArborConfig, scheduler::AccessManager, scope::ScopeAllocator, store::RangeStore,
};

pub mod base;
pub mod config;
pub mod prelude;
mod scheduler;
mod scope;
pub mod store;
pub mod tree;

/// Arbor maintains nested-set ("modified preorder tree traversal") trees on top of a
/// [`RangeStore`].
///
/// ## Encoding
///
/// Every node carries a `(left, right)` range. A node's range strictly contains the ranges of all
/// of its descendants, sibling ranges never overlap, and within one scope the range endpoints
/// form exactly `1..=2N` for `N` nodes. Ancestry, subtrees and depth-first order are therefore
/// plain range comparisons.
///
/// ## Scopes
///
/// One backing table holds any number of independent trees, each tagged with a [`ScopeId`] and
/// owning exactly one root at `left == 1`.
///
/// ## Structural Operations
///
/// - [`insert`] and [`insert_root`] add a fresh leaf
/// - [`move_node`] relocates a subtree, possibly into another scope
/// - [`promote_to_root`] turns a subtree into the tree of its own scope
/// - [`delete_subtree`] removes a node with all its descendants
/// - [`rebuild`] recomputes the ranges of a scope from its `parent_id` links
///
/// Each of them runs inside one store transaction while holding the exclusive lock of every
/// scope it touches. Navigational queries read without locking.
///
/// [`ScopeId`]: crate::base::ScopeId
/// [`insert`]: Arbor::insert
/// [`insert_root`]: Arbor::insert_root
/// [`move_node`]: Arbor::move_node
/// [`promote_to_root`]: Arbor::promote_to_root
/// [`delete_subtree`]: Arbor::delete_subtree
/// [`rebuild`]: Arbor::rebuild
pub struct Arbor<S: RangeStore> {
    store: Arc<S>,
    access: AccessManager,
    scopes: ScopeAllocator,
    config: ArborConfig,
}

impl<S: RangeStore> Arbor<S> {
    /// Initialize this `Arbor` instance. Has to be called from within a tokio runtime.
    pub async fn init(store: S, config: ArborConfig) -> Self {
        info!(?config, "Initializing arbor");
        let access = AccessManager::init(&config.lock);
        let scopes = ScopeAllocator::new(&config.scope);
        Self {
            store: Arc::new(store),
            access,
            scopes,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ArborConfig {
        &self.config
    }
}
