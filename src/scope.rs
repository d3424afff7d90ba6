use tokio::sync::Mutex;

use crate::{
    base::{ScopeId, StoreResult},
    config::ScopeConfig,
    store::RangeStore,
};

#[derive(Debug, Clone, Copy)]
enum Sequence {
    Unseeded,
    Next(u64),
    Exhausted,
}

/// Hands out scope ids for new trees from a reserved sequence.
///
/// The sequence is seeded once from the highest scope in the store and only ever counts up, so
/// two concurrent callers never receive the same id. A reserved id may still turn out to be
/// taken by an explicitly chosen scope; callers check emptiness under the scope lock.
///
/// Once `u64::MAX` has been handed out, or is already in use when seeding, the sequence is
/// exhausted and [`ScopeAllocator::reserve`] returns `None` for good.
#[derive(Debug)]
pub(crate) struct ScopeAllocator {
    first_scope: u64,
    next: Mutex<Sequence>,
}

impl ScopeAllocator {
    pub(crate) fn new(config: &ScopeConfig) -> Self {
        Self {
            first_scope: config.first_scope,
            next: Mutex::new(Sequence::Unseeded),
        }
    }

    pub(crate) async fn reserve<S: RangeStore>(&self, store: &S) -> StoreResult<Option<ScopeId>> {
        let mut next = self.next.lock().await;
        let scope = match *next {
            Sequence::Next(scope) => scope,
            Sequence::Exhausted => return Ok(None),
            Sequence::Unseeded => {
                let seed = match store.scopes().await?.last() {
                    Some(highest) => highest.get().checked_add(1).map(|s| s.max(self.first_scope)),
                    None => Some(self.first_scope),
                };
                let Some(seed) = seed else {
                    warn!("Highest scope id is in use, cannot allocate scopes");
                    *next = Sequence::Exhausted;
                    return Ok(None);
                };
                debug!(seed, "Seeded scope allocator");
                seed
            }
        };
        *next = scope.checked_add(1).map_or(Sequence::Exhausted, Sequence::Next);
        Ok(Some(ScopeId::new(scope)))
    }
}
