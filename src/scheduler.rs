use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};

use crate::{
    base::{LockError, ScopeId},
    config::LockConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum AccessMode {
    Exclusive,
    Shared,
    IntentExclusive,
    IntentShared,
}

impl AccessMode {
    /// Limit this `AccessMode` to `target_mode`. `IS` is the lowest mode.
    ///
    /// - `X -> target`: Anything is `<= X`.
    /// - `S -> IS`: `S` can go to `IS` but never `IX`.
    /// - `IX -> IS`
    /// - `old -> old`: All others stay.
    #[inline]
    const fn downgrade(&self, target_mode: Self) -> Self {
        match (self, target_mode) {
            (AccessMode::Exclusive, limit) => limit,
            (AccessMode::Shared, AccessMode::IntentShared) => AccessMode::IntentShared,
            (AccessMode::IntentExclusive, AccessMode::IntentShared) => AccessMode::IntentShared,
            (current, _) => *current,
        }
    }

    /// The mode a parent resource is held in while a child is held in `self`.
    #[inline]
    const fn intent(&self) -> Self {
        match self {
            AccessMode::Shared | AccessMode::IntentShared => AccessMode::IntentShared,
            AccessMode::Exclusive | AccessMode::IntentExclusive => AccessMode::IntentExclusive,
        }
    }
}

/// ## Resource Hierarchy
///
/// - `Forest`: the whole backing table
///   - `Scope(scope)`: one independent tree
///
/// Structural operations hold their scopes `X`, which puts `IX` on the forest. Rebuilding every
/// scope at once holds the forest `X` and thereby excludes all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Resource {
    Forest,
    Scope(ScopeId),
}

/// # Lock State
///
/// | Requested \ Held | IS  | IX  |  S  | X  |
/// |------------------|-----|-----|-----|----|
/// |        IS        | Yes | Yes | Yes | No |
/// |        IX        | Yes | Yes | No  | No |
/// |        S         | Yes | No  | Yes | No |
/// |        X         | No  | No  | No  | No |
#[derive(Debug, Default)]
struct LockState {
    x_locked: bool,
    s_locks: u32,
    ix_locks: u32,
    is_locks: u32,
}

impl LockState {
    #[inline]
    const fn allows(&self, access_mode: &AccessMode) -> bool {
        match access_mode {
            AccessMode::Exclusive => self.all_released(),
            AccessMode::Shared => self.ix_locks == 0 && !self.x_locked,
            AccessMode::IntentExclusive => self.s_locks == 0 && !self.x_locked,
            AccessMode::IntentShared => !self.x_locked,
        }
    }

    fn acquire(&mut self, access_mode: &AccessMode) {
        match access_mode {
            AccessMode::Exclusive => self.x_locked = true,
            AccessMode::Shared => self.s_locks += 1,
            AccessMode::IntentExclusive => self.ix_locks += 1,
            AccessMode::IntentShared => self.is_locks += 1,
        }
    }

    fn release(&mut self, access_mode: &AccessMode) {
        match access_mode {
            AccessMode::Exclusive => self.x_locked = false,
            AccessMode::Shared => self.s_locks -= 1,
            AccessMode::IntentExclusive => self.ix_locks -= 1,
            AccessMode::IntentShared => self.is_locks -= 1,
        }
    }

    #[inline]
    const fn all_released(&self) -> bool {
        self.is_locks == 0 && self.ix_locks == 0 && self.s_locks == 0 && !self.x_locked
    }
}

pub(crate) type ResourceAccessSet = HashSet<(Resource, AccessMode)>;

/// Adds the intent locks on the forest that every scope lock implies.
fn expand_resource_access_set(resources: ResourceAccessSet) -> ResourceAccessSet {
    let mut expanded_set = resources;
    let parents = expanded_set
        .iter()
        .filter_map(|(res, mode)| match res {
            Resource::Forest => None,
            Resource::Scope(_) => Some((Resource::Forest, mode.intent())),
        })
        .collect::<Vec<_>>();
    expanded_set.extend(parents);
    expanded_set
}

/// Exclusive access to every listed scope, requested as one unit so two-scope operations
/// cannot deadlock against each other.
pub(crate) fn exclusive_scopes(scopes: impl IntoIterator<Item = ScopeId>) -> ResourceAccessSet {
    scopes
        .into_iter()
        .map(|scope| (Resource::Scope(scope), AccessMode::Exclusive))
        .collect()
}

pub(crate) struct PendingRequest {
    resources: ResourceAccessSet,
    grant_tx: oneshot::Sender<AccessGuard>,
}

pub(crate) enum DispatcherMessage {
    Acquire(PendingRequest),
    Release(usize),
    /// Downgrades to a set with lower access modes, see [`AccessMode::downgrade`].
    Downgrade {
        guard_id: usize,
        target_mode: AccessMode,
    },
}

/// Holds the granted resources until dropped.
#[derive(Debug)]
pub(crate) struct AccessGuard {
    id: usize,
    is_released: bool,
    #[debug(skip)]
    tx_to_dispatcher: mpsc::UnboundedSender<DispatcherMessage>,
}

impl AccessGuard {
    /// Lowers every held mode to at most `target_mode`, letting compatible waiters in.
    pub(crate) fn downgrade(&mut self, target_mode: AccessMode) {
        if self.is_released {
            warn!(guard = self.id, "Could not downgrade access guard: Already released");
            return;
        }

        if self
            .tx_to_dispatcher
            .send(DispatcherMessage::Downgrade {
                guard_id: self.id,
                target_mode,
            })
            .is_err()
        {
            warn!(guard = self.id, "Could not downgrade access guard: Dispatcher closed");
        }
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        if self.is_released {
            return;
        }
        self.is_released = true;

        if self
            .tx_to_dispatcher
            .send(DispatcherMessage::Release(self.id))
            .is_err()
        {
            warn!(guard = self.id, "Could not release access guard: Dispatcher closed");
        }
    }
}

struct QueuedRequest {
    request: PendingRequest,
    expanded_resources: ResourceAccessSet,
    skip_count: u32,
}

impl From<PendingRequest> for QueuedRequest {
    fn from(request: PendingRequest) -> Self {
        let expanded_resources = expand_resource_access_set(request.resources.clone());
        Self {
            request,
            expanded_resources,
            skip_count: 0,
        }
    }
}

struct AccessDispatcher {
    resource_accesses: HashMap<Resource, LockState>,
    acquire_queue: VecDeque<QueuedRequest>,
    /// Handed to granted guards. Weak, so the dispatcher ends once the manager and every guard
    /// are gone.
    tx: mpsc::WeakUnboundedSender<DispatcherMessage>,
    rx: mpsc::UnboundedReceiver<DispatcherMessage>,
    /// The maximum amount of times a [`QueuedRequest`] may be skipped over.
    max_skip_tolerance: u32,
    next_guard_id: usize,
    /// `guard_id` -> `(requested, expanded)`
    alive_guards: HashMap<usize, (ResourceAccessSet, ResourceAccessSet)>,
}

impl AccessDispatcher {
    async fn run(&mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.handle_message(msg);
        }
        debug!("Access dispatcher stopped");
    }

    fn get_guard_id(&mut self) -> usize {
        let id = self.next_guard_id;
        self.next_guard_id += 1;
        id
    }

    fn handle_message(&mut self, message: DispatcherMessage) {
        match message {
            DispatcherMessage::Acquire(request) => {
                self.acquire_queue.push_back(request.into());
                self.try_grant_waiting();
            }
            DispatcherMessage::Release(guard_id) => {
                let Some((_requested, expanded)) = self.alive_guards.remove(&guard_id) else {
                    warn!(guard = guard_id, "Could not release access guard: Guard not found");
                    return;
                };
                self.release(&expanded);
                self.try_grant_waiting();
            }
            DispatcherMessage::Downgrade {
                guard_id,
                target_mode,
            } => {
                let Some((requested, expanded)) = self.alive_guards.remove(&guard_id) else {
                    warn!(guard = guard_id, "Could not downgrade access guard: Guard not found");
                    return;
                };
                self.release(&expanded);
                let new_requested: ResourceAccessSet = requested
                    .into_iter()
                    .map(|(res, mode)| (res, mode.downgrade(target_mode)))
                    .collect();
                let new_expanded = expand_resource_access_set(new_requested.clone());
                self.acquire(&new_expanded);
                self.alive_guards
                    .insert(guard_id, (new_requested, new_expanded));

                self.try_grant_waiting();
            }
        }
    }

    fn release(&mut self, resources: &ResourceAccessSet) {
        for (resource, access_mode) in resources {
            let Some(lock_state) = self.resource_accesses.get_mut(resource) else {
                error!(?resource, "Released a resource that was never locked");
                continue;
            };
            lock_state.release(access_mode);
            // drop empty entries, so the map only tracks scopes that are in use
            if lock_state.all_released() {
                self.resource_accesses.remove(resource);
            }
        }
    }

    fn acquire(&mut self, resources: &ResourceAccessSet) {
        for (resource, access_mode) in resources {
            self.resource_accesses
                .entry(resource.clone())
                .or_default()
                .acquire(access_mode);
        }
    }

    /// Grants waiting requests in queue order. A request that was overtaken more than
    /// [`max_skip_tolerance`] times becomes a barrier for everything queued behind it.
    ///
    /// [`max_skip_tolerance`]: Self::max_skip_tolerance
    fn try_grant_waiting(&mut self) {
        let mut still_waiting = VecDeque::new();
        let mut barrier_active = false;
        while let Some(mut queued) = self.acquire_queue.pop_front() {
            // the requester gave up (timeout or cancellation)
            if queued.request.grant_tx.is_closed() {
                continue;
            }

            if barrier_active {
                still_waiting.push_back(queued);
                continue;
            }

            let all_allowed = queued
                .expanded_resources
                .iter()
                .all(|(resource, access_mode)| {
                    self.resource_accesses
                        .get(resource)
                        .is_none_or(|lock_state| lock_state.allows(access_mode))
                });

            if !all_allowed {
                barrier_active = queued.skip_count >= self.max_skip_tolerance;
                if !barrier_active {
                    queued.skip_count += 1;
                }
                still_waiting.push_back(queued);
                continue;
            }

            let Some(tx_to_dispatcher) = self.tx.upgrade() else {
                // nobody can release a guard anymore, nothing left to grant
                break;
            };
            let guard_id = self.get_guard_id();
            let guard = AccessGuard {
                id: guard_id,
                is_released: false,
                tx_to_dispatcher,
            };
            match queued.request.grant_tx.send(guard) {
                Ok(()) => {
                    self.acquire(&queued.expanded_resources);
                    self.alive_guards.insert(
                        guard_id,
                        (queued.request.resources, queued.expanded_resources),
                    );
                }
                Err(mut guard) => {
                    // receiver vanished in between, the guard never held anything
                    guard.is_released = true;
                }
            }
        }
        self.acquire_queue = still_waiting;
    }
}

/// Serializes structural operations per scope.
///
/// Lock state lives in an [`AccessDispatcher`] running as a background task; requests and
/// releases reach it through an unbounded channel, and grants come back as [`AccessGuard`]s.
pub(crate) struct AccessManager {
    tx_to_dispatcher: mpsc::UnboundedSender<DispatcherMessage>,
    acquire_timeout: Option<Duration>,
}

impl AccessManager {
    pub(crate) fn init(config: &LockConfig) -> Self {
        let (tx_to_dispatcher, rx) = mpsc::unbounded_channel();

        let mut dispatcher = AccessDispatcher {
            resource_accesses: HashMap::new(),
            acquire_queue: VecDeque::new(),
            tx: tx_to_dispatcher.downgrade(),
            rx,
            max_skip_tolerance: config.max_skip_tolerance,
            next_guard_id: 0,
            alive_guards: HashMap::new(),
        };
        tokio::spawn(async move {
            dispatcher.run().await;
        });

        Self {
            tx_to_dispatcher,
            acquire_timeout: config.acquire_timeout,
        }
    }

    /// Waits until every resource in `resources` can be held in its requested mode.
    ///
    /// Fails with [`LockError::Timeout`] once the configured acquire timeout elapses. The
    /// request is then withdrawn; no retry happens here.
    pub(crate) async fn acquire(
        &self,
        resources: ResourceAccessSet,
    ) -> Result<AccessGuard, LockError> {
        let (tx, rx) = oneshot::channel();

        let request = PendingRequest {
            resources,
            grant_tx: tx,
        };
        self.tx_to_dispatcher
            .send(DispatcherMessage::Acquire(request))
            .map_err(|_| LockError::Closed)?;

        let granted = match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx)
                .await
                .map_err(|_| LockError::Timeout(timeout))?,
            None => rx.await,
        };
        granted.map_err(|_| LockError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    macro_rules! resource_set {
        (@res Scope($scope:expr)) => {
            Resource::Scope(ScopeId::new($scope))
        };
        (@res Forest) => {
            Resource::Forest
        };

        (@mode IntentShared) => { AccessMode::IntentShared };
        (@mode IntentExclusive) => { AccessMode::IntentExclusive };
        (@mode Shared) => { AccessMode::Shared };
        (@mode Exclusive) => { AccessMode::Exclusive };

        // "Scope(1) => Exclusive, Forest => Shared, ..."
        ($($kind:ident $(($($args:expr),*))? => $mode:ident),* $(,)?) => {{
            let mut _set = ::std::collections::HashSet::new();
            $(
                let res = resource_set!(@res $kind $(($($args),*))?);
                let mode = resource_set!(@mode $mode);
                _set.insert((res, mode));
            )*
            _set
        }};
    }

    fn manager(max_skip_tolerance: u32, acquire_timeout: Option<Duration>) -> AccessManager {
        AccessManager::init(&LockConfig {
            max_skip_tolerance,
            acquire_timeout,
        })
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let manager = manager(64, None);

        let _first = manager
            .acquire(resource_set![Scope(1) => Exclusive])
            .await
            .unwrap();
        // a different scope is granted right away
        let second = tokio::time::timeout(
            Duration::from_millis(20),
            manager.acquire(resource_set![Scope(2) => Exclusive]),
        )
        .await;
        assert!(second.is_ok(), "Scope 2 must not wait for scope 1");
    }

    #[tokio::test]
    async fn test_exclusive_scope_blocks_until_released() {
        let manager = manager(64, None);

        let guard = manager
            .acquire(resource_set![Scope(1) => Exclusive])
            .await
            .unwrap();

        let waiting = manager.acquire(resource_set![Scope(1) => Exclusive]);
        tokio::pin!(waiting);
        tokio::task::yield_now().await;
        let res = tokio::time::timeout(Duration::from_millis(10), &mut waiting).await;
        assert!(res.is_err(), "Second X-lock should wait for the first one");

        drop(guard);
        tokio::time::timeout(Duration::from_millis(20), waiting)
            .await
            .expect("X-lock should be granted after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_forest_exclusive_waits_for_scope_intent() {
        let manager = manager(64, None);

        let scope_guard = manager
            .acquire(resource_set![Scope(3) => Exclusive])
            .await
            .unwrap();

        let forest = manager.acquire(resource_set![Forest => Exclusive]);
        tokio::pin!(forest);
        tokio::task::yield_now().await;
        let res = tokio::time::timeout(Duration::from_millis(10), &mut forest).await;
        assert!(res.is_err(), "Forest X-lock must wait for the IX held by scope 3");

        drop(scope_guard);
        let _forest_guard = tokio::time::timeout(Duration::from_millis(20), forest)
            .await
            .expect("Forest X-lock should be granted once scope 3 is free")
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_times_out() {
        let manager = manager(64, Some(Duration::from_millis(10)));

        let _guard = manager
            .acquire(resource_set![Scope(1) => Exclusive])
            .await
            .unwrap();
        let err = manager
            .acquire(resource_set![Scope(1) => Shared])
            .await
            .unwrap_err();
        assert_eq!(err, LockError::Timeout(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_skip_tolerance_builds_barrier() {
        let max_skip_tolerance = 4;
        let manager = manager(max_skip_tolerance, None);
        let shared = resource_set![Scope(1) => Shared];

        let first_shared = manager.acquire(shared.clone()).await.unwrap();

        let exclusive = manager.acquire(resource_set![Scope(1) => Exclusive]);
        tokio::pin!(exclusive);
        tokio::task::yield_now().await;
        let res = tokio::time::timeout(Duration::from_millis(5), &mut exclusive).await;
        assert!(res.is_err(), "The X-lock should not have been acquired yet");

        // the X-lock was skipped once already when it was first denied
        let mut overtaking = Vec::new();
        for _ in 0..max_skip_tolerance - 1 {
            overtaking.push(manager.acquire(shared.clone()));
        }
        let granted = futures::future::join_all(overtaking).await;
        assert!(granted.iter().all(Result::is_ok));

        let res = tokio::time::timeout(Duration::from_millis(10), manager.acquire(shared)).await;
        assert!(res.is_err(), "Barrier should prevent jumping ahead of the X-lock");

        drop(first_shared);
        drop(granted);
        let _exclusive_guard = tokio::time::timeout(Duration::from_millis(20), exclusive)
            .await
            .expect("X-lock should be granted after all S-locks are gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_downgrade_lets_readers_in() {
        let manager = manager(64, None);

        let mut writer = manager
            .acquire(resource_set![Scope(5) => Exclusive])
            .await
            .unwrap();

        let reader = manager.acquire(resource_set![Scope(5) => Shared]);
        tokio::pin!(reader);
        tokio::task::yield_now().await;
        let res = tokio::time::timeout(Duration::from_millis(10), &mut reader).await;
        assert!(res.is_err(), "The S-lock should be blocked by the X-lock");

        writer.downgrade(AccessMode::Shared);
        tokio::task::yield_now().await;
        let reader_guard = tokio::time::timeout(Duration::from_millis(10), reader)
            .await
            .expect("S-lock should be granted after the X-lock is downgraded")
            .unwrap();

        drop(writer);
        drop(reader_guard);
    }

    #[test]
    fn test_expansion_adds_forest_intents() {
        let expanded = expand_resource_access_set(resource_set![
            Scope(1) => Exclusive,
            Scope(2) => Shared,
        ]);
        assert!(expanded.contains(&(Resource::Forest, AccessMode::IntentExclusive)));
        assert!(expanded.contains(&(Resource::Forest, AccessMode::IntentShared)));
        assert_eq!(expanded.len(), 4);
    }
}
