use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bincode::Options as BincodeOptions;
use bytes::Bytes;
use itertools::Itertools;
use parking_lot::Mutex;

use crate::{
    base::{
        Node, NodeId, RangeColumn, Row, ScopeId, StoreError, StoreResult, ValidationError,
        bincode_options,
    },
    store::{Predicate, RangeStore, RangeTxn, Relocation, Savepoint},
};

/// Record validation hook, standing in for the field validation of a persistence layer.
pub trait Validator: Send + Sync {
    fn validate(&self, row: &Row) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&Row) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, row: &Row) -> Result<(), ValidationError> {
        self(row)
    }
}

/// Index key: `(scope, column value, id)`. Ordering by it yields the `(scope, left, id)` order
/// every query returns.
type IndexKey = (ScopeId, i64, NodeId);

fn scope_bounds(
    scope: ScopeId,
    from: Bound<i64>,
    to: Bound<i64>,
) -> (Bound<IndexKey>, Bound<IndexKey>) {
    let lower = match from {
        Bound::Included(v) => Bound::Included((scope, v, NodeId::MIN)),
        Bound::Excluded(v) => Bound::Excluded((scope, v, NodeId::MAX)),
        Bound::Unbounded => Bound::Included((scope, i64::MIN, NodeId::MIN)),
    };
    let upper = match to {
        Bound::Included(v) => Bound::Included((scope, v, NodeId::MAX)),
        Bound::Excluded(v) => Bound::Excluded((scope, v, NodeId::MIN)),
        Bound::Unbounded => Bound::Included((scope, i64::MAX, NodeId::MAX)),
    };
    (lower, upper)
}

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<NodeId, Node>,
    /// Index over `(scope, left)`.
    by_left: BTreeSet<IndexKey>,
    /// Index over `(scope, right)`.
    by_right: BTreeSet<IndexKey>,
    next_id: u64,
}

impl Table {
    fn insert(&mut self, node: Node) {
        self.by_left.insert((node.scope, node.left, node.id));
        self.by_right.insert((node.scope, node.right, node.id));
        self.rows.insert(node.id, node);
    }

    fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.rows.remove(&id)?;
        self.by_left.remove(&(node.scope, node.left, node.id));
        self.by_right.remove(&(node.scope, node.right, node.id));
        Some(node)
    }

    /// Replaces a row, keeping the indexes in sync. Returns the previous version.
    fn replace(&mut self, node: Node) -> Option<Node> {
        let previous = self.remove(node.id);
        self.insert(node);
        previous
    }

    fn allocate_id(&mut self) -> StoreResult<NodeId> {
        let id = NodeId::new(self.next_id)
            .ok_or_else(|| StoreError::Unavailable("node id space exhausted".into()))?;
        self.next_id += 1;
        Ok(id)
    }

    /// Rows of `scope` in `(left, id)` order.
    fn scan(&self, scope: ScopeId) -> impl Iterator<Item = &Node> {
        self.by_left
            .range(scope_bounds(scope, Bound::Unbounded, Bound::Unbounded))
            .map(|(_, _, id)| &self.rows[id])
    }

    fn find(&self, scope: ScopeId, predicate: &Predicate) -> Vec<Node> {
        self.scan(scope)
            .filter(|node| predicate.matches(node))
            .cloned()
            .collect()
    }

    /// Ids of the rows of `scope` whose `column` lies within `from..to`.
    fn ids_in(
        &self,
        scope: ScopeId,
        column: RangeColumn,
        from: Bound<i64>,
        to: Bound<i64>,
    ) -> Vec<NodeId> {
        let index = match column {
            RangeColumn::Left => &self.by_left,
            RangeColumn::Right => &self.by_right,
        };
        index
            .range(scope_bounds(scope, from, to))
            .map(|(_, _, id)| *id)
            .collect()
    }
}

/// Counts down writes until an injected failure fires.
struct FaultPlan {
    remaining: AtomicUsize,
}

impl FaultPlan {
    const DISARMED: usize = usize::MAX;

    fn check(&self) -> StoreResult<()> {
        let fire = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
                Self::DISARMED => None,
                0 => Some(Self::DISARMED),
                n => Some(n - 1),
            })
            .is_ok_and(|previous| previous == 0);
        if fire {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

/// A [`RangeStore`] keeping every row in memory, indexed by `(scope, left)` and
/// `(scope, right)`.
///
/// Transactions write through to the shared table and keep an undo journal, so rollback
/// restores the exact previous rows. Isolation between writers is the job of the engine's
/// scope locks; readers outside a transaction may observe a tree mid-mutation.
#[derive(Clone)]
pub struct InMemoryRangeStore {
    inner: Arc<Mutex<Table>>,
    validator: Option<Arc<dyn Validator>>,
    faults: Arc<FaultPlan>,
}

impl fmt::Debug for InMemoryRangeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRangeStore")
            .field("rows", &self.inner.lock().rows.len())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl Default for InMemoryRangeStore {
    fn default() -> Self {
        Self {
            inner: Default::default(),
            validator: None,
            faults: Arc::new(FaultPlan {
                remaining: AtomicUsize::new(FaultPlan::DISARMED),
            }),
        }
    }
}

impl InMemoryRangeStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Seeds a store with existing rows, e.g. ones restored from another backend.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let store = Self::new();
        {
            let mut table = store.inner.lock();
            for node in nodes {
                table.next_id = table.next_id.max(node.id.get() + 1);
                table.replace(node);
            }
        }
        store
    }

    /// Rejects every persisted row for which `validator` fails.
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Lets the next `writes` write operations succeed and fails the one after, once.
    ///
    /// Fault injection for exercising rollback paths.
    #[doc(hidden)]
    pub fn fail_after_writes(&self, writes: usize) {
        self.faults.remaining.store(writes, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes every row, ordered by id. Two snapshots are byte-identical iff the tables are.
    pub fn snapshot(&self) -> StoreResult<Bytes> {
        let table = self.inner.lock();
        let rows = table
            .rows
            .values()
            .sorted_by_key(|node| node.id)
            .collect_vec();
        let encoded = bincode_options().serialize(&rows)?;
        Ok(Bytes::from(encoded))
    }

    fn validate(&self, row: &Row) -> StoreResult<()> {
        if let Some(validator) = &self.validator {
            validator.validate(row)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RangeStore for InMemoryRangeStore {
    type Txn = InMemoryTxn;

    async fn begin(&self) -> StoreResult<InMemoryTxn> {
        Ok(InMemoryTxn {
            store: self.clone(),
            journal: Vec::new(),
            is_finished: false,
        })
    }

    async fn load(&self, id: NodeId) -> StoreResult<Option<Node>> {
        Ok(self.inner.lock().rows.get(&id).cloned())
    }

    async fn find(&self, scope: ScopeId, predicate: &Predicate) -> StoreResult<Vec<Node>> {
        Ok(self.inner.lock().find(scope, predicate))
    }

    async fn find_all(&self, predicate: &Predicate) -> StoreResult<Vec<Node>> {
        let table = self.inner.lock();
        Ok(table
            .by_left
            .iter()
            .map(|(_, _, id)| &table.rows[id])
            .filter(|node| predicate.matches(node))
            .cloned()
            .collect())
    }

    async fn scopes(&self) -> StoreResult<Vec<ScopeId>> {
        let table = self.inner.lock();
        Ok(table
            .by_left
            .iter()
            .map(|(scope, _, _)| *scope)
            .dedup()
            .collect())
    }
}

/// The previous state of a row touched by a transaction.
#[derive(Debug)]
enum Undo {
    Created(NodeId),
    Updated(Node),
    Removed(Node),
}

fn undo_into(table: &mut Table, journal: impl DoubleEndedIterator<Item = Undo>) {
    for undo in journal.rev() {
        match undo {
            Undo::Created(id) => {
                table.remove(id);
            }
            Undo::Updated(previous) | Undo::Removed(previous) => {
                table.replace(previous);
            }
        }
    }
}

#[derive(Debug)]
pub struct InMemoryTxn {
    store: InMemoryRangeStore,
    journal: Vec<Undo>,
    /// This is `true`, once [`commit`] or [`rollback`] has been called.
    ///
    /// [`commit`]: RangeTxn::commit
    /// [`rollback`]: RangeTxn::rollback
    is_finished: bool,
}

impl InMemoryTxn {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_finished {
            return Err(StoreError::TransactionClosed);
        }
        Ok(())
    }

    /// Applies `update` to every listed row, journaling the previous versions.
    fn update_rows(&mut self, ids: Vec<NodeId>, update: impl Fn(&mut Node)) -> usize {
        let mut table = self.store.inner.lock();
        for id in &ids {
            let mut node = table.rows[id].clone();
            update(&mut node);
            if let Some(previous) = table.replace(node) {
                self.journal.push(Undo::Updated(previous));
            }
        }
        ids.len()
    }
}

#[async_trait]
impl RangeTxn for InMemoryTxn {
    async fn load(&mut self, id: NodeId) -> StoreResult<Option<Node>> {
        self.ensure_open()?;
        Ok(self.store.inner.lock().rows.get(&id).cloned())
    }

    async fn find(&mut self, scope: ScopeId, predicate: &Predicate) -> StoreResult<Vec<Node>> {
        self.ensure_open()?;
        Ok(self.store.inner.lock().find(scope, predicate))
    }

    async fn count(&mut self, scope: ScopeId) -> StoreResult<usize> {
        self.ensure_open()?;
        Ok(self.store.inner.lock().scan(scope).count())
    }

    async fn persist(&mut self, row: Row) -> StoreResult<Node> {
        self.ensure_open()?;
        self.store.faults.check()?;
        self.store.validate(&row)?;

        let mut table = self.store.inner.lock();
        match row.id {
            Some(id) => {
                if !table.rows.contains_key(&id) {
                    return Err(StoreError::NotFound(id));
                }
                let node = row.into_node(id);
                if let Some(previous) = table.replace(node.clone()) {
                    self.journal.push(Undo::Updated(previous));
                }
                Ok(node)
            }
            None => {
                let id = table.allocate_id()?;
                let node = row.into_node(id);
                table.insert(node.clone());
                self.journal.push(Undo::Created(id));
                Ok(node)
            }
        }
    }

    async fn remove(&mut self, id: NodeId) -> StoreResult<()> {
        self.ensure_open()?;
        self.store.faults.check()?;

        let removed = self
            .store
            .inner
            .lock()
            .remove(id)
            .ok_or(StoreError::NotFound(id))?;
        self.journal.push(Undo::Removed(removed));
        Ok(())
    }

    async fn bulk_shift(
        &mut self,
        scope: ScopeId,
        column: RangeColumn,
        threshold: i64,
        delta: i64,
    ) -> StoreResult<usize> {
        self.ensure_open()?;
        self.store.faults.check()?;

        let ids = self.store.inner.lock().ids_in(
            scope,
            column,
            Bound::Included(threshold),
            Bound::Unbounded,
        );
        Ok(self.update_rows(ids, |node| match column {
            RangeColumn::Left => node.left += delta,
            RangeColumn::Right => node.right += delta,
        }))
    }

    async fn bulk_relocate(&mut self, relocation: &Relocation) -> StoreResult<usize> {
        self.ensure_open()?;
        self.store.faults.check()?;

        let ids = self.store.inner.lock().ids_in(
            relocation.source_scope,
            RangeColumn::Left,
            Bound::Included(relocation.left_lo),
            Bound::Included(relocation.left_hi),
        );
        Ok(self.update_rows(ids, |node| {
            node.left += relocation.left_delta;
            node.right += relocation.left_delta;
            node.level += relocation.level_delta;
            node.scope = relocation.dest_scope;
        }))
    }

    async fn savepoint(&mut self) -> StoreResult<Savepoint> {
        self.ensure_open()?;
        Ok(Savepoint(self.journal.len()))
    }

    async fn rollback_to(&mut self, savepoint: Savepoint) -> StoreResult<()> {
        self.ensure_open()?;
        let mut table = self.store.inner.lock();
        undo_into(&mut table, self.journal.drain(savepoint.0..));
        Ok(())
    }

    async fn commit(mut self) -> StoreResult<()> {
        self.ensure_open()?;
        trace!(writes = self.journal.len(), "Committing transaction");
        self.journal.clear();
        self.is_finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> StoreResult<()> {
        self.ensure_open()?;
        let mut table = self.store.inner.lock();
        undo_into(&mut table, self.journal.drain(..));
        drop(table);
        self.is_finished = true;
        Ok(())
    }
}

impl Drop for InMemoryTxn {
    fn drop(&mut self) {
        if self.is_finished || self.journal.is_empty() {
            return;
        }
        warn!(
            writes = self.journal.len(),
            "Transaction dropped before commit, rolling back"
        );
        let mut table = self.store.inner.lock();
        undo_into(&mut table, self.journal.drain(..));
    }
}
