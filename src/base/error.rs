use std::time::Duration;

use itertools::Itertools;

use crate::{
    base::{NodeId, ScopeId},
    tree::ViolatedInvariant,
};

/// Rejection raised by a store's validator, i.e. by the record persistence layer.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Display, Error, From)]
pub enum StoreError {
    #[from(skip)]
    #[display("Node {_0} does not exist")]
    NotFound(#[error(not(source))] NodeId),

    #[display("Validation failed: {_0}")]
    Validation(ValidationError),

    #[from(skip)]
    #[display("Backing store unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),

    #[display("Failed to encode: {_0}")]
    Encoding(bincode::Error),

    #[from(skip)]
    #[display("Transaction was already committed or rolled back")]
    TransactionClosed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure to obtain exclusive access to a scope. Always safe to retry after a backoff.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[display("Timed out after {_0:?} waiting for access to the scope")]
    Timeout(#[error(not(source))] Duration),

    #[display("Lock manager is no longer running")]
    Closed,

    #[display("Node {_0} changed scope while waiting for its lock")]
    Stale(#[error(not(source))] NodeId),
}

#[derive(Debug, Display, Error, From)]
pub enum InsertError {
    #[from(skip)]
    #[display("Node {_0} already exists; use move_node to relocate it")]
    AlreadyExists(#[error(not(source))] NodeId),

    #[from(skip)]
    #[display("Anchor {_0} does not exist or cannot take this placement")]
    InvalidAnchor(#[error(not(source))] NodeId),

    #[display("Validation failed: {_0}")]
    ValidationFailed(ValidationError),

    #[from(skip)]
    #[display("Scope {_0} already holds a tree")]
    ScopeTaken(#[error(not(source))] ScopeId),

    #[from(skip)]
    #[display("No scope id is left to allocate")]
    ScopesExhausted,

    Lock(LockError),

    Store(StoreError),
}

/// The reason a move was rejected before touching any row.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum InvalidMove {
    #[display("a node cannot be its own anchor")]
    SelfAnchor,
    #[display("a node cannot move into its own subtree")]
    IntoDescendant,
    #[display("a root cannot have siblings")]
    RootSibling,
}

#[derive(Debug, Display, Error, From)]
pub enum MoveError {
    #[from(skip)]
    #[display("Node {_0} does not exist")]
    NotFound(#[error(not(source))] NodeId),

    #[display("Invalid move: {_0}")]
    InvalidMove(#[error(not(source))] InvalidMove),

    #[from(skip)]
    #[display("Anchor {_0} does not exist")]
    InvalidAnchor(#[error(not(source))] NodeId),

    Lock(LockError),

    Store(StoreError),
}

#[derive(Debug, Display, Error, From)]
pub enum PromoteError {
    #[from(skip)]
    #[display("Node {_0} does not exist")]
    NotFound(#[error(not(source))] NodeId),

    #[from(skip)]
    #[display("Node {_0} is already a root")]
    AlreadyRoot(#[error(not(source))] NodeId),

    #[from(skip)]
    #[display("Scope {_0} already holds a tree")]
    ScopeTaken(#[error(not(source))] ScopeId),

    #[from(skip)]
    #[display("No scope id is left to allocate")]
    ScopesExhausted,

    Lock(LockError),

    Store(StoreError),
}

#[derive(Debug, Display, Error, From)]
pub enum ArborError {
    #[from(skip)]
    #[display("Node {_0} does not exist")]
    NotFound(#[error(not(source))] NodeId),

    #[from(skip)]
    #[display("Scope {_0} has nodes but no root")]
    MissingRoot(#[error(not(source))] ScopeId),

    #[from(skip)]
    #[display("Scope {scope} has multiple roots: {}", roots.iter().join(", "))]
    MultipleRoots { scope: ScopeId, roots: Vec<NodeId> },

    #[from(skip)]
    #[display("Scope {scope} has nodes unreachable from its root: {}", nodes.iter().join(", "))]
    Unreachable { scope: ScopeId, nodes: Vec<NodeId> },

    #[from(skip)]
    #[display("Rebuild failed for scopes: {}", _0.iter().join(", "))]
    RebuildIncomplete(#[error(not(source))] Vec<ScopeId>),

    #[from(skip)]
    #[display("Tree is corrupt: {}", _0.iter().join("; "))]
    Corrupt(#[error(not(source))] Vec<ViolatedInvariant>),

    Lock(LockError),

    Store(StoreError),
}

pub type ArborResult<T> = Result<T, ArborError>;

/// Result of [`Arbor::verify`]. Violations are data, the other variants report why the check
/// could not run.
///
/// [`Arbor::verify`]: crate::Arbor::verify
#[derive(Debug, Display, Error, From)]
pub enum VerifyError {
    #[from(skip)]
    #[display("{} invariant violation(s): {}", _0.len(), _0.iter().join("; "))]
    Violated(#[error(not(source))] Vec<ViolatedInvariant>),

    Lock(LockError),

    Store(StoreError),
}

impl VerifyError {
    /// The violated invariants, empty when the check itself failed.
    pub fn violations(&self) -> &[ViolatedInvariant] {
        match self {
            VerifyError::Violated(violations) => violations,
            _ => &[],
        }
    }
}
