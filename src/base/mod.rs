//! This module contains base types that are used across arbor.
//!
//! - [`NodeId`]: The store-assigned identity of a node, stable for the node's lifetime.
//! - [`ScopeId`]: Partitions one backing table into independent trees.
//! - [`Node`]: One row of the nested-set table, carrying its `(left, right)` range.
//! - [`Row`]: The column values handed to the store when a node is persisted.
//! - [`NodeDraft`]: A node that does not exist yet and is waiting to be placed.

use std::fmt;

use bincode::Options as BincodeOptions;
use nonmax::NonMaxU64;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod node;

pub use error::*;
pub use node::*;

/// The size of a leaf range, i.e. `right - left + 1` of a node without children.
pub const LEAF_SIZE: i64 = 2;

/// The level of every root node.
pub const ROOT_LEVEL: i64 = 1;

/// The crate wide used [`bincode`] encoding options.
#[doc(hidden)]
pub fn bincode_options() -> impl BincodeOptions {
    bincode::options()
        .with_fixint_encoding() // Important: no variable length ints
        .with_little_endian() // Ensure consistency across platforms
        .allow_trailing_bytes()
}

#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[debug("NodeId({})", _0.get())]
#[display("{}", _0.get())]
pub struct NodeId(NonMaxU64);

impl NodeId {
    pub(crate) const MIN: Self = unsafe { Self::new_unchecked(0) };
    pub(crate) const MAX: Self = unsafe { Self::new_unchecked(u64::MAX - 1) };

    /// Returns `None` for `u64::MAX`, which is reserved as a niche.
    pub fn new(val: u64) -> Option<Self> {
        NonMaxU64::new(val).map(Self)
    }

    /// # Safety
    ///
    /// Caller has to ensure that `val` is not `u64::MAX`.
    #[inline]
    pub(crate) const unsafe fn new_unchecked(val: u64) -> Self {
        // SAFETY: User has to ensure that `val != u64::MAX`
        Self(unsafe { NonMaxU64::new_unchecked(val) })
    }

    #[inline]
    pub const fn get(&self) -> u64 {
        self.0.get()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl ScopeId {
    pub const fn new(val: u64) -> Self {
        Self(val)
    }

    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ScopeId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

/// One of the two range columns. The Gap Engine shifts them independently.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeColumn {
    #[display("left")]
    Left,
    #[display("right")]
    Right,
}
