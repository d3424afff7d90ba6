pub use crate::{
    Arbor,
    base::{
        ArborError, ArborResult, InsertError, MoveError, Node, NodeDraft, NodeId, PromoteError,
        ScopeId, VerifyError,
    },
    config::ArborConfig,
    store::{InMemoryRangeStore, RangeStore},
    tree::{Direction, Listing, Placement},
};
