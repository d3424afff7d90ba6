use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// The maximum amount of times a queued lock request may be overtaken by later, compatible
    /// requests before it blocks everything behind it.
    pub max_skip_tolerance: u32,
    /// How long a structural operation waits for its scope lock. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

/// Order in which rebuild visits the children of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChildOrder {
    /// Existing `left` value, ties broken by id. Keeps sibling order of a mostly intact tree.
    #[default]
    Left,
    /// Node id, i.e. insertion order.
    Id,
}

#[derive(Debug, Clone)]
pub struct RebuildConfig {
    pub child_order: ChildOrder,
    /// Verify the scope after every rebuild and report violations as an error.
    pub verify_after: bool,
}

#[derive(Debug, Clone)]
pub struct ScopeConfig {
    /// The lowest scope the allocator hands out.
    pub first_scope: u64,
}

/// Configuration for an [`Arbor`] engine and all its sub-components.
///
/// [`Arbor`]: crate::Arbor
#[derive(Debug, Clone)]
pub struct ArborConfig {
    pub lock: LockConfig,
    pub rebuild: RebuildConfig,
    pub scope: ScopeConfig,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig {
                max_skip_tolerance: 64,
                acquire_timeout: Some(Duration::from_secs(30)),
            },
            rebuild: RebuildConfig {
                child_order: ChildOrder::Left,
                verify_after: true,
            },
            scope: ScopeConfig { first_scope: 1 },
        }
    }
}

impl ArborConfig {
    /// A config tuned for fast testing.
    ///
    /// - **lock:** Short timeouts, so a leaked guard fails the test instead of hanging it.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            lock: LockConfig {
                max_skip_tolerance: 8,
                acquire_timeout: Some(Duration::from_millis(500)),
            },
            ..Default::default()
        }
    }
}
