use std::time::Duration;

/// Tuning knobs for [`crate::allocator::Allocator`]. Plain data, constructed programmatically
/// or alongside the topology document — not a CLI/env loader (§1 names configuration loading
/// out of scope).
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// When `true` (the default), `allocate` prefers reusing a same-`(tenant, segment)` block
    /// with free capacity over carving a fresh one (§4.4 step 1 before step 2). When `false`,
    /// a fresh block is carved whenever the leaf's CIDR has room, and only exhausted leaves
    /// fall back to reuse.
    pub prefer_block_reuse: bool,
    /// How long a `Saver::save` call may run before `Allocator` logs a slow-save warning.
    /// Advisory only: no call is actually timed out or cancelled.
    pub slow_save_threshold: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            prefer_block_reuse: true,
            slow_save_threshold: Duration::from_millis(250),
        }
    }
}
