//! Size admission check for incoming allocations.

/// Returns `true` iff `size` falls inside the configured range, inclusive at
/// both ends. Zero sizes fall out of any sane configured range; there is no
/// separate zero check.
#[must_use]
pub const fn accepts(size: u64, min_size: u64, max_size: u64) -> bool {
    min_size <= size && size <= max_size
}
