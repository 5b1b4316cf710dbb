//! Allocation failure modes.

use thiserror::Error;

/// Terminal failures of one allocation request.
///
/// The result set is empty in either case; there are no retries and no
/// partial results. The messages are load-bearing: existing callers match
/// on the exact strings.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum AllocationError {
    /// Demand exceeds the available set, detected before the search runs.
    #[error("not enough cpus available to satisfy request")]
    InsufficientCapacity,

    /// The search ended with demand left over. Unreachable while the
    /// capacity pre-check holds; kept as a guard so a future invariant
    /// break fails loudly instead of returning a short set.
    #[error("failed to allocate cpus")]
    AllocationFailure,
}
