//! Queue priority (spec §3 "Priority").

/// Priority used by [`crate::queue::RequestQueue`] to pick one of its three
/// FIFOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Dispatched ahead of everything else.
    High,
    /// Default priority for a request that doesn't specify one.
    #[default]
    Auto,
    /// Dispatched last, may starve under sustained High/Auto load (spec §5).
    Low,
}
