//! Contracts the queue consumes from the storage engine and merge selector.

use crate::part_info::PartInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    /// Written but not yet visible to queries.
    PreCommitted,
    Committed,
    /// Replaced by a merge result, retained until cleanup.
    Outdated,
}

#[derive(Debug, Clone)]
pub struct PartMeta {
    pub name: String,
    pub info: PartInfo,
    pub bytes_on_disk: u64,
}

/// Read-only view of the local on-disk part set.
pub trait PartStore: Send + Sync {
    /// The part, if present in any of the requested states.
    fn get_part_if_exists(&self, name: &str, states: &[PartState]) -> Option<PartMeta>;
}

/// Merge scheduling knobs owned by the merge subsystem.
pub trait MergeControl: Send + Sync {
    /// Global pause flag; queued merges are postponed (never aborted) while set.
    fn merges_cancelled(&self) -> bool;

    /// Current size budget for a merge, derived from worker-pool occupancy.
    fn max_parts_size_for_merge(&self) -> u64;

    /// The budget's ceiling, reached when the pool is fully idle. When the
    /// current budget equals this value any merge size is admissible.
    fn max_bytes_to_merge_at_max_space(&self) -> u64;
}
