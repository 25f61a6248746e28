//! Memory type selection
//!
//! Every candidate memory type is scored against a [`MemoryTypeFilter`]: one
//! point per preferred flag it lacks, one per unpreferred flag it carries.
//! The cheapest admissible type wins; among equals the lowest index does.

use lumina_core::{MemoryTypeDescriptor, MemoryTypeFilter};

use crate::error::{MemoryError, MemoryResult};

/// Picks the memory type for a resource.
///
/// `memory_type_bits` has bit `i` set when type `i` can hold the resource.
pub fn select_memory_type(
    memory_types: &[MemoryTypeDescriptor],
    memory_type_bits: u32,
    filter: &MemoryTypeFilter,
) -> MemoryResult<u32> {
    let mut best: Option<(u32, u32)> = None;

    for (index, memory_type) in memory_types.iter().enumerate().take(32) {
        if memory_type_bits & (1 << index) == 0 {
            continue;
        }

        let Some(cost) = filter.cost(memory_type) else {
            continue;
        };

        if best.map_or(true, |(_, best_cost)| cost < best_cost) {
            best = Some((index as u32, cost));
            if cost == 0 {
                break;
            }
        }
    }

    best.map(|(index, _)| index)
        .ok_or(MemoryError::NoCompatibleMemoryType)
}
