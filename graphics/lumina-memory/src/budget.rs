//! Memory budget
//!
//! Combines what the device reports about its physical heaps with what the
//! allocator itself holds. Devices that cannot report a budget are treated as
//! unlimited (`u64::MAX`), and their usage is estimated from the heaps the
//! allocator created.

use alloc::vec::Vec;

use lumina_core::MemoryDevice;

use crate::collection::HeapCollection;

/// Which memory a budget query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BudgetScope {
    /// Every physical heap, each counted once.
    #[default]
    All,
    /// The physical heap behind one memory type.
    MemoryType(u32),
}

/// Budget snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    /// Bytes the process may use.
    pub estimated_budget: u64,
    /// Bytes the process uses.
    pub estimated_usage: u64,
    /// Bytes handed out as regions by this allocator.
    pub total_allocated_region_size: u64,
    /// Bytes held as heaps by this allocator.
    pub total_heap_size: u64,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            estimated_budget: u64::MAX,
            estimated_usage: 0,
            total_allocated_region_size: 0,
            total_heap_size: 0,
        }
    }
}

impl MemoryBudget {
    /// Bytes left before the budget is exceeded.
    pub fn remaining(&self) -> u64 {
        self.estimated_budget.saturating_sub(self.estimated_usage)
    }

    /// Usage is past the budget.
    pub fn is_over_budget(&self) -> bool {
        self.estimated_usage > self.estimated_budget
    }
}

/// Builds the budget for `scope`. Out-of-range memory types get an empty,
/// unlimited budget.
pub(crate) fn estimate<D>(
    device: &D,
    collections: &[HeapCollection<D::Memory>],
    scope: BudgetScope,
) -> MemoryBudget
where
    D: MemoryDevice + ?Sized,
{
    let mut heap_indices: Vec<u32> = match scope {
        BudgetScope::All => collections.iter().map(|c| c.descriptor().heap_index).collect(),
        BudgetScope::MemoryType(index) => match collections.get(index as usize) {
            Some(collection) => alloc::vec![collection.descriptor().heap_index],
            None => return MemoryBudget::default(),
        },
    };
    heap_indices.sort_unstable();
    heap_indices.dedup();
    if heap_indices.is_empty() {
        return MemoryBudget::default();
    }

    let mut budget = MemoryBudget {
        estimated_budget: 0,
        ..MemoryBudget::default()
    };

    for heap_index in heap_indices {
        let mut held = 0;
        for collection in collections
            .iter()
            .filter(|c| c.descriptor().heap_index == heap_index)
        {
            let stats = collection.statistics();
            held += stats.total_heap_size;

            let counted = match scope {
                BudgetScope::All => true,
                BudgetScope::MemoryType(index) => stats.memory_type_index == index,
            };
            if counted {
                budget.total_heap_size += stats.total_heap_size;
                budget.total_allocated_region_size += stats.allocated_region_size;
            }
        }

        match device.query_budget(heap_index) {
            Some(reported) => {
                budget.estimated_budget = budget.estimated_budget.saturating_add(reported.budget);
                budget.estimated_usage += reported.usage;
            },
            None => {
                budget.estimated_budget = u64::MAX;
                budget.estimated_usage += held;
            },
        }
    }

    budget
}
