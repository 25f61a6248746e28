//! Allocator configuration

use bitflags::bitflags;

use crate::error::{MemoryError, MemoryResult};

/// 1 MiB.
pub const MIB: u64 = 1024 * 1024;

/// Default size of a shared heap.
pub const DEFAULT_PREFERRED_BLOCK_SIZE: u64 = 64 * MIB;

/// Device heaps at or below this size get proportionally smaller blocks.
pub const SMALL_HEAP_MAX_SIZE: u64 = 1024 * MIB;

// ============================================================================
// Allocation Flags
// ============================================================================

bitflags! {
    /// Per-request placement flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocationFlags: u32 {
        /// Place the request alone in a heap sized exactly to it.
        const DEDICATED_HEAP = 1 << 0;
        /// Only use heaps that already exist.
        const EXISTING_HEAPS_ONLY = 1 << 1;
        /// Do not grow past the device-reported budget.
        const WITHIN_BUDGET = 1 << 2;
    }
}

// ============================================================================
// Allocator Settings
// ============================================================================

/// Allocator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorSettings {
    /// Size of a shared heap. Larger requests get a dedicated heap.
    pub preferred_block_size: u64,
    /// Empty heaps are kept while a collection holds at most this many.
    pub minimum_heap_count: usize,
    /// Hard cap on heaps per memory type.
    pub maximum_heap_count: usize,
    /// Alignment padding below this size is folded into the allocation.
    pub minimum_free_region_size: u64,
    /// Log memory types at startup.
    pub log_memory_information: bool,
    /// Trace every allocation.
    pub log_allocations: bool,
    /// Trace every free.
    pub log_frees: bool,
    /// Warn about live regions at teardown.
    pub log_leaks_on_shutdown: bool,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            preferred_block_size: DEFAULT_PREFERRED_BLOCK_SIZE,
            minimum_heap_count: 0,
            maximum_heap_count: usize::MAX,
            minimum_free_region_size: 16,
            log_memory_information: false,
            log_allocations: false,
            log_frees: false,
            log_leaks_on_shutdown: true,
        }
    }
}

impl AllocatorSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set preferred block size.
    pub fn with_preferred_block_size(mut self, size: u64) -> Self {
        self.preferred_block_size = size;
        self
    }

    /// Set minimum heap count.
    pub fn with_minimum_heap_count(mut self, count: usize) -> Self {
        self.minimum_heap_count = count;
        self
    }

    /// Set maximum heap count.
    pub fn with_maximum_heap_count(mut self, count: usize) -> Self {
        self.maximum_heap_count = count;
        self
    }

    /// Set padding granularity.
    pub fn with_minimum_free_region_size(mut self, size: u64) -> Self {
        self.minimum_free_region_size = size;
        self
    }

    /// Enable all allocation logging.
    pub fn verbose(mut self) -> Self {
        self.log_memory_information = true;
        self.log_allocations = true;
        self.log_frees = true;
        self
    }

    /// Check settings for consistency.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.preferred_block_size == 0 {
            return Err(MemoryError::InvalidSettings("preferred block size is zero"));
        }
        if self.maximum_heap_count == 0 {
            return Err(MemoryError::InvalidSettings("maximum heap count is zero"));
        }
        if self.minimum_heap_count > self.maximum_heap_count {
            return Err(MemoryError::InvalidSettings(
                "minimum heap count exceeds maximum heap count",
            ));
        }
        Ok(())
    }

    /// Preferred block size for a memory type living on a heap of `heap_size` bytes.
    pub fn block_size_for_heap(&self, heap_size: u64) -> u64 {
        if heap_size != 0 && heap_size <= SMALL_HEAP_MAX_SIZE {
            self.preferred_block_size.min(heap_size / 8).max(1)
        } else {
            self.preferred_block_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(AllocatorSettings::default().validate().is_ok());
    }

    #[test]
    fn test_inconsistent_settings() {
        let settings = AllocatorSettings::new()
            .with_minimum_heap_count(4)
            .with_maximum_heap_count(2);
        assert!(matches!(
            settings.validate(),
            Err(MemoryError::InvalidSettings(_))
        ));
        assert!(AllocatorSettings::new()
            .with_preferred_block_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_verbose_enables_all_logging() {
        let settings = AllocatorSettings::new().verbose();
        assert!(settings.log_memory_information);
        assert!(settings.log_allocations);
        assert!(settings.log_frees);
        assert_eq!(
            settings.preferred_block_size,
            AllocatorSettings::default().preferred_block_size
        );
    }

    #[test]
    fn test_small_heaps_get_smaller_blocks() {
        let settings = AllocatorSettings::default();
        assert_eq!(settings.block_size_for_heap(256 * MIB), 32 * MIB);
        assert_eq!(settings.block_size_for_heap(8 * 1024 * MIB), DEFAULT_PREFERRED_BLOCK_SIZE);
        assert_eq!(settings.block_size_for_heap(0), DEFAULT_PREFERRED_BLOCK_SIZE);
    }
}
