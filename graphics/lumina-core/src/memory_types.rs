//! Memory types reported by a device
//!
//! A device exposes a fixed list of memory types. Each type lives on one
//! physical memory heap and carries a set of property flags.

use bitflags::bitflags;

// ============================================================================
// Property Flags
// ============================================================================

bitflags! {
    /// Memory property flags of a memory type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryPropertyFlags: u32 {
        /// Device local (fastest for GPU access).
        const DEVICE_LOCAL = 1 << 0;
        /// Host visible (CPU can map it).
        const HOST_VISIBLE = 1 << 1;
        /// Host coherent (no explicit flush needed).
        const HOST_COHERENT = 1 << 2;
        /// Host cached (fast CPU reads).
        const HOST_CACHED = 1 << 3;
        /// Lazily allocated.
        const LAZILY_ALLOCATED = 1 << 4;
        /// Protected memory.
        const PROTECTED = 1 << 5;
    }
}

impl MemoryPropertyFlags {
    /// Host visible and coherent.
    pub const HOST_UPLOAD: Self = Self::HOST_VISIBLE.union(Self::HOST_COHERENT);

    /// Host visible, coherent and cached.
    pub const HOST_READBACK: Self = Self::HOST_UPLOAD.union(Self::HOST_CACHED);
}

bitflags! {
    /// Flags of the physical heap backing a memory type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryHeapFlags: u32 {
        /// Heap is device local.
        const DEVICE_LOCAL = 1 << 0;
        /// Heap is replicated across linked GPUs.
        const MULTI_INSTANCE = 1 << 1;
    }
}

// ============================================================================
// Memory Type Descriptor
// ============================================================================

/// One memory type as enumerated by the device.
///
/// Immutable for the lifetime of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTypeDescriptor {
    /// Memory type index.
    pub index: u32,
    /// Property flags.
    pub property_flags: MemoryPropertyFlags,
    /// Index of the physical heap this type allocates from.
    pub heap_index: u32,
    /// Size of that heap in bytes.
    pub heap_size: u64,
    /// Flags of that heap.
    pub heap_flags: MemoryHeapFlags,
}

impl MemoryTypeDescriptor {
    /// Creates a descriptor.
    pub const fn new(
        index: u32,
        property_flags: MemoryPropertyFlags,
        heap_index: u32,
        heap_size: u64,
        heap_flags: MemoryHeapFlags,
    ) -> Self {
        Self {
            index,
            property_flags,
            heap_index,
            heap_size,
            heap_flags,
        }
    }

    /// Is device local.
    pub const fn is_device_local(&self) -> bool {
        self.property_flags.contains(MemoryPropertyFlags::DEVICE_LOCAL)
    }

    /// Is the backing heap multi-instance.
    pub const fn is_multi_instance(&self) -> bool {
        self.heap_flags.contains(MemoryHeapFlags::MULTI_INSTANCE)
    }
}

// ============================================================================
// Memory Requirements
// ============================================================================

/// What a resource needs from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRequirements {
    /// Size in bytes.
    pub size: u64,
    /// Required alignment of the placement offset.
    pub alignment: u64,
    /// Bit `i` set when memory type `i` can hold the resource.
    pub memory_type_bits: u32,
}

impl MemoryRequirements {
    /// Creates requirements.
    pub const fn new(size: u64, alignment: u64, memory_type_bits: u32) -> Self {
        Self {
            size,
            alignment,
            memory_type_bits,
        }
    }
}

// ============================================================================
// CPU Access
// ============================================================================

/// How the CPU intends to touch a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CpuAccess {
    /// GPU reads and writes only.
    #[default]
    GpuOnly,
    /// GPU writes, CPU reads back.
    GpuToCpu,
    /// CPU writes, GPU reads.
    CpuToGpu,
}

impl CpuAccess {
    /// Memory type filter for this access pattern.
    ///
    /// On unified-memory devices every type is device local, so preferring
    /// `DEVICE_LOCAL` carries no information and is dropped.
    pub fn filter(self, is_unified_memory: bool) -> MemoryTypeFilter {
        let device_local = if is_unified_memory {
            MemoryPropertyFlags::empty()
        } else {
            MemoryPropertyFlags::DEVICE_LOCAL
        };

        match self {
            CpuAccess::GpuOnly => MemoryTypeFilter {
                preferred: device_local,
                allow_multi_instance: true,
                ..MemoryTypeFilter::default()
            },
            CpuAccess::GpuToCpu => MemoryTypeFilter {
                required: MemoryPropertyFlags::HOST_VISIBLE,
                preferred: MemoryPropertyFlags::HOST_CACHED,
                ..MemoryTypeFilter::default()
            },
            CpuAccess::CpuToGpu => MemoryTypeFilter {
                required: MemoryPropertyFlags::HOST_VISIBLE,
                preferred: device_local,
                ..MemoryTypeFilter::default()
            },
        }
    }
}

/// Flags a memory type must, should, and should not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryTypeFilter {
    /// Every flag must be present.
    pub required: MemoryPropertyFlags,
    /// Each missing flag costs one.
    pub preferred: MemoryPropertyFlags,
    /// Each present flag costs one.
    pub unpreferred: MemoryPropertyFlags,
    /// Multi-instance heaps are admissible.
    pub allow_multi_instance: bool,
}

impl MemoryTypeFilter {
    /// Placement cost of a memory type, or `None` when it is not admissible.
    pub fn cost(&self, memory_type: &MemoryTypeDescriptor) -> Option<u32> {
        let flags = memory_type.property_flags;

        if !flags.contains(self.required) {
            return None;
        }
        if !self.allow_multi_instance && memory_type.is_multi_instance() {
            return None;
        }

        Some(
            self.preferred.difference(flags).bits().count_ones()
                + self.unpreferred.intersection(flags).bits().count_ones(),
        )
    }
}

// ============================================================================
// Device Budget
// ============================================================================

/// Budget figures the device reports for one physical heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceBudget {
    /// Bytes the process can use before the OS starts to evict.
    pub budget: u64,
    /// Bytes the process currently uses.
    pub usage: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_type(flags: MemoryPropertyFlags, heap_flags: MemoryHeapFlags) -> MemoryTypeDescriptor {
        MemoryTypeDescriptor::new(0, flags, 0, 1 << 30, heap_flags)
    }

    #[test]
    fn test_required_flags_reject() {
        let filter = CpuAccess::GpuToCpu.filter(false);
        let device_only = memory_type(MemoryPropertyFlags::DEVICE_LOCAL, MemoryHeapFlags::DEVICE_LOCAL);
        assert_eq!(filter.cost(&device_only), None);
    }

    #[test]
    fn test_cost_counts_missing_and_unwanted() {
        let filter = MemoryTypeFilter {
            preferred: MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_CACHED,
            unpreferred: MemoryPropertyFlags::HOST_COHERENT,
            ..MemoryTypeFilter::default()
        };
        let upload = memory_type(MemoryPropertyFlags::HOST_UPLOAD, MemoryHeapFlags::empty());
        assert_eq!(filter.cost(&upload), Some(3));
    }

    #[test]
    fn test_multi_instance_only_for_gpu_only() {
        let linked = memory_type(
            MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE,
            MemoryHeapFlags::DEVICE_LOCAL | MemoryHeapFlags::MULTI_INSTANCE,
        );
        assert_eq!(CpuAccess::GpuOnly.filter(false).cost(&linked), Some(0));
        assert_eq!(CpuAccess::CpuToGpu.filter(false).cost(&linked), None);
    }

    #[test]
    fn test_unified_memory_drops_device_local_preference() {
        let filter = CpuAccess::CpuToGpu.filter(true);
        assert!(filter.preferred.is_empty());
        assert_eq!(filter.required, MemoryPropertyFlags::HOST_VISIBLE);
    }
}
