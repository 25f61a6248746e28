//! GPU Memory Allocator
//!
//! Entry point of the engine. The allocator owns the device collaborator and
//! one [`HeapCollection`] per memory type the device enumerates. A request
//! flows through it as follows:
//!
//! ```text
//!   shape ──► device requirements ──► memory type selection
//!                                          │
//!                                          ▼
//!              MemoryRegion ◄── HeapCollection::allocate ◄── flags
//! ```
//!
//! Collections lock independently, so requests for different memory types
//! never contend.

use alloc::vec::Vec;
use core::fmt;

use lumina_core::{
    BufferKind, CpuAccess, MemoryDevice, MemoryRequirements, ResourceShape, TextureDesc,
};
use static_assertions::assert_impl_all;

use crate::budget::{self, BudgetScope, MemoryBudget};
use crate::collection::{CollectionStatistics, HeapCollection};
use crate::error::{MemoryError, MemoryResult};
use crate::region::MemoryRegion;
use crate::resource::{Buffer, Texture};
use crate::selection::select_memory_type;
use crate::settings::{AllocationFlags, AllocatorSettings};
use crate::software::SoftwareDevice;

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of the whole allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStatistics {
    /// Live heaps over all memory types.
    pub heap_count: usize,
    /// Bytes held from the device.
    pub total_heap_size: u64,
    /// Bytes handed out as regions.
    pub allocated_region_size: u64,
    /// Live regions.
    pub allocated_region_count: usize,
    /// Per memory type, indexed by memory type index.
    pub memory_types: Vec<CollectionStatistics>,
}

// ============================================================================
// Memory Allocator
// ============================================================================

/// GPU memory allocator.
pub struct MemoryAllocator<D: MemoryDevice> {
    device: D,
    settings: AllocatorSettings,
    collections: Vec<HeapCollection<D::Memory>>,
}

assert_impl_all!(MemoryAllocator<SoftwareDevice>: Send, Sync);
assert_impl_all!(MemoryAllocator<&'static SoftwareDevice>: Send, Sync);

impl<D: MemoryDevice> MemoryAllocator<D> {
    /// Creates an allocator with one heap collection per memory type.
    pub fn new(device: D, settings: AllocatorSettings) -> MemoryResult<Self> {
        settings.validate()?;

        let collections: Vec<_> = device
            .memory_types()
            .iter()
            .map(|descriptor| HeapCollection::new(*descriptor, &settings))
            .collect();

        if settings.log_memory_information {
            log::info!(
                "memory allocator: {} memory types, unified memory: {}",
                collections.len(),
                device.is_unified_memory()
            );
            for collection in &collections {
                let descriptor = collection.descriptor();
                log::info!(
                    "  type {}: {:?} on heap {} ({} MiB, {:?}), block size {} KiB",
                    descriptor.index,
                    descriptor.property_flags,
                    descriptor.heap_index,
                    descriptor.heap_size >> 20,
                    descriptor.heap_flags,
                    collection.block_size() >> 10
                );
            }
        }

        Ok(Self {
            device,
            settings,
            collections,
        })
    }

    /// Device collaborator.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Settings in effect.
    pub fn settings(&self) -> &AllocatorSettings {
        &self.settings
    }

    /// Number of memory types (and collections).
    pub fn memory_type_count(&self) -> usize {
        self.collections.len()
    }

    /// Collection of a memory type.
    pub fn heap_collection(&self, memory_type_index: u32) -> Option<&HeapCollection<D::Memory>> {
        self.collections.get(memory_type_index as usize)
    }

    /// Picks the memory type for `requirements` and `access`.
    pub fn select_memory_type(
        &self,
        requirements: &MemoryRequirements,
        access: CpuAccess,
    ) -> MemoryResult<u32> {
        let filter = access.filter(self.device.is_unified_memory());
        select_memory_type(
            self.device.memory_types(),
            requirements.memory_type_bits,
            &filter,
        )
    }

    /// Places a resource of `shape` and binds it.
    pub fn allocate(
        &self,
        shape: &ResourceShape,
        access: CpuAccess,
        flags: AllocationFlags,
    ) -> MemoryResult<MemoryRegion> {
        let requirements = self.device.resource_requirements(shape);
        self.place(&requirements, access, flags, Some(shape))
    }

    /// Places raw `requirements` without binding anything.
    pub fn allocate_memory(
        &self,
        requirements: &MemoryRequirements,
        access: CpuAccess,
        flags: AllocationFlags,
    ) -> MemoryResult<MemoryRegion> {
        self.place(requirements, access, flags, None)
    }

    /// Returns a region.
    pub fn free(&self, region: MemoryRegion) -> MemoryResult<()> {
        let collection = self
            .collections
            .get(region.memory_type_index() as usize)
            .ok_or(MemoryError::RegionNotFound)?;
        collection.free(&self.device, region).map_err(|e| {
            log::warn!("memory allocator: free failed: {}", e);
            e
        })
    }

    /// Creates a buffer of `size` bytes.
    pub fn create_buffer(
        &self,
        kind: BufferKind,
        access: CpuAccess,
        size: u64,
        flags: AllocationFlags,
    ) -> MemoryResult<Buffer<'_, D>> {
        let region = self.allocate(&ResourceShape::buffer(kind, size), access, flags)?;
        Ok(Buffer::new(self, region, kind, access, size))
    }

    /// Creates a texture.
    pub fn create_texture(
        &self,
        desc: TextureDesc,
        access: CpuAccess,
        flags: AllocationFlags,
    ) -> MemoryResult<Texture<'_, D>> {
        let region = self.allocate(&ResourceShape::texture(desc), access, flags)?;
        Ok(Texture::new(self, region, desc, access))
    }

    /// Budget for `scope`.
    pub fn budget(&self, scope: BudgetScope) -> MemoryBudget {
        budget::estimate(&self.device, &self.collections, scope)
    }

    /// Snapshot of every collection.
    pub fn statistics(&self) -> AllocatorStatistics {
        let memory_types: Vec<_> = self.collections.iter().map(HeapCollection::statistics).collect();
        let mut stats = AllocatorStatistics::default();

        for collection in &memory_types {
            stats.heap_count += collection.heap_count;
            stats.total_heap_size += collection.total_heap_size;
            stats.allocated_region_size += collection.allocated_region_size;
            stats.allocated_region_count += collection.allocated_region_count;
        }

        stats.memory_types = memory_types;
        stats
    }

    /// Releases every heap.
    ///
    /// Fails with `LiveAllocations` when regions were never freed. The heaps
    /// are released either way.
    pub fn shutdown(mut self) -> MemoryResult<()> {
        match self.teardown() {
            0 => Ok(()),
            count => Err(MemoryError::LiveAllocations { count }),
        }
    }

    fn place(
        &self,
        requirements: &MemoryRequirements,
        access: CpuAccess,
        flags: AllocationFlags,
        shape: Option<&ResourceShape>,
    ) -> MemoryResult<MemoryRegion> {
        if !requirements.alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment);
        }
        if requirements.size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let index = self.select_memory_type(requirements, access)?;
        let collection = self
            .collections
            .get(index as usize)
            .ok_or(MemoryError::NoCompatibleMemoryType)?;

        collection.allocate(
            &self.device,
            requirements.size,
            requirements.alignment,
            flags,
            shape,
        )
    }

    fn teardown(&mut self) -> usize {
        let device = &self.device;
        self.collections
            .iter()
            .map(|collection| collection.teardown(device))
            .sum()
    }
}

impl<D: MemoryDevice> fmt::Debug for MemoryAllocator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("settings", &self.settings)
            .field("memory_types", &self.collections.len())
            .field("unified_memory", &self.device.is_unified_memory())
            .finish_non_exhaustive()
    }
}

impl<D: MemoryDevice> Drop for MemoryAllocator<D> {
    fn drop(&mut self) {
        let live = self.teardown();
        if live != 0 {
            log::error!("memory allocator dropped with {} live regions", live);
        }
    }
}
