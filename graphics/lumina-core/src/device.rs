//! # Device Collaborator
//!
//! The allocator sub-divides memory; the device is what actually hands out
//! the coarse native heaps it sub-divides. Native allocations are slow and
//! often capped in number, so the allocator keeps them rare and large.

use core::fmt;

use crate::memory_types::{DeviceBudget, MemoryRequirements, MemoryTypeDescriptor};
use crate::resource::ResourceShape;

// =============================================================================
// DEVICE ERROR
// =============================================================================

/// Errors reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceError {
    /// The physical heap has no room for the native allocation.
    OutOfDeviceMemory,
    /// The driver ran out of host memory.
    OutOfHostMemory,
    /// Memory type index not exposed by the device.
    InvalidMemoryType,
    /// The device was lost.
    Lost,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::OutOfHostMemory => write!(f, "out of host memory"),
            Self::InvalidMemoryType => write!(f, "invalid memory type"),
            Self::Lost => write!(f, "device lost"),
        }
    }
}

// =============================================================================
// MEMORY DEVICE
// =============================================================================

/// A device that can back heaps with native memory.
pub trait MemoryDevice: Send + Sync {
    /// Native memory object backing one heap.
    type Memory: Send;

    /// Memory types, indexed by memory type index.
    ///
    /// The list must not change for the lifetime of the device.
    fn memory_types(&self) -> &[MemoryTypeDescriptor];

    /// Is this an integrated / unified-memory device.
    fn is_unified_memory(&self) -> bool;

    /// Allocates a native heap of `size` bytes from `memory_type_index`.
    fn create_heap(&self, memory_type_index: u32, size: u64) -> Result<Self::Memory, DeviceError>;

    /// Returns a native heap to the device.
    fn destroy_heap(&self, memory: Self::Memory);

    /// Size, alignment and compatible memory types for a resource shape.
    fn resource_requirements(&self, shape: &ResourceShape) -> MemoryRequirements;

    /// Budget of one physical heap, `None` when the device cannot tell.
    fn query_budget(&self, memory_heap_index: u32) -> Option<DeviceBudget>;

    /// Binds a resource of `shape` to `memory` at `offset`.
    fn bind_memory(
        &self,
        shape: &ResourceShape,
        memory: &Self::Memory,
        offset: u64,
    ) -> Result<(), DeviceError> {
        let _ = (shape, memory, offset);
        Ok(())
    }
}

impl<D: MemoryDevice + ?Sized> MemoryDevice for &D {
    type Memory = D::Memory;

    fn memory_types(&self) -> &[MemoryTypeDescriptor] {
        (**self).memory_types()
    }

    fn is_unified_memory(&self) -> bool {
        (**self).is_unified_memory()
    }

    fn create_heap(&self, memory_type_index: u32, size: u64) -> Result<Self::Memory, DeviceError> {
        (**self).create_heap(memory_type_index, size)
    }

    fn destroy_heap(&self, memory: Self::Memory) {
        (**self).destroy_heap(memory)
    }

    fn resource_requirements(&self, shape: &ResourceShape) -> MemoryRequirements {
        (**self).resource_requirements(shape)
    }

    fn query_budget(&self, memory_heap_index: u32) -> Option<DeviceBudget> {
        (**self).query_budget(memory_heap_index)
    }

    fn bind_memory(
        &self,
        shape: &ResourceShape,
        memory: &Self::Memory,
        offset: u64,
    ) -> Result<(), DeviceError> {
        (**self).bind_memory(shape, memory, offset)
    }
}
