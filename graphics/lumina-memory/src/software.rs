//! Software Device
//!
//! A host-simulated [`MemoryDevice`]. Native heaps are bookkeeping records
//! only; no bytes are reserved. Capacities, heap-count limits and budgets are
//! enforced the way a driver would, which makes it the reference collaborator
//! for tests and for dry-running placement policies.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use lumina_core::{
    DeviceBudget, DeviceError, MemoryDevice, MemoryHeapFlags, MemoryPropertyFlags,
    MemoryRequirements, MemoryTypeDescriptor, ResourceShape,
};
use spin::Mutex;

use crate::settings::MIB;

const GIB: u64 = 1024 * MIB;

/// A native heap handed out by [`SoftwareDevice`].
#[derive(Debug, PartialEq, Eq)]
pub struct SoftwareMemory {
    /// Unique per device.
    pub id: u64,
    /// Memory type it was created from.
    pub memory_type_index: u32,
    /// Size in bytes.
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
struct SimulatedHeap {
    capacity: u64,
    flags: MemoryHeapFlags,
    budget: Option<u64>,
}

/// Host-simulated device.
#[derive(Debug)]
pub struct SoftwareDevice {
    heaps: Vec<SimulatedHeap>,
    memory_types: Vec<MemoryTypeDescriptor>,
    unified_memory: bool,
    buffer_alignment: u64,
    texture_alignment: u64,
    heap_limit: Option<usize>,
    failing_binds: Option<DeviceError>,
    /// Live bytes per simulated heap.
    usage: Mutex<Vec<u64>>,
    next_id: AtomicU64,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    bound: AtomicUsize,
}

impl SoftwareDevice {
    /// A device with no memory.
    pub fn new(unified_memory: bool) -> Self {
        Self {
            heaps: Vec::new(),
            memory_types: Vec::new(),
            unified_memory,
            buffer_alignment: 256,
            texture_alignment: 64 * 1024,
            heap_limit: None,
            failing_binds: None,
            usage: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            bound: AtomicUsize::new(0),
        }
    }

    /// Discrete GPU layout.
    ///
    /// | Type | Flags | Heap |
    /// |------|-------|------|
    /// | 0 | device local | 0: 8 GiB VRAM |
    /// | 1 | host visible, coherent | 1: 16 GiB system |
    /// | 2 | host visible, coherent, cached | 1 |
    /// | 3 | device local, host visible, coherent | 2: 256 MiB BAR |
    pub fn discrete() -> Self {
        Self::new(false)
            .with_memory_heap(8 * GIB, MemoryHeapFlags::DEVICE_LOCAL)
            .with_memory_heap(16 * GIB, MemoryHeapFlags::empty())
            .with_memory_heap(256 * MIB, MemoryHeapFlags::DEVICE_LOCAL)
            .with_memory_type(MemoryPropertyFlags::DEVICE_LOCAL, 0)
            .with_memory_type(MemoryPropertyFlags::HOST_UPLOAD, 1)
            .with_memory_type(MemoryPropertyFlags::HOST_READBACK, 1)
            .with_memory_type(
                MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_UPLOAD,
                2,
            )
    }

    /// Integrated GPU layout: one 4 GiB heap shared with the host.
    ///
    /// | Type | Flags |
    /// |------|-------|
    /// | 0 | device local |
    /// | 1 | device local, host visible, coherent |
    /// | 2 | device local, host visible, coherent, cached |
    pub fn unified() -> Self {
        Self::new(true)
            .with_memory_heap(4 * GIB, MemoryHeapFlags::DEVICE_LOCAL)
            .with_memory_type(MemoryPropertyFlags::DEVICE_LOCAL, 0)
            .with_memory_type(
                MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_UPLOAD,
                0,
            )
            .with_memory_type(
                MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_READBACK,
                0,
            )
    }

    /// Adds a physical heap.
    pub fn with_memory_heap(mut self, capacity: u64, flags: MemoryHeapFlags) -> Self {
        self.heaps.push(SimulatedHeap {
            capacity,
            flags,
            budget: None,
        });
        self.usage.get_mut().push(0);
        self
    }

    /// Adds a memory type on an existing heap.
    pub fn with_memory_type(mut self, flags: MemoryPropertyFlags, heap_index: u32) -> Self {
        let heap = self.heaps[heap_index as usize];
        self.memory_types.push(MemoryTypeDescriptor::new(
            self.memory_types.len() as u32,
            flags,
            heap_index,
            heap.capacity,
            heap.flags,
        ));
        self
    }

    /// Reports `budget` bytes for a heap. Heaps without one report nothing.
    pub fn with_budget(mut self, heap_index: u32, budget: u64) -> Self {
        self.heaps[heap_index as usize].budget = Some(budget);
        self
    }

    /// Caps the number of live native heaps.
    pub fn with_heap_limit(mut self, limit: usize) -> Self {
        self.heap_limit = Some(limit);
        self
    }

    /// Placement alignment of buffers and textures.
    pub fn with_alignments(mut self, buffer: u64, texture: u64) -> Self {
        self.buffer_alignment = buffer;
        self.texture_alignment = texture;
        self
    }

    /// Makes every bind fail with `error`.
    pub fn with_failing_binds(mut self, error: DeviceError) -> Self {
        self.failing_binds = Some(error);
        self
    }

    /// Heaps created so far.
    pub fn heaps_created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Heaps destroyed so far.
    pub fn heaps_destroyed(&self) -> usize {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Heaps currently alive.
    pub fn live_heap_count(&self) -> usize {
        self.heaps_created() - self.heaps_destroyed()
    }

    /// Bytes of live heaps on a physical heap.
    pub fn live_heap_bytes(&self, heap_index: u32) -> u64 {
        self.usage
            .lock()
            .get(heap_index as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Successful binds so far.
    pub fn bound_resources(&self) -> usize {
        self.bound.load(Ordering::Acquire)
    }
}

impl MemoryDevice for SoftwareDevice {
    type Memory = SoftwareMemory;

    fn memory_types(&self) -> &[MemoryTypeDescriptor] {
        &self.memory_types
    }

    fn is_unified_memory(&self) -> bool {
        self.unified_memory
    }

    fn create_heap(&self, memory_type_index: u32, size: u64) -> Result<SoftwareMemory, DeviceError> {
        let memory_type = self
            .memory_types
            .get(memory_type_index as usize)
            .ok_or(DeviceError::InvalidMemoryType)?;
        let heap_index = memory_type.heap_index as usize;

        let mut usage = self.usage.lock();

        if let Some(limit) = self.heap_limit {
            if self.live_heap_count() >= limit {
                return Err(DeviceError::OutOfDeviceMemory);
            }
        }

        let used = usage[heap_index];
        if size > self.heaps[heap_index].capacity - used {
            return Err(DeviceError::OutOfDeviceMemory);
        }
        usage[heap_index] = used + size;
        self.created.fetch_add(1, Ordering::AcqRel);

        Ok(SoftwareMemory {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            memory_type_index,
            size,
        })
    }

    fn destroy_heap(&self, memory: SoftwareMemory) {
        let Some(memory_type) = self.memory_types.get(memory.memory_type_index as usize) else {
            log::error!("software device: heap {} has unknown memory type", memory.id);
            return;
        };

        let mut usage = self.usage.lock();
        let used = &mut usage[memory_type.heap_index as usize];
        *used = used.saturating_sub(memory.size);
        self.destroyed.fetch_add(1, Ordering::AcqRel);
    }

    fn resource_requirements(&self, shape: &ResourceShape) -> MemoryRequirements {
        let alignment = match shape {
            ResourceShape::Buffer { .. } => self.buffer_alignment,
            ResourceShape::Texture(_) => self.texture_alignment,
        };
        let size = match alignment {
            0 => shape.content_size(),
            _ => shape
                .content_size()
                .div_ceil(alignment)
                .checked_mul(alignment)
                .unwrap_or(u64::MAX),
        };
        let all_types = u32::MAX >> (32 - self.memory_types.len().clamp(1, 32));

        MemoryRequirements::new(size, alignment, all_types)
    }

    fn query_budget(&self, memory_heap_index: u32) -> Option<DeviceBudget> {
        let budget = self.heaps.get(memory_heap_index as usize)?.budget?;
        Some(DeviceBudget {
            budget,
            usage: self.live_heap_bytes(memory_heap_index),
        })
    }

    fn bind_memory(
        &self,
        shape: &ResourceShape,
        memory: &SoftwareMemory,
        offset: u64,
    ) -> Result<(), DeviceError> {
        if let Some(error) = self.failing_binds {
            return Err(error);
        }
        if offset.saturating_add(shape.content_size()) > memory.size {
            return Err(DeviceError::OutOfDeviceMemory);
        }
        self.bound.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumina_core::{BufferKind, TexelFormat, TextureDesc};

    #[test]
    fn test_presets() {
        let discrete = SoftwareDevice::discrete();
        assert!(!discrete.is_unified_memory());
        assert_eq!(discrete.memory_types().len(), 4);
        assert_eq!(discrete.memory_types()[3].heap_index, 2);
        assert_eq!(discrete.memory_types()[3].heap_size, 256 * MIB);

        let unified = SoftwareDevice::unified();
        assert!(unified.is_unified_memory());
        assert!(unified.memory_types().iter().all(|t| t.is_device_local()));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let device = SoftwareDevice::discrete();
        let a = device.create_heap(3, 200 * MIB).unwrap();
        assert_eq!(
            device.create_heap(3, 100 * MIB),
            Err(DeviceError::OutOfDeviceMemory)
        );
        device.destroy_heap(a);
        let b = device.create_heap(3, 100 * MIB).unwrap();
        assert_eq!(device.live_heap_bytes(2), 100 * MIB);
        device.destroy_heap(b);
        assert_eq!(device.live_heap_count(), 0);
        assert_eq!(device.create_heap(9, MIB), Err(DeviceError::InvalidMemoryType));
    }

    #[test]
    fn test_requirements_are_aligned() {
        let device = SoftwareDevice::discrete();
        let buffer = device.resource_requirements(&ResourceShape::buffer(BufferKind::Constant, 100));
        assert_eq!(buffer, MemoryRequirements::new(256, 256, 0b1111));

        let texture = device.resource_requirements(&ResourceShape::texture(TextureDesc::new_2d(
            64,
            64,
            TexelFormat::R8G8B8A8Unorm,
        )));
        assert_eq!(texture.size, 64 * 1024);
        assert_eq!(texture.alignment, 64 * 1024);
    }

    #[test]
    fn test_huge_requirements_saturate() {
        let device = SoftwareDevice::discrete();
        let shape = ResourceShape::buffer(BufferKind::Default, u64::MAX - 10);
        assert_eq!(device.resource_requirements(&shape).size, u64::MAX);

        let memory = device.create_heap(0, MIB).unwrap();
        assert_eq!(
            device.bind_memory(&shape, &memory, 256),
            Err(DeviceError::OutOfDeviceMemory)
        );
        assert_eq!(device.bound_resources(), 0);
        device.destroy_heap(memory);
    }

    #[test]
    fn test_budget_reports_live_bytes() {
        let device = SoftwareDevice::discrete().with_budget(1, GIB);
        assert_eq!(device.query_budget(0), None);

        let memory = device.create_heap(1, 64 * MIB).unwrap();
        assert_eq!(
            device.query_budget(1),
            Some(DeviceBudget {
                budget: GIB,
                usage: 64 * MIB,
            })
        );
        device.destroy_heap(memory);
    }
}
