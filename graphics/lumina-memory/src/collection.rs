//! Heap Collections
//!
//! All heaps backing one memory type. Requests are placed first-fit across
//! the heaps in creation order; a new heap is created only when none of them
//! has room.
//!
//! One lock guards the heap list and every region list inside it. Native heap
//! creation and destruction also happen under it, so a collection never sees
//! a half-registered heap.

use alloc::vec::Vec;

use lumina_core::{HandleAllocator, MemoryDevice, MemoryTypeDescriptor, ResourceShape};
use spin::Mutex;

use crate::error::{MemoryError, MemoryResult};
use crate::heap::Heap;
use crate::region::{HeapId, HeapMarker, MemoryRegion};
use crate::settings::{AllocationFlags, AllocatorSettings};

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStatistics {
    /// Memory type index.
    pub memory_type_index: u32,
    /// Live heaps.
    pub heap_count: usize,
    /// Bytes held from the device.
    pub total_heap_size: u64,
    /// Bytes in allocated regions.
    pub allocated_region_size: u64,
    /// Allocated regions.
    pub allocated_region_count: usize,
    /// Free regions.
    pub free_region_count: usize,
    /// Largest free region over all heaps.
    pub largest_free_region: u64,
}

impl CollectionStatistics {
    /// Bytes held but not handed out.
    pub fn free_size(&self) -> u64 {
        self.total_heap_size - self.allocated_region_size
    }
}

// ============================================================================
// Heap Collection
// ============================================================================

#[derive(Debug)]
struct CollectionState<M> {
    /// In creation order.
    heaps: Vec<Heap<M>>,
    ids: HandleAllocator<HeapMarker>,
}

/// The heaps of one memory type.
#[derive(Debug)]
pub struct HeapCollection<M> {
    descriptor: MemoryTypeDescriptor,
    block_size: u64,
    settings: AllocatorSettings,
    state: Mutex<CollectionState<M>>,
}

impl<M> HeapCollection<M> {
    /// Creates an empty collection.
    pub fn new(descriptor: MemoryTypeDescriptor, settings: &AllocatorSettings) -> Self {
        Self {
            descriptor,
            block_size: settings.block_size_for_heap(descriptor.heap_size),
            settings: *settings,
            state: Mutex::new(CollectionState {
                heaps: Vec::new(),
                ids: HandleAllocator::new(),
            }),
        }
    }

    /// Memory type served.
    pub fn descriptor(&self) -> &MemoryTypeDescriptor {
        &self.descriptor
    }

    /// Size of a shared heap.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Live heaps.
    pub fn heap_count(&self) -> usize {
        self.state.lock().heaps.len()
    }

    /// Bytes held from the device.
    pub fn total_heap_size(&self) -> u64 {
        self.state.lock().heaps.iter().map(Heap::size).sum()
    }

    /// Places `size` bytes aligned to `alignment`.
    ///
    /// When `shape` is given the resource is bound to the placement before
    /// the lock is dropped; a failed bind undoes the placement.
    pub fn allocate<D>(
        &self,
        device: &D,
        size: u64,
        alignment: u64,
        flags: AllocationFlags,
        shape: Option<&ResourceShape>,
    ) -> MemoryResult<MemoryRegion>
    where
        D: MemoryDevice<Memory = M> + ?Sized,
    {
        if !alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment);
        }
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let mut state = self.state.lock();

        let placed = if flags.contains(AllocationFlags::DEDICATED_HEAP) {
            None
        } else {
            state
                .heaps
                .iter_mut()
                .filter(|heap| !heap.is_dedicated())
                .find_map(|heap| Some((heap.id(), heap.try_allocate(size, alignment)?)))
        };

        let (heap_id, offset) = match placed {
            Some(placement) => placement,
            None => {
                let dedicated =
                    flags.contains(AllocationFlags::DEDICATED_HEAP) || size > self.block_size;
                let heap_size = if dedicated { size } else { self.block_size };
                self.create_heap(device, &mut state, heap_size, dedicated, flags)?;

                let heap = state.heaps.last_mut().ok_or(MemoryError::OutOfMemory)?;
                let offset = heap
                    .try_allocate(size, alignment)
                    .ok_or(MemoryError::OutOfMemory)?;
                (heap.id(), offset)
            },
        };

        if let Some(shape) = shape {
            let heap = Self::find(&mut state.heaps, heap_id)?;
            if let Err(e) = device.bind_memory(shape, heap.memory(), offset) {
                heap.free(offset, size)?;
                self.release_if_unused(device, &mut state, heap_id);
                return Err(e.into());
            }
        }

        if self.settings.log_allocations {
            log::trace!(
                "memory type {}: allocated {} bytes at {:?}+{:#x} (align {})",
                self.descriptor.index,
                size,
                heap_id,
                offset,
                alignment
            );
        }

        Ok(MemoryRegion::new(
            self.descriptor.index,
            heap_id,
            offset,
            size,
            alignment,
        ))
    }

    /// Returns a region to its heap.
    ///
    /// A heap left empty goes back to the device if it was dedicated or the
    /// collection holds more than `minimum_heap_count` heaps.
    pub fn free<D>(&self, device: &D, region: MemoryRegion) -> MemoryResult<()>
    where
        D: MemoryDevice<Memory = M> + ?Sized,
    {
        if region.memory_type_index() != self.descriptor.index {
            return Err(MemoryError::RegionNotFound);
        }

        let mut state = self.state.lock();
        let heap = Self::find(&mut state.heaps, region.heap())?;
        heap.free(region.offset(), region.size())?;

        if self.settings.log_frees {
            log::trace!(
                "memory type {}: freed {} bytes at {:?}+{:#x}",
                self.descriptor.index,
                region.size(),
                region.heap(),
                region.offset()
            );
        }

        self.release_if_unused(device, &mut state, region.heap());
        Ok(())
    }

    /// Snapshot of the collection.
    pub fn statistics(&self) -> CollectionStatistics {
        let state = self.state.lock();
        let mut stats = CollectionStatistics {
            memory_type_index: self.descriptor.index,
            heap_count: state.heaps.len(),
            ..CollectionStatistics::default()
        };

        for heap in &state.heaps {
            stats.total_heap_size += heap.size();
            stats.allocated_region_size += heap.allocated_bytes();
            stats.allocated_region_count += heap.allocated_region_count();
            stats.free_region_count += heap.region_count() - heap.allocated_region_count();
            stats.largest_free_region = stats.largest_free_region.max(heap.largest_free_region());
        }

        stats
    }

    /// Checks every heap.
    pub fn validate(&self) -> Result<(), &'static str> {
        self.state.lock().heaps.iter().try_for_each(Heap::validate)
    }

    /// Gives every heap back to the device.
    ///
    /// Returns the number of regions that were still allocated.
    pub fn teardown<D>(&self, device: &D) -> usize
    where
        D: MemoryDevice<Memory = M> + ?Sized,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut live = 0;

        for heap in state.heaps.drain(..) {
            let count = heap.allocated_region_count();
            if count != 0 && self.settings.log_leaks_on_shutdown {
                log::warn!(
                    "memory type {}: heap {:?} released with {} live regions ({} bytes)",
                    self.descriptor.index,
                    heap.id(),
                    count,
                    heap.allocated_bytes()
                );
            }
            live += count;
            state.ids.release(heap.id());
            device.destroy_heap(heap.into_memory());
        }

        live
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn find(heaps: &mut [Heap<M>], id: HeapId) -> MemoryResult<&mut Heap<M>> {
        heaps
            .iter_mut()
            .find(|heap| heap.id() == id)
            .ok_or(MemoryError::RegionNotFound)
    }

    fn create_heap<D>(
        &self,
        device: &D,
        state: &mut CollectionState<M>,
        size: u64,
        dedicated: bool,
        flags: AllocationFlags,
    ) -> MemoryResult<()>
    where
        D: MemoryDevice<Memory = M> + ?Sized,
    {
        if flags.contains(AllocationFlags::EXISTING_HEAPS_ONLY) {
            return Err(MemoryError::OutOfMemory);
        }

        if state.heaps.len() >= self.settings.maximum_heap_count {
            log::warn!(
                "memory type {}: heap limit of {} reached",
                self.descriptor.index,
                self.settings.maximum_heap_count
            );
            return Err(MemoryError::OutOfMemory);
        }

        if flags.contains(AllocationFlags::WITHIN_BUDGET) {
            if let Some(budget) = device.query_budget(self.descriptor.heap_index) {
                if budget.usage.saturating_add(size) > budget.budget {
                    return Err(MemoryError::OutOfMemory);
                }
            }
        }

        let memory = device.create_heap(self.descriptor.index, size).map_err(|e| {
            log::debug!(
                "memory type {}: device refused a {} byte heap: {}",
                self.descriptor.index,
                size,
                e
            );
            MemoryError::from(e)
        })?;

        let id = state.ids.allocate();
        log::debug!(
            "memory type {}: created {}heap {:?} of {} bytes",
            self.descriptor.index,
            if dedicated { "dedicated " } else { "" },
            id,
            size
        );

        state.heaps.push(Heap::new(
            id,
            memory,
            size,
            dedicated,
            self.settings.minimum_free_region_size,
        ));
        Ok(())
    }

    fn release_if_unused<D>(&self, device: &D, state: &mut CollectionState<M>, id: HeapId)
    where
        D: MemoryDevice<Memory = M> + ?Sized,
    {
        let Some(position) = state.heaps.iter().position(|heap| heap.id() == id) else {
            return;
        };

        let heap = &state.heaps[position];
        if !heap.is_empty() {
            return;
        }
        if !heap.is_dedicated() && state.heaps.len() <= self.settings.minimum_heap_count {
            return;
        }

        let heap = state.heaps.remove(position);
        state.ids.release(id);
        log::debug!(
            "memory type {}: released heap {:?} of {} bytes",
            self.descriptor.index,
            id,
            heap.size()
        );
        device.destroy_heap(heap.into_memory());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MIB;
    use crate::software::{SoftwareDevice, SoftwareMemory};
    use lumina_core::{BufferKind, DeviceError, MemoryRequirements};
    use std::vec::Vec;

    fn collection(device: &SoftwareDevice, settings: AllocatorSettings) -> HeapCollection<SoftwareMemory> {
        HeapCollection::new(device.memory_types()[0], &settings)
    }

    fn settings() -> AllocatorSettings {
        AllocatorSettings::default().with_preferred_block_size(64 * MIB)
    }

    #[test]
    fn test_first_request_creates_block_sized_heap() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings());

        let region = heaps.allocate(&device, MIB, 256, AllocationFlags::empty(), None).unwrap();
        assert_eq!(region.offset(), 0);
        assert_eq!(heaps.heap_count(), 1);
        assert_eq!(heaps.total_heap_size(), 64 * MIB);
        assert_eq!(device.heaps_created(), 1);

        heaps.free(&device, region).unwrap();
        assert_eq!(heaps.heap_count(), 0);
        assert_eq!(device.heaps_destroyed(), 1);
    }

    #[test]
    fn test_large_request_gets_dedicated_heap() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings());

        let region = heaps
            .allocate(&device, 128 * MIB, 256, AllocationFlags::empty(), None)
            .unwrap();
        assert_eq!(heaps.total_heap_size(), 128 * MIB);
        assert_eq!(device.live_heap_bytes(0), 128 * MIB);

        // Dedicated heaps are never shared.
        let small = heaps.allocate(&device, MIB, 256, AllocationFlags::empty(), None).unwrap();
        assert_ne!(small.heap(), region.heap());
        assert_eq!(heaps.heap_count(), 2);

        heaps.free(&device, region).unwrap();
        heaps.free(&device, small).unwrap();
    }

    #[test]
    fn test_first_fit_across_heaps() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings());

        let a = heaps.allocate(&device, 48 * MIB, 256, AllocationFlags::empty(), None).unwrap();
        let b = heaps.allocate(&device, 32 * MIB, 256, AllocationFlags::empty(), None).unwrap();
        assert_ne!(a.heap(), b.heap());

        // Fits in the tail of the first heap.
        let c = heaps.allocate(&device, 16 * MIB, 256, AllocationFlags::empty(), None).unwrap();
        assert_eq!(c.heap(), a.heap());
        assert_eq!(c.offset(), 48 * MIB);
        assert_eq!(heaps.heap_count(), 2);

        for region in [a, b, c] {
            heaps.free(&device, region).unwrap();
        }
    }

    #[test]
    fn test_dedicated_flag() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings());

        let shared = heaps.allocate(&device, MIB, 256, AllocationFlags::empty(), None).unwrap();
        let dedicated = heaps
            .allocate(&device, MIB, 256, AllocationFlags::DEDICATED_HEAP, None)
            .unwrap();
        assert_ne!(shared.heap(), dedicated.heap());
        assert_eq!(heaps.total_heap_size(), 65 * MIB);

        heaps.free(&device, dedicated).unwrap();
        assert_eq!(heaps.heap_count(), 1);
        heaps.free(&device, shared).unwrap();
    }

    #[test]
    fn test_existing_heaps_only() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings().with_minimum_heap_count(1));

        assert_eq!(
            heaps.allocate(&device, MIB, 256, AllocationFlags::EXISTING_HEAPS_ONLY, None),
            Err(MemoryError::OutOfMemory)
        );
        assert_eq!(device.heaps_created(), 0);

        let region = heaps.allocate(&device, MIB, 256, AllocationFlags::empty(), None).unwrap();
        heaps.free(&device, region).unwrap();

        // The retained heap still serves.
        let region = heaps
            .allocate(&device, MIB, 256, AllocationFlags::EXISTING_HEAPS_ONLY, None)
            .unwrap();
        heaps.free(&device, region).unwrap();
        assert_eq!(device.heaps_created(), 1);
    }

    #[test]
    fn test_minimum_heap_count_retains_empty_heaps() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings().with_minimum_heap_count(1));

        let a = heaps.allocate(&device, 60 * MIB, 256, AllocationFlags::empty(), None).unwrap();
        let b = heaps.allocate(&device, 60 * MIB, 256, AllocationFlags::empty(), None).unwrap();
        assert_eq!(heaps.heap_count(), 2);

        heaps.free(&device, a).unwrap();
        assert_eq!(heaps.heap_count(), 1);
        heaps.free(&device, b).unwrap();
        assert_eq!(heaps.heap_count(), 1);
        assert_eq!(heaps.statistics().allocated_region_count, 0);

        assert_eq!(heaps.teardown(&device), 0);
        assert_eq!(device.live_heap_count(), 0);
    }

    #[test]
    fn test_maximum_heap_count() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings().with_maximum_heap_count(1));

        let a = heaps.allocate(&device, 60 * MIB, 256, AllocationFlags::empty(), None).unwrap();
        assert_eq!(
            heaps.allocate(&device, 60 * MIB, 256, AllocationFlags::empty(), None),
            Err(MemoryError::OutOfMemory)
        );
        heaps.free(&device, a).unwrap();
    }

    #[test]
    fn test_within_budget() {
        let device = SoftwareDevice::discrete().with_budget(0, 100 * MIB);
        let heaps = collection(&device, settings());

        let a = heaps.allocate(&device, 60 * MIB, 256, AllocationFlags::WITHIN_BUDGET, None).unwrap();
        assert_eq!(
            heaps.allocate(&device, 60 * MIB, 256, AllocationFlags::WITHIN_BUDGET, None),
            Err(MemoryError::OutOfMemory)
        );
        // Without the flag the budget is advisory.
        let b = heaps.allocate(&device, 60 * MIB, 256, AllocationFlags::empty(), None).unwrap();

        heaps.free(&device, a).unwrap();
        heaps.free(&device, b).unwrap();
    }

    #[test]
    fn test_exhaustion_keeps_existing_regions() {
        let device = SoftwareDevice::discrete().with_heap_limit(3);
        let heaps = collection(&device, settings());

        let mut live = Vec::new();
        let error = loop {
            match heaps.allocate(&device, 40 * MIB, 4096, AllocationFlags::empty(), None) {
                Ok(region) => live.push(region),
                Err(e) => break e,
            }
        };

        assert_eq!(error, MemoryError::OutOfMemory);
        assert_eq!(live.len(), 3);
        assert_eq!(heaps.heap_count(), 3);
        assert_eq!(heaps.validate(), Ok(()));

        for region in live {
            heaps.free(&device, region).unwrap();
        }
        assert_eq!(device.live_heap_count(), 0);
    }

    #[test]
    fn test_double_free() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings().with_minimum_heap_count(1));

        let region = heaps.allocate(&device, MIB, 256, AllocationFlags::empty(), None).unwrap();
        let forged = region.duplicate();
        heaps.free(&device, region).unwrap();
        assert_eq!(heaps.free(&device, forged), Err(MemoryError::RegionNotFound));
        heaps.teardown(&device);
    }

    #[test]
    fn test_invalid_alignment_skips_device() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings());

        for alignment in [0, 3, 768] {
            assert_eq!(
                heaps.allocate(&device, MIB, alignment, AllocationFlags::empty(), None),
                Err(MemoryError::InvalidAlignment)
            );
        }
        assert_eq!(
            heaps.allocate(&device, 0, 256, AllocationFlags::empty(), None),
            Err(MemoryError::InvalidSize)
        );
        assert_eq!(device.heaps_created(), 0);
    }

    #[test]
    fn test_failed_bind_undoes_placement() {
        let device = SoftwareDevice::discrete().with_failing_binds(DeviceError::Lost);
        let heaps = collection(&device, settings());
        let shape = ResourceShape::buffer(BufferKind::Vertex, MIB);
        let requirements: MemoryRequirements = device.resource_requirements(&shape);

        assert_eq!(
            heaps.allocate(
                &device,
                requirements.size,
                requirements.alignment,
                AllocationFlags::empty(),
                Some(&shape)
            ),
            Err(MemoryError::Device(DeviceError::Lost))
        );
        assert_eq!(heaps.heap_count(), 0);
        assert_eq!(device.bound_resources(), 0);
    }

    #[test]
    fn test_statistics() {
        let device = SoftwareDevice::discrete();
        let heaps = collection(&device, settings());

        let a = heaps.allocate(&device, MIB, 256, AllocationFlags::empty(), None).unwrap();
        let b = heaps.allocate(&device, 2 * MIB, 256, AllocationFlags::empty(), None).unwrap();

        let stats = heaps.statistics();
        assert_eq!(stats.heap_count, 1);
        assert_eq!(stats.allocated_region_count, 2);
        assert_eq!(stats.allocated_region_size, 3 * MIB);
        assert_eq!(stats.free_region_count, 1);
        assert_eq!(stats.largest_free_region, 61 * MIB);
        assert_eq!(stats.free_size(), 61 * MIB);

        assert_eq!(heaps.teardown(&device), 2);
        drop((a, b));
    }
}
