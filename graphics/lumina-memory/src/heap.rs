//! Heap Suballocator
//!
//! A heap is one native memory block of fixed size, carved into regions.
//!
//! Regions are kept in a slab of nodes linked in offset order, so a freed
//! region finds both neighbors in O(1). Allocated regions are additionally
//! indexed by the offset reported to their owner.
//!
//! ```text
//!   0                                                             size
//!   ├──────────┬────┬──────────────┬──────────────────────────────┤
//!   │ alloc A  │pad │   alloc B    │            free              │
//!   └──────────┴────┴──────────────┴──────────────────────────────┘
//!                  ▲ free padding region (>= minimum_free_region_size)
//! ```

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::{MemoryError, MemoryResult};
use crate::region::{HeapId, Region, RegionState};

const NIL: u32 = u32::MAX;

/// Round `value` up to `alignment`. `None` on overflow or when `alignment`
/// is not a power of two.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    if !alignment.is_power_of_two() {
        return None;
    }
    let mask = alignment - 1;
    Some(value.checked_add(mask)? & !mask)
}

#[derive(Debug, Clone, Copy)]
struct RegionNode {
    region: Region,
    prev: u32,
    next: u32,
}

// ============================================================================
// Heap
// ============================================================================

/// One native memory block and its region partition.
#[derive(Debug)]
pub struct Heap<M> {
    id: HeapId,
    size: u64,
    memory: M,
    dedicated: bool,
    /// Padding below this is folded into the allocation.
    granularity: u64,
    /// Region slab.
    nodes: Vec<RegionNode>,
    /// Unused slab slots.
    spare_nodes: Vec<u32>,
    /// Lowest-offset region.
    head: u32,
    /// Reported offset -> node, allocated regions only.
    allocated: BTreeMap<u64, u32>,
    free_bytes: u64,
    region_count: usize,
}

impl<M> Heap<M> {
    /// Creates a heap holding one free region spanning all of it.
    pub fn new(id: HeapId, memory: M, size: u64, dedicated: bool, granularity: u64) -> Self {
        let mut heap = Self {
            id,
            size,
            memory,
            dedicated,
            granularity,
            nodes: Vec::new(),
            spare_nodes: Vec::new(),
            head: NIL,
            allocated: BTreeMap::new(),
            free_bytes: size,
            region_count: 0,
        };
        heap.head = heap.insert_node(Region::free(0, size), NIL, NIL);
        heap
    }

    /// Heap id.
    pub fn id(&self) -> HeapId {
        self.id
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Native memory.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Gives the native memory back, dropping the bookkeeping.
    pub fn into_memory(self) -> M {
        self.memory
    }

    /// Was this heap sized to a single request.
    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    /// Bytes in free regions.
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    /// Bytes in allocated regions, absorbed padding included.
    pub fn allocated_bytes(&self) -> u64 {
        self.size - self.free_bytes
    }

    /// Number of allocated regions.
    pub fn allocated_region_count(&self) -> usize {
        self.allocated.len()
    }

    /// Number of regions, free and allocated.
    pub fn region_count(&self) -> usize {
        self.region_count
    }

    /// No allocated regions.
    pub fn is_empty(&self) -> bool {
        self.allocated.is_empty()
    }

    /// Size of the largest free region.
    pub fn largest_free_region(&self) -> u64 {
        self.regions()
            .filter(Region::is_free)
            .map(|r| r.size)
            .max()
            .unwrap_or(0)
    }

    /// Regions in offset order.
    pub fn regions(&self) -> Regions<'_, M> {
        Regions {
            heap: self,
            cursor: self.head,
        }
    }

    /// Places `size` bytes at the lowest offset that fits.
    ///
    /// Returns the aligned offset, or `None` when no free region is large
    /// enough or `alignment` is not a power of two.
    pub fn try_allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        if !alignment.is_power_of_two() || size == 0 || size > self.free_bytes {
            return None;
        }

        let mut cursor = self.head;
        while cursor != NIL {
            let node = self.nodes[cursor as usize];
            if node.region.is_free() {
                if let Some(offset) = self.fit(&node.region, size, alignment) {
                    self.place(cursor, offset, size, alignment);
                    self.check();
                    return Some(offset);
                }
            }
            cursor = node.next;
        }

        None
    }

    /// Frees the region reported at `offset` with `size`.
    ///
    /// Coalesces with free neighbors. Unknown offsets, size mismatches and
    /// double frees fail with `RegionNotFound`.
    pub fn free(&mut self, offset: u64, size: u64) -> MemoryResult<()> {
        let index = *self.allocated.get(&offset).ok_or(MemoryError::RegionNotFound)?;

        match self.nodes[index as usize].region.state {
            RegionState::Allocated { size: s, .. } if s == size => {},
            _ => return Err(MemoryError::RegionNotFound),
        }

        self.allocated.remove(&offset);

        let node = &mut self.nodes[index as usize];
        node.region.state = RegionState::Free;
        self.free_bytes += node.region.size;

        let next = node.next;
        if next != NIL && self.nodes[next as usize].region.is_free() {
            self.absorb_next(index);
        }

        let prev = self.nodes[index as usize].prev;
        if prev != NIL && self.nodes[prev as usize].region.is_free() {
            self.absorb_next(prev);
        }

        self.check();
        Ok(())
    }

    /// Checks the partition invariants.
    pub fn validate(&self) -> Result<(), &'static str> {
        let mut expected_offset = 0;
        let mut free_bytes = 0;
        let mut allocated = 0;
        let mut count = 0;
        let mut previous_free = false;
        let mut prev = NIL;
        let mut cursor = self.head;

        while cursor != NIL {
            let node = &self.nodes[cursor as usize];
            let region = node.region;

            if node.prev != prev {
                return Err("broken back link");
            }
            if region.offset != expected_offset {
                return Err("regions are not contiguous");
            }
            if region.size == 0 {
                return Err("empty region");
            }

            match region.state {
                RegionState::Free => {
                    if previous_free {
                        return Err("adjacent free regions");
                    }
                    free_bytes += region.size;
                    previous_free = true;
                },
                RegionState::Allocated {
                    offset,
                    size,
                    alignment,
                } => {
                    if offset % alignment != 0 {
                        return Err("misaligned allocation");
                    }
                    if offset < region.offset || offset + size > region.end() {
                        return Err("allocation outside its region");
                    }
                    if self.allocated.get(&offset) != Some(&cursor) {
                        return Err("allocation missing from offset index");
                    }
                    allocated += 1;
                    previous_free = false;
                },
            }

            expected_offset = region.end();
            count += 1;
            prev = cursor;
            cursor = node.next;
        }

        if expected_offset != self.size {
            return Err("regions do not cover the heap");
        }
        if free_bytes != self.free_bytes {
            return Err("free byte count out of sync");
        }
        if allocated != self.allocated.len() {
            return Err("allocated region count out of sync");
        }
        if count != self.region_count {
            return Err("region count out of sync");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn fit(&self, region: &Region, size: u64, alignment: u64) -> Option<u64> {
        let offset = align_up(region.offset, alignment)?;
        let end = offset.checked_add(size)?;
        (end <= region.end()).then_some(offset)
    }

    /// Splits free node `index` into [padding] allocated [tail].
    fn place(&mut self, index: u32, offset: u64, size: u64, alignment: u64) {
        let region = self.nodes[index as usize].region;
        let padding = offset - region.offset;
        let end = offset + size;

        let start = if padding != 0 && padding >= self.granularity {
            let prev = self.nodes[index as usize].prev;
            let pad = self.insert_node(Region::free(region.offset, padding), prev, index);
            self.link_after(prev, pad);
            self.nodes[index as usize].prev = pad;
            offset
        } else {
            region.offset
        };

        if end < region.end() {
            let next = self.nodes[index as usize].next;
            let tail = self.insert_node(Region::free(end, region.end() - end), index, next);
            if next != NIL {
                self.nodes[next as usize].prev = tail;
            }
            self.nodes[index as usize].next = tail;
        }

        let node = &mut self.nodes[index as usize];
        node.region = Region {
            offset: start,
            size: end - start,
            state: RegionState::Allocated {
                offset,
                size,
                alignment,
            },
        };
        self.free_bytes -= end - start;
        self.allocated.insert(offset, index);
    }

    /// Merges the node after `index` into `index`.
    fn absorb_next(&mut self, index: u32) {
        let next = self.nodes[index as usize].next;
        let absorbed = self.nodes[next as usize];

        let node = &mut self.nodes[index as usize];
        node.region.size += absorbed.region.size;
        node.next = absorbed.next;
        if absorbed.next != NIL {
            self.nodes[absorbed.next as usize].prev = index;
        }

        self.release_node(next);
    }

    fn link_after(&mut self, prev: u32, index: u32) {
        if prev == NIL {
            self.head = index;
        } else {
            self.nodes[prev as usize].next = index;
        }
    }

    fn insert_node(&mut self, region: Region, prev: u32, next: u32) -> u32 {
        let node = RegionNode { region, prev, next };
        self.region_count += 1;
        match self.spare_nodes.pop() {
            Some(index) => {
                self.nodes[index as usize] = node;
                index
            },
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            },
        }
    }

    fn release_node(&mut self, index: u32) {
        self.region_count -= 1;
        self.spare_nodes.push(index);
    }

    /// Panics on a corrupted partition.
    #[inline]
    fn check(&self) {
        if cfg!(any(debug_assertions, feature = "validation")) {
            if let Err(reason) = self.validate() {
                log::error!("heap {:?} corrupted: {}", self.id, reason);
                panic!("heap {:?} corrupted: {}", self.id, reason);
            }
        }
    }
}

// ============================================================================
// Region Iterator
// ============================================================================

/// Iterator over the regions of a heap, in offset order.
#[derive(Debug)]
pub struct Regions<'a, M> {
    heap: &'a Heap<M>,
    cursor: u32,
}

impl<M> Iterator for Regions<'_, M> {
    type Item = Region;

    fn next(&mut self) -> Option<Region> {
        if self.cursor == NIL {
            return None;
        }
        let node = &self.heap.nodes[self.cursor as usize];
        self.cursor = node.next;
        Some(node.region)
    }
}
