//! Regions and region handles
//!
//! A region is a byte range of one heap, either free or allocated. The
//! regions of a heap always partition it without gaps.

use lumina_core::Handle;

/// Marker type for heap handles.
#[derive(Debug)]
pub struct HeapMarker;

/// Identifier of a heap inside its collection.
pub type HeapId = Handle<HeapMarker>;

/// Region state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// Available for placement.
    Free,
    /// Handed out.
    Allocated {
        /// Offset reported to the owner (aligned).
        offset: u64,
        /// Size reported to the owner.
        size: u64,
        /// Alignment requested by the owner.
        alignment: u64,
    },
}

/// A byte range `[offset, offset + size)` of one heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start of the range.
    pub offset: u64,
    /// Length of the range.
    pub size: u64,
    /// Free or allocated.
    pub state: RegionState,
}

impl Region {
    /// Free region.
    pub const fn free(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            state: RegionState::Free,
        }
    }

    /// End of the range.
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Is free.
    pub const fn is_free(&self) -> bool {
        matches!(self.state, RegionState::Free)
    }
}

// ============================================================================
// Memory Region Handle
// ============================================================================

/// Handle to an allocated region.
///
/// Exactly one handle exists per allocated region. It is move-only and is
/// consumed by `free`.
#[derive(Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    memory_type_index: u32,
    heap: HeapId,
    offset: u64,
    size: u64,
    alignment: u64,
}

impl MemoryRegion {
    pub(crate) const fn new(
        memory_type_index: u32,
        heap: HeapId,
        offset: u64,
        size: u64,
        alignment: u64,
    ) -> Self {
        Self {
            memory_type_index,
            heap,
            offset,
            size,
            alignment,
        }
    }

    /// Memory type (and heap collection) index.
    pub const fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Heap inside the collection.
    pub const fn heap(&self) -> HeapId {
        self.heap
    }

    /// Offset inside the heap.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Size in bytes.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Alignment the offset satisfies.
    pub const fn alignment(&self) -> u64 {
        self.alignment
    }

    /// One past the last byte.
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Forges a second handle to the same bytes (double-free tests).
    #[cfg(test)]
    pub(crate) fn duplicate(&self) -> Self {
        Self::new(
            self.memory_type_index,
            self.heap,
            self.offset,
            self.size,
            self.alignment,
        )
    }
}
