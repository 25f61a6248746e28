//! LUMINA Memory - GPU Memory Allocation Engine
//!
//! Turns a few large native heaps into many small, individually freeable
//! allocations for buffers and textures.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    MemoryAllocator                      │
//! │     memory type selection · budget · resources          │
//! ├──────────────────┬──────────────────┬───────────────────┤
//! │  HeapCollection  │  HeapCollection  │       ...         │
//! │  (memory type 0) │  (memory type 1) │                   │
//! ├──────────────────┼──────────────────┼───────────────────┤
//! │  Heap  Heap ...  │  Heap ...        │                   │
//! │  ├ Region (free) │                  │                   │
//! │  └ Region (used) │                  │                   │
//! └──────────────────┴──────────────────┴───────────────────┘
//!                           │
//!                  lumina_core::MemoryDevice
//! ```
//!
//! # Example
//!
//! ```
//! use lumina_core::{BufferKind, CpuAccess};
//! use lumina_memory::{AllocationFlags, AllocatorSettings, MemoryAllocator, SoftwareDevice};
//!
//! let device = SoftwareDevice::discrete();
//! let allocator = MemoryAllocator::new(&device, AllocatorSettings::default())?;
//!
//! let buffer = allocator.create_buffer(
//!     BufferKind::Vertex,
//!     CpuAccess::CpuToGpu,
//!     64 * 1024,
//!     AllocationFlags::empty(),
//! )?;
//! drop(buffer);
//!
//! allocator.shutdown()?;
//! # Ok::<(), lumina_memory::MemoryError>(())
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod allocator;
pub mod budget;
pub mod collection;
pub mod error;
pub mod heap;
pub mod region;
pub mod resource;
pub mod selection;
pub mod settings;
pub mod software;

/// Prelude for common imports
pub mod prelude {
    pub use crate::allocator::{AllocatorStatistics, MemoryAllocator};
    pub use crate::budget::{BudgetScope, MemoryBudget};
    pub use crate::collection::{CollectionStatistics, HeapCollection};
    pub use crate::error::{MemoryError, MemoryResult};
    pub use crate::heap::Heap;
    pub use crate::region::{HeapId, MemoryRegion, Region, RegionState};
    pub use crate::resource::{Buffer, GpuResource, Texture};
    pub use crate::selection::select_memory_type;
    pub use crate::settings::{AllocationFlags, AllocatorSettings};
    pub use crate::software::{SoftwareDevice, SoftwareMemory};
}

pub use prelude::*;
