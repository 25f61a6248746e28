//! # LUMINA Core
//!
//! The contract between the LUMINA memory engine and a GPU device.
//!
//! Everything the allocator needs to know about a device lives here: which
//! memory types it exposes, how much memory a buffer or texture needs, and how
//! native heaps are created and destroyed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        lumina-core                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Memory    │  │  Resource   │  │      Device         │  │
//! │  │   Types     │  │   Shapes    │  │    Collaborator     │  │
//! │  │ (flags,     │  │ (buffers,   │  │ (heap create/       │  │
//! │  │  budgets)   │  │  textures)  │  │  destroy, reqs)     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │                  ┌─────────────────┐                        │
//! │                  │ Generational    │                        │
//! │                  │ Handles         │                        │
//! │                  └─────────────────┘                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod device;
pub mod handle;
pub mod memory_types;
pub mod resource;

pub use device::{DeviceError, MemoryDevice};
pub use handle::{Handle, HandleAllocator};
pub use memory_types::{
    CpuAccess, DeviceBudget, MemoryHeapFlags, MemoryPropertyFlags, MemoryRequirements,
    MemoryTypeDescriptor, MemoryTypeFilter,
};
pub use resource::{BufferKind, ResourceKind, ResourceShape, TexelFormat, TextureDesc, TextureKind};
