//! # Memory Errors
//!
//! Error taxonomy of the allocator.
//!
//! | Error | Caused by | Recoverable |
//! |-------|-----------|-------------|
//! | `NoCompatibleMemoryType` | resource cannot live in any memory type | no |
//! | `OutOfMemory` | device refused to grow a heap | free resources / retry |
//! | `RegionNotFound` | double free or forged handle | no (bug) |
//! | `InvalidAlignment` | alignment not a power of two | no (bug) |
//!
//! Failures are returned to the caller and never retried inside the
//! allocator; only the caller knows whether a fallback is acceptable.

use core::fmt;

use lumina_core::DeviceError;

/// Result type for memory operations.
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Memory allocator error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MemoryError {
    /// No memory type admits the resource.
    NoCompatibleMemoryType,
    /// The device could not provide another heap.
    OutOfMemory,
    /// The handle does not match an allocated region.
    RegionNotFound,
    /// Alignment is zero or not a power of two.
    InvalidAlignment,
    /// Zero-sized request.
    InvalidSize,
    /// Allocator settings are inconsistent.
    InvalidSettings(&'static str),
    /// Teardown found regions that were never freed.
    LiveAllocations {
        /// Number of regions still allocated.
        count: usize,
    },
    /// Device failure other than running out of memory.
    Device(DeviceError),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCompatibleMemoryType => write!(f, "no compatible memory type"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::RegionNotFound => write!(f, "memory region not found"),
            Self::InvalidAlignment => write!(f, "alignment is not a power of two"),
            Self::InvalidSize => write!(f, "allocation size is zero"),
            Self::InvalidSettings(reason) => write!(f, "invalid allocator settings: {}", reason),
            Self::LiveAllocations { count } => {
                write!(f, "{} memory regions still allocated", count)
            },
            Self::Device(e) => write!(f, "device error: {}", e),
        }
    }
}

impl From<DeviceError> for MemoryError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::OutOfDeviceMemory | DeviceError::OutOfHostMemory => {
                MemoryError::OutOfMemory
            },
            other => MemoryError::Device(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_out_of_memory_maps_to_out_of_memory() {
        assert_eq!(
            MemoryError::from(DeviceError::OutOfDeviceMemory),
            MemoryError::OutOfMemory
        );
        assert_eq!(
            MemoryError::from(DeviceError::Lost),
            MemoryError::Device(DeviceError::Lost)
        );
    }
}
