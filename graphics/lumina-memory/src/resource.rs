//! GPU resources
//!
//! Buffers and textures own the region they live in and give it back when
//! dropped. Both borrow the allocator, so the allocator outlives every
//! resource created from it.

use core::fmt;

use lumina_core::{
    BufferKind, CpuAccess, MemoryDevice, ResourceKind, ResourceShape, TextureDesc,
};

use crate::allocator::MemoryAllocator;
use crate::error::{MemoryError, MemoryResult};
use crate::region::MemoryRegion;

/// What the allocator knows about a placed resource.
pub trait GpuResource {
    /// Resource kind.
    fn kind(&self) -> ResourceKind;

    /// Shape the device was asked about.
    fn shape(&self) -> ResourceShape;

    /// CPU access pattern it was placed for.
    fn cpu_access(&self) -> CpuAccess;

    /// Backing region, `None` once released.
    fn region(&self) -> Option<&MemoryRegion>;

    /// Bytes reserved for it, padding included.
    fn allocated_size(&self) -> u64 {
        self.region().map_or(0, MemoryRegion::size)
    }
}

/// Frees `region`; failures during drop can only be logged.
fn release_on_drop<D: MemoryDevice>(
    allocator: &MemoryAllocator<D>,
    region: Option<MemoryRegion>,
    what: &str,
) {
    if let Some(region) = region {
        if let Err(e) = allocator.free(region) {
            log::error!("failed to release {} memory: {}", what, e);
        }
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// Linear GPU buffer.
pub struct Buffer<'a, D: MemoryDevice> {
    allocator: &'a MemoryAllocator<D>,
    region: Option<MemoryRegion>,
    kind: BufferKind,
    access: CpuAccess,
    size: u64,
}

impl<'a, D: MemoryDevice> Buffer<'a, D> {
    pub(crate) fn new(
        allocator: &'a MemoryAllocator<D>,
        region: MemoryRegion,
        kind: BufferKind,
        access: CpuAccess,
        size: u64,
    ) -> Self {
        Self {
            allocator,
            region: Some(region),
            kind,
            access,
            size,
        }
    }

    /// Buffer kind.
    pub fn buffer_kind(&self) -> BufferKind {
        self.kind
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Frees the buffer's memory now and reports the outcome.
    pub fn release(mut self) -> MemoryResult<()> {
        let region = self.region.take().ok_or(MemoryError::RegionNotFound)?;
        self.allocator.free(region)
    }
}

impl<D: MemoryDevice> GpuResource for Buffer<'_, D> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Buffer
    }

    fn shape(&self) -> ResourceShape {
        ResourceShape::buffer(self.kind, self.size)
    }

    fn cpu_access(&self) -> CpuAccess {
        self.access
    }

    fn region(&self) -> Option<&MemoryRegion> {
        self.region.as_ref()
    }
}

impl<D: MemoryDevice> fmt::Debug for Buffer<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("kind", &self.kind)
            .field("access", &self.access)
            .field("size", &self.size)
            .field("region", &self.region)
            .finish()
    }
}

impl<D: MemoryDevice> Drop for Buffer<'_, D> {
    fn drop(&mut self) {
        release_on_drop(self.allocator, self.region.take(), "buffer");
    }
}

// ============================================================================
// Texture
// ============================================================================

/// GPU texture.
pub struct Texture<'a, D: MemoryDevice> {
    allocator: &'a MemoryAllocator<D>,
    region: Option<MemoryRegion>,
    desc: TextureDesc,
    access: CpuAccess,
}

impl<'a, D: MemoryDevice> Texture<'a, D> {
    pub(crate) fn new(
        allocator: &'a MemoryAllocator<D>,
        region: MemoryRegion,
        desc: TextureDesc,
        access: CpuAccess,
    ) -> Self {
        Self {
            allocator,
            region: Some(region),
            desc,
            access,
        }
    }

    /// Texture description.
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Frees the texture's memory now and reports the outcome.
    pub fn release(mut self) -> MemoryResult<()> {
        let region = self.region.take().ok_or(MemoryError::RegionNotFound)?;
        self.allocator.free(region)
    }
}

impl<D: MemoryDevice> GpuResource for Texture<'_, D> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Texture
    }

    fn shape(&self) -> ResourceShape {
        ResourceShape::texture(self.desc)
    }

    fn cpu_access(&self) -> CpuAccess {
        self.access
    }

    fn region(&self) -> Option<&MemoryRegion> {
        self.region.as_ref()
    }
}

impl<D: MemoryDevice> fmt::Debug for Texture<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("desc", &self.desc)
            .field("access", &self.access)
            .field("region", &self.region)
            .finish()
    }
}

impl<D: MemoryDevice> Drop for Texture<'_, D> {
    fn drop(&mut self) {
        release_on_drop(self.allocator, self.region.take(), "texture");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{AllocationFlags, AllocatorSettings};
    use crate::software::SoftwareDevice;
    use lumina_core::TexelFormat;

    #[test]
    fn test_drop_frees_memory() {
        let device = SoftwareDevice::discrete();
        let allocator = MemoryAllocator::new(&device, AllocatorSettings::default()).unwrap();

        {
            let buffer = allocator
                .create_buffer(BufferKind::Index, CpuAccess::CpuToGpu, 4000, AllocationFlags::empty())
                .unwrap();
            assert_eq!(buffer.kind(), ResourceKind::Buffer);
            assert_eq!(buffer.size(), 4000);
            assert_eq!(buffer.allocated_size(), 4096);
            assert_eq!(allocator.statistics().allocated_region_count, 1);
        }

        assert_eq!(allocator.statistics().allocated_region_count, 0);
        assert_eq!(device.live_heap_count(), 0);
    }

    #[test]
    fn test_textures_and_buffers_share_heaps() {
        let device = SoftwareDevice::discrete();
        let allocator = MemoryAllocator::new(&device, AllocatorSettings::default()).unwrap();

        let texture = allocator
            .create_texture(
                TextureDesc::new_2d(256, 256, TexelFormat::R8G8B8A8Unorm),
                CpuAccess::GpuOnly,
                AllocationFlags::empty(),
            )
            .unwrap();
        let buffer = allocator
            .create_buffer(BufferKind::Vertex, CpuAccess::GpuOnly, 1000, AllocationFlags::empty())
            .unwrap();

        let texture_region = texture.region().unwrap();
        let buffer_region = buffer.region().unwrap();
        assert_eq!(texture_region.heap(), buffer_region.heap());
        assert_eq!(texture_region.offset() % (64 * 1024), 0);
        assert!(buffer_region.offset() >= texture_region.end());
        assert_eq!(texture.shape().content_size(), 256 * 256 * 4);
        assert_eq!(device.bound_resources(), 2);

        texture.release().unwrap();
        assert_eq!(allocator.statistics().allocated_region_count, 1);
        drop(buffer);
        assert_eq!(allocator.statistics().allocated_region_count, 0);
    }

    #[test]
    fn test_resources_as_trait_objects() {
        let device = SoftwareDevice::unified();
        let allocator = MemoryAllocator::new(&device, AllocatorSettings::default()).unwrap();

        let buffer = allocator
            .create_buffer(BufferKind::Constant, CpuAccess::CpuToGpu, 256, AllocationFlags::empty())
            .unwrap();
        let texture = allocator
            .create_texture(
                TextureDesc::new_3d(16, 16, 16, TexelFormat::R8Unorm),
                CpuAccess::GpuOnly,
                AllocationFlags::DEDICATED_HEAP,
            )
            .unwrap();

        let resources: [&dyn GpuResource; 2] = [&buffer, &texture];
        let total: u64 = resources.iter().map(|r| r.allocated_size()).sum();
        assert_eq!(total, 256 + 64 * 1024);
        assert_eq!(resources[1].cpu_access(), CpuAccess::GpuOnly);
    }
}
