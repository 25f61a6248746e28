//! Resource shapes
//!
//! The allocator never looks inside a resource. It only asks the device what
//! a given shape needs and then places it.

/// Buffer usage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferKind {
    /// General purpose buffer.
    #[default]
    Default,
    /// Vertex buffer.
    Vertex,
    /// Index buffer.
    Index,
    /// Uniform / constant buffer.
    Constant,
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureKind {
    /// 1D texture.
    OneDimensional,
    /// 2D texture.
    #[default]
    TwoDimensional,
    /// 3D texture.
    ThreeDimensional,
}

/// Texel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TexelFormat {
    /// 8-bit RGBA, unsigned normalized.
    #[default]
    R8G8B8A8Unorm,
    /// 16-bit float RGBA.
    R16G16B16A16Float,
    /// 32-bit float RGBA.
    R32G32B32A32Float,
    /// 32-bit float depth.
    D32Float,
    /// 8-bit single channel.
    R8Unorm,
}

impl TexelFormat {
    /// Bytes per texel.
    pub const fn size(&self) -> u64 {
        match self {
            TexelFormat::R8Unorm => 1,
            TexelFormat::R8G8B8A8Unorm | TexelFormat::D32Float => 4,
            TexelFormat::R16G16B16A16Float => 8,
            TexelFormat::R32G32B32A32Float => 16,
        }
    }
}

/// Texture description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Dimensionality.
    pub kind: TextureKind,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels.
    pub depth: u16,
    /// Texel format.
    pub format: TexelFormat,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            kind: TextureKind::TwoDimensional,
            width: 1,
            height: 1,
            depth: 1,
            format: TexelFormat::default(),
        }
    }
}

impl TextureDesc {
    /// 2D texture.
    pub fn new_2d(width: u32, height: u32, format: TexelFormat) -> Self {
        Self {
            kind: TextureKind::TwoDimensional,
            width,
            height,
            format,
            ..Default::default()
        }
    }

    /// 3D texture.
    pub fn new_3d(width: u32, height: u32, depth: u16, format: TexelFormat) -> Self {
        Self {
            kind: TextureKind::ThreeDimensional,
            width,
            height,
            depth,
            format,
        }
    }

    /// Tightly packed size in bytes, saturating at `u64::MAX`.
    pub fn packed_size(&self) -> u64 {
        let height = match self.kind {
            TextureKind::OneDimensional => 1,
            _ => self.height.max(1) as u64,
        };
        let depth = match self.kind {
            TextureKind::ThreeDimensional => self.depth.max(1) as u64,
            _ => 1,
        };
        (self.width.max(1) as u64)
            .checked_mul(height)
            .and_then(|texels| texels.checked_mul(depth))
            .and_then(|texels| texels.checked_mul(self.format.size()))
            .unwrap_or(u64::MAX)
    }
}

/// Resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Buffer.
    Buffer,
    /// Texture.
    Texture,
}

/// Shape of a resource, as handed to the device for requirement queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceShape {
    /// Linear buffer of `size` bytes.
    Buffer {
        /// Usage kind.
        kind: BufferKind,
        /// Size in bytes.
        size: u64,
    },
    /// Texture.
    Texture(TextureDesc),
}

impl ResourceShape {
    /// Buffer shape.
    pub const fn buffer(kind: BufferKind, size: u64) -> Self {
        ResourceShape::Buffer { kind, size }
    }

    /// Texture shape.
    pub const fn texture(desc: TextureDesc) -> Self {
        ResourceShape::Texture(desc)
    }

    /// Resource kind.
    pub const fn kind(&self) -> ResourceKind {
        match self {
            ResourceShape::Buffer { .. } => ResourceKind::Buffer,
            ResourceShape::Texture(_) => ResourceKind::Texture,
        }
    }

    /// Bytes the resource itself occupies, before device padding.
    pub fn content_size(&self) -> u64 {
        match self {
            ResourceShape::Buffer { size, .. } => *size,
            ResourceShape::Texture(desc) => desc.packed_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_size_ignores_unused_dimensions() {
        let mut desc = TextureDesc::new_2d(64, 32, TexelFormat::R8G8B8A8Unorm);
        desc.depth = 9;
        assert_eq!(desc.packed_size(), 64 * 32 * 4);

        desc.kind = TextureKind::OneDimensional;
        assert_eq!(desc.packed_size(), 64 * 4);

        let volume = TextureDesc::new_3d(8, 8, 8, TexelFormat::R32G32B32A32Float);
        assert_eq!(volume.packed_size(), 8 * 8 * 8 * 16);
    }

    #[test]
    fn test_packed_size_saturates() {
        let huge = TextureDesc::new_3d(u32::MAX, u32::MAX, u16::MAX, TexelFormat::R32G32B32A32Float);
        assert_eq!(huge.packed_size(), u64::MAX);
        assert_eq!(ResourceShape::texture(huge).content_size(), u64::MAX);
    }

    #[test]
    fn test_shape_kind() {
        assert_eq!(ResourceShape::buffer(BufferKind::Index, 12).kind(), ResourceKind::Buffer);
        assert_eq!(ResourceShape::buffer(BufferKind::Index, 12).content_size(), 12);
        assert_eq!(
            ResourceShape::texture(TextureDesc::default()).kind(),
            ResourceKind::Texture
        );
    }
}
