use std::fmt;
use std::ops::Range;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable key for one logical resource within a frame.
///
/// Ids are the 64-bit FNV-1a hash of the resource name, so producers can name
/// resources in `const` items and agree on them without sharing a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl ResourceId {
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = FNV_OFFSET_BASIS;
        let mut index = 0;
        while index < bytes.len() {
            hash ^= bytes[index] as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
            index += 1;
        }
        Self(hash)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueClass {
    Graphics,
    Compute,
    Copy,
}

impl QueueClass {
    pub const ALL: [QueueClass; 3] = [QueueClass::Graphics, QueueClass::Compute, QueueClass::Copy];

    pub fn index(self) -> usize {
        match self {
            QueueClass::Graphics => 0,
            QueueClass::Compute => 1,
            QueueClass::Copy => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentUsage {
    RenderTarget,
    DepthStencil,
    ShaderResource,
    Indirect,
    Copy,
    Resolve,
    InputAssembly,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttachmentAccess: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl AttachmentAccess {
    pub fn is_write(self) -> bool {
        self.contains(AttachmentAccess::WRITE)
    }
}

/// The state a resource must be in for one scope attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceState {
    pub usage: AttachmentUsage,
    pub access: AttachmentAccess,
}

impl ResourceState {
    pub fn new(usage: AttachmentUsage, access: AttachmentAccess) -> Self {
        Self { usage, access }
    }

    /// Two states are compatible when no layout change and no write hazard
    /// separates them.
    pub fn is_compatible_with(&self, other: &ResourceState) -> bool {
        self.usage == other.usage && !self.access.is_write() && !other.access.is_write()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Uint,
    R32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl Format {
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Format::R8Unorm => 1,
            Format::Rgba8Unorm
            | Format::Rgba8UnormSrgb
            | Format::Bgra8UnormSrgb
            | Format::R32Uint
            | Format::R32Float
            | Format::Depth32Float
            | Format::Depth24PlusStencil8 => 4,
            Format::Rgba16Float => 8,
            Format::Rgba32Float => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::Depth32Float | Format::Depth24PlusStencil8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
}

impl ImageDescriptor {
    pub fn new_2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
        }
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_level_count = levels.max(1);
        self
    }

    pub fn sample_count(mut self, count: u32) -> Self {
        self.sample_count = count.max(1);
        self
    }

    pub fn array_layers(mut self, layers: u32) -> Self {
        self.depth_or_array_layers = layers.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    pub size: u64,
}

impl BufferDescriptor {
    pub fn new(size: u64) -> Self {
        Self { size }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Image,
    Buffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDescriptor {
    Image(ImageDescriptor),
    Buffer(BufferDescriptor),
}

pub const IMAGE_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;
pub const MSAA_IMAGE_PLACEMENT_ALIGNMENT: u64 = 4 * 1024 * 1024;
pub const BUFFER_PLACEMENT_ALIGNMENT: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
}

impl ResourceDescriptor {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDescriptor::Image(_) => ResourceKind::Image,
            ResourceDescriptor::Buffer(_) => ResourceKind::Buffer,
        }
    }

    /// Conservative size and placement alignment, used when the backend does
    /// not report its own requirements.
    pub fn estimated_requirements(&self) -> MemoryRequirements {
        match self {
            ResourceDescriptor::Image(image) => {
                let mut size = 0u64;
                for level in 0..image.mip_level_count.max(1) {
                    let width = (image.width >> level).max(1) as u64;
                    let height = (image.height >> level).max(1) as u64;
                    size += width * height * image.format.bytes_per_pixel();
                }
                size *= image.depth_or_array_layers.max(1) as u64;
                size *= image.sample_count.max(1) as u64;

                let alignment = if image.sample_count > 1 {
                    MSAA_IMAGE_PLACEMENT_ALIGNMENT
                } else {
                    IMAGE_PLACEMENT_ALIGNMENT
                };

                MemoryRequirements {
                    size: align_up(size, alignment),
                    alignment,
                }
            }
            ResourceDescriptor::Buffer(buffer) => MemoryRequirements {
                size: align_up(buffer.size.max(1), BUFFER_PLACEMENT_ALIGNMENT),
                alignment: BUFFER_PLACEMENT_ALIGNMENT,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageViewDescriptor {
    pub format: Option<Format>,
    pub mip_levels: Range<u32>,
    pub array_layers: Range<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferViewDescriptor {
    pub offset: u64,
    pub size: Option<u64>,
}

/// Format and subresource range of the view a scope attachment binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ViewDescriptor {
    #[default]
    Whole,
    Image(ImageViewDescriptor),
    Buffer(BufferViewDescriptor),
}

impl ViewDescriptor {
    pub fn is_compatible_with(&self, kind: ResourceKind) -> bool {
        match self {
            ViewDescriptor::Whole => true,
            ViewDescriptor::Image(_) => kind == ResourceKind::Image,
            ViewDescriptor::Buffer(_) => kind == ResourceKind::Buffer,
        }
    }
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Closed interval of execution indices during which a resource is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lifetime {
    pub start: usize,
    pub end: usize,
}

impl Lifetime {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Lifetime) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ids_are_stable_and_const() {
        const GBUFFER: ResourceId = ResourceId::from_name("gbuffer");
        assert_eq!(GBUFFER, ResourceId::from_name("gbuffer"));
        assert_ne!(GBUFFER, ResourceId::from_name("gbuffer2"));
        assert_eq!(ResourceId::from_name("").0, FNV_OFFSET_BASIS);
    }

    #[test]
    fn image_requirements_cover_mip_chain() {
        let descriptor =
            ResourceDescriptor::Image(ImageDescriptor::new_2d(Format::Rgba8Unorm, 256, 256).mip_levels(2));
        let requirements = descriptor.estimated_requirements();
        assert_eq!(requirements.alignment, IMAGE_PLACEMENT_ALIGNMENT);
        assert!(requirements.size >= 256 * 256 * 4 + 128 * 128 * 4);
        assert_eq!(requirements.size % IMAGE_PLACEMENT_ALIGNMENT, 0);
    }

    #[test]
    fn read_only_states_of_same_usage_are_compatible() {
        let read = ResourceState::new(AttachmentUsage::ShaderResource, AttachmentAccess::READ);
        let write = ResourceState::new(AttachmentUsage::ShaderResource, AttachmentAccess::WRITE);
        let target = ResourceState::new(AttachmentUsage::RenderTarget, AttachmentAccess::READ);
        assert!(read.is_compatible_with(&read));
        assert!(!read.is_compatible_with(&write));
        assert!(!read.is_compatible_with(&target));
    }

    #[test]
    fn lifetimes_are_closed_intervals() {
        assert!(Lifetime::new(0, 2).overlaps(&Lifetime::new(2, 4)));
        assert!(!Lifetime::new(0, 2).overlaps(&Lifetime::new(3, 5)));
    }
}
