//! Creation-info values for device objects.
//!
//! Descriptors are plain values. The device thread passes them to the
//! [`Backend`](crate::backend::Backend) to create native objects and keeps a
//! copy inside the resulting object for later validation (copy ranges,
//! descriptor kinds, extents).

use std::borrow::Cow;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use super::ObjectType;
use crate::state::RenderStates;

pub type BufferUsage = wgpu::BufferUsages;

// ============================================================================
// Buffers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: Cow<'static, str>,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    #[must_use]
    pub fn new(label: impl Into<Cow<'static, str>>, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: label.into(),
            size,
            usage,
        }
    }
}

/// Byte range of a buffer exposed as a constant or storage view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferViewDesc {
    pub offset: u64,
    /// `None` covers everything from `offset` to the end of the buffer.
    pub size: Option<u64>,
}

impl BufferViewDesc {
    #[must_use]
    pub fn whole() -> Self {
        Self {
            offset: 0,
            size: None,
        }
    }
}

// ============================================================================
// Images
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub label: Cow<'static, str>,
    pub width: u32,
    pub height: u32,
    /// Depth of a 3D image. Must be 1 otherwise.
    pub depth: u32,
    /// Array slices (6 per cube).
    pub array_layers: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub format: wgpu::TextureFormat,
    pub dimension: wgpu::TextureDimension,
    pub usage: wgpu::TextureUsages,
}

impl ImageDesc {
    /// A single-slice 2D image without mips.
    #[must_use]
    pub fn new_2d(
        label: impl Into<Cow<'static, str>>,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            depth: 1,
            array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            format,
            dimension: wgpu::TextureDimension::D2,
            usage,
        }
    }

    #[must_use]
    pub fn with_mips(mut self, mip_level_count: u32) -> Self {
        self.mip_level_count = mip_level_count;
        self
    }

    #[must_use]
    pub fn with_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    #[must_use]
    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Extent `(width, height, depth)` of mip level `mip`.
    #[must_use]
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let shrink = |v: u32| (v >> mip).max(1);
        let depth = if self.dimension == wgpu::TextureDimension::D3 {
            shrink(self.depth)
        } else {
            1
        };
        (shrink(self.width), shrink(self.height), depth)
    }

    /// Tightly packed row pitch and row count of mip level `mip`, or `None`
    /// for formats without a single copyable aspect.
    #[must_use]
    pub fn mip_pitch(&self, mip: u32) -> Option<(u64, u32)> {
        let block_size = self.format.block_copy_size(None)?;
        let (bw, bh) = self.format.block_dimensions();
        let (width, height, _) = self.mip_extent(mip);

        let blocks_wide = width.div_ceil(bw);
        let rows = height.div_ceil(bh);
        Some((u64::from(blocks_wide) * u64::from(block_size), rows))
    }
}

/// Sub-resource range selected by an image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewDesc {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl ImageViewDesc {
    /// First mip of the first layer, the usual render-target selection.
    #[must_use]
    pub fn single(mip: u32, layer: u32) -> Self {
        Self {
            base_mip: mip,
            mip_count: 1,
            base_layer: layer,
            layer_count: 1,
        }
    }

    /// Every mip and layer of `image`.
    #[must_use]
    pub fn whole(image: &ImageDesc) -> Self {
        Self {
            base_mip: 0,
            mip_count: image.mip_level_count,
            base_layer: 0,
            layer_count: image.array_layers,
        }
    }

    #[must_use]
    pub fn fits(&self, image: &ImageDesc) -> bool {
        self.mip_count > 0
            && self.layer_count > 0
            && self.base_mip + self.mip_count <= image.mip_level_count
            && self.base_layer + self.layer_count <= image.array_layers
    }
}

// ============================================================================
// Samplers
// ============================================================================

/// Numeric sampler parameters. Equal descriptors share one backend sampler.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub address_mode_w: wgpu::AddressMode,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::FilterMode,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
    pub compare: Option<wgpu::CompareFunction>,
    pub anisotropy_clamp: u16,
    pub border_color: Option<wgpu::SamplerBorderColor>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        }
    }
}

impl SamplerDesc {
    #[must_use]
    pub fn linear() -> Self {
        Self {
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }
    }
}

// Float fields compare by bit pattern so the descriptor can key a hash map.
impl PartialEq for SamplerDesc {
    fn eq(&self, other: &Self) -> bool {
        self.address_mode_u == other.address_mode_u
            && self.address_mode_v == other.address_mode_v
            && self.address_mode_w == other.address_mode_w
            && self.mag_filter == other.mag_filter
            && self.min_filter == other.min_filter
            && self.mipmap_filter == other.mipmap_filter
            && self.lod_min_clamp.to_bits() == other.lod_min_clamp.to_bits()
            && self.lod_max_clamp.to_bits() == other.lod_max_clamp.to_bits()
            && self.compare == other.compare
            && self.anisotropy_clamp == other.anisotropy_clamp
            && self.border_color == other.border_color
    }
}

impl Eq for SamplerDesc {}

impl Hash for SamplerDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address_mode_u.hash(state);
        self.address_mode_v.hash(state);
        self.address_mode_w.hash(state);
        self.mag_filter.hash(state);
        self.min_filter.hash(state);
        self.mipmap_filter.hash(state);
        self.lod_min_clamp.to_bits().hash(state);
        self.lod_max_clamp.to_bits().hash(state);
        self.compare.hash(state);
        self.anisotropy_clamp.hash(state);
        self.border_color.hash(state);
    }
}

// ============================================================================
// Pipelines
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDesc {
    pub label: Cow<'static, str>,
    /// WGSL source.
    pub source: Cow<'static, str>,
    pub entry_point: Cow<'static, str>,
}

impl ShaderDesc {
    #[must_use]
    pub fn wgsl(
        label: impl Into<Cow<'static, str>>,
        source: impl Into<Cow<'static, str>>,
        entry_point: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
            entry_point: entry_point.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexStream {
    pub stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexLayout {
    pub streams: SmallVec<[VertexStream; 4]>,
}

/// Kind of a descriptor slot declared by a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    WritableImage,
    Sampler,
}

impl DescriptorKind {
    /// Object type a resource bound to this kind of slot must have.
    #[must_use]
    pub fn expected_object_type(self) -> ObjectType {
        match self {
            Self::UniformBuffer => ObjectType::ConstantBufferView,
            Self::StorageBuffer => ObjectType::StorageBufferView,
            Self::SampledImage => ObjectType::SampledImageView,
            Self::WritableImage => ObjectType::WritableImageView,
            Self::Sampler => ObjectType::Sampler,
        }
    }
}

/// One declared slot: the `index`-th resource of a bound descriptor set goes
/// to `binding` in the per-kind binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorElement {
    pub kind: DescriptorKind,
    pub binding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DescriptorLayout {
    pub elements: Vec<DescriptorElement>,
}

impl DescriptorLayout {
    #[must_use]
    pub fn new(elements: impl IntoIterator<Item = DescriptorElement>) -> Self {
        Self {
            elements: elements.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub label: Cow<'static, str>,
    pub vertex: ShaderDesc,
    pub fragment: Option<ShaderDesc>,
    pub vertex_layout: VertexLayout,
    /// One layout per descriptor set index.
    pub descriptor_layouts: Vec<DescriptorLayout>,
    /// Fixed-function state baked into the pipeline.
    pub states: RenderStates,
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub label: Cow<'static, str>,
    pub shader: ShaderDesc,
    pub descriptor_layouts: Vec<DescriptorLayout>,
}

// ============================================================================
// Outputs
// ============================================================================

/// Presentation target (swapchain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDesc {
    pub label: Cow<'static, str>,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(desc: &SamplerDesc) -> u64 {
        let mut h = DefaultHasher::new();
        desc.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let desc = ImageDesc::new_2d(
            "mips",
            64,
            16,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING,
        )
        .with_mips(7);

        assert_eq!(desc.mip_extent(0), (64, 16, 1));
        assert_eq!(desc.mip_extent(3), (8, 2, 1));
        assert_eq!(desc.mip_extent(6), (1, 1, 1));
    }

    #[test]
    fn test_mip_pitch_uses_blocks() {
        let rgba = ImageDesc::new_2d(
            "rgba",
            10,
            4,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::COPY_DST,
        );
        assert_eq!(rgba.mip_pitch(0), Some((40, 4)));

        let bc = ImageDesc::new_2d(
            "bc1",
            10,
            10,
            wgpu::TextureFormat::Bc1RgbaUnorm,
            wgpu::TextureUsages::COPY_DST,
        );
        // 3x3 blocks of 8 bytes
        assert_eq!(bc.mip_pitch(0), Some((24, 3)));
    }

    #[test]
    fn test_sampler_desc_hash_eq() {
        let a = SamplerDesc::linear();
        let b = SamplerDesc::linear();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = SamplerDesc {
            lod_max_clamp: 4.0,
            ..SamplerDesc::linear()
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_view_fits_image() {
        let image = ImageDesc::new_2d(
            "array",
            32,
            32,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING,
        )
        .with_mips(3)
        .with_layers(2);

        assert!(ImageViewDesc::whole(&image).fits(&image));
        assert!(ImageViewDesc::single(2, 1).fits(&image));
        assert!(!ImageViewDesc::single(3, 0).fits(&image));
    }
}
