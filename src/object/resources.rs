//! Concrete device objects.
//!
//! Each struct is one variant of the [`DeviceObject`] capability set. Objects
//! own their native handles and free them in
//! [`release_native`](DeviceObject::release_native); views refer to their
//! parent by [`ObjectId`] only and resolve it through the registry whenever
//! they are used.

use std::sync::atomic::{AtomicBool, Ordering};

use super::desc::{
    BufferDesc, BufferViewDesc, ComputePipelineDesc, GraphicsPipelineDesc, ImageDesc,
    ImageViewDesc, OutputDesc, SamplerDesc,
};
use super::registry::ObjectRegistry;
use super::{CopyTarget, DeviceObject, ObjectId, ObjectType};
use crate::backend::{Backend, NativeHandle, ResolvedBufferView, ResolvedImageView};
use crate::copy::{AtomRegion, CopyRange, StagingAtom, StagingLayout};
use crate::errors::{DeviceError, Result};
use crate::state::{DirtyStates, RenderStates, StateBits};

// ============================================================================
// Buffer
// ============================================================================

#[derive(Debug)]
pub struct Buffer {
    id: ObjectId,
    desc: BufferDesc,
    native: NativeHandle,
}

impl Buffer {
    pub(crate) fn new(id: ObjectId, desc: BufferDesc, native: NativeHandle) -> Self {
        Self { id, desc, native }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn native(&self) -> NativeHandle {
        self.native
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.desc.size
    }
}

impl DeviceObject for Buffer {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Buffer
    }

    fn as_copy_target(&self) -> Option<&dyn CopyTarget> {
        Some(self)
    }

    fn release_native(&self, backend: &mut dyn Backend) {
        backend.destroy_buffer(self.native);
    }

    fn label(&self) -> &str {
        &self.desc.label
    }
}

impl CopyTarget for Buffer {
    fn staging_layout(&self, range: &CopyRange) -> Result<StagingLayout> {
        match *range {
            CopyRange::Buffer { offset, size } => {
                StagingLayout::buffer(self.desc.size, offset, size)
            }
            CopyRange::Image { .. } => Err(DeviceError::InvalidCopyRange(format!(
                "image range requested for buffer {}",
                self.id
            ))),
        }
    }

    fn copy_from_staging(&self, backend: &mut dyn Backend, staging: &[u8], atoms: &[StagingAtom]) {
        for atom in atoms {
            if let AtomRegion::Buffer { dst_offset } = atom.region {
                let data = &staging[atom.staging_range()];
                backend.copy_buffer_from_staging(self.native, dst_offset, data);
            }
        }
    }
}

/// A byte range of a buffer bound as a constant or storage buffer.
#[derive(Debug)]
pub struct BufferView {
    id: ObjectId,
    kind: ObjectType,
    buffer: ObjectId,
    offset: u64,
    size: u64,
}

impl BufferView {
    /// Validates `desc` against `buffer` and builds the view. `kind` must be
    /// one of the buffer view types.
    pub(crate) fn new(
        id: ObjectId,
        kind: ObjectType,
        buffer: &Buffer,
        desc: &BufferViewDesc,
    ) -> Result<Self> {
        debug_assert!(matches!(
            kind,
            ObjectType::ConstantBufferView | ObjectType::StorageBufferView
        ));

        let required = if kind == ObjectType::ConstantBufferView {
            wgpu::BufferUsages::UNIFORM
        } else {
            wgpu::BufferUsages::STORAGE
        };
        if !buffer.desc.usage.contains(required) {
            return Err(DeviceError::InvalidView(format!(
                "buffer {} lacks {required:?} usage for a {kind:?}",
                buffer.id
            )));
        }

        let size = desc
            .size
            .unwrap_or_else(|| buffer.size().saturating_sub(desc.offset));
        if size == 0 || desc.offset + size > buffer.size() {
            return Err(DeviceError::InvalidView(format!(
                "range {}+{size} outside buffer {} of {} bytes",
                desc.offset,
                buffer.id,
                buffer.size()
            )));
        }

        Ok(Self {
            id,
            kind,
            buffer: buffer.id,
            offset: desc.offset,
            size,
        })
    }

    #[inline]
    #[must_use]
    pub fn buffer(&self) -> ObjectId {
        self.buffer
    }

    /// Resolves the view to its concrete buffer range. `None` once the parent
    /// buffer is gone.
    #[must_use]
    pub fn resolve(&self, registry: &ObjectRegistry) -> Option<ResolvedBufferView> {
        let parent = registry.resolve_typed(self.buffer, ObjectType::Buffer)?;
        let buffer = parent.downcast_ref::<Buffer>()?;
        Some(ResolvedBufferView {
            buffer: buffer.native,
            offset: self.offset,
            size: self.size,
        })
    }
}

impl DeviceObject for BufferView {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        self.kind
    }
}

// ============================================================================
// Image
// ============================================================================

#[derive(Debug)]
pub struct Image {
    id: ObjectId,
    desc: ImageDesc,
    native: NativeHandle,
}

impl Image {
    pub(crate) fn new(id: ObjectId, desc: ImageDesc, native: NativeHandle) -> Self {
        Self { id, desc, native }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn native(&self) -> NativeHandle {
        self.native
    }
}

impl DeviceObject for Image {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Image
    }

    fn as_copy_target(&self) -> Option<&dyn CopyTarget> {
        Some(self)
    }

    fn release_native(&self, backend: &mut dyn Backend) {
        backend.destroy_image(self.native);
    }

    fn label(&self) -> &str {
        &self.desc.label
    }
}

impl CopyTarget for Image {
    fn staging_layout(&self, range: &CopyRange) -> Result<StagingLayout> {
        match *range {
            CopyRange::Image {
                base_mip,
                mip_count,
                base_layer,
                layer_count,
            } => StagingLayout::image(&self.desc, base_mip, mip_count, base_layer, layer_count),
            CopyRange::Buffer { .. } => Err(DeviceError::InvalidCopyRange(format!(
                "buffer range requested for image {}",
                self.id
            ))),
        }
    }

    fn copy_from_staging(&self, backend: &mut dyn Backend, staging: &[u8], atoms: &[StagingAtom]) {
        for atom in atoms {
            if let AtomRegion::Image(region) = &atom.region {
                let data = &staging[atom.staging_range()];
                backend.copy_image_from_staging(self.native, region, data);
            }
        }
    }
}

/// A sub-resource of an image used as a sampled image, writable image or
/// render target.
#[derive(Debug)]
pub struct ImageView {
    id: ObjectId,
    kind: ObjectType,
    image: ObjectId,
    desc: ImageViewDesc,
    native: NativeHandle,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    sample_count: u32,
}

impl ImageView {
    /// Checks that `desc` fits `image` and is usable as `kind`.
    pub(crate) fn validate(image: &Image, kind: ObjectType, desc: &ImageViewDesc) -> Result<()> {
        if !desc.fits(&image.desc) {
            return Err(DeviceError::InvalidView(format!(
                "{desc:?} outside image {}",
                image.id
            )));
        }

        let usage = image.desc.usage;
        let ok = match kind {
            ObjectType::SampledImageView => usage.contains(wgpu::TextureUsages::TEXTURE_BINDING),
            ObjectType::WritableImageView => usage.contains(wgpu::TextureUsages::STORAGE_BINDING),
            ObjectType::RenderTargetView => {
                usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
                    && desc.mip_count == 1
                    && desc.layer_count == 1
            }
            _ => false,
        };
        if !ok {
            return Err(DeviceError::InvalidView(format!(
                "image {} cannot be viewed as {kind:?} with {desc:?}",
                image.id
            )));
        }
        Ok(())
    }

    pub(crate) fn new(
        id: ObjectId,
        kind: ObjectType,
        image: &Image,
        desc: ImageViewDesc,
        native: NativeHandle,
    ) -> Self {
        let (width, height, _) = image.desc.mip_extent(desc.base_mip);
        Self {
            id,
            kind,
            image: image.id,
            desc,
            native,
            width,
            height,
            format: image.desc.format,
            sample_count: image.desc.sample_count,
        }
    }

    #[inline]
    #[must_use]
    pub fn image(&self) -> ObjectId {
        self.image
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &ImageViewDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resolves the view together with its parent image. `None` once the
    /// parent image is gone.
    #[must_use]
    pub fn resolve(&self, registry: &ObjectRegistry) -> Option<ResolvedImageView> {
        let parent = registry.resolve_typed(self.image, ObjectType::Image)?;
        let image = parent.downcast_ref::<Image>()?;
        Some(ResolvedImageView {
            image: image.native,
            view: self.native,
            width: self.width,
            height: self.height,
            format: self.format,
            sample_count: self.sample_count,
        })
    }
}

impl DeviceObject for ImageView {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        self.kind
    }

    fn release_native(&self, backend: &mut dyn Backend) {
        backend.destroy_image_view(self.native);
    }
}

// ============================================================================
// Sampler
// ============================================================================

/// A sampler state. The native sampler is shared through the sampler cache
/// and outlives this object.
#[derive(Debug)]
pub struct Sampler {
    id: ObjectId,
    desc: SamplerDesc,
    native: NativeHandle,
}

impl Sampler {
    pub(crate) fn new(id: ObjectId, desc: SamplerDesc, native: NativeHandle) -> Self {
        Self { id, desc, native }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn native(&self) -> NativeHandle {
        self.native
    }
}

impl DeviceObject for Sampler {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Sampler
    }
}

// ============================================================================
// Pipelines
// ============================================================================

#[derive(Debug)]
pub struct GraphicsPipeline {
    id: ObjectId,
    desc: GraphicsPipelineDesc,
    program: NativeHandle,
    static_mask: DirtyStates,
}

impl GraphicsPipeline {
    pub(crate) fn new(id: ObjectId, desc: GraphicsPipelineDesc, program: NativeHandle) -> Self {
        Self {
            id,
            desc,
            program,
            static_mask: DirtyStates::from_bits(StateBits::PIPELINE_CONTROLLED),
        }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn program(&self) -> NativeHandle {
        self.program
    }

    #[inline]
    #[must_use]
    pub fn static_states(&self) -> &RenderStates {
        &self.desc.states
    }

    /// State families this pipeline controls.
    #[inline]
    #[must_use]
    pub fn static_mask(&self) -> &DirtyStates {
        &self.static_mask
    }
}

impl DeviceObject for GraphicsPipeline {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::GraphicsPipeline
    }

    fn release_native(&self, backend: &mut dyn Backend) {
        backend.destroy_program(self.program);
    }

    fn label(&self) -> &str {
        &self.desc.label
    }
}

#[derive(Debug)]
pub struct ComputePipeline {
    id: ObjectId,
    desc: ComputePipelineDesc,
    program: NativeHandle,
}

impl ComputePipeline {
    pub(crate) fn new(id: ObjectId, desc: ComputePipelineDesc, program: NativeHandle) -> Self {
        Self { id, desc, program }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &ComputePipelineDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn program(&self) -> NativeHandle {
        self.program
    }
}

impl DeviceObject for ComputePipeline {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::ComputePipeline
    }

    fn release_native(&self, backend: &mut dyn Backend) {
        backend.destroy_program(self.program);
    }

    fn label(&self) -> &str {
        &self.desc.label
    }
}

// ============================================================================
// Output
// ============================================================================

/// Presentation target. Refuses deletion until closed.
#[derive(Debug)]
pub struct Output {
    id: ObjectId,
    desc: OutputDesc,
    native: NativeHandle,
    closed: AtomicBool,
}

impl Output {
    pub(crate) fn new(id: ObjectId, desc: OutputDesc, native: NativeHandle) -> Self {
        Self {
            id,
            desc,
            native,
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &OutputDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn native(&self) -> NativeHandle {
        self.native
    }

    /// Marks the output closed. It becomes deletable from now on.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl DeviceObject for Output {
    fn handle(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Output
    }

    fn can_delete(&self) -> bool {
        self.is_closed()
    }

    fn release_native(&self, backend: &mut dyn Backend) {
        backend.destroy_output(self.native);
    }

    fn label(&self) -> &str {
        &self.desc.label
    }
}
