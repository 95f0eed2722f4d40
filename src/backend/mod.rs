//! Backend Abstraction
//!
//! The [`Backend`] trait is the boundary between the device runtime and a
//! concrete graphics API. Everything above it (registry, copy queue, caches,
//! executor) is API-agnostic; everything below it issues native calls.
//!
//! # Design
//!
//! - Native objects are opaque [`NativeHandle`]s. The runtime never inspects them.
//! - Object creation is fallible and returns [`Result`]; every other call is
//!   fire-and-forget, matching how command encoders behave.
//! - The backend is only ever used from the device thread through
//!   `&mut dyn Backend`, so implementations need no internal locking.
//!
//! [`recording::RecordingBackend`] implements the trait without a GPU and
//! records every call, which is what the tests use.

pub mod recording;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::errors::Result;
use crate::object::desc::{
    BufferDesc, ComputePipelineDesc, DescriptorKind, GraphicsPipelineDesc, ImageDesc,
    ImageViewDesc, OutputDesc, SamplerDesc,
};
use crate::state::StateCommand;

/// Opaque native object handle issued by a backend.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    pub const NULL: Self = Self(0);

    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// GPU timeline marker returned by [`Backend::insert_fence`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct FenceId(pub u64);

// ─── Resolved Views ──────────────────────────────────────────────────────────

/// Buffer range after resolving a view through the registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResolvedBufferView {
    pub buffer: NativeHandle,
    pub offset: u64,
    pub size: u64,
}

/// Image sub-resource after resolving a view through the registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResolvedImageView {
    pub image: NativeHandle,
    pub view: NativeHandle,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub sample_count: u32,
}

/// A vertex stream binding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct VertexBinding {
    pub buffer: ResolvedBufferView,
    pub stride: u64,
}

/// An index buffer binding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IndexBinding {
    pub buffer: ResolvedBufferView,
    pub format: wgpu::IndexFormat,
}

/// The value bound to one binding-table slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BoundResource {
    Buffer(ResolvedBufferView),
    Image(ResolvedImageView),
    Sampler(NativeHandle),
}

/// A write into one slot of a per-kind binding table. `resource: None`
/// unbinds the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResourceBinding {
    pub kind: DescriptorKind,
    pub slot: u32,
    pub resource: Option<BoundResource>,
}

/// Attachments of a frame buffer.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FrameBufferDesc {
    pub colors: SmallVec<[NativeHandle; 8]>,
    pub depth_stencil: Option<NativeHandle>,
    pub width: u32,
    pub height: u32,
}

/// Destination of one staged image copy.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ImageCopyRegion {
    pub mip: u32,
    pub layer: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub bytes_per_row: u64,
    pub rows_per_image: u32,
}

/// Source of a readback.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DownloadSource {
    Buffer {
        buffer: NativeHandle,
        offset: u64,
    },
    Image {
        image: NativeHandle,
        mip: u32,
        layer: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        bytes_per_row: u64,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct DrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct DrawIndexedArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

bitflags! {
    /// Memory made visible by a barrier.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BarrierScope: u32 {
        const VERTEX_BUFFER   = 1 << 0;
        const INDEX_BUFFER    = 1 << 1;
        const UNIFORM_BUFFER  = 1 << 2;
        const STORAGE_BUFFER  = 1 << 3;
        const SAMPLED_IMAGE   = 1 << 4;
        const WRITABLE_IMAGE  = 1 << 5;
        const RENDER_TARGET   = 1 << 6;
        const TRANSFER        = 1 << 7;
        const ALL = !0;
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// Native graphics API driven by the device thread.
pub trait Backend: Send {
    // ── Object lifetime ────────────────────────────────────────────────────

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<NativeHandle>;
    fn destroy_buffer(&mut self, buffer: NativeHandle);

    fn create_image(&mut self, desc: &ImageDesc) -> Result<NativeHandle>;
    fn destroy_image(&mut self, image: NativeHandle);

    fn create_image_view(
        &mut self,
        image: NativeHandle,
        image_desc: &ImageDesc,
        view: &ImageViewDesc,
    ) -> Result<NativeHandle>;
    fn destroy_image_view(&mut self, view: NativeHandle);

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<NativeHandle>;
    fn destroy_sampler(&mut self, sampler: NativeHandle);

    fn create_graphics_program(&mut self, desc: &GraphicsPipelineDesc) -> Result<NativeHandle>;
    fn create_compute_program(&mut self, desc: &ComputePipelineDesc) -> Result<NativeHandle>;
    fn destroy_program(&mut self, program: NativeHandle);

    fn create_frame_buffer(&mut self, desc: &FrameBufferDesc) -> Result<NativeHandle>;
    fn destroy_frame_buffer(&mut self, frame_buffer: NativeHandle);

    fn create_download_buffer(&mut self, size: u64) -> Result<NativeHandle>;
    fn destroy_download_buffer(&mut self, buffer: NativeHandle);
    /// Reads back bytes of a download buffer. Only valid once the frame that
    /// filled it has retired.
    fn read_download_buffer(&mut self, buffer: NativeHandle, size: u64) -> Vec<u8>;

    fn create_output(&mut self, desc: &OutputDesc) -> Result<NativeHandle>;
    fn destroy_output(&mut self, output: NativeHandle);

    // ── Transfers ──────────────────────────────────────────────────────────

    fn copy_buffer_from_staging(&mut self, buffer: NativeHandle, dst_offset: u64, data: &[u8]);
    fn copy_image_from_staging(
        &mut self,
        image: NativeHandle,
        region: &ImageCopyRegion,
        data: &[u8],
    );
    fn download(&mut self, source: &DownloadSource, size: u64, dst: NativeHandle);
    fn blit(&mut self, src: NativeHandle, dst: NativeHandle, width: u32, height: u32);

    // ── Passes ─────────────────────────────────────────────────────────────

    fn bind_frame_buffer(&mut self, frame_buffer: NativeHandle);
    /// Acquires the next surface of `output` and makes it the render target.
    /// Returns `false` when no surface is available this frame.
    fn bind_output(&mut self, output: NativeHandle) -> bool;
    fn unbind_frame_buffer(&mut self);

    fn clear_color(&mut self, attachment: u32, color: [f32; 4]);
    fn clear_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<u32>);
    fn clear_image(&mut self, view: &ResolvedImageView, color: [f32; 4]);
    fn clear_buffer(&mut self, buffer: &ResolvedBufferView, value: u32);

    // ── State and bindings ─────────────────────────────────────────────────

    fn set_state(&mut self, command: &StateCommand);
    fn bind_program(&mut self, program: NativeHandle);
    fn bind_vertex_buffer(&mut self, slot: u32, binding: Option<VertexBinding>);
    fn bind_index_buffer(&mut self, binding: Option<IndexBinding>);
    fn bind_resource(&mut self, binding: &ResourceBinding);

    // ── Work ───────────────────────────────────────────────────────────────

    fn draw(&mut self, args: &DrawArgs);
    fn draw_indexed(&mut self, args: &DrawIndexedArgs);
    fn dispatch(&mut self, x: u32, y: u32, z: u32);
    fn memory_barrier(&mut self, scope: BarrierScope);

    fn push_debug_group(&mut self, label: &str);
    fn pop_debug_group(&mut self);

    // ── Synchronization ────────────────────────────────────────────────────

    fn insert_fence(&mut self) -> FenceId;
    fn is_fence_signaled(&mut self, fence: FenceId) -> bool;
    /// Blocks until all submitted GPU work has completed.
    fn wait_idle(&mut self);
}
