//! Opcodes and their payloads.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::{BarrierScope, DrawArgs, DrawIndexedArgs};
use crate::object::ObjectId;
use crate::state::{
    BlendEquation, BlendFunc, DepthBias, DepthRange, ScissorRect, StencilFaceState, StencilFaces,
    StencilOps, Viewport,
};

/// Receives the bytes of a download once the frame that recorded it has
/// retired on the GPU.
pub trait DownloadSink: Send + Sync {
    /// `None` when the download could not be performed.
    fn on_complete(&self, data: Option<&[u8]>);
}

/// What a pass renders into.
#[derive(Clone, Debug, PartialEq)]
pub enum PassTarget {
    /// Render-target views, all of the same size.
    Views {
        colors: SmallVec<[ObjectId; 8]>,
        depth_stencil: Option<ObjectId>,
    },
    /// The current surface of an output.
    Output(ObjectId),
}

/// Layout an image is transitioned to by a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    ShaderRead,
    ShaderWrite,
    RenderTarget,
    DepthStencil,
    TransferSource,
    TransferDestination,
}

impl ImageLayout {
    /// Memory made visible when entering this layout.
    #[must_use]
    pub fn barrier_scope(self) -> BarrierScope {
        match self {
            Self::ShaderRead => BarrierScope::SAMPLED_IMAGE,
            Self::ShaderWrite => BarrierScope::WRITABLE_IMAGE,
            Self::RenderTarget | Self::DepthStencil => BarrierScope::RENDER_TARGET,
            Self::TransferSource | Self::TransferDestination => BarrierScope::TRANSFER,
        }
    }
}

/// One recorded operation.
#[derive(Clone)]
pub enum Opcode {
    Nop,

    // ── Debug ──────────────────────────────────────────────────────────────
    BeginBlock {
        label: String,
    },
    EndBlock,

    // ── Passes ─────────────────────────────────────────────────────────────
    BeginPass {
        target: PassTarget,
        /// Defaults to the whole target.
        render_area: Option<ScissorRect>,
        viewport_count: u8,
    },
    EndPass,
    /// Resolves a multisampled render-target view into a single-sampled one.
    Resolve {
        source: ObjectId,
        destination: ObjectId,
    },
    ClearPassColor {
        index: u32,
        color: [f32; 4],
    },
    ClearPassDepthStencil {
        depth: Option<f32>,
        stencil: Option<u8>,
    },

    // ── Dynamic state ──────────────────────────────────────────────────────
    SetViewportRect {
        index: u8,
        viewport: Viewport,
    },
    SetViewportDepthRange {
        index: u8,
        range: DepthRange,
    },
    SetScissorRect {
        index: u8,
        rect: ScissorRect,
    },
    SetScissorState {
        enabled: bool,
    },
    SetStencilReference {
        faces: StencilFaces,
        reference: u8,
    },
    SetStencilCompareMask {
        faces: StencilFaces,
        mask: u8,
    },
    SetStencilWriteMask {
        faces: StencilFaces,
        mask: u8,
    },
    SetStencilOps {
        faces: StencilFaces,
        ops: StencilOps,
    },
    SetStencilState {
        enabled: bool,
        front: StencilFaceState,
        back: StencilFaceState,
    },
    SetDepthState {
        enabled: bool,
        write: bool,
        compare: wgpu::CompareFunction,
    },
    SetDepthBiasState {
        enabled: bool,
        bias: DepthBias,
    },
    SetDepthClipState {
        enabled: bool,
        bounds: DepthRange,
    },
    SetFillState {
        mode: wgpu::PolygonMode,
        line_width: f32,
    },
    SetPrimitiveAssemblyState {
        topology: wgpu::PrimitiveTopology,
        restart: bool,
    },
    SetCullState {
        enabled: bool,
        face: wgpu::Face,
        front_face: wgpu::FrontFace,
    },
    SetBlendColor {
        color: [f32; 4],
    },
    SetBlendState {
        target: u8,
        enabled: bool,
        func: BlendFunc,
        equation: BlendEquation,
    },
    SetColorMask {
        target: u8,
        mask: wgpu::ColorWrites,
    },
    SetMultisampleState {
        alpha_to_coverage: bool,
        dither: bool,
    },

    // ── Geometry and parameters ────────────────────────────────────────────
    BindVertexBuffer {
        slot: u32,
        buffer: ObjectId,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: ObjectId,
        offset: u64,
        format: wgpu::IndexFormat,
    },
    /// Resources for descriptor set `set`, one per element of the pipeline's
    /// layout for that set, in element order.
    BindDescriptor {
        set: u32,
        resources: SmallVec<[ObjectId; 8]>,
    },

    // ── Work ───────────────────────────────────────────────────────────────
    Draw {
        pipeline: ObjectId,
        args: DrawArgs,
    },
    DrawIndexed {
        pipeline: ObjectId,
        args: DrawIndexedArgs,
    },
    Dispatch {
        pipeline: ObjectId,
        groups: [u32; 3],
    },

    // ── Resources ──────────────────────────────────────────────────────────
    ClearRenderTarget {
        view: ObjectId,
        color: [f32; 4],
    },
    ClearImage {
        view: ObjectId,
        color: [f32; 4],
    },
    ClearBuffer {
        view: ObjectId,
        value: u32,
    },
    ImageLayoutBarrier {
        image: ObjectId,
        layout: ImageLayout,
    },
    /// Orders storage writes before later storage accesses.
    UavBarrier {
        object: ObjectId,
    },
    /// Copies a buffer, buffer view or image view back to the CPU.
    Download {
        source: ObjectId,
        sink: Arc<dyn DownloadSink>,
    },
}

impl Opcode {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nop => "Nop",
            Self::BeginBlock { .. } => "BeginBlock",
            Self::EndBlock => "EndBlock",
            Self::BeginPass { .. } => "BeginPass",
            Self::EndPass => "EndPass",
            Self::Resolve { .. } => "Resolve",
            Self::ClearPassColor { .. } => "ClearPassColor",
            Self::ClearPassDepthStencil { .. } => "ClearPassDepthStencil",
            Self::SetViewportRect { .. } => "SetViewportRect",
            Self::SetViewportDepthRange { .. } => "SetViewportDepthRange",
            Self::SetScissorRect { .. } => "SetScissorRect",
            Self::SetScissorState { .. } => "SetScissorState",
            Self::SetStencilReference { .. } => "SetStencilReference",
            Self::SetStencilCompareMask { .. } => "SetStencilCompareMask",
            Self::SetStencilWriteMask { .. } => "SetStencilWriteMask",
            Self::SetStencilOps { .. } => "SetStencilOps",
            Self::SetStencilState { .. } => "SetStencilState",
            Self::SetDepthState { .. } => "SetDepthState",
            Self::SetDepthBiasState { .. } => "SetDepthBiasState",
            Self::SetDepthClipState { .. } => "SetDepthClipState",
            Self::SetFillState { .. } => "SetFillState",
            Self::SetPrimitiveAssemblyState { .. } => "SetPrimitiveAssemblyState",
            Self::SetCullState { .. } => "SetCullState",
            Self::SetBlendColor { .. } => "SetBlendColor",
            Self::SetBlendState { .. } => "SetBlendState",
            Self::SetColorMask { .. } => "SetColorMask",
            Self::SetMultisampleState { .. } => "SetMultisampleState",
            Self::BindVertexBuffer { .. } => "BindVertexBuffer",
            Self::BindIndexBuffer { .. } => "BindIndexBuffer",
            Self::BindDescriptor { .. } => "BindDescriptor",
            Self::Draw { .. } => "Draw",
            Self::DrawIndexed { .. } => "DrawIndexed",
            Self::Dispatch { .. } => "Dispatch",
            Self::ClearRenderTarget { .. } => "ClearRenderTarget",
            Self::ClearImage { .. } => "ClearImage",
            Self::ClearBuffer { .. } => "ClearBuffer",
            Self::ImageLayoutBarrier { .. } => "ImageLayoutBarrier",
            Self::UavBarrier { .. } => "UavBarrier",
            Self::Download { .. } => "Download",
        }
    }
}

impl std::fmt::Debug for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeginBlock { label } => write!(f, "BeginBlock({label:?})"),
            Self::BeginPass { target, .. } => write!(f, "BeginPass({target:?})"),
            Self::Draw { pipeline, .. }
            | Self::DrawIndexed { pipeline, .. }
            | Self::Dispatch { pipeline, .. } => write!(f, "{}({pipeline})", self.name()),
            Self::Download { source, .. } => write!(f, "Download({source})"),
            _ => f.write_str(self.name()),
        }
    }
}
