//! Recorded command streams.

use std::sync::Arc;

use smallvec::SmallVec;

use super::opcode::{DownloadSink, ImageLayout, Opcode, PassTarget};
use crate::backend::{DrawArgs, DrawIndexedArgs};
use crate::object::ObjectId;
use crate::state::{
    BlendEquation, BlendFunc, DepthBias, DepthRange, ScissorRect, StencilFaceState, StencilFaces,
    StencilOps, Viewport,
};

/// An ordered, immutable sequence of opcodes.
#[derive(Clone, Debug, Default)]
pub struct CommandStream {
    label: String,
    ops: Vec<Opcode>,
}

impl CommandStream {
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Opcode> {
        self.ops.iter()
    }
}

impl<'a> IntoIterator for &'a CommandStream {
    type Item = &'a Opcode;
    type IntoIter = std::slice::Iter<'a, Opcode>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

/// Builder for a [`CommandStream`].
///
/// ```rust,ignore
/// let mut writer = CommandWriter::new("main");
/// writer.begin_pass_views(&[color_view], None);
/// writer.set_viewport(0, Viewport::new(0.0, 0.0, 640.0, 480.0));
/// writer.draw(pipeline, 3, 1);
/// writer.end_pass();
/// let stream = writer.finish();
/// ```
#[derive(Debug, Default)]
pub struct CommandWriter {
    stream: CommandStream,
}

impl CommandWriter {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            stream: CommandStream {
                label: label.into(),
                ops: Vec::new(),
            },
        }
    }

    /// Appends a raw opcode.
    pub fn push(&mut self, op: Opcode) -> &mut Self {
        self.stream.ops.push(op);
        self
    }

    #[must_use]
    pub fn finish(self) -> CommandStream {
        self.stream
    }

    // ── Debug ──────────────────────────────────────────────────────────────

    pub fn begin_block(&mut self, label: impl Into<String>) -> &mut Self {
        self.push(Opcode::BeginBlock {
            label: label.into(),
        })
    }

    pub fn end_block(&mut self) -> &mut Self {
        self.push(Opcode::EndBlock)
    }

    // ── Passes ─────────────────────────────────────────────────────────────

    pub fn begin_pass(
        &mut self,
        target: PassTarget,
        render_area: Option<ScissorRect>,
    ) -> &mut Self {
        self.push(Opcode::BeginPass {
            target,
            render_area,
            viewport_count: 1,
        })
    }

    /// Begins a pass over render-target views covering the whole target.
    pub fn begin_pass_views(
        &mut self,
        colors: &[ObjectId],
        depth_stencil: Option<ObjectId>,
    ) -> &mut Self {
        self.begin_pass(
            PassTarget::Views {
                colors: SmallVec::from_slice(colors),
                depth_stencil,
            },
            None,
        )
    }

    pub fn begin_pass_output(&mut self, output: ObjectId) -> &mut Self {
        self.begin_pass(PassTarget::Output(output), None)
    }

    pub fn end_pass(&mut self) -> &mut Self {
        self.push(Opcode::EndPass)
    }

    pub fn resolve(&mut self, source: ObjectId, destination: ObjectId) -> &mut Self {
        self.push(Opcode::Resolve {
            source,
            destination,
        })
    }

    pub fn clear_pass_color(&mut self, index: u32, color: [f32; 4]) -> &mut Self {
        self.push(Opcode::ClearPassColor { index, color })
    }

    pub fn clear_pass_depth_stencil(
        &mut self,
        depth: Option<f32>,
        stencil: Option<u8>,
    ) -> &mut Self {
        self.push(Opcode::ClearPassDepthStencil { depth, stencil })
    }

    // ── Dynamic state ──────────────────────────────────────────────────────

    pub fn set_viewport(&mut self, index: u8, viewport: Viewport) -> &mut Self {
        self.push(Opcode::SetViewportRect { index, viewport })
    }

    pub fn set_depth_range(&mut self, index: u8, range: DepthRange) -> &mut Self {
        self.push(Opcode::SetViewportDepthRange { index, range })
    }

    pub fn set_scissor(&mut self, index: u8, rect: ScissorRect) -> &mut Self {
        self.push(Opcode::SetScissorRect { index, rect })
    }

    pub fn set_scissor_enabled(&mut self, enabled: bool) -> &mut Self {
        self.push(Opcode::SetScissorState { enabled })
    }

    pub fn set_stencil_reference(&mut self, faces: StencilFaces, reference: u8) -> &mut Self {
        self.push(Opcode::SetStencilReference { faces, reference })
    }

    pub fn set_stencil_compare_mask(&mut self, faces: StencilFaces, mask: u8) -> &mut Self {
        self.push(Opcode::SetStencilCompareMask { faces, mask })
    }

    pub fn set_stencil_write_mask(&mut self, faces: StencilFaces, mask: u8) -> &mut Self {
        self.push(Opcode::SetStencilWriteMask { faces, mask })
    }

    pub fn set_stencil_ops(&mut self, faces: StencilFaces, ops: StencilOps) -> &mut Self {
        self.push(Opcode::SetStencilOps { faces, ops })
    }

    pub fn set_stencil_state(
        &mut self,
        enabled: bool,
        front: StencilFaceState,
        back: StencilFaceState,
    ) -> &mut Self {
        self.push(Opcode::SetStencilState {
            enabled,
            front,
            back,
        })
    }

    pub fn set_depth_state(
        &mut self,
        enabled: bool,
        write: bool,
        compare: wgpu::CompareFunction,
    ) -> &mut Self {
        self.push(Opcode::SetDepthState {
            enabled,
            write,
            compare,
        })
    }

    pub fn set_depth_bias(&mut self, enabled: bool, bias: DepthBias) -> &mut Self {
        self.push(Opcode::SetDepthBiasState { enabled, bias })
    }

    pub fn set_depth_clip(&mut self, enabled: bool, bounds: DepthRange) -> &mut Self {
        self.push(Opcode::SetDepthClipState { enabled, bounds })
    }

    pub fn set_fill(&mut self, mode: wgpu::PolygonMode, line_width: f32) -> &mut Self {
        self.push(Opcode::SetFillState { mode, line_width })
    }

    pub fn set_primitive_assembly(
        &mut self,
        topology: wgpu::PrimitiveTopology,
        restart: bool,
    ) -> &mut Self {
        self.push(Opcode::SetPrimitiveAssemblyState { topology, restart })
    }

    pub fn set_cull(
        &mut self,
        enabled: bool,
        face: wgpu::Face,
        front_face: wgpu::FrontFace,
    ) -> &mut Self {
        self.push(Opcode::SetCullState {
            enabled,
            face,
            front_face,
        })
    }

    pub fn set_blend_color(&mut self, color: [f32; 4]) -> &mut Self {
        self.push(Opcode::SetBlendColor { color })
    }

    pub fn set_blend_state(
        &mut self,
        target: u8,
        enabled: bool,
        func: BlendFunc,
        equation: BlendEquation,
    ) -> &mut Self {
        self.push(Opcode::SetBlendState {
            target,
            enabled,
            func,
            equation,
        })
    }

    pub fn set_color_mask(&mut self, target: u8, mask: wgpu::ColorWrites) -> &mut Self {
        self.push(Opcode::SetColorMask { target, mask })
    }

    pub fn set_multisample(&mut self, alpha_to_coverage: bool, dither: bool) -> &mut Self {
        self.push(Opcode::SetMultisampleState {
            alpha_to_coverage,
            dither,
        })
    }

    // ── Geometry and parameters ────────────────────────────────────────────

    pub fn bind_vertex_buffer(&mut self, slot: u32, buffer: ObjectId, offset: u64) -> &mut Self {
        self.push(Opcode::BindVertexBuffer {
            slot,
            buffer,
            offset,
        })
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: ObjectId,
        offset: u64,
        format: wgpu::IndexFormat,
    ) -> &mut Self {
        self.push(Opcode::BindIndexBuffer {
            buffer,
            offset,
            format,
        })
    }

    pub fn bind_descriptor(&mut self, set: u32, resources: &[ObjectId]) -> &mut Self {
        self.push(Opcode::BindDescriptor {
            set,
            resources: SmallVec::from_slice(resources),
        })
    }

    // ── Work ───────────────────────────────────────────────────────────────

    pub fn draw(
        &mut self,
        pipeline: ObjectId,
        vertex_count: u32,
        instance_count: u32,
    ) -> &mut Self {
        self.push(Opcode::Draw {
            pipeline,
            args: DrawArgs {
                vertex_count,
                instance_count,
                ..Default::default()
            },
        })
    }

    pub fn draw_with(&mut self, pipeline: ObjectId, args: DrawArgs) -> &mut Self {
        self.push(Opcode::Draw { pipeline, args })
    }

    pub fn draw_indexed(&mut self, pipeline: ObjectId, args: DrawIndexedArgs) -> &mut Self {
        self.push(Opcode::DrawIndexed { pipeline, args })
    }

    pub fn dispatch(&mut self, pipeline: ObjectId, x: u32, y: u32, z: u32) -> &mut Self {
        self.push(Opcode::Dispatch {
            pipeline,
            groups: [x, y, z],
        })
    }

    // ── Resources ──────────────────────────────────────────────────────────

    pub fn clear_render_target(&mut self, view: ObjectId, color: [f32; 4]) -> &mut Self {
        self.push(Opcode::ClearRenderTarget { view, color })
    }

    pub fn clear_image(&mut self, view: ObjectId, color: [f32; 4]) -> &mut Self {
        self.push(Opcode::ClearImage { view, color })
    }

    pub fn clear_buffer(&mut self, view: ObjectId, value: u32) -> &mut Self {
        self.push(Opcode::ClearBuffer { view, value })
    }

    pub fn image_layout_barrier(&mut self, image: ObjectId, layout: ImageLayout) -> &mut Self {
        self.push(Opcode::ImageLayoutBarrier { image, layout })
    }

    pub fn uav_barrier(&mut self, object: ObjectId) -> &mut Self {
        self.push(Opcode::UavBarrier { object })
    }

    pub fn download(&mut self, source: ObjectId, sink: Arc<dyn DownloadSink>) -> &mut Self {
        self.push(Opcode::Download { source, sink })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_preserves_order() {
        let pipeline = ObjectId::new(3, 3);
        let mut writer = CommandWriter::new("frame");
        writer
            .begin_block("main")
            .begin_pass_output(ObjectId::new(1, 1))
            .set_viewport(0, Viewport::new(0.0, 0.0, 8.0, 8.0))
            .draw(pipeline, 3, 1)
            .end_pass()
            .end_block();
        let stream = writer.finish();

        let names: Vec<_> = stream.iter().map(Opcode::name).collect();
        assert_eq!(
            names,
            [
                "BeginBlock",
                "BeginPass",
                "SetViewportRect",
                "Draw",
                "EndPass",
                "EndBlock"
            ]
        );
        assert_eq!(stream.label(), "frame");
    }
}
