//! Frame Executor
//!
//! Interprets a [`CommandStream`] on the device thread, in recorded order,
//! translating opcodes into [`Backend`] calls.
//!
//! # Pass phases
//!
//! ```text
//!              BeginPass (targets resolved)
//!   Outside ─────────────────────────────────▶ InsideValid
//!      ▲  │                                         │
//!      │  │ BeginPass (targets unavailable)         │ EndPass
//!      │  └─────────────────────────▶ InsideInvalid │
//!      │           EndPass                 │        │
//!      └───────────────────────────────────┴────────┘
//! ```
//!
//! - Draws and pass clears need `InsideValid`. In `InsideInvalid` they are
//!   silently dropped until the pass ends; outside of a pass they are logged
//!   as errors and dropped.
//! - Dispatches, resource clears, barriers, resolves and downloads run
//!   outside of passes too.
//! - Any opcode referencing an object that no longer resolves is skipped.
//!   A stream never aborts.
//!
//! # Submodules
//!
//! - `pass`: pass begin/end, pass clears and resolves
//! - `state`: dynamic state opcodes
//! - `draw`: vertex/index/descriptor resolution, draws and dispatches
//! - `transfer`: resource clears, barriers and downloads

mod draw;
mod pass;
mod state;
mod transfer;

use std::sync::Arc;

use log::{debug, error, trace, warn};
use smallvec::SmallVec;

use crate::backend::Backend;
use crate::cache::ObjectCache;
use crate::command::{CommandStream, Opcode};
use crate::frame::Frame;
use crate::object::{DeviceObject, ObjectId, ObjectRegistry, ObjectType};
use crate::state::bindings::MAX_VERTEX_STREAMS;
use crate::state::{BindingTables, StateTracker};

use self::draw::{IndexSource, VertexSource};
use self::pass::ActivePass;

/// Everything an execution borrows from the device thread.
pub struct ExecuteContext<'a> {
    pub backend: &'a mut dyn Backend,
    pub registry: &'a ObjectRegistry,
    pub cache: &'a mut ObjectCache,
    /// The frame the stream is recorded into. Completion callbacks of
    /// downloads are registered here.
    pub frame: &'a mut Frame,
}

/// Where the executor is relative to render passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PassPhase {
    #[default]
    Outside,
    /// The pass targets could not be resolved; draws are dropped.
    InsideInvalid,
    InsideValid,
}

/// Counters of one [`FrameExecutor::execute`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub ops: usize,
    pub passes: usize,
    pub invalid_passes: usize,
    pub draws: usize,
    pub dispatches: usize,
    pub downloads: usize,
    /// Opcodes dropped because of stale references or an illegal phase.
    pub skipped: usize,
    /// Backend state calls issued by flushes and pass-end restores.
    pub state_commands: usize,
}

/// Single-threaded opcode interpreter with a render state cache.
///
/// The state tracker and binding tables persist across streams, so state
/// established by one stream is not re-issued by the next.
pub struct FrameExecutor {
    state: StateTracker,
    bindings: BindingTables,
    phase: PassPhase,
    pass: Option<ActivePass>,
    vertex_streams: [Option<VertexSource>; MAX_VERTEX_STREAMS],
    index_stream: Option<IndexSource>,
    descriptors: SmallVec<[Option<SmallVec<[ObjectId; 8]>>; 4]>,
    block_depth: u32,
    stats: ExecutionStats,
}

impl Default for FrameExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StateTracker::new(),
            bindings: BindingTables::new(),
            phase: PassPhase::Outside,
            pass: None,
            vertex_streams: [None; MAX_VERTEX_STREAMS],
            index_stream: None,
            descriptors: SmallVec::new(),
            block_depth: 0,
            stats: ExecutionStats::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> PassPhase {
        self.phase
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    #[inline]
    #[must_use]
    pub fn bindings(&self) -> &BindingTables {
        &self.bindings
    }

    /// Runs every opcode of `stream`, then closes anything the stream left
    /// open.
    pub fn execute(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        stream: &CommandStream,
    ) -> ExecutionStats {
        self.stats = ExecutionStats::default();

        for op in stream {
            self.stats.ops += 1;
            self.run(ctx, op);
        }
        self.finish_stream(ctx, stream.label());

        debug!(
            "Executed '{}': {} ops, {} draws, {} dispatches, {} skipped, {} state calls",
            stream.label(),
            self.stats.ops,
            self.stats.draws,
            self.stats.dispatches,
            self.stats.skipped,
            self.stats.state_commands
        );
        self.stats
    }

    fn run(&mut self, ctx: &mut ExecuteContext<'_>, op: &Opcode) {
        match op {
            Opcode::Nop => {}

            Opcode::BeginBlock { label } => {
                ctx.backend.push_debug_group(label);
                self.block_depth += 1;
            }
            Opcode::EndBlock => {
                if self.block_depth == 0 {
                    warn!("EndBlock without a matching BeginBlock");
                } else {
                    ctx.backend.pop_debug_group();
                    self.block_depth -= 1;
                }
            }

            Opcode::BeginPass {
                target,
                render_area,
                viewport_count,
            } => self.begin_pass(ctx, target, *render_area, *viewport_count),
            Opcode::EndPass => self.end_pass(ctx),
            Opcode::Resolve {
                source,
                destination,
            } => self.resolve(ctx, op, *source, *destination),
            Opcode::ClearPassColor { index, color } => {
                self.clear_pass_color(ctx, op, *index, *color);
            }
            Opcode::ClearPassDepthStencil { depth, stencil } => {
                self.clear_pass_depth_stencil(ctx, op, *depth, *stencil);
            }

            Opcode::SetViewportRect { .. }
            | Opcode::SetViewportDepthRange { .. }
            | Opcode::SetScissorRect { .. }
            | Opcode::SetScissorState { .. }
            | Opcode::SetStencilReference { .. }
            | Opcode::SetStencilCompareMask { .. }
            | Opcode::SetStencilWriteMask { .. }
            | Opcode::SetStencilOps { .. }
            | Opcode::SetStencilState { .. }
            | Opcode::SetDepthState { .. }
            | Opcode::SetDepthBiasState { .. }
            | Opcode::SetDepthClipState { .. }
            | Opcode::SetFillState { .. }
            | Opcode::SetPrimitiveAssemblyState { .. }
            | Opcode::SetCullState { .. }
            | Opcode::SetBlendColor { .. }
            | Opcode::SetBlendState { .. }
            | Opcode::SetColorMask { .. }
            | Opcode::SetMultisampleState { .. } => self.apply_dynamic_state(op),

            Opcode::BindVertexBuffer {
                slot,
                buffer,
                offset,
            } => self.bind_vertex_buffer(op, *slot, *buffer, *offset),
            Opcode::BindIndexBuffer {
                buffer,
                offset,
                format,
            } => {
                self.index_stream = Some(IndexSource {
                    buffer: *buffer,
                    offset: *offset,
                    format: *format,
                });
            }
            Opcode::BindDescriptor { set, resources } => self.bind_descriptor(*set, resources),

            Opcode::Draw { pipeline, args } => self.draw(ctx, op, *pipeline, args),
            Opcode::DrawIndexed { pipeline, args } => self.draw_indexed(ctx, op, *pipeline, args),
            Opcode::Dispatch { pipeline, groups } => self.dispatch(ctx, op, *pipeline, *groups),

            Opcode::ClearRenderTarget { view, color } => {
                self.clear_image_view(ctx, op, *view, ObjectType::RenderTargetView, *color);
            }
            Opcode::ClearImage { view, color } => {
                self.clear_image_view(ctx, op, *view, ObjectType::WritableImageView, *color);
            }
            Opcode::ClearBuffer { view, value } => self.clear_buffer(ctx, op, *view, *value),
            Opcode::ImageLayoutBarrier { image, layout } => {
                self.image_layout_barrier(ctx, op, *image, *layout);
            }
            Opcode::UavBarrier { object } => self.uav_barrier(ctx, op, *object),
            Opcode::Download { source, sink } => self.download(ctx, op, *source, Arc::clone(sink)),
        }
    }

    // ── Phase checks ───────────────────────────────────────────────────────

    fn skip(&mut self, op: &Opcode, reason: &str) {
        trace!("{op:?} skipped: {reason}");
        self.stats.skipped += 1;
    }

    /// Gate for opcodes that only make sense inside a valid pass.
    fn require_valid_pass(&mut self, op: &Opcode) -> bool {
        match self.phase {
            PassPhase::InsideValid => true,
            PassPhase::InsideInvalid => {
                self.skip(op, "pass targets unavailable");
                false
            }
            PassPhase::Outside => {
                error!("{} issued outside of a pass", op.name());
                self.stats.skipped += 1;
                false
            }
        }
    }

    /// Gate for opcodes that run anywhere except inside an invalid pass.
    fn require_not_invalid(&mut self, op: &Opcode) -> bool {
        if self.phase == PassPhase::InsideInvalid {
            self.skip(op, "pass targets unavailable");
            return false;
        }
        true
    }

    // ── End of stream ──────────────────────────────────────────────────────

    fn finish_stream(&mut self, ctx: &mut ExecuteContext<'_>, label: &str) {
        if self.phase != PassPhase::Outside {
            warn!("Stream '{label}' ended inside a pass, closing it");
            self.end_pass(ctx);
        }

        if self.block_depth > 0 {
            warn!(
                "Stream '{label}' left {} debug blocks open",
                self.block_depth
            );
            for _ in 0..self.block_depth {
                ctx.backend.pop_debug_group();
            }
            self.block_depth = 0;
        }

        self.bindings.reset(ctx.backend);
        self.vertex_streams = [None; MAX_VERTEX_STREAMS];
        self.index_stream = None;
        self.descriptors.clear();
    }
}

/// Resolves `id` as a `T` of type `ty` and runs `f` on it.
fn with_object<T, R>(
    registry: &ObjectRegistry,
    id: ObjectId,
    ty: ObjectType,
    f: impl FnOnce(&T) -> R,
) -> Option<R>
where
    T: DeviceObject,
{
    let object = registry.resolve_typed(id, ty)?;
    object.downcast_ref::<T>().map(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{BackendCall, RecordingBackend};
    use crate::command::{CommandWriter, DownloadSink};
    use crate::config::DeviceConfig;
    use crate::frame::FrameQueue;
    use crate::object::{
        Buffer, BufferDesc, GraphicsPipeline, GraphicsPipelineDesc, Image, ImageDesc, ImageView,
        ImageViewDesc, ShaderDesc, VertexLayout, VertexStream,
    };
    use crate::state::RenderStates;
    use parking_lot::Mutex;
    use smallvec::smallvec;

    struct Fixture {
        backend: RecordingBackend,
        registry: ObjectRegistry,
        cache: ObjectCache,
        frame: Frame,
        executor: FrameExecutor,
    }

    impl Fixture {
        fn new() -> Self {
            let (registry, _rx) = ObjectRegistry::new(64);
            Self {
                backend: RecordingBackend::new(),
                registry,
                cache: ObjectCache::new(&DeviceConfig::default()),
                frame: Frame::new(0),
                executor: FrameExecutor::new(),
            }
        }

        fn run(&mut self, stream: &CommandStream) -> ExecutionStats {
            let mut ctx = ExecuteContext {
                backend: &mut self.backend,
                registry: &self.registry,
                cache: &mut self.cache,
                frame: &mut self.frame,
            };
            self.executor.execute(&mut ctx, stream)
        }

        fn buffer(&mut self, size: u64, usage: wgpu::BufferUsages) -> Arc<Buffer> {
            let desc = BufferDesc::new("buffer", size, usage);
            let native = self.backend.create_buffer(&desc).unwrap();
            self.registry.register_object(|id| Buffer::new(id, desc, native))
        }

        fn render_target(&mut self) -> (Arc<Image>, Arc<ImageView>) {
            let desc = ImageDesc::new_2d(
                "rt",
                64,
                64,
                wgpu::TextureFormat::Rgba8Unorm,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            );
            let native = self.backend.create_image(&desc).unwrap();
            let image = self.registry.register_object(|id| Image::new(id, desc, native));
            let view_desc = ImageViewDesc::single(0, 0);
            let view_native = self
                .backend
                .create_image_view(image.native(), image.desc(), &view_desc)
                .unwrap();
            let view = self.registry.register_object(|id| {
                ImageView::new(id, ObjectType::RenderTargetView, &image, view_desc, view_native)
            });
            (image, view)
        }

        fn pipeline(&mut self) -> Arc<GraphicsPipeline> {
            let desc = GraphicsPipelineDesc {
                label: "tri".into(),
                vertex: ShaderDesc::wgsl("vs", "", "main"),
                fragment: None,
                vertex_layout: VertexLayout {
                    streams: smallvec![VertexStream {
                        stride: 12,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: Vec::new(),
                    }],
                },
                descriptor_layouts: Vec::new(),
                states: RenderStates::default(),
            };
            let program = self.backend.create_graphics_program(&desc).unwrap();
            self.registry
                .register_object(|id| GraphicsPipeline::new(id, desc, program))
        }
    }

    #[test]
    fn test_draw_outside_pass_is_dropped() {
        let mut fx = Fixture::new();
        let pipeline = fx.pipeline();
        let mut w = CommandWriter::new("outside");
        w.draw(pipeline.handle(), 3, 1);

        let stats = fx.run(&w.finish());
        assert_eq!(stats.draws, 0);
        assert_eq!(stats.skipped, 1);
        assert!(fx.backend.calls_matching(BackendCall::is_work).is_empty());
    }

    #[test]
    fn test_draw_binds_everything_then_draws() {
        let mut fx = Fixture::new();
        let (_image, view) = fx.render_target();
        let vb = fx.buffer(36, wgpu::BufferUsages::VERTEX);
        let pipeline = fx.pipeline();
        fx.backend.clear_calls();

        let mut w = CommandWriter::new("tri");
        w.begin_pass_views(&[view.handle()], None)
            .bind_vertex_buffer(0, vb.handle(), 0)
            .draw(pipeline.handle(), 3, 1)
            .end_pass();

        let stats = fx.run(&w.finish());
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.draws, 1);
        assert_eq!(fx.executor.phase(), PassPhase::Outside);

        let calls = fx.backend.calls();
        let program = calls
            .iter()
            .position(|c| *c == BackendCall::BindProgram(pipeline.program()));
        let draw = calls.iter().position(|c| matches!(c, BackendCall::Draw(_)));
        assert!(program.is_some() && draw.is_some());
        assert!(program < draw);
        assert!(calls.iter().any(|c| matches!(
            c,
            BackendCall::BindVertexBuffer { slot: 0, binding: Some(b) } if b.stride == 12
        )));
    }

    #[test]
    fn test_stale_vertex_buffer_skips_draw_without_partial_state() {
        let mut fx = Fixture::new();
        let (_image, view) = fx.render_target();
        let vb = fx.buffer(36, wgpu::BufferUsages::VERTEX);
        let pipeline = fx.pipeline();
        let stale = vb.handle();
        drop(vb);
        fx.backend.clear_calls();

        let mut w = CommandWriter::new("stale");
        w.begin_pass_views(&[view.handle()], None)
            .bind_vertex_buffer(0, stale, 0)
            .draw(pipeline.handle(), 3, 1)
            .end_pass();

        let stats = fx.run(&w.finish());
        assert_eq!(stats.draws, 0);
        assert_eq!(stats.skipped, 1);
        assert!(
            fx.backend
                .calls_matching(|c| matches!(c, BackendCall::BindProgram(_)))
                .is_empty()
        );
    }

    #[test]
    fn test_invalid_pass_drops_contents_silently() {
        let mut fx = Fixture::new();
        let (image, view) = fx.render_target();
        let pipeline = fx.pipeline();
        let target = view.handle();
        drop(view);
        drop(image);
        fx.backend.clear_calls();

        let mut w = CommandWriter::new("invalid");
        w.begin_pass_views(&[target], None)
            .clear_pass_color(0, [0.0; 4])
            .draw(pipeline.handle(), 3, 1)
            .end_pass();

        let stats = fx.run(&w.finish());
        assert_eq!(stats.invalid_passes, 1);
        assert_eq!(stats.passes, 0);
        assert_eq!(stats.skipped, 2);
        assert!(fx.backend.calls().iter().all(|c| !c.is_work()));
        assert!(
            fx.backend
                .calls_matching(|c| matches!(c, BackendCall::BindFrameBuffer(_)))
                .is_empty()
        );
    }

    #[test]
    fn test_unterminated_pass_and_blocks_are_closed() {
        let mut fx = Fixture::new();
        let (_image, view) = fx.render_target();

        let mut w = CommandWriter::new("open");
        w.begin_block("outer").begin_pass_views(&[view.handle()], None);
        fx.run(&w.finish());

        assert_eq!(fx.executor.phase(), PassPhase::Outside);
        let calls = fx.backend.calls();
        assert!(calls.contains(&BackendCall::UnbindFrameBuffer));
        assert_eq!(calls.last(), Some(&BackendCall::PopDebugGroup));
    }

    struct Collect(Mutex<Vec<Option<Vec<u8>>>>);

    impl DownloadSink for Collect {
        fn on_complete(&self, data: Option<&[u8]>) {
            self.0.lock().push(data.map(<[u8]>::to_vec));
        }
    }

    #[test]
    fn test_download_delivered_on_retirement() {
        let mut fx = Fixture::new();
        let buffer = fx.buffer(8, wgpu::BufferUsages::COPY_SRC);
        fx.backend
            .copy_buffer_from_staging(buffer.native(), 0, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let mut w = CommandWriter::new("readback");
        w.download(buffer.handle(), sink.clone());
        let stats = fx.run(&w.finish());
        assert_eq!(stats.downloads, 1);
        assert!(sink.0.lock().is_empty());

        let mut frame = std::mem::replace(&mut fx.frame, Frame::new(1));
        frame.submit(&mut fx.backend);
        let mut queue = FrameQueue::new();
        queue.push(frame);
        queue.retire_completed(&mut fx.backend, &mut fx.cache, &fx.registry);

        assert_eq!(*sink.0.lock(), vec![Some(vec![1, 2, 3, 4, 5, 6, 7, 8])]);
        assert_eq!(fx.cache.downloads().in_use_count(), 0);
    }

    #[test]
    fn test_download_of_stale_source_reports_none() {
        let mut fx = Fixture::new();
        let buffer = fx.buffer(8, wgpu::BufferUsages::COPY_SRC);
        let stale = buffer.handle();
        drop(buffer);

        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let mut w = CommandWriter::new("readback");
        w.download(stale, sink.clone());
        fx.run(&w.finish());

        assert_eq!(*sink.0.lock(), vec![None]);
        assert_eq!(fx.frame.callback_count(), 0);
    }
}
