//! Draws and dispatches.
//!
//! Everything a draw needs is resolved first: pipeline, vertex streams,
//! index buffer and every descriptor resource. Only when all of it resolves
//! are program, state and bindings committed to the backend, so a skipped
//! draw leaves no partial state behind.

use log::{error, trace};
use smallvec::SmallVec;

use super::{ExecuteContext, FrameExecutor, with_object};
use crate::backend::{
    BoundResource, DrawArgs, DrawIndexedArgs, IndexBinding, NativeHandle, ResolvedBufferView,
    VertexBinding,
};
use crate::command::Opcode;
use crate::object::{
    Buffer, BufferView, ComputePipeline, DescriptorKind, DescriptorLayout, GraphicsPipeline,
    ImageView, ObjectId, ObjectRegistry, ObjectType, Sampler,
};
use crate::state::bindings::MAX_VERTEX_STREAMS;

/// Upper bound on descriptor set indices.
const MAX_DESCRIPTOR_SETS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct VertexSource {
    pub buffer: ObjectId,
    pub offset: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct IndexSource {
    pub buffer: ObjectId,
    pub offset: u64,
    pub format: wgpu::IndexFormat,
}

/// One resolved descriptor element.
#[derive(Clone, Copy, Debug)]
struct ResolvedDescriptor {
    kind: DescriptorKind,
    binding: u32,
    resource: BoundResource,
}

type Resolved<T> = Result<T, &'static str>;

/// Buffer range from `offset` to the end of a buffer.
fn resolve_buffer_range(
    registry: &ObjectRegistry,
    id: ObjectId,
    offset: u64,
) -> Option<ResolvedBufferView> {
    with_object(registry, id, ObjectType::Buffer, |buffer: &Buffer| {
        (offset < buffer.size()).then(|| ResolvedBufferView {
            buffer: buffer.native(),
            offset,
            size: buffer.size() - offset,
        })
    })
    .flatten()
}

/// Resolves one descriptor resource.
///
/// # Panics
///
/// Panics when the resource is live but of a type the slot cannot accept.
fn resolve_descriptor(
    registry: &ObjectRegistry,
    kind: DescriptorKind,
    id: ObjectId,
) -> Option<BoundResource> {
    let object = registry.resolve(id, None)?;

    let expected = kind.expected_object_type();
    if object.object_type() != expected {
        error!(
            "Descriptor slot of kind {kind:?} expects {expected:?}, got {:?} {id}",
            object.object_type()
        );
        panic!(
            "descriptor kind mismatch: {kind:?} slot bound to {:?} {id}",
            object.object_type()
        );
    }

    match kind {
        DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer => object
            .downcast_ref::<BufferView>()?
            .resolve(registry)
            .map(BoundResource::Buffer),
        DescriptorKind::SampledImage | DescriptorKind::WritableImage => object
            .downcast_ref::<ImageView>()?
            .resolve(registry)
            .map(BoundResource::Image),
        DescriptorKind::Sampler => object
            .downcast_ref::<Sampler>()
            .map(|sampler| BoundResource::Sampler(sampler.native())),
    }
}

impl FrameExecutor {
    pub(super) fn bind_vertex_buffer(
        &mut self,
        op: &Opcode,
        slot: u32,
        buffer: ObjectId,
        offset: u64,
    ) {
        let Some(entry) = self.vertex_streams.get_mut(slot as usize) else {
            error!("Vertex stream {slot} out of range (max {MAX_VERTEX_STREAMS})");
            self.skip(op, "vertex stream out of range");
            return;
        };
        *entry = Some(VertexSource { buffer, offset });
    }

    pub(super) fn bind_descriptor(&mut self, set: u32, resources: &SmallVec<[ObjectId; 8]>) {
        let set = set as usize;
        if set >= MAX_DESCRIPTOR_SETS {
            error!("Descriptor set {set} out of range (max {MAX_DESCRIPTOR_SETS})");
            self.stats.skipped += 1;
            return;
        }
        if self.descriptors.len() <= set {
            self.descriptors.resize(set + 1, None);
        }
        self.descriptors[set] = Some(resources.clone());
    }

    fn resolve_descriptors(
        &self,
        registry: &ObjectRegistry,
        layouts: &[DescriptorLayout],
    ) -> Resolved<SmallVec<[ResolvedDescriptor; 16]>> {
        let mut resolved = SmallVec::new();

        for (set, layout) in layouts.iter().enumerate() {
            let resources = self
                .descriptors
                .get(set)
                .and_then(Option::as_ref)
                .ok_or("descriptor set not bound")?;
            if resources.len() < layout.elements.len() {
                return Err("descriptor set has fewer resources than its layout");
            }

            for (element, &id) in layout.elements.iter().zip(resources) {
                let resource = resolve_descriptor(registry, element.kind, id)
                    .ok_or("descriptor resource unavailable")?;
                resolved.push(ResolvedDescriptor {
                    kind: element.kind,
                    binding: element.binding,
                    resource,
                });
            }
        }

        Ok(resolved)
    }

    fn commit_descriptors(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        descriptors: &[ResolvedDescriptor],
    ) {
        for descriptor in descriptors {
            if !self.bindings.bind_resource(
                ctx.backend,
                descriptor.kind,
                descriptor.binding,
                Some(descriptor.resource),
            ) {
                error!(
                    "{:?} binding {} outside of its binding table",
                    descriptor.kind, descriptor.binding
                );
            }
        }
    }

    /// Resolves and binds everything a draw with `pipeline` needs. Returns
    /// the reason when the draw has to be skipped.
    fn prepare_draw(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        pipeline: ObjectId,
        indexed: bool,
    ) -> Resolved<()> {
        let object = ctx
            .registry
            .resolve_typed(pipeline, ObjectType::GraphicsPipeline)
            .ok_or("pipeline unavailable")?;
        let pipeline = object
            .downcast_ref::<GraphicsPipeline>()
            .ok_or("pipeline unavailable")?;

        let mut vertex: SmallVec<[(u32, VertexBinding); 4]> = SmallVec::new();
        for (slot, stream) in pipeline.desc().vertex_layout.streams.iter().enumerate() {
            let source = self
                .vertex_streams
                .get(slot)
                .copied()
                .flatten()
                .ok_or("vertex stream not bound")?;
            let buffer = resolve_buffer_range(ctx.registry, source.buffer, source.offset)
                .ok_or("vertex buffer unavailable")?;
            vertex.push((
                slot as u32,
                VertexBinding {
                    buffer,
                    stride: stream.stride,
                },
            ));
        }

        let index = if indexed {
            let source = self.index_stream.ok_or("index buffer not bound")?;
            let buffer = resolve_buffer_range(ctx.registry, source.buffer, source.offset)
                .ok_or("index buffer unavailable")?;
            Some(IndexBinding {
                buffer,
                format: source.format,
            })
        } else {
            None
        };

        let descriptors =
            self.resolve_descriptors(ctx.registry, &pipeline.desc().descriptor_layouts)?;

        // everything resolved, commit
        self.bindings.bind_program(ctx.backend, pipeline.program());
        self.state
            .merge_pipeline(pipeline.static_states(), pipeline.static_mask());
        self.stats.state_commands += self.state.flush(ctx.backend);

        for (slot, binding) in vertex {
            self.bindings.bind_vertex_buffer(ctx.backend, slot, Some(binding));
        }
        if index.is_some() {
            self.bindings.bind_index_buffer(ctx.backend, index);
        }
        self.commit_descriptors(ctx, &descriptors);

        Ok(())
    }

    pub(super) fn draw(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        pipeline: ObjectId,
        args: &DrawArgs,
    ) {
        if !self.require_valid_pass(op) {
            return;
        }
        match self.prepare_draw(ctx, pipeline, false) {
            Ok(()) => {
                ctx.backend.draw(args);
                self.stats.draws += 1;
            }
            Err(reason) => self.skip(op, reason),
        }
    }

    pub(super) fn draw_indexed(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        pipeline: ObjectId,
        args: &DrawIndexedArgs,
    ) {
        if !self.require_valid_pass(op) {
            return;
        }
        match self.prepare_draw(ctx, pipeline, true) {
            Ok(()) => {
                ctx.backend.draw_indexed(args);
                self.stats.draws += 1;
            }
            Err(reason) => self.skip(op, reason),
        }
    }

    fn prepare_dispatch(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        pipeline: ObjectId,
    ) -> Resolved<NativeHandle> {
        let (program, layouts) = with_object(
            ctx.registry,
            pipeline,
            ObjectType::ComputePipeline,
            |pipeline: &ComputePipeline| {
                (pipeline.program(), pipeline.desc().descriptor_layouts.clone())
            },
        )
        .ok_or("compute pipeline unavailable")?;

        let descriptors = self.resolve_descriptors(ctx.registry, &layouts)?;

        self.stats.state_commands += self.state.flush(ctx.backend);
        self.bindings.bind_program(ctx.backend, program);
        self.commit_descriptors(ctx, &descriptors);
        Ok(program)
    }

    pub(super) fn dispatch(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        pipeline: ObjectId,
        groups: [u32; 3],
    ) {
        if !self.require_not_invalid(op) {
            return;
        }
        if groups.contains(&0) {
            trace!("{op:?} with an empty grid");
            return;
        }
        match self.prepare_dispatch(ctx, pipeline) {
            Ok(_) => {
                let [x, y, z] = groups;
                ctx.backend.dispatch(x, y, z);
                self.stats.dispatches += 1;
            }
            Err(reason) => self.skip(op, reason),
        }
    }
}
