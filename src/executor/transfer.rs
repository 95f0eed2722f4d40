//! Resource clears, barriers and downloads.

use std::sync::Arc;

use log::{trace, warn};

use super::{ExecuteContext, FrameExecutor, PassPhase, with_object};
use crate::backend::{BarrierScope, DownloadSource};
use crate::command::{DownloadSink, ImageLayout, Opcode};
use crate::object::{
    Buffer, BufferView, DeviceObject, Image, ImageView, ObjectId, ObjectRegistry, ObjectType,
};

/// A download source resolved to native terms plus its byte size.
fn resolve_download(registry: &ObjectRegistry, id: ObjectId) -> Option<(DownloadSource, u64)> {
    let object = registry.resolve(id, None)?;

    match object.object_type() {
        ObjectType::Buffer => {
            let buffer = object.downcast_ref::<Buffer>()?;
            Some((
                DownloadSource::Buffer {
                    buffer: buffer.native(),
                    offset: 0,
                },
                buffer.size(),
            ))
        }
        ObjectType::ConstantBufferView | ObjectType::StorageBufferView => {
            let range = object.downcast_ref::<BufferView>()?.resolve(registry)?;
            Some((
                DownloadSource::Buffer {
                    buffer: range.buffer,
                    offset: range.offset,
                },
                range.size,
            ))
        }
        ObjectType::Image => {
            let image = object.downcast_ref::<Image>()?;
            image_download(image, 0, 0)
        }
        ObjectType::SampledImageView
        | ObjectType::WritableImageView
        | ObjectType::RenderTargetView => {
            let view = object.downcast_ref::<ImageView>()?;
            let parent = registry.resolve_typed(view.image(), ObjectType::Image)?;
            let image = parent.downcast_ref::<Image>()?;
            image_download(image, view.desc().base_mip, view.desc().base_layer)
        }
        ObjectType::Sampler
        | ObjectType::GraphicsPipeline
        | ObjectType::ComputePipeline
        | ObjectType::Output => None,
    }
}

/// One mip of one layer, rows tightly packed.
fn image_download(image: &Image, mip: u32, layer: u32) -> Option<(DownloadSource, u64)> {
    let (bytes_per_row, rows) = image.desc().mip_pitch(mip)?;
    let (width, height, _) = image.desc().mip_extent(mip);
    Some((
        DownloadSource::Image {
            image: image.native(),
            mip,
            layer,
            x: 0,
            y: 0,
            width,
            height,
            bytes_per_row,
        },
        bytes_per_row * u64::from(rows),
    ))
}

/// Barrier scope matching the way `object` is accessed by shaders.
fn uav_scope(object: &dyn DeviceObject) -> BarrierScope {
    match object.object_type() {
        ObjectType::Buffer | ObjectType::StorageBufferView => BarrierScope::STORAGE_BUFFER,
        ObjectType::ConstantBufferView => BarrierScope::UNIFORM_BUFFER,
        ObjectType::Image | ObjectType::WritableImageView => BarrierScope::WRITABLE_IMAGE,
        ObjectType::SampledImageView => BarrierScope::SAMPLED_IMAGE,
        ObjectType::RenderTargetView => BarrierScope::RENDER_TARGET,
        ObjectType::Sampler
        | ObjectType::GraphicsPipeline
        | ObjectType::ComputePipeline
        | ObjectType::Output => BarrierScope::ALL,
    }
}

impl FrameExecutor {
    pub(super) fn clear_image_view(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        view: ObjectId,
        ty: ObjectType,
        color: [f32; 4],
    ) {
        if !self.require_not_invalid(op) {
            return;
        }
        let resolved = with_object(ctx.registry, view, ty, |view: &ImageView| {
            view.resolve(ctx.registry)
        })
        .flatten();
        match resolved {
            Some(resolved) => ctx.backend.clear_image(&resolved, color),
            None => self.skip(op, "image view unavailable"),
        }
    }

    pub(super) fn clear_buffer(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        view: ObjectId,
        value: u32,
    ) {
        if !self.require_not_invalid(op) {
            return;
        }
        let range = ctx
            .registry
            .resolve(view, None)
            .filter(|object| {
                matches!(
                    object.object_type(),
                    ObjectType::ConstantBufferView | ObjectType::StorageBufferView
                )
            })
            .and_then(|object| object.downcast_ref::<BufferView>()?.resolve(ctx.registry));
        match range {
            Some(range) => ctx.backend.clear_buffer(&range, value),
            None => self.skip(op, "buffer view unavailable"),
        }
    }

    pub(super) fn image_layout_barrier(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        image: ObjectId,
        layout: ImageLayout,
    ) {
        if !self.require_not_invalid(op) {
            return;
        }
        if ctx.registry.resolve_typed(image, ObjectType::Image).is_none() {
            self.skip(op, "image unavailable");
            return;
        }
        ctx.backend.memory_barrier(layout.barrier_scope());
    }

    pub(super) fn uav_barrier(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        object: ObjectId,
    ) {
        if !self.require_not_invalid(op) {
            return;
        }
        let Some(object) = ctx.registry.resolve(object, None) else {
            self.skip(op, "object unavailable");
            return;
        };
        ctx.backend.memory_barrier(uav_scope(object.as_ref()));
    }

    /// Copies `source` into a download area now and hands the bytes to
    /// `sink` once the current frame retires. The sink hears back exactly
    /// once, with `None` when the download cannot happen.
    pub(super) fn download(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        source: ObjectId,
        sink: Arc<dyn DownloadSink>,
    ) {
        if self.phase == PassPhase::InsideInvalid {
            self.skip(op, "pass targets unavailable");
            sink.on_complete(None);
            return;
        }

        let Some((native, size)) = resolve_download(ctx.registry, source) else {
            self.skip(op, "download source unavailable");
            sink.on_complete(None);
            return;
        };

        let Some(area) = ctx.cache.acquire_download_area(ctx.backend, size) else {
            warn!("No download area for {size} bytes from {source}");
            self.stats.skipped += 1;
            sink.on_complete(None);
            return;
        };

        ctx.backend.download(&native, size, area.buffer);
        ctx.frame.register_completion_callback(move |done| {
            let bytes = done.backend.read_download_buffer(area.buffer, size);
            sink.on_complete(Some(&bytes));
            done.cache.release_download_area(done.backend, area);
        });

        trace!("Download of {size} bytes from {source} queued");
        self.stats.downloads += 1;
    }
}
