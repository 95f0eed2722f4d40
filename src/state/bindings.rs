//! Currently bound resources.
//!
//! The executor resolves every binding to its concrete backend view before
//! comparing, so two handles that resolve to the same buffer range or image
//! view never cause a rebind.

use crate::backend::{
    Backend, BoundResource, IndexBinding, NativeHandle, ResourceBinding, VertexBinding,
};
use crate::object::desc::DescriptorKind;

pub const MAX_UNIFORM_BUFFERS: usize = 16;
pub const MAX_STORAGE_BUFFERS: usize = 16;
pub const MAX_SAMPLED_IMAGES: usize = 32;
pub const MAX_WRITABLE_IMAGES: usize = 16;
pub const MAX_SAMPLERS: usize = 32;
pub const MAX_VERTEX_STREAMS: usize = 16;

/// Binding tables per descriptor kind, plus vertex/index streams and the
/// active program.
#[derive(Debug)]
pub struct BindingTables {
    uniform_buffers: [Option<BoundResource>; MAX_UNIFORM_BUFFERS],
    storage_buffers: [Option<BoundResource>; MAX_STORAGE_BUFFERS],
    sampled_images: [Option<BoundResource>; MAX_SAMPLED_IMAGES],
    writable_images: [Option<BoundResource>; MAX_WRITABLE_IMAGES],
    samplers: [Option<BoundResource>; MAX_SAMPLERS],
    vertex_streams: [Option<VertexBinding>; MAX_VERTEX_STREAMS],
    index_buffer: Option<IndexBinding>,
    program: NativeHandle,
    rebinds: u64,
}

impl Default for BindingTables {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingTables {
    #[must_use]
    pub fn new() -> Self {
        Self {
            uniform_buffers: [None; MAX_UNIFORM_BUFFERS],
            storage_buffers: [None; MAX_STORAGE_BUFFERS],
            sampled_images: [None; MAX_SAMPLED_IMAGES],
            writable_images: [None; MAX_WRITABLE_IMAGES],
            samplers: [None; MAX_SAMPLERS],
            vertex_streams: [None; MAX_VERTEX_STREAMS],
            index_buffer: None,
            program: NativeHandle::NULL,
            rebinds: 0,
        }
    }

    fn table_mut(&mut self, kind: DescriptorKind) -> &mut [Option<BoundResource>] {
        match kind {
            DescriptorKind::UniformBuffer => &mut self.uniform_buffers,
            DescriptorKind::StorageBuffer => &mut self.storage_buffers,
            DescriptorKind::SampledImage => &mut self.sampled_images,
            DescriptorKind::WritableImage => &mut self.writable_images,
            DescriptorKind::Sampler => &mut self.samplers,
        }
    }

    /// Number of backend binding calls issued so far.
    #[inline]
    #[must_use]
    pub fn rebinds(&self) -> u64 {
        self.rebinds
    }

    #[inline]
    #[must_use]
    pub fn program(&self) -> NativeHandle {
        self.program
    }

    #[must_use]
    pub fn bound(&self, kind: DescriptorKind, slot: u32) -> Option<BoundResource> {
        let table: &[Option<BoundResource>] = match kind {
            DescriptorKind::UniformBuffer => &self.uniform_buffers,
            DescriptorKind::StorageBuffer => &self.storage_buffers,
            DescriptorKind::SampledImage => &self.sampled_images,
            DescriptorKind::WritableImage => &self.writable_images,
            DescriptorKind::Sampler => &self.samplers,
        };
        table.get(slot as usize).copied().flatten()
    }

    /// Binds `resource` to `slot` unless it is already bound there.
    /// Returns `false` for slots outside the table.
    pub fn bind_resource(
        &mut self,
        backend: &mut dyn Backend,
        kind: DescriptorKind,
        slot: u32,
        resource: Option<BoundResource>,
    ) -> bool {
        let Some(entry) = self.table_mut(kind).get_mut(slot as usize) else {
            return false;
        };
        if *entry == resource {
            return true;
        }
        *entry = resource;
        backend.bind_resource(&ResourceBinding {
            kind,
            slot,
            resource,
        });
        self.rebinds += 1;
        true
    }

    pub fn bind_program(&mut self, backend: &mut dyn Backend, program: NativeHandle) {
        if self.program != program {
            self.program = program;
            backend.bind_program(program);
            self.rebinds += 1;
        }
    }

    pub fn bind_vertex_buffer(
        &mut self,
        backend: &mut dyn Backend,
        slot: u32,
        binding: Option<VertexBinding>,
    ) -> bool {
        let Some(entry) = self.vertex_streams.get_mut(slot as usize) else {
            return false;
        };
        if *entry != binding {
            *entry = binding;
            backend.bind_vertex_buffer(slot, binding);
            self.rebinds += 1;
        }
        true
    }

    pub fn bind_index_buffer(&mut self, backend: &mut dyn Backend, binding: Option<IndexBinding>) {
        if self.index_buffer != binding {
            self.index_buffer = binding;
            backend.bind_index_buffer(binding);
            self.rebinds += 1;
        }
    }

    /// Unbinds everything still bound.
    pub fn reset(&mut self, backend: &mut dyn Backend) {
        const KINDS: [DescriptorKind; 5] = [
            DescriptorKind::UniformBuffer,
            DescriptorKind::StorageBuffer,
            DescriptorKind::SampledImage,
            DescriptorKind::WritableImage,
            DescriptorKind::Sampler,
        ];

        for kind in KINDS {
            let table = self.table_mut(kind);
            for (slot, entry) in table.iter_mut().enumerate() {
                if entry.take().is_some() {
                    backend.bind_resource(&ResourceBinding {
                        kind,
                        slot: slot as u32,
                        resource: None,
                    });
                }
            }
        }

        for (slot, entry) in self.vertex_streams.iter_mut().enumerate() {
            if entry.take().is_some() {
                backend.bind_vertex_buffer(slot as u32, None);
            }
        }
        if self.index_buffer.take().is_some() {
            backend.bind_index_buffer(None);
        }
        self.program = NativeHandle::NULL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{BackendCall, RecordingBackend};
    use crate::backend::ResolvedBufferView;

    fn view(buffer: u64, offset: u64) -> BoundResource {
        BoundResource::Buffer(ResolvedBufferView {
            buffer: NativeHandle(buffer),
            offset,
            size: 256,
        })
    }

    #[test]
    fn test_identical_binding_is_skipped() {
        let mut backend = RecordingBackend::new();
        let mut tables = BindingTables::new();

        let uniform = DescriptorKind::UniformBuffer;
        assert!(tables.bind_resource(&mut backend, uniform, 3, Some(view(1, 0))));
        assert!(tables.bind_resource(&mut backend, uniform, 3, Some(view(1, 0))));
        assert_eq!(tables.rebinds(), 1);

        tables.bind_resource(&mut backend, DescriptorKind::UniformBuffer, 3, Some(view(1, 256)));
        assert_eq!(tables.rebinds(), 2);
        assert_eq!(
            tables.bound(DescriptorKind::UniformBuffer, 3),
            Some(view(1, 256))
        );
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut backend = RecordingBackend::new();
        let mut tables = BindingTables::new();
        assert!(!tables.bind_resource(
            &mut backend,
            DescriptorKind::WritableImage,
            MAX_WRITABLE_IMAGES as u32,
            None
        ));
    }

    #[test]
    fn test_reset_unbinds_everything_bound() {
        let mut backend = RecordingBackend::new();
        let mut tables = BindingTables::new();
        tables.bind_resource(&mut backend, DescriptorKind::StorageBuffer, 0, Some(view(2, 0)));
        tables.bind_resource(
            &mut backend,
            DescriptorKind::Sampler,
            5,
            Some(BoundResource::Sampler(NativeHandle(9))),
        );
        backend.clear_calls();

        tables.reset(&mut backend);
        let unbinds = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::BindResource(b) if b.resource.is_none()))
            .count();
        assert_eq!(unbinds, 2);

        backend.clear_calls();
        tables.reset(&mut backend);
        assert!(backend.calls().is_empty());
    }
}
