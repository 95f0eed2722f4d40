//! Headless backend that records every call.
//!
//! `RecordingBackend` keeps enough state to behave like a real device for
//! transfers (buffer contents, staged image regions, download buffers) and
//! logs every other call as a [`BackendCall`]. Fences are signaled
//! immediately unless automatic signaling is turned off.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    Backend, BarrierScope, DownloadSource, DrawArgs, DrawIndexedArgs, FenceId, FrameBufferDesc,
    ImageCopyRegion, IndexBinding, NativeHandle, ResolvedBufferView, ResolvedImageView,
    ResourceBinding, VertexBinding,
};
use crate::errors::{DeviceError, Result};
use crate::object::desc::{
    BufferDesc, ComputePipelineDesc, GraphicsPipelineDesc, ImageDesc, ImageViewDesc, OutputDesc,
    SamplerDesc,
};
use crate::state::StateCommand;

/// Kind of native object created through the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeKind {
    Buffer,
    Image,
    ImageView,
    Sampler,
    Program,
    FrameBuffer,
    DownloadBuffer,
    Output,
}

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    Create(NativeKind, NativeHandle),
    Destroy(NativeKind, NativeHandle),
    CopyBufferFromStaging {
        buffer: NativeHandle,
        dst_offset: u64,
        size: u64,
    },
    CopyImageFromStaging {
        image: NativeHandle,
        region: ImageCopyRegion,
        size: u64,
    },
    Download {
        source: DownloadSource,
        size: u64,
        dst: NativeHandle,
    },
    Blit {
        src: NativeHandle,
        dst: NativeHandle,
        width: u32,
        height: u32,
    },
    BindFrameBuffer(NativeHandle),
    BindOutput(NativeHandle),
    UnbindFrameBuffer,
    ClearColor {
        attachment: u32,
        color: [f32; 4],
    },
    ClearDepthStencil {
        depth: Option<f32>,
        stencil: Option<u32>,
    },
    ClearImage {
        view: NativeHandle,
        color: [f32; 4],
    },
    ClearBuffer {
        buffer: ResolvedBufferView,
        value: u32,
    },
    SetState(StateCommand),
    BindProgram(NativeHandle),
    BindVertexBuffer {
        slot: u32,
        binding: Option<VertexBinding>,
    },
    BindIndexBuffer(Option<IndexBinding>),
    BindResource(ResourceBinding),
    Draw(DrawArgs),
    DrawIndexed(DrawIndexedArgs),
    Dispatch(u32, u32, u32),
    MemoryBarrier(BarrierScope),
    PushDebugGroup(String),
    PopDebugGroup,
    InsertFence(FenceId),
    WaitIdle,
}

impl BackendCall {
    /// Whether this call submits work (draw or dispatch).
    #[must_use]
    pub fn is_work(&self) -> bool {
        matches!(self, Self::Draw(_) | Self::DrawIndexed(_) | Self::Dispatch(..))
    }
}

/// In-memory backend for tests and tools.
#[derive(Debug)]
pub struct RecordingBackend {
    next_handle: u64,
    next_fence: u64,
    calls: Vec<BackendCall>,
    live: FxHashMap<NativeHandle, NativeKind>,
    buffers: FxHashMap<NativeHandle, Vec<u8>>,
    image_regions: FxHashMap<(NativeHandle, u32, u32), Vec<u8>>,
    image_views: FxHashMap<NativeHandle, NativeHandle>,
    signaled: FxHashSet<FenceId>,
    auto_signal: bool,
    fail_creation: bool,
    output_available: bool,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            next_fence: 1,
            calls: Vec::new(),
            live: FxHashMap::default(),
            buffers: FxHashMap::default(),
            image_regions: FxHashMap::default(),
            image_views: FxHashMap::default(),
            signaled: FxHashSet::default(),
            auto_signal: true,
            fail_creation: false,
            output_available: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Calls matching `filter`.
    pub fn calls_matching(&self, filter: impl Fn(&BackendCall) -> bool) -> Vec<&BackendCall> {
        self.calls.iter().filter(|c| filter(c)).collect()
    }

    /// Number of live native objects of `kind`.
    #[must_use]
    pub fn live_count(&self, kind: NativeKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    #[must_use]
    pub fn is_live(&self, handle: NativeHandle) -> bool {
        self.live.contains_key(&handle)
    }

    /// Current contents of a buffer.
    #[must_use]
    pub fn buffer_contents(&self, buffer: NativeHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Bytes last staged into `(mip, layer)` of an image.
    #[must_use]
    pub fn image_region(&self, image: NativeHandle, mip: u32, layer: u32) -> Option<&[u8]> {
        self.image_regions
            .get(&(image, mip, layer))
            .map(Vec::as_slice)
    }

    /// Controls whether fences signal as soon as they are inserted.
    pub fn set_auto_signal(&mut self, enabled: bool) {
        self.auto_signal = enabled;
    }

    /// Signals every fence inserted so far.
    pub fn signal_all(&mut self) {
        for fence in 1..self.next_fence {
            self.signaled.insert(FenceId(fence));
        }
    }

    /// Makes every following object creation fail.
    pub fn set_fail_creation(&mut self, fail: bool) {
        self.fail_creation = fail;
    }

    /// Controls whether outputs can be acquired.
    pub fn set_output_available(&mut self, available: bool) {
        self.output_available = available;
    }

    fn create(&mut self, kind: NativeKind) -> Result<NativeHandle> {
        if self.fail_creation {
            return Err(DeviceError::Backend(format!("{kind:?} creation failed")));
        }
        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        self.live.insert(handle, kind);
        self.calls.push(BackendCall::Create(kind, handle));
        Ok(handle)
    }

    fn destroy(&mut self, kind: NativeKind, handle: NativeHandle) {
        let removed = self.live.remove(&handle);
        debug_assert_eq!(removed, Some(kind), "destroying unknown {kind:?} {handle:?}");
        self.calls.push(BackendCall::Destroy(kind, handle));
    }
}

impl Backend for RecordingBackend {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<NativeHandle> {
        let handle = self.create(NativeKind::Buffer)?;
        self.buffers.insert(handle, vec![0; desc.size as usize]);
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: NativeHandle) {
        self.buffers.remove(&buffer);
        self.destroy(NativeKind::Buffer, buffer);
    }

    fn create_image(&mut self, _desc: &ImageDesc) -> Result<NativeHandle> {
        self.create(NativeKind::Image)
    }

    fn destroy_image(&mut self, image: NativeHandle) {
        self.image_regions.retain(|(owner, _, _), _| *owner != image);
        self.destroy(NativeKind::Image, image);
    }

    fn create_image_view(
        &mut self,
        image: NativeHandle,
        _image_desc: &ImageDesc,
        _view: &ImageViewDesc,
    ) -> Result<NativeHandle> {
        let handle = self.create(NativeKind::ImageView)?;
        self.image_views.insert(handle, image);
        Ok(handle)
    }

    fn destroy_image_view(&mut self, view: NativeHandle) {
        self.image_views.remove(&view);
        self.destroy(NativeKind::ImageView, view);
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> Result<NativeHandle> {
        self.create(NativeKind::Sampler)
    }

    fn destroy_sampler(&mut self, sampler: NativeHandle) {
        self.destroy(NativeKind::Sampler, sampler);
    }

    fn create_graphics_program(&mut self, _desc: &GraphicsPipelineDesc) -> Result<NativeHandle> {
        self.create(NativeKind::Program)
    }

    fn create_compute_program(&mut self, _desc: &ComputePipelineDesc) -> Result<NativeHandle> {
        self.create(NativeKind::Program)
    }

    fn destroy_program(&mut self, program: NativeHandle) {
        self.destroy(NativeKind::Program, program);
    }

    fn create_frame_buffer(&mut self, _desc: &FrameBufferDesc) -> Result<NativeHandle> {
        self.create(NativeKind::FrameBuffer)
    }

    fn destroy_frame_buffer(&mut self, frame_buffer: NativeHandle) {
        self.destroy(NativeKind::FrameBuffer, frame_buffer);
    }

    fn create_download_buffer(&mut self, size: u64) -> Result<NativeHandle> {
        let handle = self.create(NativeKind::DownloadBuffer)?;
        self.buffers.insert(handle, vec![0; size as usize]);
        Ok(handle)
    }

    fn destroy_download_buffer(&mut self, buffer: NativeHandle) {
        self.buffers.remove(&buffer);
        self.destroy(NativeKind::DownloadBuffer, buffer);
    }

    fn read_download_buffer(&mut self, buffer: NativeHandle, size: u64) -> Vec<u8> {
        self.buffers
            .get(&buffer)
            .map(|bytes| bytes[..(size as usize).min(bytes.len())].to_vec())
            .unwrap_or_default()
    }

    fn create_output(&mut self, _desc: &OutputDesc) -> Result<NativeHandle> {
        self.create(NativeKind::Output)
    }

    fn destroy_output(&mut self, output: NativeHandle) {
        self.destroy(NativeKind::Output, output);
    }

    fn copy_buffer_from_staging(&mut self, buffer: NativeHandle, dst_offset: u64, data: &[u8]) {
        if let Some(contents) = self.buffers.get_mut(&buffer) {
            let start = dst_offset as usize;
            let end = (start + data.len()).min(contents.len());
            if start < end {
                contents[start..end].copy_from_slice(&data[..end - start]);
            }
        }
        self.calls.push(BackendCall::CopyBufferFromStaging {
            buffer,
            dst_offset,
            size: data.len() as u64,
        });
    }

    fn copy_image_from_staging(
        &mut self,
        image: NativeHandle,
        region: &ImageCopyRegion,
        data: &[u8],
    ) {
        self.image_regions
            .insert((image, region.mip, region.layer), data.to_vec());
        self.calls.push(BackendCall::CopyImageFromStaging {
            image,
            region: *region,
            size: data.len() as u64,
        });
    }

    fn download(&mut self, source: &DownloadSource, size: u64, dst: NativeHandle) {
        let bytes = match *source {
            DownloadSource::Buffer { buffer, offset } => self.buffers.get(&buffer).map(|b| {
                let start = (offset as usize).min(b.len());
                let end = (start + size as usize).min(b.len());
                b[start..end].to_vec()
            }),
            DownloadSource::Image {
                image, mip, layer, ..
            } => self.image_regions.get(&(image, mip, layer)).cloned(),
        };

        if let (Some(bytes), Some(target)) = (bytes, self.buffers.get_mut(&dst)) {
            let len = bytes.len().min(target.len());
            target[..len].copy_from_slice(&bytes[..len]);
        }
        self.calls.push(BackendCall::Download {
            source: *source,
            size,
            dst,
        });
    }

    fn blit(&mut self, src: NativeHandle, dst: NativeHandle, width: u32, height: u32) {
        self.calls.push(BackendCall::Blit {
            src,
            dst,
            width,
            height,
        });
    }

    fn bind_frame_buffer(&mut self, frame_buffer: NativeHandle) {
        self.calls.push(BackendCall::BindFrameBuffer(frame_buffer));
    }

    fn bind_output(&mut self, output: NativeHandle) -> bool {
        if !self.output_available {
            return false;
        }
        self.calls.push(BackendCall::BindOutput(output));
        true
    }

    fn unbind_frame_buffer(&mut self) {
        self.calls.push(BackendCall::UnbindFrameBuffer);
    }

    fn clear_color(&mut self, attachment: u32, color: [f32; 4]) {
        self.calls.push(BackendCall::ClearColor { attachment, color });
    }

    fn clear_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<u32>) {
        self.calls
            .push(BackendCall::ClearDepthStencil { depth, stencil });
    }

    fn clear_image(&mut self, view: &ResolvedImageView, color: [f32; 4]) {
        self.calls.push(BackendCall::ClearImage {
            view: view.view,
            color,
        });
    }

    fn clear_buffer(&mut self, buffer: &ResolvedBufferView, value: u32) {
        if let Some(contents) = self.buffers.get_mut(&buffer.buffer) {
            let pattern = value.to_le_bytes();
            let start = (buffer.offset as usize).min(contents.len());
            let end = (start + buffer.size as usize).min(contents.len());
            for (i, byte) in contents[start..end].iter_mut().enumerate() {
                *byte = pattern[i % 4];
            }
        }
        self.calls.push(BackendCall::ClearBuffer {
            buffer: *buffer,
            value,
        });
    }

    fn set_state(&mut self, command: &StateCommand) {
        self.calls.push(BackendCall::SetState(*command));
    }

    fn bind_program(&mut self, program: NativeHandle) {
        self.calls.push(BackendCall::BindProgram(program));
    }

    fn bind_vertex_buffer(&mut self, slot: u32, binding: Option<VertexBinding>) {
        self.calls
            .push(BackendCall::BindVertexBuffer { slot, binding });
    }

    fn bind_index_buffer(&mut self, binding: Option<IndexBinding>) {
        self.calls.push(BackendCall::BindIndexBuffer(binding));
    }

    fn bind_resource(&mut self, binding: &ResourceBinding) {
        self.calls.push(BackendCall::BindResource(*binding));
    }

    fn draw(&mut self, args: &DrawArgs) {
        self.calls.push(BackendCall::Draw(*args));
    }

    fn draw_indexed(&mut self, args: &DrawIndexedArgs) {
        self.calls.push(BackendCall::DrawIndexed(*args));
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.calls.push(BackendCall::Dispatch(x, y, z));
    }

    fn memory_barrier(&mut self, scope: BarrierScope) {
        self.calls.push(BackendCall::MemoryBarrier(scope));
    }

    fn push_debug_group(&mut self, label: &str) {
        self.calls.push(BackendCall::PushDebugGroup(label.to_owned()));
    }

    fn pop_debug_group(&mut self) {
        self.calls.push(BackendCall::PopDebugGroup);
    }

    fn insert_fence(&mut self) -> FenceId {
        let fence = FenceId(self.next_fence);
        self.next_fence += 1;
        if self.auto_signal {
            self.signaled.insert(fence);
        }
        self.calls.push(BackendCall::InsertFence(fence));
        fence
    }

    fn is_fence_signaled(&mut self, fence: FenceId) -> bool {
        self.signaled.contains(&fence)
    }

    fn wait_idle(&mut self) {
        self.signal_all();
        self.calls.push(BackendCall::WaitIdle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_staging_and_download() {
        let mut backend = RecordingBackend::new();
        let buffer = backend
            .create_buffer(&BufferDesc::new("b", 8, wgpu::BufferUsages::COPY_DST))
            .unwrap();
        backend.copy_buffer_from_staging(buffer, 2, &[1, 2, 3]);
        assert_eq!(backend.buffer_contents(buffer), Some(&[0, 0, 1, 2, 3, 0, 0, 0][..]));

        let download = backend.create_download_buffer(4).unwrap();
        backend.download(&DownloadSource::Buffer { buffer, offset: 2 }, 4, download);
        assert_eq!(backend.read_download_buffer(download, 4), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_fences_auto_signal() {
        let mut backend = RecordingBackend::new();
        let a = backend.insert_fence();
        assert!(backend.is_fence_signaled(a));

        backend.set_auto_signal(false);
        let b = backend.insert_fence();
        assert!(!backend.is_fence_signaled(b));
        backend.wait_idle();
        assert!(backend.is_fence_signaled(b));
    }

    #[test]
    fn test_live_tracking() {
        let mut backend = RecordingBackend::new();
        let s = backend.create_sampler(&SamplerDesc::default()).unwrap();
        assert_eq!(backend.live_count(NativeKind::Sampler), 1);
        backend.destroy_sampler(s);
        assert_eq!(backend.live_count(NativeKind::Sampler), 0);

        backend.set_fail_creation(true);
        assert!(backend.create_sampler(&SamplerDesc::default()).is_err());
    }
}
