//! Device-thread object cache: frame buffers, samplers and download areas.

use log::warn;
use smallvec::SmallVec;

use super::derived::DerivedCache;
use super::download::{DownloadArea, DownloadAreaPool};
use crate::backend::{Backend, FrameBufferDesc, NativeHandle};
use crate::config::DeviceConfig;
use crate::object::{ObjectId, SamplerDesc};

/// Identity of a frame buffer: the attachment views it is built from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FrameBufferKey {
    pub colors: SmallVec<[ObjectId; 8]>,
    pub depth_stencil: Option<ObjectId>,
}

impl FrameBufferKey {
    #[must_use]
    pub fn new(colors: &[ObjectId], depth_stencil: Option<ObjectId>) -> Self {
        Self {
            colors: colors.iter().copied().collect(),
            depth_stencil,
        }
    }
}

pub struct ObjectCache {
    frame_buffers: DerivedCache<FrameBufferKey, NativeHandle>,
    samplers: DerivedCache<SamplerDesc, NativeHandle>,
    downloads: DownloadAreaPool,
}

impl ObjectCache {
    #[must_use]
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            frame_buffers: DerivedCache::new("frame buffer cache"),
            samplers: DerivedCache::new("sampler cache"),
            downloads: DownloadAreaPool::new(config),
        }
    }

    #[inline]
    #[must_use]
    pub fn frame_buffer_count(&self) -> usize {
        self.frame_buffers.len()
    }

    #[inline]
    #[must_use]
    pub fn frame_buffer_builds(&self) -> u64 {
        self.frame_buffers.build_count()
    }

    #[inline]
    #[must_use]
    pub fn sampler_count(&self) -> usize {
        self.samplers.len()
    }

    #[inline]
    #[must_use]
    pub fn downloads(&self) -> &DownloadAreaPool {
        &self.downloads
    }

    /// Returns the frame buffer for `key`, creating it from `desc` on a miss.
    /// `sources` lists every view and image the frame buffer depends on.
    pub fn frame_buffer(
        &mut self,
        backend: &mut dyn Backend,
        key: &FrameBufferKey,
        sources: &[ObjectId],
        desc: &FrameBufferDesc,
    ) -> Option<NativeHandle> {
        self.frame_buffers.get_or_build(key, sources, |_| {
            backend
                .create_frame_buffer(desc)
                .inspect_err(|err| warn!("Frame buffer for {key:?} unavailable: {err}"))
                .ok()
        })
    }

    /// Returns the shared native sampler for `desc`.
    pub fn sampler(
        &mut self,
        backend: &mut dyn Backend,
        desc: &SamplerDesc,
    ) -> Option<NativeHandle> {
        self.samplers.get_or_build(desc, &[], |desc| {
            backend
                .create_sampler(desc)
                .inspect_err(|err| warn!("Sampler unavailable: {err}"))
                .ok()
        })
    }

    pub fn acquire_download_area(
        &mut self,
        backend: &mut dyn Backend,
        size: u64,
    ) -> Option<DownloadArea> {
        self.downloads.acquire(backend, size)
    }

    pub fn release_download_area(&mut self, backend: &mut dyn Backend, area: DownloadArea) {
        self.downloads.release(backend, area);
    }

    /// Ages idle download areas; called once per retired frame.
    pub fn trim(&mut self, backend: &mut dyn Backend, max_idle_frames: u32) {
        self.downloads.trim(backend, max_idle_frames);
    }

    /// Drops every cached object built from `id`. Returns how many were
    /// destroyed.
    pub fn on_object_destroyed(&mut self, backend: &mut dyn Backend, id: ObjectId) -> usize {
        self.frame_buffers
            .invalidate(id, |_, frame_buffer| backend.destroy_frame_buffer(frame_buffer))
    }

    /// Destroys everything the cache holds.
    pub fn clear(&mut self, backend: &mut dyn Backend) {
        self.frame_buffers
            .clear(|_, frame_buffer| backend.destroy_frame_buffer(frame_buffer));
        self.samplers.clear(|_, sampler| backend.destroy_sampler(sampler));
        self.downloads.clear(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{NativeKind, RecordingBackend};

    fn fb_desc() -> FrameBufferDesc {
        FrameBufferDesc {
            colors: SmallVec::from_slice(&[NativeHandle(100)]),
            depth_stencil: None,
            width: 64,
            height: 64,
        }
    }

    #[test]
    fn test_samplers_are_shared() {
        let mut backend = RecordingBackend::new();
        let mut cache = ObjectCache::new(&DeviceConfig::default());

        let a = cache.sampler(&mut backend, &SamplerDesc::linear()).unwrap();
        let b = cache.sampler(&mut backend, &SamplerDesc::linear()).unwrap();
        let c = cache.sampler(&mut backend, &SamplerDesc::default()).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(backend.live_count(NativeKind::Sampler), 2);
    }

    #[test]
    fn test_frame_buffer_destroyed_with_attachment() {
        let mut backend = RecordingBackend::new();
        let mut cache = ObjectCache::new(&DeviceConfig::default());
        let view = ObjectId::new(1, 1);
        let image = ObjectId::new(2, 2);
        let key = FrameBufferKey::new(&[view], None);

        let fb = cache
            .frame_buffer(&mut backend, &key, &[view, image], &fb_desc())
            .unwrap();
        assert!(backend.is_live(fb));

        assert_eq!(cache.on_object_destroyed(&mut backend, image), 1);
        assert!(!backend.is_live(fb));
        assert_eq!(cache.frame_buffer_count(), 0);
    }

    #[test]
    fn test_clear_destroys_everything() {
        let mut backend = RecordingBackend::new();
        let mut cache = ObjectCache::new(&DeviceConfig::default());
        let key = FrameBufferKey::new(&[ObjectId::new(1, 1)], None);

        cache.frame_buffer(&mut backend, &key, &[], &fb_desc());
        cache.sampler(&mut backend, &SamplerDesc::linear());
        let area = cache.acquire_download_area(&mut backend, 16).unwrap();
        cache.release_download_area(&mut backend, area);

        cache.clear(&mut backend);
        assert_eq!(backend.live_count(NativeKind::FrameBuffer), 0);
        assert_eq!(backend.live_count(NativeKind::Sampler), 0);
        assert_eq!(backend.live_count(NativeKind::DownloadBuffer), 0);
    }
}
