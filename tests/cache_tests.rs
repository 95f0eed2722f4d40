//! Derived Object Cache Tests
//!
//! Tests for:
//! - DerivedCache: one build per key, back-edge invalidation, exactly-once release
//! - ObjectCache through the device thread: frame buffers shared across frames
//!   and destroyed together with one of their attachments
//! - Download areas recycled after their frame retires

use std::sync::Arc;

use parking_lot::Mutex;

use myth_device::backend::recording::{NativeKind, RecordingBackend};
use myth_device::cache::DerivedCache;
use myth_device::command::{CommandWriter, DownloadSink};
use myth_device::object::{BufferDesc, ImageDesc, ImageViewDesc};
use myth_device::{DeviceConfig, DeviceObject, DeviceThread, ObjectId, ObjectType};

fn device() -> DeviceThread<RecordingBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = DeviceConfig {
        object_capacity: 64,
        staging_pool_size: 1 << 20,
        copy_worker_threads: 1,
        ..Default::default()
    };
    DeviceThread::new(config, RecordingBackend::new()).expect("valid config")
}

fn render_target(
    device: &mut DeviceThread<RecordingBackend>,
    label: &'static str) -> (ObjectId, ObjectId,
) {
    let image = device
        .create_image(ImageDesc::new_2d(
            label,
            32,
            32,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        ))
        .expect("image");
    let view = device
        .create_image_view(
            image.handle(),
            ObjectType::RenderTargetView,
            ImageViewDesc::single(0, 0),
        )
        .expect("view");
    (image.handle(), view.handle())
}

/// Three images, so that ids are real registry handles.
fn three_ids() -> (DeviceThread<RecordingBackend>, [ObjectId; 3]) {
    let mut device = device();
    let ids = [0, 1, 2].map(|_| {
        device
            .create_buffer(BufferDesc::new("src", 16, wgpu::BufferUsages::VERTEX))
            .expect("buffer")
            .handle()
    });
    (device, ids)
}

// ============================================================================
// DerivedCache
// ============================================================================

#[test]
fn equal_keys_build_once_and_share_the_value() {
    let (_device, [i1, i2, _]) = three_ids();
    let mut cache: DerivedCache<(ObjectId, ObjectId), Arc<str>> = DerivedCache::new("attachments");
    let mut builds = 0;

    let first = cache
        .get_or_build(&(i1, i2), &[i1, i2], |_| {
            builds += 1;
            Some(Arc::from("fb"))
        })
        .expect("built");
    let second = cache
        .get_or_build(&(i1, i2), &[i1, i2], |_| {
            builds += 1;
            Some(Arc::from("other"))
        })
        .expect("cached");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(builds, 1);
    assert_eq!(cache.build_count(), 1);
}

#[test]
fn destroying_a_source_releases_every_dependent_once() {
    let (_device, [i1, i2, i3]) = three_ids();
    let mut cache: DerivedCache<Vec<ObjectId>, u32> = DerivedCache::new("attachments");

    cache.get_or_build(&vec![i1, i2], &[i1, i2], |_| Some(1));
    cache.get_or_build(&vec![i1, i3], &[i1, i3], |_| Some(2));
    cache.get_or_build(&vec![i2, i3], &[i2, i3], |_| Some(3));
    assert_eq!(cache.dependents_of(i1), 2);

    let mut released = Vec::new();
    assert_eq!(cache.invalidate(i1, |_, v| released.push(v)), 2);
    released.sort_unstable();
    assert_eq!(released, vec![1, 2]);

    assert!(!cache.contains(&vec![i1, i2]));
    assert!(cache.contains(&vec![i2, i3]));
    // back-edges of removed entries are gone from the other sources too
    assert_eq!(cache.dependents_of(i2), 1);
    assert_eq!(cache.dependents_of(i3), 1);

    // a second notification for the same source is a no-op
    assert_eq!(cache.invalidate(i1, |_, v| released.push(v)), 0);
    assert_eq!(released.len(), 2);
}

// ============================================================================
// ObjectCache via the device thread
// ============================================================================

#[test]
fn frame_buffer_is_reused_and_dies_with_its_attachment() {
    let mut device = device();
    let (image1, view1) = render_target(&mut device, "i1");
    let (_image2, view2) = render_target(&mut device, "i2");

    let mut w = CommandWriter::new("pass");
    w.begin_pass_views(&[view1, view2], None)
        .clear_pass_color(0, [0.0, 0.0, 0.0, 1.0])
        .end_pass();
    let stream = w.finish();

    device.run_frame(&stream);
    device.run_frame(&stream);
    assert_eq!(device.cache().frame_buffer_builds(), 1);
    assert_eq!(device.cache().frame_buffer_count(), 1);
    assert_eq!(device.backend().live_count(NativeKind::FrameBuffer), 1);

    assert!(device.release_object(image1));
    device.run_frame(&CommandWriter::new("idle").finish());

    assert_eq!(device.cache().frame_buffer_count(), 0);
    assert_eq!(device.backend().live_count(NativeKind::FrameBuffer), 0);

    // the view survives its image but the pass is now invalid
    let report = device.run_frame(&stream);
    assert_eq!(report.execution.invalid_passes, 1);
    assert!(device.resolve(view1, None).is_some());
}

struct Count(Mutex<Vec<usize>>);

impl DownloadSink for Count {
    fn on_complete(&self, data: Option<&[u8]>) {
        self.0.lock().push(data.map_or(0, <[u8]>::len));
    }
}

#[test]
fn download_areas_are_recycled() {
    let mut device = device();
    let buffer = device
        .create_buffer(BufferDesc::new("readback", 1000, wgpu::BufferUsages::COPY_SRC))
        .expect("buffer");
    let sink = Arc::new(Count(Mutex::new(Vec::new())));

    let mut w = CommandWriter::new("readback");
    w.download(buffer.handle(), sink.clone());
    let stream = w.finish();

    for _ in 0..3 {
        device.run_frame(&stream);
    }

    assert_eq!(*sink.0.lock(), vec![1000, 1000, 1000]);
    assert_eq!(device.backend().live_count(NativeKind::DownloadBuffer), 1);
    assert_eq!(device.cache().downloads().in_use_count(), 0);
}
