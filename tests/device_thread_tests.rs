//! Device Thread Tests
//!
//! Tests for:
//! - Configuration validation and backend creation failures
//! - Deletion requests from other threads, deferred to frame retirement
//! - Frames in flight and `wait_idle`
//! - Upload followed by a download of the same buffer
//! - Shutdown with open and closed outputs

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use myth_device::backend::recording::{NativeKind, RecordingBackend};
use myth_device::command::{CommandWriter, DownloadSink};
use myth_device::copy::{CopyRange, MemorySource};
use myth_device::object::{BufferDesc, OutputDesc};
use myth_device::{DeviceConfig, DeviceError, DeviceObject, DeviceThread};

fn config() -> DeviceConfig {
    DeviceConfig {
        object_capacity: 64,
        staging_pool_size: 1 << 20,
        copy_worker_threads: 1,
        stop_poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

fn device() -> DeviceThread<RecordingBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    DeviceThread::new(config(), RecordingBackend::new()).expect("valid config")
}

fn idle() -> myth_device::CommandStream {
    CommandWriter::new("idle").finish()
}

fn window() -> OutputDesc {
    OutputDesc {
        label: "window".into(),
        width: 800,
        height: 600,
        format: wgpu::TextureFormat::Bgra8Unorm,
    }
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn invalid_configuration_is_rejected() {
    let bad = DeviceConfig {
        staging_page_size: 3000,
        ..config()
    };
    assert!(matches!(
        DeviceThread::new(bad, RecordingBackend::new()),
        Err(DeviceError::InvalidConfig(_))
    ));

    let bad = DeviceConfig {
        copy_worker_threads: 0,
        ..config()
    };
    assert!(DeviceThread::new(bad, RecordingBackend::new()).is_err());
}

#[test]
fn backend_failure_registers_nothing() -> anyhow::Result<()> {
    let mut device = device();
    device.backend_mut().set_fail_creation(true);

    let result = device.create_buffer(BufferDesc::new("vb", 64, wgpu::BufferUsages::VERTEX));
    assert!(matches!(result, Err(DeviceError::Backend(_))));
    assert_eq!(device.live_objects(), 0);

    device.backend_mut().set_fail_creation(false);
    let buffer = device.create_buffer(BufferDesc::new("vb", 64, wgpu::BufferUsages::VERTEX))?;
    assert!(device.resolve(buffer.handle(), None).is_some());
    assert_eq!(device.live_objects(), 1);
    Ok(())
}

// ============================================================================
// Deletion and frames
// ============================================================================

#[test]
fn deletion_requested_from_another_thread() -> anyhow::Result<()> {
    let mut device = device();
    let buffer = device.create_buffer(BufferDesc::new("ib", 256, wgpu::BufferUsages::INDEX))?;
    let id = buffer.handle();
    drop(buffer);

    let registry = Arc::clone(device.registry());
    let requested = std::thread::spawn(move || registry.request_deletion(id))
        .join()
        .expect("requesting thread");
    assert!(requested);

    let report = device.run_frame(&idle());
    assert_eq!(report.deletions, 1);
    assert_eq!(device.live_objects(), 0);
    assert!(device.resolve(id, None).is_none());
    assert_eq!(device.backend().live_count(NativeKind::Buffer), 0);
    Ok(())
}

#[test]
fn unsignaled_frames_stay_in_flight_until_wait_idle() -> anyhow::Result<()> {
    let mut device = device();
    device.backend_mut().set_auto_signal(false);
    let buffer = device.create_buffer(BufferDesc::new("ub", 64, wgpu::BufferUsages::UNIFORM))?;
    device.release_object(buffer.handle());
    let native = buffer.native();
    drop(buffer);

    for expected in 0..3 {
        let report = device.run_frame(&idle());
        assert_eq!(report.frame_index, expected);
        assert_eq!(report.retired, 0);
    }
    assert_eq!(device.frames_in_flight(), 3);
    assert!(device.backend().is_live(native));

    assert_eq!(device.wait_idle(), 3);
    assert_eq!(device.frames_in_flight(), 0);
    assert!(!device.backend().is_live(native));
    assert_eq!(device.frame_index(), 3);
    Ok(())
}

// ============================================================================
// Upload then download
// ============================================================================

struct Capture(Mutex<Option<Vec<u8>>>);

impl DownloadSink for Capture {
    fn on_complete(&self, data: Option<&[u8]>) {
        *self.0.lock() = data.map(<[u8]>::to_vec);
    }
}

#[test]
fn uploaded_bytes_read_back_unchanged() -> anyhow::Result<()> {
    let mut device = device();
    let buffer = device.create_buffer(BufferDesc::new(
        "particles",
        512,
        wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
    ))?;
    let data: Vec<u8> = (0..=255u8).cycle().take(512).collect();
    let source = MemorySource::new("particles", data.clone());
    device.schedule_upload(buffer.handle(), CopyRange::buffer(0, 512), source.clone())?;

    let deadline = Instant::now() + Duration::from_secs(2);
    while source.outcome().is_none() {
        assert!(Instant::now() < deadline, "upload never applied");
        device.run_frame(&idle());
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(source.outcome(), Some(true));

    let sink = Arc::new(Capture(Mutex::new(None)));
    let mut w = CommandWriter::new("readback");
    w.download(buffer.handle(), sink.clone());
    let report = device.run_frame(&w.finish());

    assert_eq!(report.execution.downloads, 1);
    assert_eq!(sink.0.lock().as_deref(), Some(&data[..]));
    Ok(())
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn closed_output_is_destroyed_at_shutdown() -> anyhow::Result<()> {
    let mut device = device();
    let open = device.create_output(window())?;
    let closed = device.create_output(window())?;
    assert!(device.close_output(closed.handle()));
    assert!(!device.release_object(open.handle()));

    device.shutdown();
    assert!(device.is_shut_down());
    assert!(!device.backend().is_live(closed.native()));
    assert!(device.backend().is_live(open.native()));
    assert_eq!(device.live_objects(), 1);

    // a second shutdown changes nothing
    device.shutdown();
    assert_eq!(device.live_objects(), 1);
    Ok(())
}
