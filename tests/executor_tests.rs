//! Frame Executor Tests
//!
//! Tests for:
//! - Minimal state traffic: one call per changed field, none for repeats
//! - Dynamic state winning over pipeline static state within a pass
//! - Pass-end restore of touched state (render rects excluded)
//! - Output passes and unavailable surfaces
//! - Resolve and dispatch legality
//! - Dynamic state flushed ahead of a dispatch

use std::sync::Arc;

use myth_device::backend::recording::{BackendCall, RecordingBackend};
use myth_device::command::CommandWriter;
use myth_device::object::{
    ComputePipeline, ComputePipelineDesc, GraphicsPipeline, GraphicsPipelineDesc, ImageDesc,
    ImageViewDesc, OutputDesc, ShaderDesc, VertexLayout,
};
use myth_device::state::{ScissorRect, StateCommand, Viewport};
use myth_device::{DeviceConfig, DeviceObject, DeviceThread, ObjectId, ObjectType, RenderStates};

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

fn target(device: &mut DeviceThread<RecordingBackend>, samples: u32) -> ObjectId {
    let desc = ImageDesc::new_2d(
        "target",
        32,
        32,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::RENDER_ATTACHMENT,
    )
    .with_samples(samples);
    let image = device.create_image(desc).expect("image");
    device
        .create_image_view(
            image.handle(),
            ObjectType::RenderTargetView,
            ImageViewDesc::single(0, 0),
        )
        .expect("view")
        .handle()
}

/// Pipeline without vertex input, so draws need nothing but the pass.
fn pipeline(
    device: &mut DeviceThread<RecordingBackend>,
    states: RenderStates,
) -> Arc<GraphicsPipeline> {
    device
        .create_graphics_pipeline(GraphicsPipelineDesc {
            label: "fullscreen".into(),
            vertex: ShaderDesc::wgsl("vs", "", "main"),
            fragment: Some(ShaderDesc::wgsl("fs", "", "main")),
            vertex_layout: VertexLayout::default(),
            descriptor_layouts: Vec::new(),
            states,
        })
        .expect("pipeline")
}

fn compute(device: &mut DeviceThread<RecordingBackend>) -> Arc<ComputePipeline> {
    device
        .create_compute_pipeline(ComputePipelineDesc {
            label: "blur".into(),
            shader: ShaderDesc::wgsl("cs", "", "main"),
            descriptor_layouts: Vec::new(),
        })
        .expect("compute pipeline")
}

/// Calls recorded inside the first pass of the last frame.
fn pass_calls(device: &DeviceThread<RecordingBackend>) -> Vec<BackendCall> {
    device
        .backend()
        .calls()
        .iter()
        .skip_while(|c| !matches!(c, BackendCall::BindFrameBuffer(_) | BackendCall::BindOutput(_)))
        .take_while(|c| !matches!(c, BackendCall::UnbindFrameBuffer))
        .cloned()
        .collect()
}

fn state_calls(calls: &[BackendCall]) -> Vec<StateCommand> {
    calls
        .iter()
        .filter_map(|c| match c {
            BackendCall::SetState(s) => Some(*s),
            _ => None,
        })
        .collect()
}

fn quarter_pass(view: ObjectId, pipeline: ObjectId) -> CommandWriter {
    let mut w = CommandWriter::new("quarter");
    w.begin_pass_views(&[view], None)
        .set_viewport(0, Viewport::new(0.0, 0.0, 16.0, 16.0))
        .set_scissor(0, ScissorRect::new(0, 0, 16, 16))
        .draw(pipeline, 3, 1)
        .end_pass();
    w
}

// ============================================================================
// State traffic
// ============================================================================

#[test]
fn viewport_and_scissor_are_issued_once() {
    let mut device = device();
    let view = target(&mut device, 1);
    let pipeline = pipeline(&mut device, RenderStates::default());
    let stream = quarter_pass(view, pipeline.handle()).finish();

    device.backend_mut().clear_calls();
    let report = device.run_frame(&stream);
    assert_eq!(report.execution.draws, 1);

    let calls = pass_calls(&device);
    let states = state_calls(&calls);
    assert_eq!(
        states,
        vec![
            StateCommand::Viewport {
                index: 0,
                viewport: Viewport::new(0.0, 0.0, 16.0, 16.0)
            },
            StateCommand::Scissor {
                index: 0,
                rect: ScissorRect::new(0, 0, 16, 16)
            },
        ]
    );

    // nothing between the draw and the end of the pass
    let draw = calls
        .iter()
        .position(|c| matches!(c, BackendCall::Draw(_)))
        .expect("draw recorded");
    assert!(state_calls(&calls[draw..]).is_empty());
}

#[test]
fn repeated_frame_issues_no_state() {
    let mut device = device();
    let view = target(&mut device, 1);
    let pipeline = pipeline(&mut device, RenderStates::default());
    let stream = quarter_pass(view, pipeline.handle()).finish();

    device.run_frame(&stream);
    device.backend_mut().clear_calls();
    let report = device.run_frame(&stream);

    assert_eq!(report.execution.draws, 1);
    assert_eq!(report.execution.state_commands, 0);
    assert!(state_calls(device.backend().calls()).is_empty());
}

#[test]
fn second_draw_with_same_state_is_bare() {
    let mut device = device();
    let view = target(&mut device, 1);
    let mut states = RenderStates::default();
    states.depth_enabled = true;
    let pipeline = pipeline(&mut device, states);

    let mut w = CommandWriter::new("twice");
    w.begin_pass_views(&[view], None)
        .draw(pipeline.handle(), 3, 1)
        .draw(pipeline.handle(), 3, 1)
        .end_pass();

    device.backend_mut().clear_calls();
    device.run_frame(&w.finish());

    let calls = pass_calls(&device);
    let draws: Vec<_> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, BackendCall::Draw(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(draws.len(), 2);
    assert!(state_calls(&calls[draws[0]..draws[1]]).is_empty());
    assert!(state_calls(&calls[..draws[0]]).contains(&StateCommand::DepthEnabled(true)));
}

#[test]
fn dynamic_state_beats_pipeline_state() {
    let mut device = device();
    let view = target(&mut device, 1);
    let mut states = RenderStates::default();
    states.cull_enabled = true;
    let pipeline = pipeline(&mut device, states);

    // culling is already off, the request only pins it for the pass
    let mut w = CommandWriter::new("two-sided");
    w.begin_pass_views(&[view], None)
        .set_cull(false, wgpu::Face::Back, wgpu::FrontFace::Ccw)
        .draw(pipeline.handle(), 3, 1)
        .end_pass();

    device.backend_mut().clear_calls();
    device.run_frame(&w.finish());
    assert!(!state_calls(device.backend().calls()).contains(&StateCommand::CullEnabled(true)));
}

#[test]
fn pass_end_restores_touched_state() {
    let mut device = device();
    let view = target(&mut device, 1);
    let mut states = RenderStates::default();
    states.cull_enabled = true;
    let pipeline = pipeline(&mut device, states);

    let mut w = CommandWriter::new("culled");
    w.begin_pass_views(&[view], None)
        .draw(pipeline.handle(), 3, 1)
        .end_pass();

    device.backend_mut().clear_calls();
    device.run_frame(&w.finish());

    let calls = pass_calls(&device);
    let draw = calls
        .iter()
        .position(|c| matches!(c, BackendCall::Draw(_)))
        .expect("draw recorded");
    assert!(state_calls(&calls[..draw]).contains(&StateCommand::CullEnabled(true)));
    assert_eq!(
        state_calls(&calls[draw..]),
        vec![StateCommand::CullEnabled(false)]
    );
}

// ============================================================================
// Outputs
// ============================================================================

#[test]
fn output_pass_follows_surface_availability() {
    let mut device = device();
    let pipeline = pipeline(&mut device, RenderStates::default());
    let output = device
        .create_output(OutputDesc {
            label: "window".into(),
            width: 640,
            height: 480,
            format: wgpu::TextureFormat::Bgra8Unorm,
        })
        .expect("output");

    let mut w = CommandWriter::new("present");
    w.begin_pass_output(output.handle())
        .clear_pass_color(0, [0.1, 0.2, 0.3, 1.0])
        .draw(pipeline.handle(), 3, 1)
        .end_pass();
    let stream = w.finish();

    let report = device.run_frame(&stream);
    assert_eq!(report.execution.passes, 1);
    assert_eq!(report.execution.draws, 1);

    device.backend_mut().set_output_available(false);
    device.backend_mut().clear_calls();
    let report = device.run_frame(&stream);
    assert_eq!(report.execution.invalid_passes, 1);
    assert_eq!(report.execution.draws, 0);
    assert!(!device.backend().calls().iter().any(BackendCall::is_work));

    // a closed output stays invalid even with a surface
    device.backend_mut().set_output_available(true);
    assert!(device.close_output(output.handle()));
    let report = device.run_frame(&stream);
    assert_eq!(report.execution.draws, 0);
}

// ============================================================================
// Resolve and dispatch
// ============================================================================

#[test]
fn resolve_blits_outside_a_pass_only() {
    let mut device = device();
    let msaa = target(&mut device, 4);
    let single = target(&mut device, 1);

    let mut w = CommandWriter::new("resolve");
    w.resolve(msaa, single);
    device.backend_mut().clear_calls();
    let report = device.run_frame(&w.finish());
    assert_eq!(report.execution.skipped, 0);
    assert_eq!(
        device
            .backend()
            .calls_matching(|c| matches!(c, BackendCall::Blit { width: 32, height: 32, .. }))
            .len(),
        1
    );

    let mut w = CommandWriter::new("resolve-in-pass");
    w.begin_pass_views(&[single], None)
        .resolve(msaa, single)
        .end_pass();
    device.backend_mut().clear_calls();
    let report = device.run_frame(&w.finish());
    assert_eq!(report.execution.skipped, 1);
    assert!(
        device
            .backend()
            .calls_matching(|c| matches!(c, BackendCall::Blit { .. }))
            .is_empty()
    );

    // multisampled destinations are refused
    let mut w = CommandWriter::new("resolve-to-msaa");
    w.resolve(single, msaa);
    let report = device.run_frame(&w.finish());
    assert_eq!(report.execution.skipped, 1);
}

#[test]
fn dispatch_runs_outside_passes_and_skips_empty_grids() {
    let mut device = device();
    let compute = compute(&mut device);

    let mut w = CommandWriter::new("compute");
    w.dispatch(compute.handle(), 8, 8, 1)
        .dispatch(compute.handle(), 0, 4, 1);
    device.backend_mut().clear_calls();
    let report = device.run_frame(&w.finish());

    assert_eq!(report.execution.dispatches, 1);
    assert_eq!(report.execution.skipped, 0);
    assert_eq!(
        device
            .backend()
            .calls_matching(|c| matches!(c, BackendCall::Dispatch(..)))
            .len(),
        1
    );
    assert!(device.backend().calls().contains(&BackendCall::Dispatch(8, 8, 1)));
}

#[test]
fn dispatch_flushes_pending_state_first() {
    let mut device = device();
    let view = target(&mut device, 1);
    let compute = compute(&mut device);

    let mut w = CommandWriter::new("tinted-compute");
    w.begin_pass_views(&[view], None)
        .set_blend_color([1.0, 0.0, 0.0, 1.0])
        .dispatch(compute.handle(), 1, 1, 1)
        .end_pass();
    device.backend_mut().clear_calls();
    let report = device.run_frame(&w.finish());
    assert_eq!(report.execution.dispatches, 1);

    let calls = device.backend().calls();
    let dispatch = calls
        .iter()
        .position(|c| matches!(c, BackendCall::Dispatch(..)))
        .expect("dispatch recorded");
    let red = StateCommand::BlendColor([1.0, 0.0, 0.0, 1.0]);
    assert!(state_calls(&calls[..dispatch]).contains(&red));
}
