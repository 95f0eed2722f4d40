//! Render state tracker.
//!
//! # Overview
//!
//! [`StateTracker`] sits between the executor and the backend. Dynamic
//! state opcodes and pipeline binds write into the *requested* snapshot and
//! mark the touched fields dirty. Nothing reaches the backend until
//! [`flush`](StateTracker::flush), which runs right before a draw or dispatch
//! and at pass end.
//!
//! ```text
//!   set_viewport / set_depth_state / merge_pipeline ...
//!                     │ mark dirty
//!                     ▼
//!   requested ──── flush() ──── dirty ∩ diff(applied, requested) ───▶ Backend
//!                     │
//!                     ▼
//!                  applied = requested
//! ```
//!
//! # Design
//!
//! - A flush emits only the fields that are both dirty and different from
//!   what the backend already has, so re-requesting the current state costs
//!   nothing.
//! - Fields set by dynamic opcodes during a pass win over the static state
//!   of pipelines bound later in the same pass.
//! - Everything touched during a pass is restored to the default snapshot at
//!   pass end, except the pass-scoped viewport and scissor rectangles which
//!   the next pass begin re-seeds anyway.

use super::bits::{DirtyStates, StateBits};
use super::values::{
    BlendEquation, BlendFunc, DepthBias, DepthRange, MAX_COLOR_TARGETS, MAX_VIEWPORTS,
    RenderStates, ScissorRect, StencilFaceState, StencilFunc, StencilOps, StateCommand, Viewport,
};
use crate::backend::Backend;

/// Which stencil faces a stencil opcode applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilFaces {
    Front,
    Back,
    Both,
}

impl StencilFaces {
    fn front(self) -> bool {
        matches!(self, Self::Front | Self::Both)
    }

    fn back(self) -> bool {
        matches!(self, Self::Back | Self::Both)
    }

    fn select(self, front: StateBits, back: StateBits) -> StateBits {
        let mut bits = StateBits::empty();
        if self.front() {
            bits |= front;
        }
        if self.back() {
            bits |= back;
        }
        bits
    }
}

/// Dirty-bit driven render state cache.
#[derive(Debug)]
pub struct StateTracker {
    /// What the backend currently has.
    applied: RenderStates,
    /// What the next flush will establish.
    requested: RenderStates,
    dirty: DirtyStates,
    /// Everything marked during the current pass.
    pass_touched: DirtyStates,
    /// Fields written by dynamic opcodes during the current pass.
    dynamic_overrides: DirtyStates,
    baseline: RenderStates,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    #[must_use]
    pub fn new() -> Self {
        let baseline = RenderStates::default();
        Self {
            applied: baseline.clone(),
            requested: baseline.clone(),
            dirty: DirtyStates::empty(),
            pass_touched: DirtyStates::empty(),
            dynamic_overrides: DirtyStates::empty(),
            baseline,
        }
    }

    #[inline]
    #[must_use]
    pub fn requested(&self) -> &RenderStates {
        &self.requested
    }

    #[inline]
    #[must_use]
    pub fn applied(&self) -> &RenderStates {
        &self.applied
    }

    #[inline]
    #[must_use]
    pub fn dirty(&self) -> &DirtyStates {
        &self.dirty
    }

    /// The fields a flush would emit right now.
    #[must_use]
    pub fn pending(&self) -> DirtyStates {
        self.dirty.intersection(&self.applied.diff(&self.requested))
    }

    fn mark(&mut self, mask: DirtyStates) {
        self.dirty |= mask;
        self.pass_touched |= mask;
    }

    fn mark_dynamic(&mut self, mask: DirtyStates) {
        self.mark(mask);
        self.dynamic_overrides |= mask;
    }

    /// A dynamic request keeps its fields away from pipeline static state
    /// for the rest of the pass, even when it changed nothing.
    fn pin(&mut self, bits: StateBits) {
        self.dynamic_overrides |= DirtyStates::from_bits(bits);
    }

    // ── Whole-snapshot requests ────────────────────────────────────────────

    /// Requests `states` as a whole. Only fields that differ from the current
    /// request are marked.
    pub fn request(&mut self, states: &RenderStates) {
        let changed = self.requested.diff(states);
        if changed.is_empty() {
            return;
        }
        self.requested.assign(states, &changed);
        self.mark(changed);
    }

    /// Merges the static state of a pipeline. Fields in `mask` that a dynamic
    /// opcode already set during this pass keep their dynamic value.
    pub fn merge_pipeline(&mut self, states: &RenderStates, mask: &DirtyStates) {
        let take = mask.difference(&self.dynamic_overrides);
        let changed = take.intersection(&self.requested.diff(states));
        if changed.is_empty() {
            return;
        }
        self.requested.assign(states, &changed);
        self.mark(changed);
    }

    // ── Flush points ───────────────────────────────────────────────────────

    /// Emits every pending change to `backend`. Returns the number of state
    /// commands issued.
    pub fn flush(&mut self, backend: &mut dyn Backend) -> usize {
        if self.dirty.is_empty() {
            return 0;
        }

        let mask = self.pending();
        let mut issued = 0;
        self.requested.commands(&mask, |command| {
            backend.set_state(&command);
            issued += 1;
        });

        self.applied.assign(&self.requested, &self.dirty);
        self.dirty = DirtyStates::empty();
        issued
    }

    /// Collects the commands a flush would emit, without touching a backend.
    pub fn flush_into(&mut self, out: &mut Vec<StateCommand>) {
        let mask = self.pending();
        self.requested.commands(&mask, |command| out.push(command));
        self.applied.assign(&self.requested, &self.dirty);
        self.dirty = DirtyStates::empty();
    }

    /// Starts tracking a new pass.
    pub fn begin_pass(&mut self) {
        self.pass_touched = DirtyStates::empty();
        self.dynamic_overrides = DirtyStates::empty();
    }

    /// Restores everything touched during the pass to the baseline and
    /// flushes. Returns the number of state commands issued.
    pub fn end_pass(&mut self, backend: &mut dyn Backend) -> usize {
        let restore = self
            .pass_touched
            .difference(&DirtyStates::from_bits(StateBits::PASS_SCOPED));

        // keep the rects requested but drop them from the flush
        let rects = self
            .dirty
            .intersection(&DirtyStates::from_bits(StateBits::PASS_SCOPED));
        self.dirty = self.dirty.difference(&rects);

        let baseline = self.baseline.clone();
        self.requested.assign(&baseline, &restore);
        self.dirty |= restore;
        let issued = self.flush(backend);

        // unflushed rects are stale once the pass is over
        self.requested.assign(&self.applied.clone(), &rects);

        self.pass_touched = DirtyStates::empty();
        self.dynamic_overrides = DirtyStates::empty();
        issued
    }

    // ── Pass seeding ───────────────────────────────────────────────────────

    /// Seeds viewport 0 and scissor 0 from a pass render area. Not recorded
    /// as a dynamic override.
    pub fn seed_render_area(&mut self, viewport: Viewport, scissor: ScissorRect) {
        if self.requested.viewports[0] != viewport {
            self.requested.viewports[0] = viewport;
            let mut mask = DirtyStates::empty();
            mask.mark_viewport(0);
            self.mark(mask);
        }
        if self.requested.scissors[0] != scissor {
            self.requested.scissors[0] = scissor;
            let mut mask = DirtyStates::empty();
            mask.mark_scissor(0);
            self.mark(mask);
        }
    }

    // ── Dynamic state ──────────────────────────────────────────────────────

    pub fn set_viewport(&mut self, index: usize, viewport: Viewport) {
        if index >= MAX_VIEWPORTS || self.requested.viewports[index] == viewport {
            return;
        }
        self.requested.viewports[index] = viewport;
        let mut mask = DirtyStates::empty();
        mask.mark_viewport(index);
        self.mark_dynamic(mask);
    }

    pub fn set_depth_range(&mut self, index: usize, range: DepthRange) {
        if index >= MAX_VIEWPORTS || self.requested.depth_ranges[index] == range {
            return;
        }
        self.requested.depth_ranges[index] = range;
        let mut mask = DirtyStates::empty();
        mask.mark_depth_range(index);
        self.mark_dynamic(mask);
    }

    pub fn set_scissor(&mut self, index: usize, rect: ScissorRect) {
        if index >= MAX_VIEWPORTS || self.requested.scissors[index] == rect {
            return;
        }
        self.requested.scissors[index] = rect;
        let mut mask = DirtyStates::empty();
        mask.mark_scissor(index);
        self.mark_dynamic(mask);
    }

    pub fn set_scissor_enabled(&mut self, enabled: bool) {
        self.pin(StateBits::SCISSOR_ENABLED);
        if self.requested.scissor_enabled != enabled {
            self.requested.scissor_enabled = enabled;
            self.mark_dynamic(StateBits::SCISSOR_ENABLED.into());
        }
    }

    pub fn set_stencil_reference(&mut self, faces: StencilFaces, reference: u8) {
        self.update_stencil_func(faces, |func| func.reference = reference);
    }

    pub fn set_stencil_compare_mask(&mut self, faces: StencilFaces, mask: u8) {
        self.update_stencil_func(faces, |func| func.compare_mask = mask);
    }

    pub fn set_stencil_write_mask(&mut self, faces: StencilFaces, mask: u8) {
        self.pin(faces.select(
            StateBits::STENCIL_FRONT_WRITE_MASK,
            StateBits::STENCIL_BACK_WRITE_MASK,
        ));
        let mut bits = StateBits::empty();
        if faces.front() && self.requested.stencil_front.write_mask != mask {
            self.requested.stencil_front.write_mask = mask;
            bits |= StateBits::STENCIL_FRONT_WRITE_MASK;
        }
        if faces.back() && self.requested.stencil_back.write_mask != mask {
            self.requested.stencil_back.write_mask = mask;
            bits |= StateBits::STENCIL_BACK_WRITE_MASK;
        }
        if !bits.is_empty() {
            self.mark_dynamic(bits.into());
        }
    }

    fn update_stencil_func(&mut self, faces: StencilFaces, update: impl Fn(&mut StencilFunc)) {
        self.pin(faces.select(StateBits::STENCIL_FRONT_FUNC, StateBits::STENCIL_BACK_FUNC));
        let mut bits = StateBits::empty();
        if faces.front() {
            let before = self.requested.stencil_front.func;
            update(&mut self.requested.stencil_front.func);
            if before != self.requested.stencil_front.func {
                bits |= StateBits::STENCIL_FRONT_FUNC;
            }
        }
        if faces.back() {
            let before = self.requested.stencil_back.func;
            update(&mut self.requested.stencil_back.func);
            if before != self.requested.stencil_back.func {
                bits |= StateBits::STENCIL_BACK_FUNC;
            }
        }
        if !bits.is_empty() {
            self.mark_dynamic(bits.into());
        }
    }

    /// Full stencil state for both faces.
    pub fn set_stencil_state(
        &mut self,
        enabled: bool,
        front: StencilFaceState,
        back: StencilFaceState,
    ) {
        let mut target = self.requested.clone();
        target.stencil_enabled = enabled;
        target.stencil_front = front;
        target.stencil_back = back;
        self.request_dynamic(&target, StateBits::STENCIL);
    }

    pub fn set_stencil_ops(&mut self, faces: StencilFaces, ops: StencilOps) {
        self.pin(faces.select(StateBits::STENCIL_FRONT_OPS, StateBits::STENCIL_BACK_OPS));
        let mut bits = StateBits::empty();
        if faces.front() && self.requested.stencil_front.ops != ops {
            self.requested.stencil_front.ops = ops;
            bits |= StateBits::STENCIL_FRONT_OPS;
        }
        if faces.back() && self.requested.stencil_back.ops != ops {
            self.requested.stencil_back.ops = ops;
            bits |= StateBits::STENCIL_BACK_OPS;
        }
        if !bits.is_empty() {
            self.mark_dynamic(bits.into());
        }
    }

    pub fn set_depth_state(&mut self, enabled: bool, write: bool, compare: wgpu::CompareFunction) {
        let mut target = self.requested.clone();
        target.depth_enabled = enabled;
        target.depth_write = write;
        target.depth_compare = compare;
        self.request_dynamic(
            &target,
            StateBits::DEPTH_ENABLED | StateBits::DEPTH_WRITE | StateBits::DEPTH_FUNC,
        );
    }

    pub fn set_depth_bias(&mut self, enabled: bool, bias: DepthBias) {
        let mut target = self.requested.clone();
        target.depth_bias_enabled = enabled;
        target.depth_bias = bias;
        self.request_dynamic(
            &target,
            StateBits::DEPTH_BIAS_ENABLED | StateBits::DEPTH_BIAS_VALUES,
        );
    }

    pub fn set_depth_bounds(&mut self, enabled: bool, bounds: DepthRange) {
        let mut target = self.requested.clone();
        target.depth_bounds_enabled = enabled;
        target.depth_bounds = bounds;
        self.request_dynamic(
            &target,
            StateBits::DEPTH_BOUNDS_ENABLED | StateBits::DEPTH_BOUNDS_RANGES,
        );
    }

    pub fn set_fill_mode(&mut self, mode: wgpu::PolygonMode) {
        self.pin(StateBits::POLYGON_FILL_MODE);
        if self.requested.fill_mode != mode {
            self.requested.fill_mode = mode;
            self.mark_dynamic(StateBits::POLYGON_FILL_MODE.into());
        }
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.pin(StateBits::POLYGON_LINE_WIDTH);
        if self.requested.line_width != width {
            self.requested.line_width = width;
            self.mark_dynamic(StateBits::POLYGON_LINE_WIDTH.into());
        }
    }

    pub fn set_primitive_assembly(&mut self, topology: wgpu::PrimitiveTopology, restart: bool) {
        let mut target = self.requested.clone();
        target.topology = topology;
        target.primitive_restart = restart;
        self.request_dynamic(
            &target,
            StateBits::POLYGON_TOPOLOGY | StateBits::POLYGON_PRIMITIVE_RESTART,
        );
    }

    pub fn set_cull_state(&mut self, enabled: bool, face: wgpu::Face, front_face: wgpu::FrontFace) {
        let mut target = self.requested.clone();
        target.cull_enabled = enabled;
        target.cull_face = face;
        target.front_face = front_face;
        self.request_dynamic(
            &target,
            StateBits::CULL_ENABLED | StateBits::CULL_MODE | StateBits::CULL_FRONT_FACE,
        );
    }

    pub fn set_blend_color(&mut self, color: [f32; 4]) {
        self.pin(StateBits::BLEND_COLOR);
        if self.requested.blend_color != color {
            self.requested.blend_color = color;
            self.mark_dynamic(StateBits::BLEND_COLOR.into());
        }
    }

    pub fn set_blend_enabled(&mut self, enabled: bool) {
        self.pin(StateBits::BLEND_ENABLED);
        if self.requested.blend_enabled != enabled {
            self.requested.blend_enabled = enabled;
            self.mark_dynamic(StateBits::BLEND_ENABLED.into());
        }
    }

    /// Blend function and equation of one color target.
    pub fn set_blend_state(&mut self, target: usize, func: BlendFunc, equation: BlendEquation) {
        if target >= MAX_COLOR_TARGETS {
            return;
        }
        let mut pinned = DirtyStates::empty();
        pinned.mark_blend_func(target);
        pinned.mark_blend_equation(target);
        self.dynamic_overrides |= pinned;

        let mut mask = DirtyStates::empty();
        let state = &mut self.requested.targets[target];
        if state.blend_func != func {
            state.blend_func = func;
            mask.mark_blend_func(target);
        }
        if state.blend_equation != equation {
            state.blend_equation = equation;
            mask.mark_blend_equation(target);
        }
        if !mask.is_empty() {
            self.mark_dynamic(mask);
        }
    }

    pub fn set_color_mask(&mut self, target: usize, color_mask: wgpu::ColorWrites) {
        if target >= MAX_COLOR_TARGETS {
            return;
        }
        let mut mask = DirtyStates::empty();
        mask.mark_color_mask(target);
        self.dynamic_overrides |= mask;
        if self.requested.targets[target].color_mask == color_mask {
            return;
        }
        self.requested.targets[target].color_mask = color_mask;
        self.mark_dynamic(mask);
    }

    pub fn set_multisample(&mut self, alpha_to_coverage: bool, dither: bool) {
        let mut target = self.requested.clone();
        target.alpha_to_coverage = alpha_to_coverage;
        target.alpha_to_coverage_dither = dither;
        self.request_dynamic(
            &target,
            StateBits::ALPHA_COVERAGE_ENABLED | StateBits::ALPHA_COVERAGE_DITHER_ENABLED,
        );
    }

    fn request_dynamic(&mut self, target: &RenderStates, family: StateBits) {
        self.pin(family);
        let changed = self
            .requested
            .diff(target)
            .intersection(&DirtyStates::from_bits(family));
        if changed.is_empty() {
            return;
        }
        self.requested.assign(target, &changed);
        self.mark_dynamic(changed);
    }
}
