//! Render state snapshot.
//!
//! [`RenderStates`] holds every piece of fixed-function state as plain
//! values. [`RenderStates::diff`] turns two snapshots into a [`DirtyStates`]
//! mask, and [`RenderStates::commands`] turns a mask into the backend
//! [`StateCommand`]s that apply it, in flag order.

use wgpu::{
    BlendFactor, BlendOperation, ColorWrites, CompareFunction, Face, FrontFace, PolygonMode,
    PrimitiveTopology, StencilOperation,
};

use super::bits::{DirtyStates, StateBits, set_bits};

pub const MAX_VIEWPORTS: usize = 16;
pub const MAX_COLOR_TARGETS: usize = 8;

// ─── Component Values ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthRange {
    pub min: f32,
    pub max: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    #[must_use]
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilFunc {
    pub compare: CompareFunction,
    pub reference: u8,
    pub compare_mask: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilOps {
    pub fail: StencilOperation,
    pub depth_fail: StencilOperation,
    pub pass: StencilOperation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub func: StencilFunc,
    pub write_mask: u8,
    pub ops: StencilOps,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self {
            func: StencilFunc {
                compare: CompareFunction::Always,
                reference: 0,
                compare_mask: 0xFF,
            },
            write_mask: 0xFF,
            ops: StencilOps {
                fail: StencilOperation::Keep,
                depth_fail: StencilOperation::Keep,
                pass: StencilOperation::Keep,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct DepthBias {
    pub constant: f32,
    pub slope_scale: f32,
    pub clamp: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendFunc {
    pub color_src: BlendFactor,
    pub color_dst: BlendFactor,
    pub alpha_src: BlendFactor,
    pub alpha_dst: BlendFactor,
}

impl Default for BlendFunc {
    fn default() -> Self {
        Self {
            color_src: BlendFactor::One,
            color_dst: BlendFactor::Zero,
            alpha_src: BlendFactor::One,
            alpha_dst: BlendFactor::Zero,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendEquation {
    pub color: BlendOperation,
    pub alpha: BlendOperation,
}

impl Default for BlendEquation {
    fn default() -> Self {
        Self {
            color: BlendOperation::Add,
            alpha: BlendOperation::Add,
        }
    }
}

/// Per color target blend and write mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetState {
    pub blend_func: BlendFunc,
    pub blend_equation: BlendEquation,
    pub color_mask: ColorWrites,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            blend_func: BlendFunc::default(),
            blend_equation: BlendEquation::default(),
            color_mask: ColorWrites::ALL,
        }
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Every piece of fixed-function state.
///
/// `Default` is the baseline every pass starts from and is restored to.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderStates {
    pub viewports: [Viewport; MAX_VIEWPORTS],
    pub depth_ranges: [DepthRange; MAX_VIEWPORTS],
    pub scissor_enabled: bool,
    pub scissors: [ScissorRect; MAX_VIEWPORTS],

    pub stencil_enabled: bool,
    pub stencil_front: StencilFaceState,
    pub stencil_back: StencilFaceState,

    pub depth_bias_enabled: bool,
    pub depth_bias: DepthBias,

    pub fill_mode: PolygonMode,
    pub line_width: f32,
    pub primitive_restart: bool,
    pub topology: PrimitiveTopology,

    pub front_face: FrontFace,
    pub cull_face: Face,
    pub cull_enabled: bool,

    pub blend_enabled: bool,
    pub targets: [TargetState; MAX_COLOR_TARGETS],
    pub blend_color: [f32; 4],

    pub depth_enabled: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub depth_bounds_enabled: bool,
    pub depth_bounds: DepthRange,

    pub alpha_to_coverage: bool,
    pub alpha_to_coverage_dither: bool,
}

impl Default for RenderStates {
    fn default() -> Self {
        Self {
            viewports: [Viewport::default(); MAX_VIEWPORTS],
            depth_ranges: [DepthRange::default(); MAX_VIEWPORTS],
            scissor_enabled: false,
            scissors: [ScissorRect::default(); MAX_VIEWPORTS],
            stencil_enabled: false,
            stencil_front: StencilFaceState::default(),
            stencil_back: StencilFaceState::default(),
            depth_bias_enabled: false,
            depth_bias: DepthBias::default(),
            fill_mode: PolygonMode::Fill,
            line_width: 1.0,
            primitive_restart: false,
            topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_face: Face::Back,
            cull_enabled: false,
            blend_enabled: false,
            targets: [TargetState::default(); MAX_COLOR_TARGETS],
            blend_color: [0.0; 4],
            depth_enabled: false,
            depth_write: true,
            depth_compare: CompareFunction::Always,
            depth_bounds_enabled: false,
            depth_bounds: DepthRange::default(),
            alpha_to_coverage: false,
            alpha_to_coverage_dither: false,
        }
    }
}

impl RenderStates {
    /// Fields of `other` that differ from `self`.
    #[must_use]
    pub fn diff(&self, other: &Self) -> DirtyStates {
        let mut dirty = DirtyStates::empty();

        for i in 0..MAX_VIEWPORTS {
            if self.viewports[i] != other.viewports[i] {
                dirty.mark_viewport(i);
            }
            if self.depth_ranges[i] != other.depth_ranges[i] {
                dirty.mark_depth_range(i);
            }
            if self.scissors[i] != other.scissors[i] {
                dirty.mark_scissor(i);
            }
        }
        for i in 0..MAX_COLOR_TARGETS {
            let (a, b) = (&self.targets[i], &other.targets[i]);
            if a.blend_func != b.blend_func {
                dirty.mark_blend_func(i);
            }
            if a.blend_equation != b.blend_equation {
                dirty.mark_blend_equation(i);
            }
            if a.color_mask != b.color_mask {
                dirty.mark_color_mask(i);
            }
        }

        let mut bits = StateBits::empty();
        let mut check = |flag: StateBits, differs: bool| bits.set(flag, differs);

        check(StateBits::SCISSOR_ENABLED, self.scissor_enabled != other.scissor_enabled);
        check(StateBits::STENCIL_ENABLED, self.stencil_enabled != other.stencil_enabled);
        check(
            StateBits::STENCIL_FRONT_FUNC,
            self.stencil_front.func != other.stencil_front.func,
        );
        check(
            StateBits::STENCIL_BACK_FUNC,
            self.stencil_back.func != other.stencil_back.func,
        );
        check(
            StateBits::STENCIL_FRONT_WRITE_MASK,
            self.stencil_front.write_mask != other.stencil_front.write_mask,
        );
        check(
            StateBits::STENCIL_BACK_WRITE_MASK,
            self.stencil_back.write_mask != other.stencil_back.write_mask,
        );
        check(
            StateBits::STENCIL_FRONT_OPS,
            self.stencil_front.ops != other.stencil_front.ops,
        );
        check(
            StateBits::STENCIL_BACK_OPS,
            self.stencil_back.ops != other.stencil_back.ops,
        );
        check(
            StateBits::DEPTH_BIAS_ENABLED,
            self.depth_bias_enabled != other.depth_bias_enabled,
        );
        check(StateBits::DEPTH_BIAS_VALUES, self.depth_bias != other.depth_bias);
        check(StateBits::POLYGON_FILL_MODE, self.fill_mode != other.fill_mode);
        check(StateBits::POLYGON_LINE_WIDTH, self.line_width != other.line_width);
        check(
            StateBits::POLYGON_PRIMITIVE_RESTART,
            self.primitive_restart != other.primitive_restart,
        );
        check(StateBits::POLYGON_TOPOLOGY, self.topology != other.topology);
        check(StateBits::CULL_FRONT_FACE, self.front_face != other.front_face);
        check(StateBits::CULL_MODE, self.cull_face != other.cull_face);
        check(StateBits::CULL_ENABLED, self.cull_enabled != other.cull_enabled);
        check(StateBits::BLEND_ENABLED, self.blend_enabled != other.blend_enabled);
        check(StateBits::BLEND_COLOR, self.blend_color != other.blend_color);
        check(StateBits::DEPTH_ENABLED, self.depth_enabled != other.depth_enabled);
        check(StateBits::DEPTH_WRITE, self.depth_write != other.depth_write);
        check(StateBits::DEPTH_FUNC, self.depth_compare != other.depth_compare);
        check(
            StateBits::DEPTH_BOUNDS_ENABLED,
            self.depth_bounds_enabled != other.depth_bounds_enabled,
        );
        check(StateBits::DEPTH_BOUNDS_RANGES, self.depth_bounds != other.depth_bounds);
        check(
            StateBits::ALPHA_COVERAGE_ENABLED,
            self.alpha_to_coverage != other.alpha_to_coverage,
        );
        check(
            StateBits::ALPHA_COVERAGE_DITHER_ENABLED,
            self.alpha_to_coverage_dither != other.alpha_to_coverage_dither,
        );

        dirty.bits |= bits;
        dirty
    }

    /// Copies the fields selected by `mask` from `src`.
    pub fn assign(&mut self, src: &Self, mask: &DirtyStates) {
        for i in set_bits(u32::from(mask.viewport_vp)) {
            self.viewports[i] = src.viewports[i];
        }
        for i in set_bits(u32::from(mask.depth_range_vp)) {
            self.depth_ranges[i] = src.depth_ranges[i];
        }
        for i in set_bits(u32::from(mask.scissor_vp)) {
            self.scissors[i] = src.scissors[i];
        }
        for i in set_bits(u32::from(mask.blend_func_rt)) {
            self.targets[i].blend_func = src.targets[i].blend_func;
        }
        for i in set_bits(u32::from(mask.blend_equation_rt)) {
            self.targets[i].blend_equation = src.targets[i].blend_equation;
        }
        for i in set_bits(u32::from(mask.color_mask_rt)) {
            self.targets[i].color_mask = src.targets[i].color_mask;
        }

        let bits = mask.bits;
        macro_rules! copy_if {
            ($flag:ident => $($field:tt)+) => {
                if bits.contains(StateBits::$flag) {
                    self.$($field)+ = src.$($field)+;
                }
            };
        }

        copy_if!(SCISSOR_ENABLED => scissor_enabled);
        copy_if!(STENCIL_ENABLED => stencil_enabled);
        copy_if!(STENCIL_FRONT_FUNC => stencil_front.func);
        copy_if!(STENCIL_BACK_FUNC => stencil_back.func);
        copy_if!(STENCIL_FRONT_WRITE_MASK => stencil_front.write_mask);
        copy_if!(STENCIL_BACK_WRITE_MASK => stencil_back.write_mask);
        copy_if!(STENCIL_FRONT_OPS => stencil_front.ops);
        copy_if!(STENCIL_BACK_OPS => stencil_back.ops);
        copy_if!(DEPTH_BIAS_ENABLED => depth_bias_enabled);
        copy_if!(DEPTH_BIAS_VALUES => depth_bias);
        copy_if!(POLYGON_FILL_MODE => fill_mode);
        copy_if!(POLYGON_LINE_WIDTH => line_width);
        copy_if!(POLYGON_PRIMITIVE_RESTART => primitive_restart);
        copy_if!(POLYGON_TOPOLOGY => topology);
        copy_if!(CULL_FRONT_FACE => front_face);
        copy_if!(CULL_MODE => cull_face);
        copy_if!(CULL_ENABLED => cull_enabled);
        copy_if!(BLEND_ENABLED => blend_enabled);
        copy_if!(BLEND_COLOR => blend_color);
        copy_if!(DEPTH_ENABLED => depth_enabled);
        copy_if!(DEPTH_WRITE => depth_write);
        copy_if!(DEPTH_FUNC => depth_compare);
        copy_if!(DEPTH_BOUNDS_ENABLED => depth_bounds_enabled);
        copy_if!(DEPTH_BOUNDS_RANGES => depth_bounds);
        copy_if!(ALPHA_COVERAGE_ENABLED => alpha_to_coverage);
        copy_if!(ALPHA_COVERAGE_DITHER_ENABLED => alpha_to_coverage_dither);
    }

    /// Calls `emit` once per command needed to apply `mask`, in flag order.
    pub fn commands(&self, mask: &DirtyStates, mut emit: impl FnMut(StateCommand)) {
        for bit in set_bits(mask.bits.bits()) {
            EMITTERS[bit](self, mask, &mut emit);
        }
    }
}

type Emitter = fn(&RenderStates, &DirtyStates, &mut dyn FnMut(StateCommand));

/// Command emitter per [`StateBits`] flag, indexed by bit position.
const EMITTERS: [Emitter; 32] = {
    use StateCommand as C;
    [
        // VIEWPORT_RECTS
        |s, m, e| {
            for i in set_bits(u32::from(m.viewport_vp)) {
                e(C::Viewport { index: i as u32, viewport: s.viewports[i] });
            }
        },
        // VIEWPORT_DEPTH_RANGES
        |s, m, e| {
            for i in set_bits(u32::from(m.depth_range_vp)) {
                e(C::DepthRange { index: i as u32, range: s.depth_ranges[i] });
            }
        },
        |s, _, e| e(C::ScissorEnabled(s.scissor_enabled)),
        // SCISSOR_RECTS
        |s, m, e| {
            for i in set_bits(u32::from(m.scissor_vp)) {
                e(C::Scissor { index: i as u32, rect: s.scissors[i] });
            }
        },
        |s, _, e| e(C::StencilEnabled(s.stencil_enabled)),
        |s, _, e| e(C::StencilFunc { face: Face::Front, func: s.stencil_front.func }),
        |s, _, e| e(C::StencilFunc { face: Face::Back, func: s.stencil_back.func }),
        |s, _, e| e(C::StencilWriteMask { face: Face::Front, mask: s.stencil_front.write_mask }),
        |s, _, e| e(C::StencilWriteMask { face: Face::Back, mask: s.stencil_back.write_mask }),
        |s, _, e| e(C::StencilOps { face: Face::Front, ops: s.stencil_front.ops }),
        |s, _, e| e(C::StencilOps { face: Face::Back, ops: s.stencil_back.ops }),
        |s, _, e| e(C::DepthBiasEnabled(s.depth_bias_enabled)),
        |s, _, e| e(C::DepthBias(s.depth_bias)),
        |s, _, e| e(C::FillMode(s.fill_mode)),
        |s, _, e| e(C::LineWidth(s.line_width)),
        |s, _, e| e(C::PrimitiveRestart(s.primitive_restart)),
        |s, _, e| e(C::Topology(s.topology)),
        |s, _, e| e(C::FrontFace(s.front_face)),
        |s, _, e| e(C::CullFace(s.cull_face)),
        |s, _, e| e(C::CullEnabled(s.cull_enabled)),
        |s, _, e| e(C::BlendEnabled(s.blend_enabled)),
        // BLEND_FUNC
        |s, m, e| {
            for i in set_bits(u32::from(m.blend_func_rt)) {
                e(C::BlendFunc { target: i as u32, func: s.targets[i].blend_func });
            }
        },
        // BLEND_EQUATION
        |s, m, e| {
            for i in set_bits(u32::from(m.blend_equation_rt)) {
                e(C::BlendEquation { target: i as u32, equation: s.targets[i].blend_equation });
            }
        },
        |s, _, e| e(C::BlendColor(s.blend_color)),
        // COLOR_MASK
        |s, m, e| {
            for i in set_bits(u32::from(m.color_mask_rt)) {
                e(C::ColorMask { target: i as u32, mask: s.targets[i].color_mask });
            }
        },
        |s, _, e| e(C::DepthEnabled(s.depth_enabled)),
        |s, _, e| e(C::DepthWrite(s.depth_write)),
        |s, _, e| e(C::DepthCompare(s.depth_compare)),
        |s, _, e| e(C::DepthBoundsEnabled(s.depth_bounds_enabled)),
        |s, _, e| e(C::DepthBounds(s.depth_bounds)),
        |s, _, e| e(C::AlphaToCoverage(s.alpha_to_coverage)),
        |s, _, e| e(C::AlphaToCoverageDither(s.alpha_to_coverage_dither)),
    ]
};

// ─── Backend Commands ────────────────────────────────────────────────────────

/// One backend state call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StateCommand {
    Viewport { index: u32, viewport: Viewport },
    DepthRange { index: u32, range: DepthRange },
    ScissorEnabled(bool),
    Scissor { index: u32, rect: ScissorRect },
    StencilEnabled(bool),
    StencilFunc { face: Face, func: StencilFunc },
    StencilWriteMask { face: Face, mask: u8 },
    StencilOps { face: Face, ops: StencilOps },
    DepthBiasEnabled(bool),
    DepthBias(DepthBias),
    FillMode(PolygonMode),
    LineWidth(f32),
    PrimitiveRestart(bool),
    Topology(PrimitiveTopology),
    FrontFace(FrontFace),
    CullFace(Face),
    CullEnabled(bool),
    BlendEnabled(bool),
    BlendFunc { target: u32, func: BlendFunc },
    BlendEquation { target: u32, equation: BlendEquation },
    BlendColor([f32; 4]),
    ColorMask { target: u32, mask: ColorWrites },
    DepthEnabled(bool),
    DepthWrite(bool),
    DepthCompare(CompareFunction),
    DepthBoundsEnabled(bool),
    DepthBounds(DepthRange),
    AlphaToCoverage(bool),
    AlphaToCoverageDither(bool),
}
