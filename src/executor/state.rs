//! Dynamic state opcodes.
//!
//! These only record the requested value in the state tracker. The backend
//! sees them at the next flush (draw, dispatch or pass end), and only if the
//! value differs from what it already has.

use log::error;

use super::{FrameExecutor, PassPhase};
use crate::command::Opcode;

impl FrameExecutor {
    pub(super) fn apply_dynamic_state(&mut self, op: &Opcode) {
        if self.phase == PassPhase::Outside {
            error!("{} issued outside of a pass", op.name());
            self.stats.skipped += 1;
            return;
        }

        let state = &mut self.state;
        match *op {
            Opcode::SetViewportRect { index, viewport } => {
                state.set_viewport(index.into(), viewport);
            }
            Opcode::SetViewportDepthRange { index, range } => {
                state.set_depth_range(index.into(), range);
            }
            Opcode::SetScissorRect { index, rect } => state.set_scissor(index.into(), rect),
            Opcode::SetScissorState { enabled } => state.set_scissor_enabled(enabled),
            Opcode::SetStencilReference { faces, reference } => {
                state.set_stencil_reference(faces, reference);
            }
            Opcode::SetStencilCompareMask { faces, mask } => {
                state.set_stencil_compare_mask(faces, mask);
            }
            Opcode::SetStencilWriteMask { faces, mask } => {
                state.set_stencil_write_mask(faces, mask);
            }
            Opcode::SetStencilOps { faces, ops } => state.set_stencil_ops(faces, ops),
            Opcode::SetStencilState {
                enabled,
                front,
                back,
            } => state.set_stencil_state(enabled, front, back),
            Opcode::SetDepthState {
                enabled,
                write,
                compare,
            } => state.set_depth_state(enabled, write, compare),
            Opcode::SetDepthBiasState { enabled, bias } => state.set_depth_bias(enabled, bias),
            Opcode::SetDepthClipState { enabled, bounds } => {
                state.set_depth_bounds(enabled, bounds);
            }
            Opcode::SetFillState { mode, line_width } => {
                state.set_fill_mode(mode);
                state.set_line_width(line_width);
            }
            Opcode::SetPrimitiveAssemblyState { topology, restart } => {
                state.set_primitive_assembly(topology, restart);
            }
            Opcode::SetCullState {
                enabled,
                face,
                front_face,
            } => state.set_cull_state(enabled, face, front_face),
            Opcode::SetBlendColor { color } => state.set_blend_color(color),
            Opcode::SetBlendState {
                target,
                enabled,
                func,
                equation,
            } => {
                state.set_blend_enabled(enabled);
                state.set_blend_state(target.into(), func, equation);
            }
            Opcode::SetColorMask { target, mask } => state.set_color_mask(target.into(), mask),
            Opcode::SetMultisampleState {
                alpha_to_coverage,
                dither,
            } => state.set_multisample(alpha_to_coverage, dither),
            _ => {}
        }
    }
}
