//! Pass begin/end, pass clears and resolves.

use log::{error, trace, warn};
use smallvec::SmallVec;

use super::{ExecuteContext, FrameExecutor, PassPhase, with_object};
use crate::backend::{FrameBufferDesc, NativeHandle, ResolvedImageView};
use crate::cache::FrameBufferKey;
use crate::command::{Opcode, PassTarget};
use crate::object::{ImageView, ObjectId, ObjectType, Output};
use crate::state::{MAX_VIEWPORTS, ScissorRect, Viewport};

/// Properties of the pass being recorded.
#[derive(Clone, Copy, Debug)]
pub(super) struct ActivePass {
    pub width: u32,
    pub height: u32,
    pub color_count: u32,
    pub has_depth_stencil: bool,
}

/// A render-target view resolved together with its parent image id.
struct Attachment {
    view_id: ObjectId,
    image_id: ObjectId,
    resolved: ResolvedImageView,
}

fn resolve_attachment(ctx: &ExecuteContext<'_>, id: ObjectId) -> Option<Attachment> {
    with_object(ctx.registry, id, ObjectType::RenderTargetView, |view: &ImageView| {
        view.resolve(ctx.registry).map(|resolved| Attachment {
            view_id: id,
            image_id: view.image(),
            resolved,
        })
    })
    .flatten()
}

/// Returns the cached frame buffer for `colors` + `depth_stencil`, building
/// it on first use. All attachments must share one size.
fn frame_buffer_for(
    ctx: &mut ExecuteContext<'_>,
    colors: &[Attachment],
    depth_stencil: Option<&Attachment>,
) -> Option<(NativeHandle, u32, u32)> {
    let first = colors.first().or(depth_stencil)?;
    let (width, height) = (first.resolved.width, first.resolved.height);

    let all = colors.iter().chain(depth_stencil);
    if all
        .clone()
        .any(|a| a.resolved.width != width || a.resolved.height != height)
    {
        warn!("Pass attachments differ in size, pass dropped");
        return None;
    }

    let key = FrameBufferKey {
        colors: colors.iter().map(|a| a.view_id).collect(),
        depth_stencil: depth_stencil.map(|a| a.view_id),
    };
    let sources: SmallVec<[ObjectId; 16]> = all.flat_map(|a| [a.view_id, a.image_id]).collect();
    let desc = FrameBufferDesc {
        colors: colors.iter().map(|a| a.resolved.view).collect(),
        depth_stencil: depth_stencil.map(|a| a.resolved.view),
        width,
        height,
    };

    let frame_buffer = ctx.cache.frame_buffer(ctx.backend, &key, &sources, &desc)?;
    Some((frame_buffer, width, height))
}

impl FrameExecutor {
    pub(super) fn begin_pass(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        target: &PassTarget,
        render_area: Option<ScissorRect>,
        viewport_count: u8,
    ) {
        if self.phase != PassPhase::Outside {
            error!("BeginPass while a pass is already open, ignored");
            self.stats.skipped += 1;
            return;
        }

        self.state.begin_pass();

        let Some(pass) = self.bind_pass_target(ctx, target) else {
            trace!("Pass targets {target:?} unavailable, pass contents dropped");
            self.phase = PassPhase::InsideInvalid;
            self.stats.invalid_passes += 1;
            return;
        };

        let area = render_area.unwrap_or(ScissorRect::new(0, 0, pass.width, pass.height));
        #[allow(clippy::cast_precision_loss)]
        let viewport = Viewport::new(
            area.x as f32,
            area.y as f32,
            area.width as f32,
            area.height as f32,
        );
        self.state.seed_render_area(viewport, area);
        for index in 1..usize::from(viewport_count).min(MAX_VIEWPORTS) {
            self.state.set_viewport(index, viewport);
            self.state.set_scissor(index, area);
        }

        self.phase = PassPhase::InsideValid;
        self.pass = Some(pass);
        self.stats.passes += 1;
    }

    fn bind_pass_target(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        target: &PassTarget,
    ) -> Option<ActivePass> {
        match target {
            PassTarget::Views {
                colors,
                depth_stencil,
            } => {
                let colors = colors
                    .iter()
                    .map(|&id| resolve_attachment(ctx, id))
                    .collect::<Option<SmallVec<[Attachment; 8]>>>()?;
                let depth_stencil = match depth_stencil {
                    Some(id) => Some(resolve_attachment(ctx, *id)?),
                    None => None,
                };

                let (frame_buffer, width, height) =
                    frame_buffer_for(ctx, &colors, depth_stencil.as_ref())?;
                ctx.backend.bind_frame_buffer(frame_buffer);

                Some(ActivePass {
                    width,
                    height,
                    color_count: colors.len() as u32,
                    has_depth_stencil: depth_stencil.is_some(),
                })
            }
            PassTarget::Output(id) => {
                let (native, width, height) =
                    with_object(ctx.registry, *id, ObjectType::Output, |output: &Output| {
                        let desc = output.desc();
                        (!output.is_closed()).then(|| (output.native(), desc.width, desc.height))
                    })
                    .flatten()?;

                if !ctx.backend.bind_output(native) {
                    trace!("Output {id} has no surface this frame");
                    return None;
                }

                Some(ActivePass {
                    width,
                    height,
                    color_count: 1,
                    has_depth_stencil: false,
                })
            }
        }
    }

    pub(super) fn end_pass(&mut self, ctx: &mut ExecuteContext<'_>) {
        match self.phase {
            PassPhase::Outside => {
                error!("EndPass without an open pass, ignored");
                self.stats.skipped += 1;
            }
            PassPhase::InsideInvalid => {
                self.stats.state_commands += self.state.end_pass(ctx.backend);
                self.phase = PassPhase::Outside;
            }
            PassPhase::InsideValid => {
                self.stats.state_commands += self.state.end_pass(ctx.backend);
                ctx.backend.unbind_frame_buffer();
                self.phase = PassPhase::Outside;
                self.pass = None;
            }
        }
    }

    pub(super) fn clear_pass_color(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        index: u32,
        color: [f32; 4],
    ) {
        if !self.require_valid_pass(op) {
            return;
        }
        if self.pass.is_some_and(|pass| index < pass.color_count) {
            ctx.backend.clear_color(index, color);
        } else {
            self.skip(op, "no such color attachment");
        }
    }

    pub(super) fn clear_pass_depth_stencil(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        depth: Option<f32>,
        stencil: Option<u8>,
    ) {
        if !self.require_valid_pass(op) {
            return;
        }
        if depth.is_none() && stencil.is_none() {
            return;
        }
        if self.pass.is_some_and(|pass| pass.has_depth_stencil) {
            ctx.backend
                .clear_depth_stencil(depth, stencil.map(u32::from));
        } else {
            self.skip(op, "pass has no depth/stencil attachment");
        }
    }

    /// Resolves a multisampled render target into a single-sampled one with
    /// a frame-buffer blit.
    pub(super) fn resolve(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
        op: &Opcode,
        source: ObjectId,
        destination: ObjectId,
    ) {
        if self.phase != PassPhase::Outside {
            error!("Resolve issued inside a pass");
            self.stats.skipped += 1;
            return;
        }

        let (Some(src), Some(dst)) = (
            resolve_attachment(ctx, source),
            resolve_attachment(ctx, destination),
        ) else {
            self.skip(op, "resolve views unavailable");
            return;
        };

        if src.resolved.width != dst.resolved.width || src.resolved.height != dst.resolved.height {
            self.skip(op, "resolve source and destination differ in size");
            return;
        }
        if dst.resolved.sample_count != 1 {
            self.skip(op, "resolve destination is multisampled");
            return;
        }

        let Some((src_fb, width, height)) = frame_buffer_for(ctx, std::slice::from_ref(&src), None)
        else {
            self.skip(op, "source frame buffer unavailable");
            return;
        };
        let Some((dst_fb, _, _)) = frame_buffer_for(ctx, std::slice::from_ref(&dst), None) else {
            self.skip(op, "destination frame buffer unavailable");
            return;
        };

        ctx.backend.blit(src_fb, dst_fb, width, height);
    }
}
