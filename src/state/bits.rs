//! Dirty-state bitmasks.
//!
//! [`StateBits`] has one flag per family of fixed-function state. The flag
//! order is the order state commands are emitted in. Families that exist
//! once per viewport or per color target carry an additional sub-mask in
//! [`DirtyStates`] selecting which entries are affected.

use std::ops::{BitOr, BitOrAssign};

use bitflags::bitflags;

use super::values::{MAX_COLOR_TARGETS, MAX_VIEWPORTS};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct StateBits: u32 {
        const VIEWPORT_RECTS                = 1 << 0;
        const VIEWPORT_DEPTH_RANGES         = 1 << 1;
        const SCISSOR_ENABLED               = 1 << 2;
        const SCISSOR_RECTS                 = 1 << 3;
        const STENCIL_ENABLED               = 1 << 4;
        const STENCIL_FRONT_FUNC            = 1 << 5;
        const STENCIL_BACK_FUNC             = 1 << 6;
        const STENCIL_FRONT_WRITE_MASK      = 1 << 7;
        const STENCIL_BACK_WRITE_MASK       = 1 << 8;
        const STENCIL_FRONT_OPS             = 1 << 9;
        const STENCIL_BACK_OPS              = 1 << 10;
        const DEPTH_BIAS_ENABLED            = 1 << 11;
        const DEPTH_BIAS_VALUES             = 1 << 12;
        const POLYGON_FILL_MODE             = 1 << 13;
        const POLYGON_LINE_WIDTH            = 1 << 14;
        const POLYGON_PRIMITIVE_RESTART     = 1 << 15;
        const POLYGON_TOPOLOGY              = 1 << 16;
        const CULL_FRONT_FACE               = 1 << 17;
        const CULL_MODE                     = 1 << 18;
        const CULL_ENABLED                  = 1 << 19;
        const BLEND_ENABLED                 = 1 << 20;
        const BLEND_FUNC                    = 1 << 21;
        const BLEND_EQUATION                = 1 << 22;
        const BLEND_COLOR                   = 1 << 23;
        const COLOR_MASK                    = 1 << 24;
        const DEPTH_ENABLED                 = 1 << 25;
        const DEPTH_WRITE                   = 1 << 26;
        const DEPTH_FUNC                    = 1 << 27;
        const DEPTH_BOUNDS_ENABLED          = 1 << 28;
        const DEPTH_BOUNDS_RANGES           = 1 << 29;
        const ALPHA_COVERAGE_ENABLED        = 1 << 30;
        const ALPHA_COVERAGE_DITHER_ENABLED = 1 << 31;

        const STENCIL = Self::STENCIL_ENABLED.bits()
            | Self::STENCIL_FRONT_FUNC.bits()
            | Self::STENCIL_BACK_FUNC.bits()
            | Self::STENCIL_FRONT_WRITE_MASK.bits()
            | Self::STENCIL_BACK_WRITE_MASK.bits()
            | Self::STENCIL_FRONT_OPS.bits()
            | Self::STENCIL_BACK_OPS.bits();

        /// State owned by the render pass rather than by pipelines. Re-seeded
        /// at every pass begin and never restored at pass end.
        const PASS_SCOPED = Self::VIEWPORT_RECTS.bits() | Self::SCISSOR_RECTS.bits();

        /// State a graphics pipeline bakes in.
        const PIPELINE_CONTROLLED = !(Self::VIEWPORT_RECTS.bits()
            | Self::VIEWPORT_DEPTH_RANGES.bits()
            | Self::SCISSOR_RECTS.bits()
            | Self::BLEND_COLOR.bits()
            | Self::DEPTH_BOUNDS_RANGES.bits());
    }
}

const VIEWPORT_SUBMASK_ALL: u16 = ((1u32 << MAX_VIEWPORTS) - 1) as u16;
const TARGET_SUBMASK_ALL: u8 = ((1u32 << MAX_COLOR_TARGETS) - 1) as u8;

/// A set of dirty state, with per-viewport and per-target selection.
///
/// Invariant: a sub-masked flag is set in `bits` exactly when its sub-mask is
/// non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DirtyStates {
    pub bits: StateBits,
    pub viewport_vp: u16,
    pub depth_range_vp: u16,
    pub scissor_vp: u16,
    pub blend_func_rt: u8,
    pub blend_equation_rt: u8,
    pub color_mask_rt: u8,
}

impl DirtyStates {
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every family, every viewport, every target.
    #[must_use]
    pub fn all() -> Self {
        Self::from_bits(StateBits::all())
    }

    /// Expands `bits` with full sub-masks for the per-entry families.
    #[must_use]
    pub fn from_bits(bits: StateBits) -> Self {
        let vp = |flag: StateBits| {
            if bits.contains(flag) {
                VIEWPORT_SUBMASK_ALL
            } else {
                0
            }
        };
        let rt = |flag: StateBits| {
            if bits.contains(flag) {
                TARGET_SUBMASK_ALL
            } else {
                0
            }
        };

        Self {
            bits,
            viewport_vp: vp(StateBits::VIEWPORT_RECTS),
            depth_range_vp: vp(StateBits::VIEWPORT_DEPTH_RANGES),
            scissor_vp: vp(StateBits::SCISSOR_RECTS),
            blend_func_rt: rt(StateBits::BLEND_FUNC),
            blend_equation_rt: rt(StateBits::BLEND_EQUATION),
            color_mask_rt: rt(StateBits::COLOR_MASK),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[inline]
    pub fn insert(&mut self, bits: StateBits) {
        *self |= Self::from_bits(bits);
    }

    pub fn mark_viewport(&mut self, index: usize) {
        self.viewport_vp |= 1 << index;
        self.bits |= StateBits::VIEWPORT_RECTS;
    }

    pub fn mark_depth_range(&mut self, index: usize) {
        self.depth_range_vp |= 1 << index;
        self.bits |= StateBits::VIEWPORT_DEPTH_RANGES;
    }

    pub fn mark_scissor(&mut self, index: usize) {
        self.scissor_vp |= 1 << index;
        self.bits |= StateBits::SCISSOR_RECTS;
    }

    pub fn mark_blend_func(&mut self, target: usize) {
        self.blend_func_rt |= 1 << target;
        self.bits |= StateBits::BLEND_FUNC;
    }

    pub fn mark_blend_equation(&mut self, target: usize) {
        self.blend_equation_rt |= 1 << target;
        self.bits |= StateBits::BLEND_EQUATION;
    }

    pub fn mark_color_mask(&mut self, target: usize) {
        self.color_mask_rt |= 1 << target;
        self.bits |= StateBits::COLOR_MASK;
    }

    /// Entries in `self` but not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut out = Self {
            bits: self.bits.difference(other.bits),
            viewport_vp: self.viewport_vp & !other.viewport_vp,
            depth_range_vp: self.depth_range_vp & !other.depth_range_vp,
            scissor_vp: self.scissor_vp & !other.scissor_vp,
            blend_func_rt: self.blend_func_rt & !other.blend_func_rt,
            blend_equation_rt: self.blend_equation_rt & !other.blend_equation_rt,
            color_mask_rt: self.color_mask_rt & !other.color_mask_rt,
        };
        // partially covered families stay dirty for the remaining entries
        out.bits |= self.bits & other.bits & out.submask_bits();
        out.normalize();
        out
    }

    /// Entries in both `self` and `other`.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut out = Self {
            bits: self.bits & other.bits,
            viewport_vp: self.viewport_vp & other.viewport_vp,
            depth_range_vp: self.depth_range_vp & other.depth_range_vp,
            scissor_vp: self.scissor_vp & other.scissor_vp,
            blend_func_rt: self.blend_func_rt & other.blend_func_rt,
            blend_equation_rt: self.blend_equation_rt & other.blend_equation_rt,
            color_mask_rt: self.color_mask_rt & other.color_mask_rt,
        };
        out.normalize();
        out
    }

    /// Flags whose sub-mask is currently non-zero.
    fn submask_bits(&self) -> StateBits {
        let mut bits = StateBits::empty();
        bits.set(StateBits::VIEWPORT_RECTS, self.viewport_vp != 0);
        bits.set(StateBits::VIEWPORT_DEPTH_RANGES, self.depth_range_vp != 0);
        bits.set(StateBits::SCISSOR_RECTS, self.scissor_vp != 0);
        bits.set(StateBits::BLEND_FUNC, self.blend_func_rt != 0);
        bits.set(StateBits::BLEND_EQUATION, self.blend_equation_rt != 0);
        bits.set(StateBits::COLOR_MASK, self.color_mask_rt != 0);
        bits
    }

    /// Re-establishes the flag/sub-mask invariant.
    fn normalize(&mut self) {
        const SUBMASKED: StateBits = StateBits::VIEWPORT_RECTS
            .union(StateBits::VIEWPORT_DEPTH_RANGES)
            .union(StateBits::SCISSOR_RECTS)
            .union(StateBits::BLEND_FUNC)
            .union(StateBits::BLEND_EQUATION)
            .union(StateBits::COLOR_MASK);

        let present = self.submask_bits();
        self.bits = (self.bits - SUBMASKED) | (self.bits & present);

        if !self.bits.contains(StateBits::VIEWPORT_RECTS) {
            self.viewport_vp = 0;
        }
        if !self.bits.contains(StateBits::VIEWPORT_DEPTH_RANGES) {
            self.depth_range_vp = 0;
        }
        if !self.bits.contains(StateBits::SCISSOR_RECTS) {
            self.scissor_vp = 0;
        }
        if !self.bits.contains(StateBits::BLEND_FUNC) {
            self.blend_func_rt = 0;
        }
        if !self.bits.contains(StateBits::BLEND_EQUATION) {
            self.blend_equation_rt = 0;
        }
        if !self.bits.contains(StateBits::COLOR_MASK) {
            self.color_mask_rt = 0;
        }
    }
}

impl From<StateBits> for DirtyStates {
    fn from(bits: StateBits) -> Self {
        Self::from_bits(bits)
    }
}

impl BitOr for DirtyStates {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            bits: self.bits | rhs.bits,
            viewport_vp: self.viewport_vp | rhs.viewport_vp,
            depth_range_vp: self.depth_range_vp | rhs.depth_range_vp,
            scissor_vp: self.scissor_vp | rhs.scissor_vp,
            blend_func_rt: self.blend_func_rt | rhs.blend_func_rt,
            blend_equation_rt: self.blend_equation_rt | rhs.blend_equation_rt,
            color_mask_rt: self.color_mask_rt | rhs.color_mask_rt,
        }
    }
}

impl BitOrAssign for DirtyStates {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// Iterates the indices of set bits, lowest first.
pub(crate) fn set_bits(mut mask: u32) -> impl Iterator<Item = usize> {
    std::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let index = mask.trailing_zeros() as usize;
        mask &= mask - 1;
        Some(index)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bits_fills_submasks() {
        let dirty = DirtyStates::from_bits(StateBits::VIEWPORT_RECTS | StateBits::COLOR_MASK);
        assert_eq!(dirty.viewport_vp, 0xFFFF);
        assert_eq!(dirty.color_mask_rt, 0xFF);
        assert_eq!(dirty.scissor_vp, 0);
    }

    #[test]
    fn test_difference_keeps_partial_families() {
        let mut a = DirtyStates::empty();
        a.mark_viewport(0);
        a.mark_viewport(3);
        a.insert(StateBits::DEPTH_WRITE);

        let mut b = DirtyStates::empty();
        b.mark_viewport(0);

        let d = a.difference(&b);
        assert!(d.bits.contains(StateBits::VIEWPORT_RECTS));
        assert_eq!(d.viewport_vp, 1 << 3);
        assert!(d.bits.contains(StateBits::DEPTH_WRITE));

        b.mark_viewport(3);
        let d = a.difference(&b);
        assert!(!d.bits.contains(StateBits::VIEWPORT_RECTS));
        assert_eq!(d.viewport_vp, 0);
    }

    #[test]
    fn test_difference_with_plain_bits() {
        let a = DirtyStates::from_bits(StateBits::PIPELINE_CONTROLLED);
        let b = DirtyStates::from_bits(StateBits::BLEND_FUNC | StateBits::CULL_MODE);
        let d = a.difference(&b);

        assert!(!d.bits.contains(StateBits::BLEND_FUNC));
        assert!(!d.bits.contains(StateBits::CULL_MODE));
        assert!(d.bits.contains(StateBits::BLEND_EQUATION));
        assert_eq!(d.blend_func_rt, 0);
    }

    #[test]
    fn test_intersection() {
        let mut a = DirtyStates::empty();
        a.mark_blend_func(1);
        a.mark_blend_func(2);
        let mut b = DirtyStates::empty();
        b.mark_blend_func(2);
        b.insert(StateBits::DEPTH_FUNC);

        let i = a.intersection(&b);
        assert_eq!(i.bits, StateBits::BLEND_FUNC);
        assert_eq!(i.blend_func_rt, 1 << 2);
    }

    #[test]
    fn test_set_bits_order() {
        let bits: Vec<_> = set_bits(0b1010_0001).collect();
        assert_eq!(bits, vec![0, 5, 7]);
    }
}
