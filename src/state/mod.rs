//! Render state and binding caches owned by the device thread.
//!
//! - [`bits`]: dirty-state flags and sub-masks
//! - [`values`]: the [`RenderStates`] snapshot and backend [`StateCommand`]s
//! - [`tracker`]: [`StateTracker`], the dirty-bit driven state cache
//! - [`bindings`]: [`BindingTables`], the currently bound resources

pub mod bindings;
pub mod bits;
pub mod tracker;
pub mod values;

pub use bindings::BindingTables;
pub use bits::{DirtyStates, StateBits};
pub use tracker::{StateTracker, StencilFaces};
pub use values::{
    BlendEquation, BlendFunc, DepthBias, DepthRange, MAX_COLOR_TARGETS, MAX_VIEWPORTS,
    RenderStates, ScissorRect, StateCommand, StencilFaceState, StencilFunc, StencilOps,
    TargetState, Viewport,
};
