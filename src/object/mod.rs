//! Device Objects
//!
//! Every backend object the runtime hands out (buffers, images, views,
//! samplers, pipelines, outputs) is addressed by an opaque [`ObjectId`] and
//! implements the small [`DeviceObject`] capability set. The
//! [`ObjectRegistry`] maps ids back to live objects and detects stale ids.
//!
//! Objects never hold raw references to each other: a view stores the id of
//! its parent and looks it up through the registry whenever it needs it.

pub mod desc;
pub mod registry;
pub mod resources;

use std::any::Any;
use std::fmt;

use crate::backend::Backend;
use crate::copy::{CopyRange, StagingAtom, StagingLayout};
use crate::errors::Result;

pub use desc::{
    BufferDesc, BufferUsage, BufferViewDesc, ComputePipelineDesc, DescriptorElement,
    DescriptorKind, DescriptorLayout, GraphicsPipelineDesc, ImageDesc, ImageViewDesc, OutputDesc,
    SamplerDesc, ShaderDesc, VertexLayout, VertexStream,
};
pub use registry::{ObjectRegistry, PurgeReport};
pub use resources::{
    Buffer, BufferView, ComputePipeline, GraphicsPipeline, Image, ImageView, Output, Sampler,
};

/// Opaque handle to a registered device object.
///
/// Composed of a slot index and the generation the slot had when the object
/// was registered. Generations come from a single global counter, so an id
/// never becomes valid again once its object is unregistered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct ObjectId {
    generation: u64,
    index: u32,
}

impl ObjectId {
    /// The empty handle. Never resolves.
    pub const EMPTY: Self = Self {
        generation: 0,
        index: 0,
    };

    #[inline]
    pub(crate) fn new(index: u32, generation: u64) -> Self {
        Self { generation, index }
    }

    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generation == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "#{}@{}", self.index, self.generation)
        }
    }
}

/// Runtime type tag of a device object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ObjectType {
    Buffer,
    /// Buffer range bound as a uniform (constant) buffer.
    ConstantBufferView,
    /// Buffer range bound as a read/write storage buffer.
    StorageBufferView,
    Image,
    SampledImageView,
    WritableImageView,
    RenderTargetView,
    Sampler,
    GraphicsPipeline,
    ComputePipeline,
    /// Swapchain-like presentation target.
    Output,
}

/// Capability set shared by every object stored in the registry.
pub trait DeviceObject: Any + Send + Sync {
    /// The id this object was registered under.
    fn handle(&self) -> ObjectId;

    fn object_type(&self) -> ObjectType;

    /// Whether the object may be handed to the deferred-destruction queue
    /// right now.
    fn can_delete(&self) -> bool {
        true
    }

    /// Upload capability, for objects that accept staged copies.
    fn as_copy_target(&self) -> Option<&dyn CopyTarget> {
        None
    }

    /// Frees the native handles owned by this object. Called once, on the
    /// device thread, after the last frame using the object has retired.
    fn release_native(&self, _backend: &mut dyn Backend) {}

    fn label(&self) -> &str {
        ""
    }
}

impl dyn DeviceObject {
    /// Downcasts to a concrete object type.
    #[inline]
    #[must_use]
    pub fn downcast_ref<T: DeviceObject>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }
}

impl fmt::Debug for dyn DeviceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceObject")
            .field("handle", &self.handle())
            .field("type", &self.object_type())
            .field("label", &self.label())
            .finish()
    }
}

/// Upload capability of buffers and images.
pub trait CopyTarget {
    /// Computes where each piece of `range` lives in the source data and in
    /// the staging area.
    fn staging_layout(&self, range: &CopyRange) -> Result<StagingLayout>;

    /// Issues the device-side copy from filled staging bytes.
    fn copy_from_staging(&self, backend: &mut dyn Backend, staging: &[u8], atoms: &[StagingAtom]);
}
