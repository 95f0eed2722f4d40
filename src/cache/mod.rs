//! Caches owned by the device thread.
//!
//! - [`derived`]: generic deduplicating cache with resource back-edges
//! - [`download`]: best-fit pool of readback buffers
//! - [`object_cache`]: the concrete [`ObjectCache`] used by the executor

pub mod derived;
pub mod download;
pub mod object_cache;

pub use derived::DerivedCache;
pub use download::{DownloadArea, DownloadAreaPool};
pub use object_cache::{FrameBufferKey, ObjectCache};
