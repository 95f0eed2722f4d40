//! Staged uploads.
//!
//! - [`staging`]: bounded staging memory ([`StagingPool`], [`StagingArea`])
//! - [`provider`]: where upload bytes come from ([`SourceDataProvider`])
//! - [`layout`]: how an upload is split into staging atoms
//! - [`queue`]: the asynchronous [`CopyQueue`]

pub mod layout;
pub mod provider;
pub mod queue;
pub mod staging;

pub use layout::{AtomRegion, CopyRange, STAGING_ALIGNMENT, StagingAtom, StagingLayout};
pub use provider::{MemorySource, SourceDataProvider};
pub use queue::{CopyJob, CopyJobId, CopyQueue, CopyStats, JobTimings};
pub use staging::{StagingArea, StagingPool};
