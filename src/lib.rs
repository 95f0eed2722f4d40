//! Myth Device
//!
//! Device-thread runtime: turns recorded command streams into backend calls
//! while managing the lifetime of GPU objects and the asynchronous upload of
//! their contents.
//!
//! - [`object`]: handles, the [`ObjectRegistry`] and the concrete objects
//! - [`copy`]: staging memory and the asynchronous [`CopyQueue`]
//! - [`cache`]: derived objects (frame buffers, samplers, readback areas)
//! - [`state`]: render state snapshots, dirty tracking and binding tables
//! - [`command`]: opcodes and command streams
//! - [`executor`]: the [`FrameExecutor`]
//! - [`frame`]: frames in flight and completion callbacks
//! - [`device`]: the [`DeviceThread`] tying it all together
//! - [`backend`]: the [`Backend`] trait and a recording implementation

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod cache;
pub mod command;
pub mod config;
pub mod copy;
pub mod device;
pub mod errors;
pub mod executor;
pub mod frame;
pub mod object;
pub mod state;

pub use backend::recording::RecordingBackend;
pub use backend::{Backend, NativeHandle};
pub use cache::ObjectCache;
pub use command::{CommandStream, CommandWriter, DownloadSink, Opcode};
pub use config::DeviceConfig;
pub use copy::{CopyQueue, CopyRange, MemorySource, SourceDataProvider};
pub use device::{DeviceThread, FrameReport};
pub use errors::{DeviceError, Result};
pub use executor::{ExecutionStats, FrameExecutor, PassPhase};
pub use frame::{Frame, FrameQueue};
pub use object::{DeviceObject, ObjectId, ObjectRegistry, ObjectType};
pub use state::{RenderStates, StateTracker};
