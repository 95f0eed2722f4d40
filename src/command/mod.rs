//! Command streams interpreted by the [`FrameExecutor`](crate::executor::FrameExecutor).
//!
//! A stream is recorded on the submission side with a [`CommandWriter`] and
//! replayed on the device thread strictly in order. Opcodes reference
//! objects by [`ObjectId`](crate::object::ObjectId) only, so a stream may
//! outlive some of the objects it mentions.

pub mod opcode;
pub mod stream;

pub use opcode::{DownloadSink, ImageLayout, Opcode, PassTarget};
pub use stream::{CommandStream, CommandWriter};
