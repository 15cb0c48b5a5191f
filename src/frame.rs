//! Report frames and the command tags the pipeline inspects.
//!
//! A frame is one HID report worth of bytes. The pipeline treats it as
//! opaque except for byte 0, the command tag: three tag values control
//! queueing behavior before a frame ever reaches the command interpreter.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One report frame, at most `MAX` bytes (the transport's packet size).
///
/// OUT reports shorter than the packet size keep their received length;
/// responses are produced at the full packet size by the executor.
pub type Frame<const MAX: usize> = heapless::Vec<u8, MAX>;

/// Command tag bytes with queueing semantics.
///
/// These are the only tag values the pipeline interprets itself. Any other
/// tag passes through to the command executor unmodified, which owns
/// validation of command-specific content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandId {
    /// Cooperative cancellation of an in-progress transfer. Consumed by the
    /// port, never enqueued.
    TransferAbort = 0x07,
    /// More command packets belong to the same batch; rewritten to
    /// `ExecuteCommands` once the batch boundary is known.
    QueueCommands = 0x7E,
    /// Execute the accumulated batch now.
    ExecuteCommands = 0x7F,
}

impl CommandId {
    /// Whether `tag` marks a frame as part of an open command batch.
    pub fn is_queued(tag: u8) -> bool {
        tag == u8::from(CommandId::QueueCommands)
    }
}
