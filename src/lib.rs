//! # CMSIS-DAP HID Report Pipeline
//!
//! This crate provides the request/response pipelining engine that sits
//! between a USB HID device stack and the DAP command interpreter:
//!
//! - **Frame Queues**: Fixed-capacity SPSC ring queues of report frames
//! - **HID Port**: Interrupt-context adapter for OUT/IN report events
//! - **Dispatcher**: Worker loop draining requests and queueing responses
//! - **Event Signal**: Atomic wake flags plus a host wait/notify primitive
//!
//! ## Architecture
//!
//! ```text
//! USB OUT irq ──► HidPort ──► request queue ──► Dispatcher ──► executor
//!                    │                              │
//!                    │◄──── response queue ◄────────┘
//!                    ▼
//! USB IN irq ◄── send_report (one report in flight at a time)
//! ```
//!
//! ## No-Allocation Strategy
//!
//! All storage is statically sized: report slots are `heapless::Vec` values
//! inside compile-time-sized ring queues. The interrupt side never blocks
//! (full queue drops the report and raises an overflow event), and the
//! worker side suspends only on its notification signal. Index/counter
//! ownership is split between the two contexts, so no mutex is needed.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod dispatch;
pub mod frame;
pub mod pipeline;
pub mod port;
pub mod queue;
pub mod signal;

// Re-export main types for convenience
pub use dispatch::{CommandExecutor, Dispatcher};
pub use frame::{CommandId, Frame};
pub use pipeline::{AbortFlag, Pipeline, PipelineStats};
pub use port::{HidPort, ReportSink};
pub use queue::FrameQueue;
#[cfg(feature = "std")]
pub use signal::CondvarSignal;
pub use signal::{Event, EventFlags, WaitNotify};

/// Library version for probe identification strings
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Report size of the full-speed HID interface, bytes per frame
pub const DEFAULT_PACKET_SIZE: usize = 64;

/// Frames per ring queue; request and response queues are provisioned equal
pub const DEFAULT_PACKET_COUNT: usize = 8;

/// Pipeline instantiated with the default full-speed HID geometry
pub type DefaultPipeline = Pipeline<DEFAULT_PACKET_COUNT, DEFAULT_PACKET_SIZE>;
