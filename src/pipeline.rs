//! Shared pipeline state and the two-context split.
//!
//! A single [`Pipeline`] value owns everything both execution contexts
//! touch: the request and response queues, the outbound idle flag, the
//! event flags and the transfer-abort flag. [`Pipeline::split`] hands out
//! exactly one interrupt-context facade ([`HidPort`]) and one
//! worker-context facade ([`Dispatcher`]); the `&mut` receiver makes a
//! second split of the same pipeline impossible, which is what pins each
//! mutation role to one context.
//!
//! ## Field ownership
//!
//! | field            | written by            | read by        |
//! |------------------|-----------------------|----------------|
//! | request queue    | port (in), worker (out) | both          |
//! | response queue   | worker (in), port/worker (out, idle-gated) | both |
//! | `events`         | port (set), worker (take) | both        |
//! | `tx_idle`        | sender of a report (false), port completion (true) | both |
//! | `abort`          | port (set), executor (take) | both       |
//!
//! The response queue's consumer role is handed between contexts by
//! `tx_idle`: the worker pops only while the path is idle (no completion
//! interrupt can fire), the port pops only on completion of an in-flight
//! report (worker keeps its hands off while `tx_idle` is false). The two
//! conditions are mutually exclusive, so the queue still has a single
//! consumer at any instant.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::dispatch::Dispatcher;
use crate::port::HidPort;
use crate::queue::FrameQueue;
use crate::signal::{EventFlags, WaitNotify};

/// Cooperative transfer-abort flag.
///
/// Set by the port when an abort report arrives; consulted and cleared by
/// the command executor between transfer steps. Aborting never cancels
/// frames already queued, those still drain normally.
pub struct AbortFlag {
    requested: AtomicBool,
}

impl AbortFlag {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Request an abort. Interrupt context.
    pub fn set(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Whether an abort is pending, without consuming it.
    pub fn is_set(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Consume a pending abort request. Executor context.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the pipeline's cumulative traffic counters.
///
/// The per-queue counts are wrapping `u16` values taken straight from the
/// ring counters; the drop count is a separate producer-owned counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipelineStats {
    /// Request frames accepted into the queue (wrapping)
    pub requests_received: u16,
    /// Request frames handed to the executor (wrapping)
    pub requests_handled: u16,
    /// Request frames dropped on overflow
    pub requests_dropped: u32,
    /// Response frames produced by the executor (wrapping)
    pub responses_queued: u16,
    /// Response frames handed to the transport for transmission (wrapping)
    pub responses_sent: u16,
}

/// Process-wide pipeline state, one instance per HID interface.
///
/// `CAP` is the queue depth in frames, `MAX` the packet size in bytes.
/// The two queues are provisioned equal on purpose: every request produces
/// exactly one response, so the response queue can never fill before the
/// request queue drains.
pub struct Pipeline<const CAP: usize, const MAX: usize> {
    pub(crate) requests: FrameQueue<CAP, MAX>,
    pub(crate) responses: FrameQueue<CAP, MAX>,
    pub(crate) events: EventFlags,
    pub(crate) abort: AbortFlag,
    /// True while the IN endpoint holds no report awaiting completion
    pub(crate) tx_idle: AtomicBool,
    /// Requests dropped on overflow, port-owned
    pub(crate) dropped: AtomicU32,
}

impl<const CAP: usize, const MAX: usize> Pipeline<CAP, MAX> {
    /// Create a pipeline in its startup state: queues empty, outbound path
    /// idle, no events and no abort pending.
    pub const fn new() -> Self {
        Self {
            requests: FrameQueue::new(),
            responses: FrameQueue::new(),
            events: EventFlags::new(),
            abort: AbortFlag::new(),
            tx_idle: AtomicBool::new(true),
            dropped: AtomicU32::new(0),
        }
    }

    /// Split into the interrupt-context and worker-context facades.
    ///
    /// `signal` is the host wait/notify primitive shared by both sides:
    /// the port notifies it, the dispatcher parks on it.
    pub fn split<'a, S: WaitNotify>(
        &'a mut self,
        signal: &'a S,
    ) -> (HidPort<'a, S, CAP, MAX>, Dispatcher<'a, S, CAP, MAX>) {
        let shared = &*self;
        (HidPort::new(shared, signal), Dispatcher::new(shared, signal))
    }

    /// Re-initialize to the startup state, as on USB re-enumeration.
    ///
    /// Exclusive access required: both facades must be gone before the
    /// class instance is re-initialized.
    pub fn reset(&mut self) {
        self.requests.reset();
        self.responses.reset();
        self.events.reset();
        self.abort = AbortFlag::new();
        self.tx_idle = AtomicBool::new(true);
        self.dropped = AtomicU32::new(0);
    }

    /// Cumulative traffic counters.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            requests_received: self.requests.pushed(),
            requests_handled: self.requests.popped(),
            requests_dropped: self.dropped.load(Ordering::Acquire),
            responses_queued: self.responses.pushed(),
            responses_sent: self.responses.popped(),
        }
    }

    /// The transfer-abort flag, for wiring into the command executor.
    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    pub(crate) fn note_drop(&self) {
        self.dropped.fetch_add(1, Ordering::AcqRel);
    }
}

impl<const CAP: usize, const MAX: usize> Default for Pipeline<CAP, MAX> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::signal::CondvarSignal;

    #[test]
    fn test_new_pipeline_is_idle_and_empty() {
        let pipeline: Pipeline<4, 64> = Pipeline::new();
        assert!(pipeline.tx_idle.load(Ordering::Acquire));
        assert!(!pipeline.abort_flag().is_set());
        assert_eq!(pipeline.stats(), PipelineStats::default());
    }

    #[test]
    fn test_abort_flag_take_consumes() {
        let abort = AbortFlag::new();
        assert!(!abort.take());
        abort.set();
        assert!(abort.is_set());
        assert!(abort.take());
        assert!(!abort.is_set());
        assert!(!abort.take());
    }

    #[test]
    fn test_reset_restores_startup_state() {
        let signal = CondvarSignal::new();
        let mut pipeline: Pipeline<4, 64> = Pipeline::new();
        {
            let (mut port, _dispatcher) = pipeline.split(&signal);
            port.on_report_received(&[0x02, 1, 2, 3]);
            port.on_report_received(&[0x07]);
        }
        pipeline
            .responses
            .try_push(Frame::from_slice(&[0xFF]).unwrap())
            .unwrap();
        pipeline.tx_idle.store(false, Ordering::Release);

        pipeline.reset();

        assert!(pipeline.requests.is_empty());
        assert!(pipeline.responses.is_empty());
        assert!(pipeline.tx_idle.load(Ordering::Acquire));
        assert!(!pipeline.abort_flag().is_set());
        assert_eq!(pipeline.events.peek(), crate::signal::Event::empty());
        assert_eq!(pipeline.stats(), PipelineStats::default());
    }

    #[test]
    fn test_stats_track_counters() {
        let signal = CondvarSignal::new();
        let mut pipeline: Pipeline<2, 64> = Pipeline::new();
        let (mut port, _dispatcher) = pipeline.split(&signal);
        port.on_report_received(&[0x02]);
        port.on_report_received(&[0x02]);
        port.on_report_received(&[0x02]); // dropped, queue full

        let stats = port.stats();
        assert_eq!(stats.requests_received, 2);
        assert_eq!(stats.requests_handled, 0);
        assert_eq!(stats.requests_dropped, 1);
    }
}
