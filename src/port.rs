//! Interrupt-context adapter between the HID device stack and the queues.
//!
//! The USB stack calls into [`HidPort`] from its class callbacks:
//!
//! - OUT report completion → [`HidPort::on_report_received`]
//! - IN report completion → [`HidPort::on_report_sent`]
//! - control-endpoint / idle-period GetReport → [`HidPort::on_report_polled`]
//!
//! None of these ever block. A full request queue drops the report and
//! raises the overflow event; the worker finds out through the event flags
//! on its own schedule, never through an error crossing the interrupt
//! boundary.

use core::sync::atomic::Ordering;

use crate::frame::{CommandId, Frame};
use crate::pipeline::{AbortFlag, Pipeline, PipelineStats};
use crate::signal::{Event, WaitNotify};

/// Transmit primitive supplied by the transport collaborator.
///
/// `send_report` starts one IN transfer; completion is reported back
/// through [`HidPort::on_report_sent`]. The pipeline issues a new send
/// only after the idle flag confirms the previous completion was observed,
/// so at most one report is ever in flight.
pub trait ReportSink {
    fn send_report(&mut self, report: &[u8]);
}

/// Interrupt-context facade of the pipeline.
///
/// Exactly one exists per pipeline (see [`Pipeline::split`]); the single
/// producer contract of the transport boundary maps onto the single
/// instance.
pub struct HidPort<'a, S: WaitNotify, const CAP: usize, const MAX: usize> {
    shared: &'a Pipeline<CAP, MAX>,
    signal: &'a S,
}

impl<'a, S: WaitNotify, const CAP: usize, const MAX: usize> HidPort<'a, S, CAP, MAX> {
    pub(crate) fn new(shared: &'a Pipeline<CAP, MAX>, signal: &'a S) -> Self {
        Self { shared, signal }
    }

    /// Handle a completed OUT transfer.
    ///
    /// Zero-length reports are ignored. An abort report sets the abort
    /// flag and is not enqueued. Everything else is queued for the worker;
    /// when the queue is full the report is discarded (the documented
    /// degradation under sustained overrun) and the overflow event raised.
    /// The request event is raised in both cases so the worker wakes and
    /// can observe the overflow.
    pub fn on_report_received(&mut self, report: &[u8]) {
        if report.is_empty() {
            return;
        }
        if report[0] == u8::from(CommandId::TransferAbort) {
            self.shared.abort.set();
            log::debug!("transfer abort requested");
            return;
        }

        // Reports longer than the packet size cannot occur on a conformant
        // transport; keep the slot-sized prefix rather than dropping.
        let len = report.len().min(MAX);
        let Ok(frame) = Frame::from_slice(&report[..len]) else {
            return;
        };

        match self.shared.requests.try_push(frame) {
            Ok(()) => self.shared.events.set(Event::REQUEST),
            Err(_discarded) => {
                self.shared.note_drop();
                self.shared.events.set(Event::REQUEST | Event::OVERFLOW);
                log::warn!("request queue full, report dropped");
            }
        }
        self.signal.notify();
    }

    /// Handle a polled input-report request (control endpoint or idle
    /// period).
    ///
    /// Always empty: genuine responses travel only through the
    /// completion-triggered path, the polled path carries no data.
    pub fn on_report_polled(&self) -> Frame<MAX> {
        Frame::new()
    }

    /// Handle an IN transfer completion: the endpoint can take the next
    /// report.
    ///
    /// Returns the next queued response for transmission, or `None` after
    /// marking the outbound path idle. Once idle, the worker takes over
    /// starting transmissions.
    pub fn on_report_sent(&mut self) -> Option<Frame<MAX>> {
        match self.shared.responses.try_pop() {
            Some(frame) => Some(frame),
            None => {
                self.shared.tx_idle.store(true, Ordering::Release);
                None
            }
        }
    }

    /// The transfer-abort flag, for wiring into the command executor.
    pub fn abort_flag(&self) -> &'a AbortFlag {
        self.shared.abort_flag()
    }

    /// Cumulative traffic counters.
    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }
}
