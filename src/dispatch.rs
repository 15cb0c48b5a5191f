//! Worker-context dispatch loop.
//!
//! The dispatcher alternates between two states: waiting, parked on the
//! notification signal with no pending events, and draining, processing
//! the request queue until it is empty. One request in, one command
//! execution, one response out, strictly in FIFO order.
//!
//! ## Queued-command coalescing
//!
//! A client may split a logical batch across several report frames by
//! tagging all but the last one `QueueCommands`. Before dispatching, the
//! worker scans the unread frames and rewrites consecutive `QueueCommands`
//! tags to `ExecuteCommands`, so the executor sees the whole run as one
//! batch. The scan can outpace the producer mid-batch; when it does, the
//! worker re-waits on the signal and resumes at the same scan position.
//! The exception is an observed overflow: then the remainder is treated as
//! not chainable, because a full queue means the producer cannot supply
//! the rest of the batch, and a dropped frame has broken it anyway.

use core::sync::atomic::Ordering;

use crate::frame::{CommandId, Frame};
use crate::pipeline::{AbortFlag, Pipeline, PipelineStats};
use crate::port::ReportSink;
use crate::signal::{Event, WaitNotify};

/// The per-command protocol interpreter, treated as a black box.
///
/// Synchronous: one request frame in, exactly one response frame of the
/// configured packet size out. The executor may consult and clear the
/// pipeline's [`AbortFlag`] between transfer steps.
pub trait CommandExecutor<const MAX: usize> {
    fn execute(&mut self, request: &[u8], response: &mut Frame<MAX>);
}

/// Worker-context facade of the pipeline.
///
/// Exactly one exists per pipeline (see [`Pipeline::split`]). The worker
/// is the sole consumer of the request queue and the sole producer of the
/// response queue.
pub struct Dispatcher<'a, S: WaitNotify, const CAP: usize, const MAX: usize> {
    shared: &'a Pipeline<CAP, MAX>,
    signal: &'a S,
}

impl<'a, S: WaitNotify, const CAP: usize, const MAX: usize> Dispatcher<'a, S, CAP, MAX> {
    pub(crate) fn new(shared: &'a Pipeline<CAP, MAX>, signal: &'a S) -> Self {
        Self { shared, signal }
    }

    /// Run the dispatch loop forever.
    pub fn run<E, K>(&mut self, executor: &mut E, sink: &mut K) -> !
    where
        E: CommandExecutor<MAX>,
        K: ReportSink,
    {
        loop {
            let events = self.wait_events();
            self.drain_events(events, executor, sink);
        }
    }

    /// One draining episode: process requests until the queue is empty.
    ///
    /// A no-op when no requests are queued; pending event bits are left
    /// untouched in that case. Exposed so a host harness can drive the
    /// loop step by step.
    pub fn drain<E, K>(&mut self, executor: &mut E, sink: &mut K)
    where
        E: CommandExecutor<MAX>,
        K: ReportSink,
    {
        if self.shared.requests.is_empty() {
            return;
        }
        let events = self.shared.events.take(Event::REQUEST | Event::OVERFLOW);
        self.drain_events(events, executor, sink);
    }

    /// The transfer-abort flag, for wiring into the command executor.
    pub fn abort_flag(&self) -> &'a AbortFlag {
        self.shared.abort_flag()
    }

    /// Cumulative traffic counters.
    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    /// Block until at least one wake event is pending, consuming the
    /// pending bits in one atomic read-and-clear.
    fn wait_events(&self) -> Event {
        loop {
            let events = self.shared.events.take(Event::REQUEST | Event::OVERFLOW);
            if !events.is_empty() {
                return events;
            }
            self.signal.wait();
        }
    }

    fn drain_events<E, K>(&mut self, mut events: Event, executor: &mut E, sink: &mut K)
    where
        E: CommandExecutor<MAX>,
        K: ReportSink,
    {
        while !self.shared.requests.is_empty() {
            self.coalesce_batch(&mut events);

            let Some(request) = self.shared.requests.try_pop() else {
                break;
            };
            let mut response = Frame::new();
            executor.execute(&request, &mut response);

            // Queues are provisioned equal, one response per request; a
            // full response queue means the counter discipline is broken.
            if self.shared.responses.try_push(response).is_err() {
                panic!("response queue full: pipeline invariant violated");
            }

            self.try_transmit_if_idle(sink);
        }
    }

    /// Rewrite the pending run of `QueueCommands` tags to
    /// `ExecuteCommands`, waiting for the rest of the batch when the scan
    /// catches up with the producer.
    ///
    /// `events` accumulates everything consumed from the flags word during
    /// this draining episode, so an overflow observed at any point keeps
    /// the remainder of the episode from waiting on frames that can never
    /// arrive.
    fn coalesce_batch(&self, events: &mut Event) {
        let mut n: u16 = 0;
        loop {
            match self.shared.requests.pending_tag(n) {
                Some(tag) if CommandId::is_queued(tag) => {
                    self.shared
                        .requests
                        .rewrite_pending_tag(n, CommandId::ExecuteCommands.into());
                    n = n.wrapping_add(1);
                }
                Some(_) => break,
                None => {
                    if events.contains(Event::OVERFLOW) {
                        break;
                    }
                    *events |= self.wait_events();
                }
            }
        }
        if n > 0 {
            log::trace!("coalesced {} queued-command frames", n);
        }
    }

    /// Start a transmission if the outbound path is idle and a response is
    /// queued. At most one report is in flight at any time; while one is,
    /// the completion interrupt owns the response queue's consumer role
    /// and this does nothing.
    fn try_transmit_if_idle<K: ReportSink>(&mut self, sink: &mut K) {
        if !self.shared.tx_idle.load(Ordering::Acquire) {
            return;
        }
        if let Some(frame) = self.shared.responses.try_pop() {
            self.shared.tx_idle.store(false, Ordering::Release);
            sink.send_report(&frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::CondvarSignal;

    #[derive(Default)]
    struct RecordingExecutor {
        seen: Vec<Vec<u8>>,
    }

    impl<const MAX: usize> CommandExecutor<MAX> for RecordingExecutor {
        fn execute(&mut self, request: &[u8], response: &mut Frame<MAX>) {
            self.seen.push(request.to_vec());
            response.extend_from_slice(request).unwrap();
            response.resize(MAX, 0).unwrap();
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<Vec<u8>>,
    }

    impl ReportSink for RecordingSink {
        fn send_report(&mut self, report: &[u8]) {
            self.sent.push(report.to_vec());
        }
    }

    /// Signal for cases where the dispatcher must never suspend.
    struct NoWaitSignal;

    impl WaitNotify for NoWaitSignal {
        fn wait(&self) {
            panic!("dispatcher suspended unexpectedly");
        }
        fn notify(&self) {}
    }

    #[test]
    fn test_drain_of_empty_queue_is_a_noop() {
        let signal = NoWaitSignal;
        let mut pipeline: Pipeline<4, 8> = Pipeline::new();
        pipeline.events.set(Event::OVERFLOW);
        let (_port, mut dispatcher) = pipeline.split(&signal);
        let mut executor = RecordingExecutor::default();
        let mut sink = RecordingSink::default();

        dispatcher.drain(&mut executor, &mut sink);

        assert!(executor.seen.is_empty());
        assert!(sink.sent.is_empty());
        // Pending event bits are left for the next wake
        assert_eq!(dispatcher.shared.events.peek(), Event::OVERFLOW);
    }

    #[test]
    fn test_single_request_round_trip() {
        let signal = NoWaitSignal;
        let mut pipeline: Pipeline<4, 8> = Pipeline::new();
        let mut executor = RecordingExecutor::default();
        let mut sink = RecordingSink::default();
        {
            let (mut port, mut dispatcher) = pipeline.split(&signal);
            port.on_report_received(&[0x02, 0xAB]);
            dispatcher.drain(&mut executor, &mut sink);
        }

        assert_eq!(executor.seen, vec![vec![0x02, 0xAB]]);
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(sink.sent[0][0], 0x02);
        assert_eq!(sink.sent[0].len(), 8);
        // The sent report is in flight until the completion callback
        assert!(!pipeline.tx_idle.load(Ordering::Acquire));
        let stats = pipeline.stats();
        assert_eq!(stats.requests_handled, 1);
        assert_eq!(stats.responses_queued, 1);
        assert_eq!(stats.responses_sent, 1);
    }

    #[test]
    fn test_single_report_in_flight() {
        let signal = NoWaitSignal;
        let mut pipeline: Pipeline<4, 8> = Pipeline::new();
        let mut executor = RecordingExecutor::default();
        let mut sink = RecordingSink::default();
        {
            let (mut port, mut dispatcher) = pipeline.split(&signal);
            port.on_report_received(&[0x02, 1]);
            port.on_report_received(&[0x02, 2]);
            port.on_report_received(&[0x02, 3]);
            dispatcher.drain(&mut executor, &mut sink);
        }

        // All three executed, but only the first response went out: the
        // other two wait for completion callbacks.
        assert_eq!(executor.seen.len(), 3);
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(pipeline.responses.len(), 2);

        // Completions deliver the rest in order, then the path goes idle
        let signal = CondvarSignal::new();
        let (mut port, _dispatcher) = pipeline.split(&signal);
        assert_eq!(&port.on_report_sent().unwrap()[..2], &[0x02, 2]);
        assert_eq!(&port.on_report_sent().unwrap()[..2], &[0x02, 3]);
        assert!(port.on_report_sent().is_none());
    }

    #[test]
    fn test_coalesces_full_batch_in_queue() {
        let signal = NoWaitSignal;
        let mut pipeline: Pipeline<4, 8> = Pipeline::new();
        let mut executor = RecordingExecutor::default();
        let mut sink = RecordingSink::default();
        {
            let (mut port, mut dispatcher) = pipeline.split(&signal);
            port.on_report_received(&[0x7E, 1]);
            port.on_report_received(&[0x7E, 2]);
            port.on_report_received(&[0x7F, 3]);
            dispatcher.drain(&mut executor, &mut sink);
        }

        // Every frame of the batch reached the executor retagged, in order
        assert_eq!(
            executor.seen,
            vec![vec![0x7F, 1], vec![0x7F, 2], vec![0x7F, 3]]
        );
    }

    #[test]
    fn test_scan_stops_on_overflow_instead_of_waiting() {
        let signal = NoWaitSignal;
        let mut pipeline: Pipeline<2, 8> = Pipeline::new();
        let mut executor = RecordingExecutor::default();
        let mut sink = RecordingSink::default();
        {
            let (mut port, mut dispatcher) = pipeline.split(&signal);
            port.on_report_received(&[0x7E, 1]);
            port.on_report_received(&[0x7E, 2]);
            // Queue full: this one is dropped and raises the overflow bit
            port.on_report_received(&[0x7E, 3]);
            // NoWaitSignal panics if the scan tries to suspend
            dispatcher.drain(&mut executor, &mut sink);
        }

        assert_eq!(executor.seen, vec![vec![0x7F, 1], vec![0x7F, 2]]);
        assert_eq!(pipeline.stats().requests_dropped, 1);
    }

    #[test]
    fn test_scan_resumes_when_batch_completes_mid_drain() {
        let signal = CondvarSignal::new();
        let mut pipeline: Pipeline<4, 8> = Pipeline::new();
        let (mut port, mut dispatcher) = pipeline.split(&signal);
        let mut executor = RecordingExecutor::default();
        let mut sink = RecordingSink::default();

        // Two batch frames arrive before the worker starts draining; the
        // batch terminator arrives while the scan is suspended on them.
        port.on_report_received(&[0x7E, 1]);
        port.on_report_received(&[0x7E, 2]);

        std::thread::scope(|scope| {
            scope.spawn(|| dispatcher.drain(&mut executor, &mut sink));
            std::thread::sleep(std::time::Duration::from_millis(50));
            port.on_report_received(&[0x7F, 3]);
        });

        // One contiguous batch: no frame dropped, none duplicated, FIFO kept
        assert_eq!(
            executor.seen,
            vec![vec![0x7F, 1], vec![0x7F, 2], vec![0x7F, 3]]
        );
    }

    #[test]
    fn test_lone_queued_frame_waits_for_successor() {
        let signal = CondvarSignal::new();
        let mut pipeline: Pipeline<4, 8> = Pipeline::new();
        let (mut port, mut dispatcher) = pipeline.split(&signal);
        let mut executor = RecordingExecutor::default();
        let mut sink = RecordingSink::default();

        port.on_report_received(&[0x7E, 1]);

        std::thread::scope(|scope| {
            scope.spawn(|| dispatcher.drain(&mut executor, &mut sink));
            std::thread::sleep(std::time::Duration::from_millis(50));
            port.on_report_received(&[0x7F, 2]);
        });

        assert_eq!(executor.seen, vec![vec![0x7F, 1], vec![0x7F, 2]]);
    }

    #[test]
    fn test_cross_thread_pipeline_smoke() {
        let signal = CondvarSignal::new();
        let mut pipeline: Pipeline<8, 8> = Pipeline::new();
        let (mut port, mut dispatcher) = pipeline.split(&signal);
        let mut executor = RecordingExecutor::default();
        let mut sink = RecordingSink::default();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                // Keep draining until every request has been handled
                while dispatcher.stats().requests_handled < 5 {
                    dispatcher.drain(&mut executor, &mut sink);
                    std::thread::yield_now();
                }
            });
            for i in 0..5u8 {
                port.on_report_received(&[0x05, i]);
            }
        });

        assert_eq!(executor.seen.len(), 5);
        for (i, request) in executor.seen.iter().enumerate() {
            assert_eq!(request.as_slice(), &[0x05, i as u8]);
        }
        // Exactly one report went out; the rest queue behind the in-flight one
        assert_eq!(sink.sent.len(), 1);
    }
}
