//! Wake-up signalling between the transport interrupt and the worker.
//!
//! Two pieces cooperate here:
//!
//! - [`EventFlags`], an atomic bit word recording *why* the worker should
//!   wake. The interrupt side sets bits with an atomic OR; the worker
//!   consumes them with an atomic fetch-and-clear, so a bit set
//!   concurrently with the clear is never lost.
//! - [`WaitNotify`], the host-provided suspension primitive the worker
//!   parks on. On bare metal this is typically WFE/SEV or an RTOS event
//!   flag; on a host build the [`CondvarSignal`] implementation is used.
//!
//! The flags word carries the information, the signal only carries the
//! wake-up; the worker always re-reads the flags after waking, so spurious
//! wakeups are harmless.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Wake reasons raised by the transport interrupt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Event: u32 {
        /// A request report arrived (or arrived and could not be queued)
        const REQUEST = 0x01;
        /// A request report was dropped because the queue was full
        const OVERFLOW = 0x80;
    }
}

/// Atomic event-flags word shared between the two contexts.
pub struct EventFlags {
    bits: AtomicU32,
}

impl EventFlags {
    /// Create a cleared flags word.
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Raise events. Producer side (interrupt context).
    pub fn set(&self, events: Event) {
        self.bits.fetch_or(events.bits(), Ordering::AcqRel);
    }

    /// Consume any pending events in `mask`, clearing them atomically.
    /// Consumer side (worker context).
    ///
    /// A read-and-clear in one atomic step: an event raised concurrently
    /// is either returned here or left set for the next call, never lost.
    pub fn take(&self, mask: Event) -> Event {
        let prev = self.bits.fetch_and(!mask.bits(), Ordering::AcqRel);
        Event::from_bits_truncate(prev) & mask
    }

    /// Snapshot of the pending events without clearing them.
    pub fn peek(&self) -> Event {
        Event::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    /// Clear everything. Exclusive access required.
    pub fn reset(&mut self) {
        self.bits.store(0, Ordering::Release);
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Host suspension primitive the worker parks on.
///
/// `notify` is called from interrupt context and must never block. A
/// notification delivered while the worker is not waiting must make the
/// worker's *next* `wait` return promptly (park-token semantics, as with
/// SEV/WFE or `thread::park`). Spurious returns from `wait` are allowed;
/// the caller re-checks its condition in a loop.
pub trait WaitNotify {
    /// Suspend the calling context until notified.
    fn wait(&self);

    /// Wake the waiting context. Safe to call from interrupt context.
    fn notify(&self);
}

/// Condvar-backed [`WaitNotify`] for host builds and tests.
#[cfg(feature = "std")]
pub struct CondvarSignal {
    pending: std::sync::Mutex<bool>,
    cvar: std::sync::Condvar,
}

#[cfg(feature = "std")]
impl CondvarSignal {
    pub fn new() -> Self {
        Self {
            pending: std::sync::Mutex::new(false),
            cvar: std::sync::Condvar::new(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for CondvarSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl WaitNotify for CondvarSignal {
    fn wait(&self) {
        let mut pending = self.pending.lock().unwrap();
        while !*pending {
            pending = self.cvar.wait(pending).unwrap();
        }
        *pending = false;
    }

    fn notify(&self) {
        *self.pending.lock().unwrap() = true;
        self.cvar.notify_one();
    }
}
