//! Single-slot, latest-wins hand-off from the capture interrupt to the
//! control loop.
//!
//! The slot is only written and read-and-cleared inside a critical section, so
//! the control loop can never see a half-written sample. The pending bit is a
//! plain atomic and can be polled without masking interrupts.
//!
//! ```rust,ignore
//! static MAILBOX: Mailbox = Mailbox::new();
//!
//! // capture interrupt
//! MAILBOX.post(sample);
//!
//! // foreground
//! if let Some(sample) = MAILBOX.take() {
//!     // ...
//! }
//! ```

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::capture::CaptureSample;

pub struct Mailbox {
    slot: Mutex<CriticalSectionRawMutex, Cell<Option<CaptureSample>>>,
    pending: AtomicBool,
    overwritten: AtomicU32,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(None)),
            pending: AtomicBool::new(false),
            overwritten: AtomicU32::new(0),
        }
    }

    /// Stores `sample`, replacing one that was not taken yet.
    pub fn post(&self, sample: CaptureSample) {
        self.slot.lock(|slot| {
            if slot.replace(Some(sample)).is_some() {
                self.overwritten.fetch_add(1, Ordering::Relaxed);
            }
            self.pending.store(true, Ordering::Release);
        });
    }

    /// Whether a sample arrived since the last [`take`](Self::take).
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns the most recent sample and empties the slot.
    pub fn take(&self) -> Option<CaptureSample> {
        self.slot.lock(|slot| {
            self.pending.store(false, Ordering::Release);
            slot.take()
        })
    }

    /// Samples dropped because a newer one arrived before they were taken.
    pub fn overwritten(&self) -> u32 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
