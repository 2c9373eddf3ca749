//! Multi-flag wait/notify primitive shared by the pump and page workers

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// A fixed, named set of boolean flags backed by a single bitmask.
///
/// Implemented by the per-domain flag enums below. `COUNT` bounds the mask;
/// `bit` maps a flag to its position.
pub trait FlagSet: Copy + Eq {
    const COUNT: u32;

    fn bit(self) -> u32;
}

/// Window-level flags observed by UI code and the pump thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowFlag {
    /// The document is shutting down; the pump must exit.
    Close,
    /// A page finished rendering; observers should refresh.
    Update,
}

impl FlagSet for WindowFlag {
    const COUNT: u32 = 2;

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Document-level flags coordinating construction and the message pump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFlag {
    /// Document metadata is available from the engine.
    Info,
    /// The document handle exists; the pump may start draining.
    Create,
    /// The engine posted at least one message (level-triggered, reset by
    /// the pump before each drain).
    Message,
}

impl FlagSet for DocumentFlag {
    const COUNT: u32 = 3;

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Per-page lifecycle flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageFlag {
    /// Decoding was cancelled or failed; no bitmap will be produced.
    Aborted,
    /// The engine finished page analysis.
    Decoded,
    /// Terminal state: the worker is done, successfully or not.
    Rendered,
}

impl FlagSet for PageFlag {
    const COUNT: u32 = 3;

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Condition-variable-backed flag set.
///
/// All flags in a domain share one mutex and one condvar; every mutation
/// notifies all waiters. `wait`/`wait_for` wake on *any* flag change, so
/// callers loop on their own predicate (`check`).
pub struct Signal<F: FlagSet> {
    flags: Mutex<u32>,
    cv: Condvar,
    _marker: PhantomData<F>,
}

impl<F: FlagSet> Default for Signal<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FlagSet> Signal<F> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(0),
            cv: Condvar::new(),
            _marker: PhantomData,
        }
    }

    /// Snapshot a single flag.
    #[must_use]
    pub fn check(&self, flag: F) -> bool {
        let flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        *flags & flag.bit() != 0
    }

    /// Block until any flag changes. Returns immediately if `flag` is
    /// already set. Spurious wakeups are possible; loop on `check`.
    pub fn wait(&self, flag: Option<F>) {
        let flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = flag {
            if *flags & f.bit() != 0 {
                return;
            }
        }
        let _unused = self.cv.wait(flags).unwrap_or_else(PoisonError::into_inner);
    }

    /// Bounded variant of [`wait`](Self::wait). On timeout it returns with
    /// no guarantee about the flag.
    pub fn wait_for(&self, timeout: Duration, flag: Option<F>) {
        let flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = flag {
            if *flags & f.bit() != 0 {
                return;
            }
        }
        let _unused = self
            .cv
            .wait_timeout(flags, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn set(&self, flag: F) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        *flags |= flag.bit();
        self.cv.notify_all();
    }

    pub fn set_all(&self) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        *flags = (1 << F::COUNT) - 1;
        self.cv.notify_all();
    }

    /// Clear one flag. Notifies waiters so level-triggered consumers can
    /// re-arm without missing a concurrent `set`.
    pub fn reset(&self, flag: F) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        *flags &= !flag.bit();
        self.cv.notify_all();
    }

    pub fn reset_all(&self) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        *flags = 0;
        self.cv.notify_all();
    }
}
