//! Saved kernel context of a task.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Resume point of a task that is not running: the kernel stack pointer the
/// context-switch routine left behind.
///
/// A task may be enqueued (and stolen by another core) before its outgoing
/// switch has finished saving registers. `live` closes that window: it is
/// set while some core executes on the context and cleared by
/// [`ContextSlot::save`]; [`ContextSlot::resume`] waits for it to clear.
#[derive(Debug, Default)]
pub struct ContextSlot {
    sp: AtomicU64,
    live: AtomicBool,
}

impl ContextSlot {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sp: AtomicU64::new(0),
            live: AtomicBool::new(false),
        }
    }

    /// Initial resume point of a task that has never run.
    pub fn prepare(&self, sp: u64) {
        self.sp.store(sp, Ordering::Relaxed);
        self.live.store(false, Ordering::Release);
    }

    /// The calling core already executes on this context (boot idle task).
    pub fn occupy(&self) {
        self.live.store(true, Ordering::Release);
    }

    /// The outgoing registers are on the stack at `sp`; the context may now
    /// be resumed anywhere.
    pub fn save(&self, sp: u64) {
        self.sp.store(sp, Ordering::Relaxed);
        self.live.store(false, Ordering::Release);
    }

    /// Claim the context and return the stack pointer to switch to.
    pub fn resume(&self) -> u64 {
        while self
            .live
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        self.sp.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stack_pointer(&self) -> u64 {
        self.sp.load(Ordering::Relaxed)
    }
}
