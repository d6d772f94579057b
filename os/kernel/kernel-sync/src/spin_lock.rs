use core::{
    cell::UnsafeCell,
    fmt,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, Ordering},
};

/// FIFO (ticket) spinlock.
pub struct SpinLock<T> {
    /// Next ticket to hand out.
    next: AtomicU32,
    /// Ticket currently allowed into the critical section.
    serving: AtomicU32,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            next: AtomicU32::new(0),
            serving: AtomicU32::new(0),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Take a ticket and spin until it is served.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            spin_loop();
        }
        SpinLockGuard { lock: self }
    }

    /// Succeeds only if nobody holds or waits for the lock.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let serving = self.serving.load(Ordering::Relaxed);
        self.next
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Snapshot; only meaningful for assertions and diagnostics.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.next.load(Ordering::Relaxed) != self.serving.load(Ordering::Relaxed)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    fn unlock(&self) {
        // Only the holder advances `serving`.
        let current = self.serving.load(Ordering::Relaxed);
        self.serving.store(current.wrapping_add(1), Ordering::Release);
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(g) => f.debug_struct("SpinLock").field("data", &*g).finish(),
            None => f.write_str("SpinLock { <locked> }"),
        }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_advance_per_acquisition() {
        let l = SpinLock::new(());
        for _ in 0..3 {
            drop(l.lock());
        }
        assert_eq!(l.next.load(Ordering::Relaxed), 3);
        assert_eq!(l.serving.load(Ordering::Relaxed), 3);
        assert!(!l.is_locked());
    }

    #[test]
    fn tickets_wrap_around() {
        let l = SpinLock::new(5u8);
        l.next.store(u32::MAX, Ordering::Relaxed);
        l.serving.store(u32::MAX, Ordering::Relaxed);
        l.with_lock(|v| *v += 1);
        assert_eq!(l.serving.load(Ordering::Relaxed), 0);
        assert_eq!(*l.lock(), 6);
    }
}
