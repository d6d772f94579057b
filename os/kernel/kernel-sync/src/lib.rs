//! # Kernel synchronization primitives
//!
//! Every structure touched by more than one core (frame table, per-core run
//! queues, process slots) sits behind a [`SpinLock`]. The lock hands out
//! tickets, so a core stealing work from a busy neighbour cannot be starved
//! by the owner repeatedly re-taking its own queue.
//!
//! Lock ordering used throughout the kernel: a process slot may be held
//! while taking a single run-queue lock; two run-queue locks are never held
//! at the same time.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
