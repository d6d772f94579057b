//! # Physical Frame Management
//!
//! Ownership of physical memory for the whole kernel. Every page table,
//! kernel stack and user page is a 2 MiB frame handed out here, and every
//! sharing of a frame between address spaces is tracked by its reference
//! count.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │           Address-Space Manager (kernel-vmem)       │
//! │    • map / unmap / COW share / fault resolution     │
//! └───────────────┬─────────────────────┬───────────────┘
//!                 │ FrameAlloc          │ PhysMapper
//! ┌───────────────▼──────────┐ ┌────────▼──────────────┐
//! │     FrameAllocator       │ │  HhdmPhysMapper       │
//! │  • u16 refcount / frame  │ │  • KERNEL_BASE + pa   │
//! │  • LIFO free list        │ │  ArenaPhysMapper      │
//! │  • SpinLock protected    │ │  • simulated RAM      │
//! └──────────────────────────┘ └───────────────────────┘
//! ```
//!
//! ## Invariants
//! - A managed frame is on the free list iff its reference count is 0.
//! - `allocate` never returns a frame still on the free list.
//! - Dropping a reference to 0 releases the frame immediately.
//! - Misuse (underflow, double release, touching an unmanaged frame) is a
//!   kernel defect and panics.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame_alloc;
pub mod phys_mapper;

pub use frame_alloc::{FrameAlloc, FrameAllocError, FrameAllocator, FrameStats};
pub use phys_mapper::{ArenaPhysMapper, HhdmPhysMapper, PhysMapper};
