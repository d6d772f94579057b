//! # Kernel Configuration and Boot Interface
//!
//! Memory layout constants, runtime tunables and the boot handoff types
//! shared by every kernel crate.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! * **Granule**: every mapping is a 2 MiB leaf; frames are 2 MiB.
//! * **Kernel Window**: the first 1 GiB of physical memory is mapped at
//!   [`memory::KERNEL_BASE`] in every address space, supervisor only.
//! * **User Region**: user images start at [`memory::USER_BASE`] and grow
//!   upward; nothing user-visible lives at or above [`memory::USER_END`].
//!
//! ### Configuration ([`config`])
//! [`config::KernelConfig`] carries the tunables chosen at boot (core limit,
//! process table size, descriptor table size, heap growth window, timer
//! frequency). Fixed-size structures use the constants in [`config`].
//!
//! ### Boot Information ([`boot`])
//! The firmware memory map and detected core count as handed to the core
//! kernel by the boot stage.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! 0xFFFF_FFFF_FFFF_FFFF ┌─────────────────────────────┐
//!                       │            unused           │
//! 0xFFFF_8000_4000_0000 ├─────────────────────────────┤
//!                       │  kernel window (1 GiB, RW)  │ ← phys 0..1 GiB
//! 0xFFFF_8000_0000_0000 ├─────────────────────────────┤ KERNEL_BASE
//!                       │      non-canonical hole     │
//! 0x0000_0000_4000_0000 ├─────────────────────────────┤ USER_END
//!                       │  user stack / heap (↑ brk)  │
//!                       │      ELF PT_LOAD granules   │
//! 0x0000_0000_0040_0000 ├─────────────────────────────┤ USER_BASE
//!                       │          unmapped           │
//! 0x0000_0000_0000_0000 └─────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod config;
pub mod memory;
