//! # QEMU Debug Output
//!
//! A `log` backend for kernels running under QEMU. Records are formatted
//! without allocation and handed to a [`DebugSink`]; the stock sink is the
//! QEMU debug port.
//!
//! ## Output Mechanism
//! ```text
//! log::info!(...)
//!     ↓
//! QemuLogger (level filter, "[LEVEL] cpuN target: message")
//!     ↓
//! DebugSink::write_str
//!     ↓
//! QemuPort → I/O port 0x402 → host (-debugcon stdio)
//! ```
//!
//! ## Features
//!
//! * `enabled` (default): [`QemuPort`] writes to port `0x402`. Without it
//!   the port sink discards everything, which keeps host builds free of
//!   port I/O.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::{QemuLogger, QemuPort};
//! use log::LevelFilter;
//!
//! static PORT: QemuPort = QemuPort;
//!
//! fn current_core() -> usize {
//!     0
//! }
//!
//! QemuLogger::new(&PORT, LevelFilter::Debug)
//!     .with_core_source(current_core)
//!     .init()
//!     .expect("logger installed once");
//! log::info!("kernel subsystem initialized");
//! ```
//!
//! Capture the output on the host with
//! `qemu-system-x86_64 ... -debugcon file:debug.log`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

/// Destination of formatted log lines.
pub trait DebugSink: Sync {
    /// Best effort; output that cannot be delivered is dropped.
    fn write_str(&self, s: &str);
}

/// QEMU's debug console at I/O port `0x402`.
#[derive(Debug, Default, Copy, Clone)]
pub struct QemuPort;

impl QemuPort {
    /// The port number for QEMU's debug port.
    pub const PORT: u16 = 0x402;
}

impl DebugSink for QemuPort {
    #[cfg(all(feature = "enabled", target_arch = "x86_64"))]
    fn write_str(&self, s: &str) {
        for b in s.bytes() {
            // SAFETY: writing the debug port has no memory effects.
            unsafe {
                core::arch::asm!(
                    "out dx, al",
                    in("dx") Self::PORT,
                    in("al") b,
                    options(nomem, nostack, preserves_flags)
                );
            }
        }
    }

    #[cfg(not(all(feature = "enabled", target_arch = "x86_64")))]
    fn write_str(&self, _: &str) {}
}
