//! # SMP coordination
//!
//! [`CoreSet`] is the fixed array of core descriptors built once at boot.
//! Cores flip their online flag as they start executing; only online cores
//! receive inter-processor interrupts.

use crate::{CoreId, RunQueues};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use kernel_info::config::KernelConfig;
use kernel_sync::SpinLock;
use log::{info, trace};

/// Vector of the "re-evaluate your run queue" IPI.
pub const RESCHEDULE_VECTOR: u8 = 0xF1;

/// Vector of the "reload your translation caches" IPI.
pub const TLB_SHOOTDOWN_VECTOR: u8 = 0xF2;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IpiKind {
    Reschedule,
    TlbShootdown,
}

impl IpiKind {
    #[inline]
    #[must_use]
    pub const fn vector(self) -> u8 {
        match self {
            Self::Reschedule => RESCHEDULE_VECTOR,
            Self::TlbShootdown => TLB_SHOOTDOWN_VECTOR,
        }
    }

    #[must_use]
    pub const fn from_vector(vector: u8) -> Option<Self> {
        match vector {
            RESCHEDULE_VECTOR => Some(Self::Reschedule),
            TLB_SHOOTDOWN_VECTOR => Some(Self::TlbShootdown),
            _ => None,
        }
    }
}

/// Delivers IPIs; implemented by the platform layer (local APIC ICR writes).
pub trait IpiSender {
    fn send_ipi(&self, target: CoreId, kind: IpiKind);
}

/// Core descriptor: id, online flag and the core's scheduler state.
#[derive(Debug)]
pub struct Core {
    id: CoreId,
    online: AtomicBool,
    pub(crate) queues: SpinLock<RunQueues>,
}

impl Core {
    fn new(id: CoreId) -> Self {
        Self {
            id,
            online: AtomicBool::new(false),
            queues: SpinLock::new(RunQueues::new()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> CoreId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Run `f` with this core's queues locked.
    pub fn with_queues<R>(&self, f: impl FnOnce(&mut RunQueues) -> R) -> R {
        self.queues.with_lock(f)
    }
}

#[derive(Debug)]
pub struct CoreSet {
    cores: Vec<Core>,
    online: AtomicUsize,
}

impl CoreSet {
    /// Descriptors for `detected` cores, bounded by the configured limit.
    /// The boot core is online from the start.
    #[must_use]
    pub fn enumerate(detected: usize, config: &KernelConfig) -> Self {
        let count = detected.clamp(1, config.core_limit());
        let cores: Vec<Core> = (0..count).map(|i| Core::new(CoreId::new(i))).collect();
        cores[0].online.store(true, Ordering::Release);
        info!("{count} of {detected} detected cores usable");
        Self {
            cores,
            online: AtomicUsize::new(1),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// # Panics
    /// If `id` is not an enumerated core.
    #[inline]
    #[must_use]
    pub fn core(&self, id: CoreId) -> &Core {
        match self.cores.get(id.index()) {
            Some(core) => core,
            None => panic!("{id} was never enumerated"),
        }
    }

    #[must_use]
    pub fn get(&self, id: CoreId) -> Option<&Core> {
        self.cores.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Core> {
        self.cores.iter()
    }

    /// Flip `id` online. Returns `false` if it already was.
    pub fn mark_online(&self, id: CoreId) -> bool {
        let first = !self.core(id).online.swap(true, Ordering::AcqRel);
        if first {
            let n = self.online.fetch_add(1, Ordering::AcqRel) + 1;
            info!("{id} online ({n} cores running)");
        }
        first
    }

    #[inline]
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.online.load(Ordering::Acquire)
    }

    /// Send `kind` to every online core except `from`; returns the number of
    /// IPIs sent.
    pub fn broadcast<I: IpiSender + ?Sized>(&self, from: CoreId, kind: IpiKind, ipi: &I) -> usize {
        let mut sent = 0;
        for core in self.cores.iter().filter(|c| c.id != from && c.is_online()) {
            ipi.send_ipi(core.id, kind);
            sent += 1;
        }
        if sent > 0 {
            trace!("{from} sent {kind:?} to {sent} cores");
        }
        sent
    }
}
