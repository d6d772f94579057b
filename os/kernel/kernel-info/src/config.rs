//! # Kernel Tunables

/// Upper bound on cores the kernel will bring online.
pub const MAX_CPUS: usize = 4;

/// Number of scheduling priority classes; 0 is the highest.
pub const MAX_PRIORITY: usize = 4;

/// Priority given to new processes unless inherited.
pub const DEFAULT_PRIORITY: u8 = 1;

/// Priority of the per-core idle task.
#[allow(clippy::cast_possible_truncation)]
pub const IDLE_PRIORITY: u8 = (MAX_PRIORITY - 1) as u8;

/// Default number of process-table slots (idle tasks included).
pub const DEFAULT_MAX_PROCESSES: usize = 64;

/// Open-file descriptor slots per process.
pub const DEFAULT_MAX_OPEN_FILES: usize = 100;

/// How far above the heap boundary a page fault still counts as growth.
pub const DEFAULT_HEAP_GROWTH_WINDOW: u64 = 64 * 1024 * 1024;

/// Timer interrupt frequency.
pub const DEFAULT_TIMER_HZ: u32 = 100;

/// Runtime configuration handed to the kernel at boot.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct KernelConfig {
    /// Cores beyond this count are ignored; clamped to [`MAX_CPUS`].
    pub max_cpus: usize,
    /// Process table slots.
    pub max_processes: usize,
    /// Descriptor slots per process.
    pub max_open_files: usize,
    /// Priority of freshly spawned processes.
    pub default_priority: u8,
    /// Bytes above `brk` within which a fault grows the heap.
    pub heap_growth_window: u64,
    /// Timer frequency; one tick is one scheduling quantum.
    pub timer_hz: u32,
}

impl KernelConfig {
    /// Number of cores that may be brought online.
    #[must_use]
    pub const fn core_limit(&self) -> usize {
        if self.max_cpus == 0 {
            1
        } else if self.max_cpus > MAX_CPUS {
            MAX_CPUS
        } else {
            self.max_cpus
        }
    }

    #[must_use]
    pub const fn with_max_cpus(mut self, n: usize) -> Self {
        self.max_cpus = n;
        self
    }

    #[must_use]
    pub const fn with_max_processes(mut self, n: usize) -> Self {
        self.max_processes = n;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_cpus: MAX_CPUS,
            max_processes: DEFAULT_MAX_PROCESSES,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            default_priority: DEFAULT_PRIORITY,
            heap_growth_window: DEFAULT_HEAP_GROWTH_WINDOW,
            timer_hz: DEFAULT_TIMER_HZ,
        }
    }
}
