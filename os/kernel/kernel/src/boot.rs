//! Bring-up of the core kernel state.

use crate::platform::{Platform, Services};
use crate::{BootError, Kernel};
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_info::boot::BootInfo;
use kernel_info::config::KernelConfig;
use kernel_proc::{Pid, ProcessError, ProcessTable};
use kernel_sched::{CoreId, CoreSet, Scheduler};
use log::info;

impl<'m, P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'m, P, M, A> {
    /// Build the kernel on the bootstrap core, which keeps running as its
    /// idle task.
    ///
    /// # Errors
    /// See [`BootError`].
    pub fn boot(
        config: KernelConfig,
        boot: &BootInfo<'_>,
        platform: P,
        mapper: &'m M,
        frames: &'m A,
        services: Services,
    ) -> Result<Self, BootError> {
        let total_memory = boot.usable_bytes();
        if total_memory == 0 {
            return Err(BootError::NoUsableMemory);
        }
        let cores = CoreSet::enumerate(boot.detected_cores, &config);
        if config.max_processes <= cores.len() {
            return Err(BootError::TableTooSmall {
                slots: config.max_processes,
                cores: cores.len(),
            });
        }
        info!(
            "booting on {} of {} detected cores, {} MiB usable, {} Hz tick",
            cores.len(),
            boot.detected_cores,
            total_memory >> 20,
            config.timer_hz
        );

        let kernel = Self {
            processes: ProcessTable::new(mapper, frames, &config, cores.len()),
            scheduler: Scheduler::new(cores),
            config,
            platform,
            services,
            ticks: AtomicU64::new(0),
            total_memory,
        };
        kernel.install_idle(CoreId::BOOT)?;
        Ok(kernel)
    }

    /// Bring `core` online. Runs on `core` itself, which becomes its idle
    /// task.
    ///
    /// # Errors
    /// [`BootError::NoSuchCore`], [`BootError::AlreadyOnline`] or out of
    /// memory for the idle task.
    pub fn start_core(&self, core: CoreId) -> Result<(), BootError> {
        match self.scheduler.cores().get(core) {
            None => return Err(BootError::NoSuchCore(core)),
            Some(c) if c.is_online() => return Err(BootError::AlreadyOnline(core)),
            Some(_) => {}
        }
        self.install_idle(core)?;
        self.scheduler.cores().mark_online(core);
        Ok(())
    }

    fn install_idle(&self, core: CoreId) -> Result<(), BootError> {
        let idle = self.processes.install_idle(core)?;
        self.scheduler.install_idle(core, idle);
        if let Some(root) = self.processes.space(idle).map(|s| s.root()) {
            self.platform.activate_address_space(core, root);
        }
        Ok(())
    }

    /// Load the first user process from `path` and queue it on the
    /// bootstrap core.
    ///
    /// # Errors
    /// File, image or memory errors.
    pub fn spawn_init(&self, path: &str) -> Result<Pid, ProcessError> {
        let task = self.processes.spawn(
            self.services.fs.as_ref(),
            path,
            CoreId::BOOT,
            self.platform.trap_return_entry(),
        )?;
        self.scheduler.enqueue(CoreId::BOOT, task, &self.processes);
        let pid = self.processes.pid(task);
        info!("init is {pid} ({path})");
        Ok(pid)
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub const fn processes(&self) -> &ProcessTable<'m, M, A> {
        &self.processes
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// Timer ticks seen by the bootstrap core.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Usable physical memory reported at boot, in bytes.
    #[must_use]
    pub const fn total_memory(&self) -> u64 {
        self.total_memory
    }
}
