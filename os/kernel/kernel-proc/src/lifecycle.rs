//! Process creation, replacement and teardown.

use crate::elf::ElfImage;
use crate::fs::{FileSystem, read_file};
use crate::loader::load_image;
use crate::{CONTEXT_WORDS, Process, ProcessError, ProcessTable};
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_info::config::IDLE_PRIORITY;
use kernel_info::memory::{GRANULE_SIZE, USER_BASE, USER_END, phys_to_kernel_virt};
use kernel_memory_addresses::{VirtualAddress, align_up};
use kernel_sched::{CoreId, Pid, TaskId, TaskState};
use kernel_syscall::TrapFrame;
use kernel_vmem::{AddressSpace, TlbFlush};
use log::{debug, info};

/// Result of a successful `fork`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Forked {
    pub child: TaskId,
    pub pid: Pid,
    /// The parent's writable granules were demoted to COW.
    pub flush: TlbFlush,
}

/// A failed [`ProcessTable::exec`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct ExecError {
    pub error: ProcessError,
    /// Translations of the old image that are already gone.
    pub flush: TlbFlush,
}

impl From<ProcessError> for ExecError {
    fn from(error: ProcessError) -> Self {
        Self {
            error,
            flush: TlbFlush::none(),
        }
    }
}

impl<M: PhysMapper, A: FrameAlloc> ProcessTable<'_, M, A> {
    /// Install the idle task of `core` in slot `core.index()`. The calling
    /// core is already running on it.
    ///
    /// # Errors
    /// Out of memory for the kernel-only address space.
    ///
    /// # Panics
    /// If `core` has no reserved idle slot.
    pub fn install_idle(&self, core: CoreId) -> Result<TaskId, ProcessError> {
        assert!(core.index() < self.idle_slots(), "{core} has no idle slot");
        let task = TaskId::new(core.index());
        let space = AddressSpace::create(self.mapper(), self.frames())?;
        self.with(task, |p| {
            *p = Process {
                pid: Pid::IDLE,
                state: TaskState::Running,
                priority: IDLE_PRIORITY,
                core,
                space: Some(space.root()),
                brk: VirtualAddress::zero(),
                idle: true,
                ..Process::unused()
            };
        });
        self.context(task).occupy();
        info!("{core}: idle task installed in {task}");
        Ok(task)
    }

    /// Take a slot and give it a kernel stack, an empty address space and a
    /// trap frame entering at `USER_BASE`. The first switch to the task
    /// returns into `trap_return`, which restores that frame.
    ///
    /// # Errors
    /// [`ProcessError::TableFull`] or out of memory; nothing is leaked.
    pub fn new_process(&self, core: CoreId, trap_return: u64) -> Result<TaskId, ProcessError> {
        let task = self.claim(core)?;
        let stack = match self.frames().allocate_zeroed(self.mapper()) {
            Ok(frame) => frame,
            Err(e) => {
                self.release(task);
                return Err(e.into());
            }
        };
        self.with(task, |p| p.kernel_stack = Some(stack));
        let space = match AddressSpace::create(self.mapper(), self.frames()) {
            Ok(space) => space,
            Err(e) => {
                self.release(task);
                return Err(e.into());
            }
        };

        let brk = USER_BASE + GRANULE_SIZE;
        let context = self.with(task, |p| {
            p.space = Some(space.root());
            p.brk = VirtualAddress::new(brk);
            p.initial_context_addr()
        });
        self.store_trap_frame(task, &TrapFrame::user(USER_BASE, brk));
        if let Some(pa) = context {
            self.mapper()
                .write_u64(pa + (CONTEXT_WORDS - 1) * 8, trap_return);
            self.context(task).prepare(phys_to_kernel_virt(pa.as_u64()));
        }
        Ok(task)
    }

    /// Create a process running the executable at `path`. The task is left
    /// `Initializing`; the caller enqueues it.
    ///
    /// # Errors
    /// File, image or memory errors; nothing is leaked.
    pub fn spawn(
        &self,
        fs: &dyn FileSystem,
        path: &str,
        core: CoreId,
        trap_return: u64,
    ) -> Result<TaskId, ProcessError> {
        let bytes = read_file(fs, path)?;
        let image = ElfImage::parse(&bytes)?;
        let task = self.new_process(core, trap_return)?;
        if let Err(e) = self.load(task, &image) {
            self.release(task);
            return Err(e);
        }
        debug!("spawned {} from {path}", self.pid(task));
        Ok(task)
    }

    /// Duplicate `parent`: the child shares the heap range copy-on-write,
    /// holds the same open files and returns 0 from the same trap frame.
    /// The child is left `Initializing` on the parent's core.
    ///
    /// # Errors
    /// [`ProcessError::TableFull`] or out of memory; nothing is leaked.
    pub fn fork(&self, parent: TaskId, trap_return: u64) -> Result<Forked, ProcessError> {
        let (brk, priority, core, files) =
            self.with(parent, |p| (p.brk, p.priority, p.core, p.files.clone()));
        let parent_space = self.space(parent).ok_or(ProcessError::NoSuchProcess)?;
        let parent_tf = self.trap_frame(parent).ok_or(ProcessError::NoSuchProcess)?;

        let child = self.new_process(core, trap_return)?;
        let child_space = self.space(child).ok_or(ProcessError::NoSuchProcess)?;
        let heap_size = brk - VirtualAddress::new(USER_BASE);
        let flush = match child_space.share_copy_on_write(&parent_space, heap_size) {
            Ok(flush) => flush,
            Err(e) => {
                self.release(child);
                return Err(e.into());
            }
        };

        let mut tf = parent_tf;
        tf.set_return(0);
        self.store_trap_frame(child, &tf);
        let pid = self.with(child, |c| {
            c.brk = brk;
            c.priority = priority;
            c.files = files;
            c.pid
        });
        debug!("{} forked {pid}", self.pid(parent));
        Ok(Forked { child, pid, flush })
    }

    /// Replace the image of `task`. The image is validated before anything
    /// is torn down; pid, priority and open files are kept.
    ///
    /// # Errors
    /// A bad image leaves the process untouched. A memory error after the
    /// teardown leaves it without a usable image; the caller terminates it
    /// and still owes the flush carried in the [`ExecError`].
    pub fn exec(&self, task: TaskId, bytes: &[u8]) -> Result<TlbFlush, ExecError> {
        let image = ElfImage::parse(bytes).map_err(ProcessError::from)?;
        let space = self.space(task).ok_or(ProcessError::NoSuchProcess)?;
        let flush = space.unmap_range(VirtualAddress::new(USER_BASE), USER_END - USER_BASE);
        if let Err(error) = self.load(task, &image) {
            return Err(ExecError { error, flush });
        }
        debug!("{} exec'd entry {}", self.pid(task), image.entry());
        Ok(flush)
    }

    fn load(&self, task: TaskId, image: &ElfImage<'_>) -> Result<(), ProcessError> {
        let space = self.space(task).ok_or(ProcessError::NoSuchProcess)?;
        let loaded = load_image(&space, image)?;
        self.store_trap_frame(
            task,
            &TrapFrame::user(loaded.entry.as_u64(), loaded.stack_top.as_u64()),
        );
        self.with(task, |p| {
            p.brk = loaded.stack_top;
            p.wake_at = None;
        });
        Ok(())
    }

    /// Free everything a killed process owns and return its slot.
    ///
    /// # Panics
    /// If `task` is not a zombie.
    pub fn reap(&self, task: TaskId) -> Pid {
        let (pid, state) = self.with(task, |p| (p.pid, p.state));
        assert_eq!(state, TaskState::Killed, "reaping live {task} ({pid})");
        self.release(task);
        debug!("reaped {pid}");
        pid
    }

    /// Return the slot and free what it owned. Resources are taken out under
    /// the slot lock and freed after it is dropped.
    fn release(&self, task: TaskId) {
        let (space, stack, brk, files) = self.with(task, |p| {
            let taken = (p.space, p.kernel_stack, p.brk, core::mem::take(&mut p.files));
            *p = Process::unused();
            taken
        });
        if let Some(root) = space {
            let size = brk.as_u64().saturating_sub(USER_BASE);
            AddressSpace::from_root(root, self.mapper(), self.frames()).destroy(size);
        }
        if let Some(stack) = stack {
            self.frames().decrement_ref(stack);
        }
        drop(files);
    }

    /// Move the heap boundary by `delta` and return the old one.
    ///
    /// Growing only records the boundary; granules appear on first touch.
    /// Shrinking clamps at `USER_BASE` and unmaps every granule that lies
    /// entirely above the new boundary.
    ///
    /// # Errors
    /// [`ProcessError::HeapExhausted`] when growing past `USER_END`.
    pub fn sbrk(&self, task: TaskId, delta: i64) -> Result<(VirtualAddress, TlbFlush), ProcessError> {
        self.with(task, |p| {
            let old = p.brk;
            let root = p.space.ok_or(ProcessError::NoSuchProcess)?;
            if delta >= 0 {
                let new = old
                    .checked_add(delta.unsigned_abs())
                    .filter(|b| b.as_u64() <= USER_END)
                    .ok_or(ProcessError::HeapExhausted)?;
                p.brk = new;
                return Ok((old, TlbFlush::none()));
            }

            let new = old
                .as_u64()
                .saturating_sub(delta.unsigned_abs())
                .max(USER_BASE);
            let from = align_up(new, GRANULE_SIZE);
            let to = align_up(old.as_u64(), GRANULE_SIZE);
            p.brk = VirtualAddress::new(new);
            let flush = if to > from {
                AddressSpace::from_root(root, self.mapper(), self.frames())
                    .unmap_range(VirtualAddress::new(from), to - from)
            } else {
                TlbFlush::none()
            };
            Ok((old, flush))
        })
    }
}
