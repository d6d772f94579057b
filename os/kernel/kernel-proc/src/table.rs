//! Fixed-size process table.

use crate::fs::OpenFile;
use crate::{ContextSlot, Process, ProcessError};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_info::config::{KernelConfig, MAX_PRIORITY};
use kernel_info::memory::GRANULE_SIZE;
use kernel_memory_addresses::{Size2M, VirtualAddress};
use kernel_sched::{CoreId, Pid, TaskId, TaskState, Tasks};
use kernel_sync::SpinLock;
use kernel_syscall::{MAX_PATH_LEN, SchedInfo, TrapFrame};
use kernel_vmem::{AddressSpace, FaultResolution, TlbFlush};

struct Slot {
    pcb: SpinLock<Process>,
    context: ContextSlot,
}

/// All process slots. The first `idle_slots` entries belong to the per-core
/// idle tasks and are never handed out by `spawn` or `fork`.
pub struct ProcessTable<'m, M: PhysMapper, A: FrameAlloc> {
    mapper: &'m M,
    frames: &'m A,
    slots: Vec<Slot>,
    idle_slots: usize,
    next_pid: AtomicU32,
    pub(crate) max_open_files: usize,
    pub(crate) default_priority: u8,
    growth_window: u64,
}

impl<'m, M: PhysMapper, A: FrameAlloc> ProcessTable<'m, M, A> {
    /// # Panics
    /// If the table cannot hold one idle task per core plus one process.
    #[must_use]
    pub fn new(mapper: &'m M, frames: &'m A, config: &KernelConfig, cores: usize) -> Self {
        assert!(
            config.max_processes > cores,
            "{} process slots cannot host {cores} idle tasks",
            config.max_processes
        );
        Self {
            mapper,
            frames,
            slots: (0..config.max_processes)
                .map(|_| Slot {
                    pcb: SpinLock::new(Process::unused()),
                    context: ContextSlot::new(),
                })
                .collect(),
            idle_slots: cores,
            next_pid: AtomicU32::new(1),
            max_open_files: config.max_open_files,
            default_priority: config.default_priority,
            growth_window: config.heap_growth_window,
        }
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &'m A {
        self.frames
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub const fn idle_slots(&self) -> usize {
        self.idle_slots
    }

    /// Run `f` with the slot of `task` locked.
    ///
    /// # Panics
    /// If `task` is not a slot of this table.
    pub fn with<R>(&self, task: TaskId, f: impl FnOnce(&mut Process) -> R) -> R {
        f(&mut self.slots[task.index()].pcb.lock())
    }

    #[must_use]
    pub fn context(&self, task: TaskId) -> &ContextSlot {
        &self.slots[task.index()].context
    }

    #[must_use]
    pub fn pid(&self, task: TaskId) -> Pid {
        self.with(task, |p| p.pid)
    }

    #[must_use]
    pub fn state(&self, task: TaskId) -> TaskState {
        self.with(task, |p| p.state)
    }

    /// Slot of the live, non-idle process `pid`.
    #[must_use]
    pub fn find(&self, pid: Pid) -> Option<TaskId> {
        (self.idle_slots..self.slots.len())
            .map(TaskId::new)
            .find(|&t| self.with(t, |p| !p.is_unused() && p.pid == pid))
    }

    #[must_use]
    pub fn unused_count(&self) -> usize {
        (self.idle_slots..self.slots.len())
            .filter(|&i| self.with(TaskId::new(i), |p| p.is_unused()))
            .count()
    }

    /// Handle on the address space of `task`.
    #[must_use]
    pub fn space(&self, task: TaskId) -> Option<AddressSpace<'m, M, A>> {
        self.with(task, |p| p.space)
            .map(|root| AddressSpace::from_root(root, self.mapper, self.frames))
    }

    /// Take an unused slot and give it the next pid.
    pub(crate) fn claim(&self, core: CoreId) -> Result<TaskId, ProcessError> {
        for index in self.idle_slots..self.slots.len() {
            let mut pcb = self.slots[index].pcb.lock();
            if !pcb.is_unused() {
                continue;
            }
            *pcb = Process {
                pid: Pid::new(self.next_pid.fetch_add(1, Ordering::Relaxed)),
                state: TaskState::Initializing,
                priority: self.default_priority,
                core,
                files: (0..self.max_open_files).map(|_| None).collect(),
                ..Process::unused()
            };
            return Ok(TaskId::new(index));
        }
        Err(ProcessError::TableFull)
    }

    #[must_use]
    pub fn trap_frame(&self, task: TaskId) -> Option<TrapFrame> {
        let pa = self.with(task, |p| p.trap_frame_addr())?;
        let mut tf = TrapFrame::default();
        self.mapper.read(pa, tf.as_bytes_mut());
        Some(tf)
    }

    /// # Panics
    /// If `task` has no kernel stack.
    pub fn store_trap_frame(&self, task: TaskId, tf: &TrapFrame) {
        let Some(pa) = self.with(task, |p| p.trap_frame_addr()) else {
            panic!("{task} has no kernel stack");
        };
        self.mapper.write(pa, tf.as_bytes());
    }

    /// Read user memory of `task`, growing its heap on the way if needed.
    ///
    /// # Errors
    /// [`ProcessError::NoSuchProcess`] without an address space, else the
    /// unresolvable fault.
    pub fn copy_from_user(
        &self,
        task: TaskId,
        addr: u64,
        buf: &mut [u8],
    ) -> Result<TlbFlush, ProcessError> {
        self.with(task, |p| {
            let root = p.space.ok_or(ProcessError::NoSuchProcess)?;
            let space = AddressSpace::from_root(root, self.mapper, self.frames);
            let mut heap = p.heap(self.growth_window);
            let result = space.copy_from_user(&mut heap, VirtualAddress::new(addr), buf);
            p.brk = heap.brk;
            Ok(result?)
        })
    }

    /// Write user memory of `task`, breaking COW sharing where needed.
    ///
    /// # Errors
    /// See [`ProcessTable::copy_from_user`].
    pub fn copy_to_user(&self, task: TaskId, addr: u64, data: &[u8]) -> Result<TlbFlush, ProcessError> {
        self.with(task, |p| {
            let root = p.space.ok_or(ProcessError::NoSuchProcess)?;
            let space = AddressSpace::from_root(root, self.mapper, self.frames);
            let mut heap = p.heap(self.growth_window);
            let result = space.copy_to_user(&mut heap, VirtualAddress::new(addr), data);
            p.brk = heap.brk;
            Ok(result?)
        })
    }

    /// Read a NUL-terminated UTF-8 path of at most [`MAX_PATH_LEN`] bytes.
    ///
    /// # Errors
    /// [`ProcessError::InvalidPath`] for empty, unterminated or non-UTF-8
    /// strings; faults as in [`ProcessTable::copy_from_user`].
    pub fn read_user_path(&self, task: TaskId, addr: u64) -> Result<String, ProcessError> {
        let mut raw = Vec::with_capacity(MAX_PATH_LEN + 1);
        let mut at = VirtualAddress::new(addr);
        let mut chunk = [0u8; MAX_PATH_LEN + 1];
        while raw.len() <= MAX_PATH_LEN {
            #[allow(clippy::cast_possible_truncation)]
            let room = (GRANULE_SIZE - at.offset::<Size2M>()) as usize;
            let want = (MAX_PATH_LEN + 1 - raw.len()).min(room);
            // Reads only ever add translations.
            self.copy_from_user(task, at.as_u64(), &mut chunk[..want])?
                .ignore();
            if let Some(nul) = chunk[..want].iter().position(|&b| b == 0) {
                raw.extend_from_slice(&chunk[..nul]);
                return match String::from_utf8(raw) {
                    Ok(path) if !path.is_empty() => Ok(path),
                    _ => Err(ProcessError::InvalidPath),
                };
            }
            raw.extend_from_slice(&chunk[..want]);
            at = at
                .checked_add(want as u64)
                .ok_or(ProcessError::InvalidPath)?;
        }
        Err(ProcessError::InvalidPath)
    }

    /// Resolve a page fault taken by `task`, committing any heap growth.
    ///
    /// # Errors
    /// The fault is fatal for the process.
    pub fn resolve_fault(
        &self,
        task: TaskId,
        addr: VirtualAddress,
        is_write: bool,
    ) -> Result<FaultResolution, ProcessError> {
        self.with(task, |p| {
            let root = p.space.ok_or(ProcessError::NoSuchProcess)?;
            let space = AddressSpace::from_root(root, self.mapper, self.frames);
            let mut heap = p.heap(self.growth_window);
            let result = space.resolve_fault(&mut heap, addr, is_write);
            p.brk = heap.brk;
            Ok(result?)
        })
    }

    /// Put `file` into the lowest free descriptor slot.
    ///
    /// # Errors
    /// [`ProcessError::DescriptorTableFull`].
    pub fn install_file(&self, task: TaskId, file: OpenFile) -> Result<usize, ProcessError> {
        self.with(task, |p| {
            let fd = p.free_descriptor().ok_or(ProcessError::DescriptorTableFull)?;
            p.files[fd] = Some(Arc::new(file));
            Ok(fd)
        })
    }

    /// # Errors
    /// [`ProcessError::BadDescriptor`] for a closed or out-of-range slot.
    pub fn file(&self, task: TaskId, fd: i64) -> Result<Arc<OpenFile>, ProcessError> {
        self.with(task, |p| {
            usize::try_from(fd)
                .ok()
                .and_then(|i| p.files.get(i).cloned().flatten())
                .ok_or(ProcessError::BadDescriptor(fd))
        })
    }

    /// Free descriptor `fd`. The handle closes once no process shares it.
    ///
    /// # Errors
    /// [`ProcessError::BadDescriptor`] for a closed or out-of-range slot.
    pub fn close_file(&self, task: TaskId, fd: i64) -> Result<(), ProcessError> {
        let file = self.with(task, |p| {
            usize::try_from(fd)
                .ok()
                .and_then(|i| p.files.get_mut(i))
                .and_then(Option::take)
                .ok_or(ProcessError::BadDescriptor(fd))
        })?;
        drop(file);
        Ok(())
    }

    /// Clamp `priority` into the valid classes; applies on the next enqueue.
    pub fn set_priority(&self, task: TaskId, priority: i64) {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap,
            clippy::cast_sign_loss
        )]
        let clamped = priority.clamp(0, MAX_PRIORITY as i64 - 1) as u8;
        self.with(task, |p| p.priority = clamped);
    }

    #[must_use]
    pub fn priority(&self, task: TaskId) -> u8 {
        self.with(task, |p| p.priority)
    }

    /// Account one timer tick to `task`.
    pub fn charge_tick(&self, task: TaskId) {
        self.with(task, |p| p.runtime += 1);
    }

    #[must_use]
    pub fn sched_info(&self, task: TaskId) -> SchedInfo {
        self.with(task, |p| p.sched_info())
    }
}

impl<M: PhysMapper, A: FrameAlloc> Tasks for ProcessTable<'_, M, A> {
    fn priority(&self, task: TaskId) -> u8 {
        self.with(task, |p| p.priority)
    }

    fn mark(&self, task: TaskId, state: TaskState, core: CoreId) {
        self.with(task, |p| {
            p.state = state;
            p.core = core;
        });
    }
}
