#![allow(dead_code)]

use kernel::interrupts::TIMER_VECTOR;
use kernel::{Console, Kernel, Keyboard, NetError, NetStack, Platform, Services, Trap};
use kernel_alloc::{ArenaPhysMapper, FrameAllocator};
use kernel_info::boot::{BootInfo, MemoryRegion};
use kernel_info::config::KernelConfig;
use kernel_info::memory::GRANULE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};
use kernel_proc::ContextSlot;
use kernel_proc::fs::{DirEntryRecord, FileHandle, FileSystem, FsError};
use kernel_sched::{CoreId, IpiKind, IpiSender, TaskId};
use kernel_syscall::{DIR_ENTRY_SIZE, SYSCALL_INSN_LEN, Sysno};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const TRAP_RETURN: u64 = 0xffff_8000_0010_0000;

/// Scratch area inside the writable data segment of [`two_segment_image`].
pub const ARGS_AT: u64 = 0x60_0800;
pub const BUF_AT: u64 = 0x60_0400;
pub const STRING_AT: u64 = 0x60_0200;

pub type SimKernel<'m> = Kernel<'m, SimPlatform, ArenaPhysMapper, FrameAllocator>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Event {
    Activate(CoreId, PhysicalFrame),
    KernelStack(CoreId, u64),
    Switch { core: CoreId, to: u64 },
    Eoi(CoreId),
    FlushLocal(CoreId),
    Ipi(CoreId, IpiKind),
}

/// Records every hardware effect instead of performing it.
#[derive(Default)]
pub struct SimPlatform {
    events: Mutex<Vec<Event>>,
    irq7_in_service: AtomicBool,
}

impl SimPlatform {
    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn set_irq7_in_service(&self, yes: bool) {
        self.irq7_in_service.store(yes, Ordering::SeqCst);
    }

    fn record(&self, e: Event) {
        self.events.lock().unwrap().push(e);
    }
}

impl IpiSender for SimPlatform {
    fn send_ipi(&self, target: CoreId, kind: IpiKind) {
        self.record(Event::Ipi(target, kind));
    }
}

impl Platform for SimPlatform {
    fn activate_address_space(&self, core: CoreId, root: PhysicalFrame) {
        self.record(Event::Activate(core, root));
    }

    fn set_kernel_stack(&self, core: CoreId, top: u64) {
        self.record(Event::KernelStack(core, top));
    }

    fn switch_context(&self, core: CoreId, from: &ContextSlot, to: u64) {
        from.save(from.stack_pointer());
        self.record(Event::Switch { core, to });
    }

    fn end_of_interrupt(&self, core: CoreId) {
        self.record(Event::Eoi(core));
    }

    fn in_service(&self, _: CoreId, irq: u8) -> bool {
        irq == 7 && self.irq7_in_service.load(Ordering::SeqCst)
    }

    fn flush_tlb_local(&self, core: CoreId) {
        self.record(Event::FlushLocal(core));
    }

    fn trap_return_entry(&self) -> u64 {
        TRAP_RETURN
    }

    fn halt(&self, core: CoreId) -> ! {
        panic!("{core} halted");
    }
}

#[derive(Default)]
pub struct CaptureConsole(Mutex<Vec<u8>>);

impl CaptureConsole {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Console for CaptureConsole {
    fn write(&self, bytes: &[u8]) {
        self.0.lock().unwrap().extend_from_slice(bytes);
    }
}

#[derive(Default)]
pub struct KeyQueue {
    pending: Mutex<VecDeque<u8>>,
    interrupts: Mutex<usize>,
}

impl KeyQueue {
    pub fn press(&self, key: u8) {
        self.pending.lock().unwrap().push_back(key);
    }

    pub fn interrupts(&self) -> usize {
        *self.interrupts.lock().unwrap()
    }
}

impl Keyboard for KeyQueue {
    fn handle_interrupt(&self) {
        *self.interrupts.lock().unwrap() += 1;
    }

    fn read_key(&self) -> Option<u8> {
        self.pending.lock().unwrap().pop_front()
    }
}

/// Every datagram sent on a socket comes back on the same socket.
#[derive(Default)]
pub struct Loopback {
    sockets: Mutex<Vec<VecDeque<Vec<u8>>>>,
}

impl NetStack for Loopback {
    fn socket(&self, _: i64) -> Result<i64, NetError> {
        let mut sockets = self.sockets.lock().unwrap();
        sockets.push(VecDeque::new());
        Ok(sockets.len() as i64 - 1)
    }

    fn send(&self, socket: i64, data: &[u8]) -> Result<usize, NetError> {
        let mut sockets = self.sockets.lock().unwrap();
        let queue = usize::try_from(socket)
            .ok()
            .and_then(|i| sockets.get_mut(i))
            .ok_or(NetError::BadSocket(socket))?;
        queue.push_back(data.to_vec());
        Ok(data.len())
    }

    fn recv(&self, socket: i64, buf: &mut [u8]) -> Result<usize, NetError> {
        let mut sockets = self.sockets.lock().unwrap();
        let queue = usize::try_from(socket)
            .ok()
            .and_then(|i| sockets.get_mut(i))
            .ok_or(NetError::BadSocket(socket))?;
        let Some(datagram) = queue.pop_front() else {
            return Ok(0);
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }
}

/// Flat file system with one level of directories. Directory records are
/// the entry name, NUL padded.
#[derive(Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    open: Mutex<BTreeMap<u32, String>>,
    next: Mutex<u32>,
}

pub fn record(name: &str) -> DirEntryRecord {
    let mut r = [0u8; DIR_ENTRY_SIZE];
    r[..name.len()].copy_from_slice(name.as_bytes());
    r
}

impl MemFs {
    pub fn with_file(self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(path.to_owned(), bytes);
        self
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn open_handles(&self) -> usize {
        self.open.lock().unwrap().len()
    }

    fn path_of(&self, h: FileHandle) -> Result<String, FsError> {
        self.open
            .lock()
            .unwrap()
            .get(&h.as_u32())
            .cloned()
            .ok_or(FsError::Io)
    }

    fn handle(&self, path: &str) -> FileHandle {
        let mut next = self.next.lock().unwrap();
        *next += 1;
        self.open.lock().unwrap().insert(*next, path.to_owned());
        FileHandle::new(*next)
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files
            .lock()
            .unwrap()
            .keys()
            .chain(self.dirs.lock().unwrap().iter())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_owned)
            .collect()
    }
}

impl FileSystem for MemFs {
    fn open(&self, path: &str) -> Result<FileHandle, FsError> {
        if self.dirs.lock().unwrap().contains(path) {
            return Err(FsError::IsADirectory);
        }
        if !self.files.lock().unwrap().contains_key(path) {
            return Err(FsError::NotFound);
        }
        Ok(self.handle(path))
    }

    fn open_dir(&self, path: &str) -> Result<FileHandle, FsError> {
        if path != "/" && !self.dirs.lock().unwrap().contains(path) {
            return Err(FsError::NotADirectory);
        }
        Ok(self.handle(path))
    }

    fn read(&self, file: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let path = self.path_of(file)?;
        let files = self.files.lock().unwrap();
        let content = files.get(&path).ok_or(FsError::NotFound)?;
        let start = usize::try_from(offset).unwrap().min(content.len());
        let n = buf.len().min(content.len() - start);
        buf[..n].copy_from_slice(&content[start..start + n]);
        Ok(n)
    }

    fn write(&self, file: FileHandle, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let path = self.path_of(file)?;
        let mut files = self.files.lock().unwrap();
        let content = files.get_mut(&path).ok_or(FsError::NotFound)?;
        let start = usize::try_from(offset).unwrap();
        if content.len() < start + data.len() {
            content.resize(start + data.len(), 0);
        }
        content[start..start + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn size(&self, file: FileHandle) -> Result<u64, FsError> {
        let path = self.path_of(file)?;
        let files = self.files.lock().unwrap();
        Ok(files.get(&path).ok_or(FsError::NotFound)?.len() as u64)
    }

    fn read_dir(&self, dir: FileHandle, index: usize) -> Result<Option<DirEntryRecord>, FsError> {
        let path = self.path_of(dir)?;
        Ok(self.children(&path).get(index).map(|name| record(name)))
    }

    fn close(&self, file: FileHandle) {
        self.open.lock().unwrap().remove(&file.as_u32());
    }

    fn create(&self, path: &str) -> Result<(), FsError> {
        let mut files = self.files.lock().unwrap();
        if files.contains_key(path) {
            return Err(FsError::AlreadyExists);
        }
        files.insert(path.to_owned(), Vec::new());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), FsError> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }

    fn mkdir(&self, path: &str) -> Result<(), FsError> {
        if self.dirs.lock().unwrap().insert(path.to_owned()) {
            Ok(())
        } else {
            Err(FsError::AlreadyExists)
        }
    }

    fn rmdir(&self, path: &str) -> Result<(), FsError> {
        if !self.children(path).is_empty() {
            return Err(FsError::Io);
        }
        if self.dirs.lock().unwrap().remove(path) {
            Ok(())
        } else {
            Err(FsError::NotFound)
        }
    }

    fn root_entries(&self) -> Vec<DirEntryRecord> {
        self.children("/").iter().map(|n| record(n)).collect()
    }
}

/// Loadable segment for [`build_image`].
pub struct Seg<'a> {
    pub vaddr: u64,
    pub writable: bool,
    pub data: &'a [u8],
    pub memsz: u64,
}

/// Minimal static ELF64 x86-64 executable.
pub fn build_image(entry: u64, segments: &[Seg<'_>]) -> Vec<u8> {
    const EHDR: usize = 64;
    const PHDR: usize = 56;
    let mut out = vec![0u8; EHDR + segments.len() * PHDR];
    out[0..4].copy_from_slice(b"\x7FELF");
    out[4] = 2;
    out[5] = 1;
    out[6] = 1;
    out[16..18].copy_from_slice(&2u16.to_le_bytes());
    out[18..20].copy_from_slice(&62u16.to_le_bytes());
    out[20..24].copy_from_slice(&1u32.to_le_bytes());
    out[24..32].copy_from_slice(&entry.to_le_bytes());
    out[32..40].copy_from_slice(&(EHDR as u64).to_le_bytes());
    out[52..54].copy_from_slice(&(EHDR as u16).to_le_bytes());
    out[54..56].copy_from_slice(&(PHDR as u16).to_le_bytes());
    out[56..58].copy_from_slice(&(segments.len() as u16).to_le_bytes());
    for (i, seg) in segments.iter().enumerate() {
        let offset = out.len() as u64;
        out.extend_from_slice(seg.data);
        let flags: u32 = if seg.writable { 0b110 } else { 0b101 };
        let ph = &mut out[EHDR + i * PHDR..EHDR + (i + 1) * PHDR];
        ph[0..4].copy_from_slice(&1u32.to_le_bytes());
        ph[4..8].copy_from_slice(&flags.to_le_bytes());
        ph[8..16].copy_from_slice(&offset.to_le_bytes());
        ph[16..24].copy_from_slice(&seg.vaddr.to_le_bytes());
        ph[32..40].copy_from_slice(&(seg.data.len() as u64).to_le_bytes());
        ph[40..48].copy_from_slice(&seg.memsz.to_le_bytes());
    }
    out
}

/// Text at `USER_BASE`, a one-page data segment one granule up.
pub fn two_segment_image(entry_offset: u64, data: &[u8]) -> Vec<u8> {
    build_image(
        0x40_0000 + entry_offset,
        &[
            Seg {
                vaddr: 0x40_0000,
                writable: false,
                data: &[0xCD, 0x80, 0xEB, 0xFE],
                memsz: 4,
            },
            Seg {
                vaddr: 0x60_0000,
                writable: true,
                data,
                memsz: 0x1000,
            },
        ],
    )
}

pub fn machine(frames: u64) -> (ArenaPhysMapper, FrameAllocator) {
    let bytes = (frames + 1) * GRANULE_SIZE;
    let map = [MemoryRegion::usable(0, bytes)];
    let alloc = FrameAllocator::new(&map, PhysicalAddress::new(GRANULE_SIZE), u64::MAX);
    (ArenaPhysMapper::new(bytes), alloc)
}

/// Collaborators handed to the kernel, kept for inspection.
#[derive(Clone, Default)]
pub struct Devices {
    pub fs: Arc<MemFs>,
    pub console: Arc<CaptureConsole>,
    pub keyboard: Arc<KeyQueue>,
    pub net: Arc<Loopback>,
}

impl Devices {
    pub fn with_fs(fs: MemFs) -> Self {
        Self {
            fs: Arc::new(fs),
            ..Self::default()
        }
    }

    pub fn services(&self) -> Services {
        Services {
            fs: self.fs.clone(),
            net: self.net.clone(),
            console: self.console.clone(),
            keyboard: self.keyboard.clone(),
        }
    }
}

/// `/init` plus a second image `/other` entering at a different offset.
pub fn standard_fs() -> MemFs {
    MemFs::default()
        .with_file("/init", two_segment_image(0, b"init data"))
        .with_file("/other", two_segment_image(2, b"other data"))
        .with_file("/garbage", b"not an executable".to_vec())
}

pub fn boot<'m>(
    mapper: &'m ArenaPhysMapper,
    frames: &'m FrameAllocator,
    cores: usize,
    devices: &Devices,
) -> SimKernel<'m> {
    let map = [MemoryRegion::usable(0, 64 * GRANULE_SIZE)];
    let info = BootInfo {
        memory_map: &map,
        kernel_end: GRANULE_SIZE,
        detected_cores: cores,
    };
    let config = KernelConfig::default().with_max_processes(16);
    Kernel::boot(
        config,
        &info,
        SimPlatform::default(),
        mapper,
        frames,
        devices.services(),
    )
    .unwrap()
}

pub fn tick(k: &SimKernel<'_>, core: CoreId) {
    k.handle_trap(core, Trap::new(TIMER_VECTOR, true)).unwrap();
}

/// Boot on one core, spawn `/init` and let the first tick switch to it.
pub fn running_init<'m>(
    mapper: &'m ArenaPhysMapper,
    frames: &'m FrameAllocator,
    devices: &Devices,
) -> (SimKernel<'m>, TaskId) {
    let k = boot(mapper, frames, 1, devices);
    k.spawn_init("/init").unwrap();
    tick(&k, CoreId::BOOT);
    let init = current(&k, CoreId::BOOT);
    (k, init)
}

pub fn current(k: &SimKernel<'_>, core: CoreId) -> TaskId {
    k.scheduler().current(core).unwrap()
}

pub fn poke(k: &SimKernel<'_>, task: TaskId, addr: u64, bytes: &[u8]) {
    k.processes()
        .copy_to_user(task, addr, bytes)
        .unwrap()
        .ignore();
}

pub fn peek(k: &SimKernel<'_>, task: TaskId, addr: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    k.processes()
        .copy_from_user(task, addr, &mut buf)
        .unwrap()
        .ignore();
    buf
}

/// Put a NUL-terminated string at [`STRING_AT`] and return its address.
pub fn user_str(k: &SimKernel<'_>, task: TaskId, s: &str) -> i64 {
    let mut raw = s.as_bytes().to_vec();
    raw.push(0);
    poke(k, task, STRING_AT, &raw);
    STRING_AT as i64
}

/// Execute `int 0x80` with raw register values in the task running on
/// `core`. Returns that task.
pub fn raw_syscall(k: &SimKernel<'_>, core: CoreId, number: i64, count: i64, args: &[i64]) -> TaskId {
    let task = current(k, core);
    let raw: Vec<u8> = args.iter().flat_map(|a| a.to_le_bytes()).collect();
    poke(k, task, ARGS_AT, &raw);
    let mut tf = k.processes().trap_frame(task).unwrap();
    tf.rax = number as u64;
    tf.rdi = count as u64;
    tf.rsi = ARGS_AT;
    tf.rip += SYSCALL_INSN_LEN;
    k.processes().store_trap_frame(task, &tf);
    k.handle_trap(core, Trap::syscall()).unwrap();
    task
}

pub fn enter(k: &SimKernel<'_>, core: CoreId, sysno: Sysno, args: &[i64]) -> TaskId {
    raw_syscall(k, core, sysno.index() as i64, args.len() as i64, args)
}

/// `rax` of `task` as the caller sees it.
pub fn result(k: &SimKernel<'_>, task: TaskId) -> i64 {
    k.processes().trap_frame(task).unwrap().rax as i64
}

pub fn syscall(k: &SimKernel<'_>, core: CoreId, sysno: Sysno, args: &[i64]) -> i64 {
    let task = enter(k, core, sysno, args);
    result(k, task)
}

/// The task running on `core` executes its rewound `int 0x80` again.
pub fn reissue(k: &SimKernel<'_>, core: CoreId) -> TaskId {
    let task = current(k, core);
    let mut tf = k.processes().trap_frame(task).unwrap();
    tf.rip += SYSCALL_INSN_LEN;
    k.processes().store_trap_frame(task, &tf);
    k.handle_trap(core, Trap::syscall()).unwrap();
    task
}
