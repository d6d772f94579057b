use kernel_alloc::{ArenaPhysMapper, FrameAlloc, FrameAllocator, PhysMapper};
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::{GRANULE_SIZE, USER_BASE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, FaultResolution, HeapLimit, MapFlags};

const FRAMES: u64 = 48;

fn machine() -> (ArenaPhysMapper, FrameAllocator) {
    let bytes = (FRAMES + 1) * GRANULE_SIZE;
    let map = [MemoryRegion::usable(0, bytes)];
    let frames = FrameAllocator::new(&map, PhysicalAddress::new(GRANULE_SIZE), u64::MAX);
    (ArenaPhysMapper::new(bytes), frames)
}

fn heap(granules: u64) -> HeapLimit {
    HeapLimit {
        brk: VirtualAddress::new(USER_BASE + granules * GRANULE_SIZE),
        growth_window: 4 * GRANULE_SIZE,
    }
}

fn read_u64<M: PhysMapper, A: FrameAlloc>(
    space: &AddressSpace<'_, M, A>,
    h: &mut HeapLimit,
    at: u64,
) -> u64 {
    let mut raw = [0u8; 8];
    space
        .copy_from_user(h, VirtualAddress::new(at), &mut raw)
        .unwrap()
        .ignore();
    u64::from_le_bytes(raw)
}

fn write_u64<M: PhysMapper, A: FrameAlloc>(
    space: &AddressSpace<'_, M, A>,
    h: &mut HeapLimit,
    at: u64,
    value: u64,
) {
    space
        .copy_to_user(h, VirtualAddress::new(at), &value.to_le_bytes())
        .unwrap()
        .ignore();
}

/// Parent with two writable granules holding known values.
fn populated_parent<'m>(
    ram: &'m ArenaPhysMapper,
    frames: &'m FrameAllocator,
) -> (AddressSpace<'m, ArenaPhysMapper, FrameAllocator>, HeapLimit) {
    let parent = AddressSpace::create(ram, frames).unwrap();
    let mut h = heap(2);
    write_u64(&parent, &mut h, USER_BASE + 0x100, 0x1111);
    write_u64(&parent, &mut h, USER_BASE + GRANULE_SIZE + 0x100, 0x2222);
    (parent, h)
}

#[test]
fn child_writes_are_invisible_to_parent() {
    let (ram, frames) = machine();
    let (parent, mut ph) = populated_parent(&ram, &frames);
    let child = AddressSpace::create(&ram, &frames).unwrap();
    let mut ch = ph;

    let flush = child.share_copy_on_write(&parent, 2 * GRANULE_SIZE).unwrap();
    assert!(flush.is_required(), "parent lost write access");

    let shared = parent.query(VirtualAddress::new(USER_BASE)).unwrap();
    assert!(shared.copy_on_write && !shared.flags.writable());
    assert_eq!(frames.ref_count(shared.frame), 2);

    write_u64(&child, &mut ch, USER_BASE + 0x100, 0xc0ff_ee);
    assert_eq!(read_u64(&parent, &mut ph, USER_BASE + 0x100), 0x1111);
    assert_eq!(read_u64(&child, &mut ch, USER_BASE + 0x100), 0xc0ff_ee);
    assert_eq!(frames.ref_count(shared.frame), 1);

    // Untouched granule is still shared and reads the same in both.
    assert_eq!(read_u64(&child, &mut ch, USER_BASE + GRANULE_SIZE + 0x100), 0x2222);
    let second = child.query(VirtualAddress::new(USER_BASE + GRANULE_SIZE)).unwrap();
    assert_eq!(frames.ref_count(second.frame), 2);
}

#[test]
fn last_owner_reclaims_without_copying() {
    let (ram, frames) = machine();
    let (parent, mut ph) = populated_parent(&ram, &frames);
    let child = AddressSpace::create(&ram, &frames).unwrap();
    child
        .share_copy_on_write(&parent, 2 * GRANULE_SIZE)
        .unwrap()
        .ignore();

    let mut ch = ph;
    let first = VirtualAddress::new(USER_BASE);
    let frame = parent.query(first).unwrap().frame;

    // Child breaks first and gets a copy.
    let r = child.resolve_fault(&mut ch, first, true).unwrap();
    assert!(matches!(r, FaultResolution::Copied { .. }));

    // Parent is now the only owner: write access comes back in place.
    let free_before = frames.free_frames();
    let r = parent.resolve_fault(&mut ph, first, true).unwrap();
    assert!(matches!(r, FaultResolution::Reclaimed { .. }));
    assert_eq!(frames.free_frames(), free_before);
    let m = parent.query(first).unwrap();
    assert_eq!(m.frame, frame);
    assert!(m.flags.writable() && !m.copy_on_write);
}

#[test]
fn destroying_one_sibling_keeps_the_other_intact() {
    let (ram, frames) = machine();
    let baseline = frames.free_frames();
    let (parent, ph) = populated_parent(&ram, &frames);
    let child = AddressSpace::create(&ram, &frames).unwrap();
    child
        .share_copy_on_write(&parent, 2 * GRANULE_SIZE)
        .unwrap()
        .ignore();

    parent.destroy(2 * GRANULE_SIZE);
    let mut ch = ph;
    assert_eq!(read_u64(&child, &mut ch, USER_BASE + 0x100), 0x1111);
    let m = child.query(VirtualAddress::new(USER_BASE)).unwrap();
    assert_eq!(frames.ref_count(m.frame), 1);

    child.destroy(ch.brk - VirtualAddress::new(USER_BASE));
    assert_eq!(frames.free_frames(), baseline);
}

#[test]
fn private_copy_detaches_immediately() {
    let (ram, frames) = machine();
    let (parent, mut ph) = populated_parent(&ram, &frames);
    let child = AddressSpace::create(&ram, &frames).unwrap();
    child.copy_private(&parent, 2 * GRANULE_SIZE).unwrap();

    let p = parent.query(VirtualAddress::new(USER_BASE)).unwrap();
    let c = child.query(VirtualAddress::new(USER_BASE)).unwrap();
    assert_ne!(p.frame, c.frame);
    assert!(p.flags.writable() && c.flags.writable());

    let mut ch = ph;
    write_u64(&child, &mut ch, USER_BASE + 0x100, 7);
    assert_eq!(read_u64(&parent, &mut ph, USER_BASE + 0x100), 0x1111);
}

#[test]
fn shared_text_is_copied_on_the_first_write() {
    let (ram, frames) = machine();
    let parent = AddressSpace::create(&ram, &frames).unwrap();
    let text = frames.allocate_zeroed(&ram).unwrap();
    ram.write(text.base(), &0xC0DE_u64.to_le_bytes());
    parent
        .map_granule(VirtualAddress::new(USER_BASE).page(), text, MapFlags::USER_RO)
        .unwrap();
    let mut ph = heap(1);

    let child = AddressSpace::create(&ram, &frames).unwrap();
    let flush = child.share_copy_on_write(&parent, GRANULE_SIZE).unwrap();
    assert!(!flush.is_required());
    let m = child.query(VirtualAddress::new(USER_BASE)).unwrap();
    assert_eq!(m.frame, text);
    assert!(!m.flags.writable());
    assert_eq!(frames.ref_count(text), 2);

    let mut ch = heap(1);
    let resolution = child
        .resolve_fault(&mut ch, VirtualAddress::new(USER_BASE), true)
        .unwrap();
    assert!(matches!(resolution, FaultResolution::Copied { .. }));
    resolution.flush().ignore();
    write_u64(&child, &mut ch, USER_BASE, 0xBEEF);

    assert_eq!(frames.ref_count(text), 1);
    assert_eq!(read_u64(&parent, &mut ph, USER_BASE), 0xC0DE);
    assert_eq!(read_u64(&child, &mut ch, USER_BASE), 0xBEEF);

    let resolution = parent
        .resolve_fault(&mut ph, VirtualAddress::new(USER_BASE), true)
        .unwrap();
    assert!(matches!(resolution, FaultResolution::Reclaimed { .. }));
    resolution.flush().ignore();
    assert_eq!(parent.query(VirtualAddress::new(USER_BASE)).unwrap().frame, text);
}
