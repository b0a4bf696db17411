use vm_sim::{AddressLayout, ENTRY_SIZE, VirtualAddress, VirtualMemory, VmConfig, VmError};

const PAGE: u32 = 4096;

/// One page table's worth of frames: 1024 pages of 4 KiB.
fn one_table_pool() -> VirtualMemory {
    VirtualMemory::new(VmConfig::DEFAULT.with_pool_size(1024 * u64::from(PAGE))).unwrap()
}

fn page(va: VirtualAddress, n: u32) -> VirtualAddress {
    va.checked_add(n * PAGE).unwrap()
}

#[test]
fn address_fields_cover_all_32_bits() {
    for shift in 4..=16 {
        let layout = AddressLayout::new(1 << shift, ENTRY_SIZE).unwrap();
        assert_eq!(
            layout.outer_bits() + layout.inner_bits() + layout.offset_bits(),
            32,
            "page size {}",
            1u32 << shift
        );
    }
}

#[test]
fn full_page_round_trip_then_release() {
    let vm = one_table_pool();
    let a = vm.allocate(PAGE).unwrap();

    vm.write(a, &[0xAB; PAGE as usize]).unwrap();
    let mut buf = [0u8; PAGE as usize];
    assert_eq!(vm.read(a, &mut buf), PAGE as usize);
    assert!(buf.iter().all(|&b| b == 0xAB));

    vm.release(a, PAGE).unwrap();

    let mut after = [0x5Au8; PAGE as usize];
    assert_eq!(vm.read(a, &mut after), 0);
    assert!(after.iter().all(|&b| b == 0x5A), "read must not touch the buffer");
    assert_eq!(vm.write(a, &[0xCD; PAGE as usize]), Err(VmError::NotMapped(a)));
}

#[test]
fn two_page_allocations_are_disjoint_and_contiguous() {
    let vm = one_table_pool();
    let a = vm.allocate(2 * PAGE).unwrap();
    let b = vm.allocate(2 * PAGE).unwrap();

    let (a0, b0) = (a.as_u32(), b.as_u32());
    assert!(a0 + 2 * PAGE <= b0 || b0 + 2 * PAGE <= a0);

    for va in [a, page(a, 1), b, page(b, 1)] {
        assert!(vm.translate(va).is_some());
    }
    // contiguous in virtual space, so one write crosses the page boundary
    let data: Vec<u8> = (0..=255).cycle().take(2 * PAGE as usize).collect();
    vm.write(a, &data).unwrap();
    let mut out = vec![0u8; data.len()];
    assert_eq!(vm.read(a, &mut out), data.len());
    assert_eq!(out, data);
}

#[test]
fn round_trip_at_odd_offsets() {
    let vm = one_table_pool();
    let va = vm.allocate(3 * PAGE).unwrap();

    for (offset, len) in [(0, 1), (7, 300), (PAGE - 3, 10), (2 * PAGE - 1, PAGE + 1)] {
        let start = va.checked_add(offset).unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i * 31 + offset) as u8).collect();
        vm.write(start, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        assert_eq!(vm.read(start, &mut out), data.len());
        assert_eq!(out, data, "offset {offset} len {len}");
    }
}

#[test]
fn released_range_no_longer_translates() {
    let vm = one_table_pool();
    let va = vm.allocate(4 * PAGE).unwrap();
    vm.release(va, 4 * PAGE).unwrap();

    for n in 0..4 {
        let p = page(va, n);
        assert_eq!(vm.translate(p), None);
        assert_eq!(vm.write(p, &[1]), Err(VmError::NotMapped(p)));
    }
}

#[test]
fn slot_zero_and_frame_zero_are_never_handed_out() {
    let vm = one_table_pool();
    let mut live = Vec::new();

    for round in 0..100u32 {
        let pages = round % 5 + 1;
        let va = vm.allocate(pages * PAGE).unwrap();
        assert_ne!(vm.layout().page_number(va).as_u32(), 0);
        for n in 0..pages {
            let pa = vm.translate(page(va, n)).unwrap();
            assert_ne!(vm.layout().frame_of(pa).as_u32(), 0);
        }
        live.push((va, pages));

        if round % 2 == 0 {
            let (va, pages) = live.remove(live.len() / 2);
            vm.release(va, pages * PAGE).unwrap();
        }
    }
    assert_eq!(vm.translate(VirtualAddress::new(0)), None);
}

#[test]
fn the_pool_can_be_exhausted_and_refilled() {
    let vm = one_table_pool();
    // frame 0 holds the directory and one frame becomes the inner table
    let usable = 1024 - 2;
    let va = vm.allocate(usable * PAGE).unwrap();
    assert_eq!(
        vm.allocate(PAGE),
        Err(VmError::OutOfMemory { pages: 1 })
    );

    vm.release(va, usable * PAGE).unwrap();
    let again = vm.allocate(usable * PAGE).unwrap();
    assert_eq!(again, va);
}

#[test]
fn running_out_of_frames_rolls_the_allocation_back() {
    // slots and frames are equally many, but inner tables use frames too,
    // so the last page of a run that fills every free slot finds no frame
    let vm = VirtualMemory::new(VmConfig::DEFAULT.with_pool_size(64 * u64::from(PAGE))).unwrap();
    let keep = vm.allocate(10 * PAGE).unwrap();
    let before = vm.usage().unwrap();

    assert_eq!(
        vm.allocate(53 * PAGE),
        Err(VmError::OutOfMemory { pages: 53 })
    );
    assert_eq!(vm.usage().unwrap(), before);

    // nothing of the failed attempt is left mapped
    let next = page(keep, 10);
    assert_eq!(vm.translate(next), None);
    assert!(vm.allocate(52 * PAGE).is_ok());
}

#[test]
fn invalid_free_changes_nothing() {
    let vm = one_table_pool();
    let a = vm.allocate(PAGE).unwrap();
    let b = vm.allocate(PAGE).unwrap();
    vm.write(a, b"kept").unwrap();
    vm.release(b, PAGE).unwrap();
    let before = vm.usage().unwrap();

    // `a` is live but `b` is not
    assert_eq!(
        vm.release(a, 2 * PAGE),
        Err(VmError::InvalidFree {
            address: a,
            pages: 2,
        })
    );
    assert_eq!(vm.usage().unwrap(), before);

    let mut buf = [0u8; 4];
    assert_eq!(vm.read(a, &mut buf), 4);
    assert_eq!(&buf, b"kept");
}

#[test]
fn release_before_any_allocation_is_a_no_op() {
    let vm = one_table_pool();
    assert_eq!(vm.release(VirtualAddress::new(0x1000), PAGE), Ok(()));
    assert!(!vm.is_initialized());
}

#[test]
fn writes_before_any_allocation_fail_cleanly() {
    let vm = one_table_pool();
    let va = VirtualAddress::new(0x1000);
    assert_eq!(vm.write(va, &[1, 2, 3]), Err(VmError::NotMapped(va)));
    let mut buf = [9u8; 3];
    assert_eq!(vm.read(va, &mut buf), 0);
    assert_eq!(buf, [9, 9, 9]);
    assert!(vm.is_initialized());
}

#[test]
fn accesses_past_the_top_of_the_address_space_fail() {
    let vm = one_table_pool();
    let top = VirtualAddress::new(u32::MAX);
    assert_eq!(vm.write(top, &[1, 2]), Err(VmError::NotMapped(top)));
}

#[test]
fn usage_tracks_slots_frames_and_tables() {
    let vm = one_table_pool();
    assert_eq!(vm.usage(), None);

    let va = vm.allocate(3 * PAGE).unwrap();
    let u = vm.usage().unwrap();
    assert_eq!(u.total_pages, 1024);
    assert_eq!(u.used_slots, 1 + 3);
    assert_eq!(u.used_frames, 1 + 1 + 3);
    assert_eq!(u.inner_tables, 1);

    vm.release(va, 3 * PAGE).unwrap();
    let u = vm.usage().unwrap();
    assert_eq!(u.used_slots, 1);
    // the inner table stays
    assert_eq!(u.used_frames, 2);
    assert_eq!(u.inner_tables, 1);
}

#[test]
fn smaller_pages_use_a_multi_frame_directory() {
    // 1 KiB pages: 10-bit offset, 8-bit inner index, 14-bit outer index,
    // so the directory spans 64 frames
    let config = VmConfig::DEFAULT.with_page_size(1024).with_pool_size(1 << 20);
    let vm = VirtualMemory::new(config).unwrap();
    assert_eq!(vm.layout().directory_frames(), 64);

    let va = vm.allocate(3000).unwrap();
    let pa = vm.translate(va).unwrap();
    assert!(vm.layout().frame_of(pa).as_u32() >= 64);

    let data = [0x42u8; 3000];
    vm.write(va, &data).unwrap();
    let mut out = [0u8; 3000];
    assert_eq!(vm.read(va, &mut out), 3000);
    assert_eq!(out, data);
}
