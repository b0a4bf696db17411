use vm_sim::{TlbStats, VirtualAddress, VirtualMemory, VmConfig};

const PAGE: u32 = 4096;

fn vm_with_rows(rows: u32) -> VirtualMemory {
    let config = VmConfig::DEFAULT
        .with_pool_size(256 * u64::from(PAGE))
        .with_tlb_entries(rows);
    VirtualMemory::new(config).unwrap()
}

fn page(va: VirtualAddress, n: u32) -> VirtualAddress {
    va.checked_add(n * PAGE).unwrap()
}

#[test]
fn mapping_fills_the_tlb_and_release_empties_it() {
    let vm = vm_with_rows(32);
    let va = vm.allocate(3 * PAGE).unwrap();
    let space = vm.address_space().unwrap();

    for n in 0..3 {
        let p = page(va, n);
        let cached = space.tlb().lookup(p).expect("mapped pages are cached");
        assert_eq!(Some(cached), vm.translate(p).map(|pa| vm.layout().frame_of(pa)));
    }

    vm.release(va, 3 * PAGE).unwrap();
    for n in 0..3 {
        assert_eq!(space.tlb().lookup(page(va, n)), None);
    }
}

#[test]
fn allocation_alone_performs_no_lookups() {
    let vm = vm_with_rows(8);
    vm.allocate(5 * PAGE).unwrap();
    assert_eq!(vm.tlb_stats(), TlbStats::default());
    assert_eq!(vm.tlb_miss_rate(), None);
}

#[test]
fn miss_rate_counts_cold_and_conflict_misses() {
    // four rows: slots 1..=5 land in rows 1, 2, 3, 0, 1
    let vm = vm_with_rows(4);
    let va = vm.allocate(5 * PAGE).unwrap();
    assert_eq!(va, VirtualAddress::new(PAGE));

    // slots 2..=5 are still cached
    for n in 1..5 {
        assert!(vm.translate(page(va, n)).is_some());
    }
    // slot 1 was evicted by slot 5 but the walk still finds it
    assert!(vm.translate(va).is_some());
    // slot 6 was never mapped
    assert!(vm.translate(page(va, 5)).is_none());

    let stats = vm.tlb_stats();
    assert_eq!(stats, TlbStats { checks: 6, misses: 2 });
    assert_eq!(vm.tlb_miss_rate(), Some(2.0 / 6.0));
    assert_eq!(stats.to_string(), "miss: 2 total: 6 rate: 0.333333");
}

#[test]
fn every_byte_access_is_one_lookup() {
    let vm = vm_with_rows(16);
    let va = vm.allocate(PAGE).unwrap();

    vm.write(va, &[7; 10]).unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(vm.read(va, &mut buf), 10);

    assert_eq!(vm.tlb_stats(), TlbStats { checks: 20, misses: 0 });
}

#[test]
fn dump_shows_the_cached_pages() {
    let vm = vm_with_rows(8);
    vm.allocate(2 * PAGE).unwrap();
    let dump = vm.address_space().unwrap().tlb().dump().to_string();
    let lines: Vec<_> = dump.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("page #1"));
    assert!(lines[1].contains("page #2"));
}
