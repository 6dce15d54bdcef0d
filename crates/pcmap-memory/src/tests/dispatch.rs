use super::{bare_space, pc_space, recorder};
use crate::mmu::{CR0_PG, CR0_WP};
use crate::phys::GuestMemory;
use crate::{AccessPair, AccessType, PagingState, Region, RegionFlags};

const MIB: u32 = 1024 * 1024;

#[test]
fn unaligned_access_decomposes_into_bytes() {
    let mut space = bare_space(MIB);
    space
        .add_region(Region::ram("ram", 0, 0x10000, 0))
        .unwrap();
    let (device, handlers) = recorder(0xEE);
    space
        .add_region(Region::device("dev", 0x10000, 0x100, handlers, RegionFlags::EXTERNAL))
        .unwrap();
    space
        .set_access_both(0, 0x10000, AccessPair::INTERNAL)
        .unwrap();
    space.write_u16(0xFFFE, 0x3412);

    assert_eq!(space.read_u32(0xFFFE), 0xEEEE_3412);
    assert_eq!(device.borrow().reads, vec![0x10000, 0x10001]);

    space.write_u32(0xFFFF, 0xAABB_CCDD);
    assert_eq!(space.ram().read_u8(0xFFFF).unwrap(), 0xDD);
    assert_eq!(
        device.borrow().writes,
        vec![(0x10000, 0xCC), (0x10001, 0xBB), (0x10002, 0xAA)]
    );
}

#[test]
fn aligned_device_access_uses_wide_handler_entry() {
    let mut space = bare_space(MIB);
    let (device, handlers) = recorder(0x7F);
    space
        .add_region(Region::device("dev", 0xE0000, 0x1000, handlers, RegionFlags::EXTERNAL))
        .unwrap();

    assert_eq!(space.read_u32(0xE0008), 0x7F7F_7F7F);
    space.write_u16(0xE0010, 0x1234);
    assert_eq!(device.borrow().reads, vec![0xE0008, 0xE0009, 0xE000A, 0xE000B]);
    assert_eq!(device.borrow().writes, vec![(0xE0010, 0x34), (0xE0011, 0x12)]);
}

#[test]
fn handler_direction_can_be_split() {
    let mut space = bare_space(MIB);
    let (rom, handlers) = recorder(0xC3);
    let rom_region = Region::device(
        "option-rom",
        0xC8000,
        0x1000,
        crate::Handlers::read_only(handlers.read.clone().unwrap()),
        RegionFlags::INTERNAL,
    )
    .with_direct(Some(0xC8000));
    let h = space.add_region(rom_region).unwrap();
    space
        .set_access_both(0xC8000, 0x1000, AccessPair::INTERNAL)
        .unwrap();

    space.write_u8(0xC8000, 0x12);
    assert_eq!(space.read_u8(0xC8000), 0xC3);
    assert_eq!(space.ram().read_u8(0xC8000).unwrap(), 0x12);
    assert!(rom.borrow().writes.is_empty());

    space.set_handlers(h, crate::Handlers::none()).unwrap();
    assert_eq!(space.read_u8(0xC8000), 0x12);
}

#[test]
fn ram_pages_are_cached_and_invalidated_by_reconfiguration() {
    let mut space = pc_space(16 * MIB);
    space.write_u8(0x1000, 0x42);
    assert_eq!(space.read_u8(0x1000), 0x42);
    assert_eq!(space.read_u8(0x1001), 0);
    let stats = space.cache_stats();
    assert!(stats.fills >= 1);
    assert!(stats.hits >= 1);

    space
        .set_access_both(0x1000, 0x1000, AccessPair::EXTERNAL)
        .unwrap();
    assert_eq!(space.read_u8(0x1000), 0xFF);

    space
        .set_access_both(0x1000, 0x1000, AccessPair::INTERNAL)
        .unwrap();
    let low = space.pc_layout().unwrap().ram_low;
    assert_eq!(space.read_u8(0x1000), 0x42);
    space.set_direct(low, Some(0x10_0000)).unwrap();
    assert_eq!(space.read_u8(0x1000), 0);
}

#[test]
fn partially_claimed_pages_are_not_cached() {
    let mut space = bare_space(MIB);
    let (device, handlers) = recorder(0x99);
    space
        .add_region(Region::device("regs", 0x2800, 0x10, handlers, RegionFlags::INTERNAL))
        .unwrap();
    space
        .add_region(Region::ram("ram", 0, 0x10000, 0))
        .unwrap();
    space
        .set_access_both(0, 0x10000, AccessPair::INTERNAL)
        .unwrap();

    assert_eq!(space.read_u8(0x2000), 0);
    assert_eq!(space.read_u8(0x2000), 0);
    assert_eq!(space.cache_stats().fills, 0);
    assert_eq!(space.read_u8(0x2804), 0x99);
    assert_eq!(space.read_u8(0x2804), 0x99);
    assert_eq!(device.borrow().reads.len(), 2);

    space.read_u8(0x3000);
    assert_eq!(space.cache_stats().fills, 1);
}

#[test]
fn bus_master_accesses_bypass_the_cache() {
    let mut space = pc_space(16 * MIB);
    space.bus_write_bytes(0x4000, &[1, 2, 3, 4]);
    let mut buf = [0u8; 4];
    space.bus_read_bytes(0x4000, &mut buf);
    assert_eq!(buf, [1, 2, 3, 4]);
    assert_eq!(space.bus_read_u32(0x4000), 0x0403_0201);
    assert_eq!(space.cache_stats().fills, 0);
    assert_eq!(space.read_u32(0x4000), 0x0403_0201);
}

#[test]
fn batched_updates_are_applied_on_drop() {
    let mut space = pc_space(16 * MIB);
    space.write_u8(0x5000, 0x10);
    assert_eq!(space.read_u8(0x5000), 0x10);

    {
        let mut batch = space.batch();
        batch
            .set_access_both(0x5000, 0x1000, AccessPair::EXTERNAL)
            .unwrap();
        {
            let mut inner = batch.batch();
            inner
                .set_access_both(0x6000, 0x1000, AccessPair::EXTERNAL)
                .unwrap();
        }
        assert!(batch.in_batch());
        assert_eq!(batch.read_u8(0x5000), 0xFF);
        assert_eq!(batch.read_u8(0x6000), 0xFF);
    }

    assert!(!space.in_batch());
    assert_eq!(space.read_u8(0x5000), 0xFF);
    space
        .set_access_both(0x5000, 0x2000, AccessPair::INTERNAL)
        .unwrap();
    assert_eq!(space.read_u8(0x5000), 0x10);
}

#[test]
fn fetch_lines_survive_data_flush() {
    let mut space = pc_space(16 * MIB);
    space.write_u8(0x7000, 0x90);
    assert_eq!(space.fetch_u8(0x7000), 0x90);
    assert_eq!(space.read_u8(0x7000), 0x90);
    let before = space.cache_stats();

    space.flush_data_cache();
    assert_eq!(space.fetch_u8(0x7000), 0x90);
    assert_eq!(space.cache_stats().hits, before.hits + 1);
    assert_eq!(space.read_u8(0x7000), 0x90);
    assert_eq!(space.cache_stats().fills, before.fills + 1);

    space.flush_cache();
    assert_eq!(space.fetch_u8(0x7000), 0x90);
    assert_eq!(space.cache_stats().fills, before.fills + 2);
}

fn paged_space() -> crate::AddressSpace {
    let mut space = pc_space(16 * MIB);
    // PD at 0x1000, PT at 0x2000; linear 0x0040_0000 -> 0x5000, linear 0x0040_1000 not present.
    space.write_u32(0x1000 + 4, 0x2000 | 0x7);
    space.write_u32(0x2000, 0x5000 | 0x7);
    space.set_paging(PagingState {
        cr0: CR0_PG,
        cr3: 0x1000,
        cr4: 0,
        cpl: 0,
    });
    space
}

#[test]
fn get_phys_walks_tables_through_the_address_space() {
    let mut space = paged_space();
    space.write_u8(0x5010, 0x77);

    assert_eq!(space.get_phys(0x0040_0010, AccessType::Read), Ok(0x5010));
    assert_eq!(space.read_linear_u8(0x0040_0010), Ok(0x77));
    assert_eq!(space.read_u32(0x2000) & 0x20, 0x20);

    space.write_linear_u16(0x0040_0020, 0xBEEF).unwrap();
    assert_eq!(space.read_u16(0x5020), 0xBEEF);
    assert_eq!(space.read_u32(0x2000) & 0x40, 0x40);

    let fault = space.get_phys(0x0040_1000, AccessType::Read).unwrap_err();
    assert_eq!(fault.addr, 0x0040_1000);

    space.set_paging(PagingState::default());
    assert_eq!(space.get_phys(0x0040_1000, AccessType::Read), Ok(0x0040_1000));
}

#[test]
fn translation_is_remembered_until_flushed() {
    let mut space = paged_space();
    assert_eq!(space.get_phys(0x0040_0000, AccessType::Read), Ok(0x5000));

    space.write_u32(0x2000, 0x6000 | 0x7);
    assert_eq!(space.get_phys(0x0040_0004, AccessType::Read), Ok(0x5004));

    space.flush_translation();
    assert_eq!(space.get_phys(0x0040_0004, AccessType::Read), Ok(0x6004));
}

#[test]
fn page_crossing_write_faults_before_touching_memory() {
    let mut space = paged_space();
    space.write_u32(0x5FFC, 0x1111_1111);

    assert!(space.write_linear_u32(0x0040_0FFE, 0xAABB_CCDD).is_err());
    assert_eq!(space.read_u32(0x5FFC), 0x1111_1111);
    assert!(space.read_linear_u32(0x0040_0FFE).is_err());
}

#[test]
fn supervisor_write_protect_is_honoured() {
    let mut space = paged_space();
    space.write_u32(0x2000, 0x5000 | 0x5);
    space.flush_translation();
    space.write_linear_u8(0x0040_0000, 1).unwrap();

    space.set_paging(PagingState {
        cr0: CR0_PG | CR0_WP,
        cr3: 0x1000,
        cr4: 0,
        cpl: 0,
    });
    assert!(space.write_linear_u8(0x0040_0000, 2).is_err());
    assert_eq!(space.read_u8(0x5000), 1);
}
