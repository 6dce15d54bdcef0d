use pcmap_chipset::acc2168::{PORT_DATA, PORT_INDEX, REG_SHADOW};
use pcmap_chipset::{Acc2168, PortIo, SegmentState};
use pcmap_memory::{
    AccessClass, AccessKind, AccessMode, AddressSpace, AddressSpaceConfig, Handlers,
    MemoryHandler, Region, RegionFlags, SharedHandler,
};
use std::cell::RefCell;
use std::rc::Rc;

struct Fixed(u8);

impl MemoryHandler for Fixed {
    fn read_u8(&mut self, _addr: u32) -> u8 {
        self.0
    }

    fn write_u8(&mut self, _addr: u32, _value: u8) {}
}

fn machine() -> (AddressSpace, Acc2168) {
    let mut space =
        AddressSpace::new(AddressSpaceConfig::with_ram_size(4 * 1024 * 1024)).unwrap();
    let bios: SharedHandler = Rc::new(RefCell::new(Fixed(0xEA)));
    space
        .add_region(Region::device(
            "bios",
            0xF0000,
            0x10000,
            Handlers::read_only(bios),
            RegionFlags::EXTERNAL | RegionFlags::ROM,
        ))
        .unwrap();
    (space, Acc2168::new())
}

fn write_shadow(chip: &mut Acc2168, space: &mut AddressSpace, value: u8) {
    chip.write_port(space, PORT_INDEX, REG_SHADOW);
    chip.write_port(space, PORT_DATA, value);
}

#[test]
fn registers_through_index_and_data_ports() {
    let (mut space, mut chip) = machine();
    chip.write_port(&mut space, PORT_INDEX, 0x10);
    chip.write_port(&mut space, PORT_DATA, 0xA5);
    assert_eq!(chip.read_port(&mut space, PORT_INDEX), 0x10);
    assert_eq!(chip.read_port(&mut space, PORT_DATA), 0xA5);
    assert_eq!(chip.reg(0x10), 0xA5);
    assert_eq!(chip.read_port(&mut space, 0xF4), 0xFF);
}

#[test]
fn shadow_copy_then_write_protect() {
    let (mut space, mut chip) = machine();
    assert_eq!(space.read_u8(0xF0010), 0xEA);

    // F segment enabled, reads from the bus, writes into DRAM.
    write_shadow(&mut chip, &mut space, 0x08);
    assert_eq!(chip.segment(3), Some(SegmentState::ShadowedWo));
    space.write_u8(0xF0010, 0x77);
    assert_eq!(space.read_u8(0xF0010), 0xEA);

    // Read from DRAM, write protected.
    write_shadow(&mut chip, &mut space, 0x38);
    assert_eq!(chip.segment(3), Some(SegmentState::ShadowedRo));
    assert_eq!(space.read_u8(0xF0010), 0x77);
    space.write_u8(0xF0010, 0x11);
    assert_eq!(space.read_u8(0xF0010), 0x77);
}

#[test]
fn disabled_segments_stay_on_the_bus() {
    let (mut space, mut chip) = machine();
    write_shadow(&mut chip, &mut space, 0x13);

    let class = |space: &AddressSpace, addr| {
        space
            .access_state(addr, AccessMode::CpuNormal)
            .class(AccessKind::Read)
    };
    assert_eq!(chip.segment(0), Some(SegmentState::ShadowedRw));
    assert_eq!(chip.segment(1), Some(SegmentState::ShadowedRw));
    assert_eq!(chip.segment(2), Some(SegmentState::External));
    assert_eq!(chip.segment(4), None);
    assert_eq!(class(&space, 0xC0000), AccessClass::Internal);
    assert_eq!(class(&space, 0xDF000), AccessClass::Internal);
    assert_eq!(class(&space, 0xE0000), AccessClass::ExtAny);
    assert_eq!(class(&space, 0xF0000), AccessClass::ExtAny);

    // Turning a segment off hands it back to the bus.
    write_shadow(&mut chip, &mut space, 0x12);
    assert_eq!(class(&space, 0xC0000), AccessClass::ExtAny);
    assert_eq!(class(&space, 0xD0000), AccessClass::Internal);
}

#[test]
fn reset_clears_shadowing() {
    let (mut space, mut chip) = machine();
    write_shadow(&mut chip, &mut space, 0x1F);
    assert_eq!(space.read_u8(0xF0010), 0x00);

    chip.reset(&mut space);
    assert_eq!(chip.reg(REG_SHADOW), 0);
    assert_eq!(chip.segment(3), Some(SegmentState::External));
    assert_eq!(space.read_u8(0xF0010), 0xEA);
}
