use crate::region::{Handlers, MemoryHandler, SharedHandler};
use crate::{
    AccessClass, AccessKind, AccessPair, AddressSpace, AddressSpaceConfig, Region, RegionFlags,
    RegionHandle,
};
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

const RAM_SIZE: u32 = 1024 * 1024;

/// Stateless device whose value depends only on the address.
struct Pattern(u8);

impl MemoryHandler for Pattern {
    fn read_u8(&mut self, addr: u32) -> u8 {
        (addr as u8) ^ self.0
    }

    fn write_u8(&mut self, _addr: u32, _value: u8) {}
}

#[derive(Clone, Debug)]
enum Op {
    Read(u32, u8),
    Fetch(u32),
    Write(u32, u32, u8),
    BusRead(u32),
    SetAccess(u32, AccessClass, AccessClass),
    Toggle(usize),
    Relocate(usize, u32, u32),
    A20(bool),
    Smm(bool),
}

fn arb_addr() -> impl Strategy<Value = u32> {
    (0u32..0x40000, any::<bool>())
        .prop_map(|(addr, alias)| if alias { addr | 0x10_0000 } else { addr })
}

fn arb_class() -> impl Strategy<Value = AccessClass> {
    prop_oneof![
        Just(AccessClass::Any),
        Just(AccessClass::Internal),
        Just(AccessClass::External),
        Just(AccessClass::ExtAny),
        Just(AccessClass::Disabled),
    ]
}

fn arb_size() -> impl Strategy<Value = u8> {
    prop_oneof![Just(1u8), Just(2u8), Just(4u8)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (arb_addr(), arb_size()).prop_map(|(a, s)| Op::Read(a, s)),
        2 => arb_addr().prop_map(Op::Fetch),
        3 => (arb_addr(), any::<u32>(), arb_size()).prop_map(|(a, v, s)| Op::Write(a, v, s)),
        1 => arb_addr().prop_map(Op::BusRead),
        2 => (0u32..0x40, arb_class(), arb_class()).prop_map(|(p, r, w)| Op::SetAccess(p, r, w)),
        1 => (0usize..4).prop_map(Op::Toggle),
        1 => (0usize..4, 0u32..0x3C, 1u32..8).prop_map(|(i, p, n)| Op::Relocate(i, p, n)),
        1 => any::<bool>().prop_map(Op::A20),
        1 => any::<bool>().prop_map(Op::Smm),
    ]
}

fn build(cache_enabled: bool) -> (AddressSpace, Vec<RegionHandle>) {
    let mut space = AddressSpace::new(AddressSpaceConfig {
        pc_layout: false,
        cache_enabled,
        cache_entries: 16,
        ..AddressSpaceConfig::with_ram_size(RAM_SIZE)
    })
    .unwrap();

    let internal: SharedHandler = Rc::new(RefCell::new(Pattern(0x5A)));
    let external: SharedHandler = Rc::new(RefCell::new(Pattern(0xA5)));
    let handles = vec![
        space
            .add_region(Region::ram("low", 0, 0x40000, 0))
            .unwrap(),
        space
            .add_region(Region::ram("alias", 0x20000, 0x8000, 0x80000))
            .unwrap(),
        space
            .add_region(Region::device(
                "regs",
                0x38000,
                0x800,
                Handlers::read_write(internal),
                RegionFlags::INTERNAL,
            ))
            .unwrap(),
        space
            .add_region(Region::device(
                "card",
                0x3C000,
                0x4000,
                Handlers::read_only(external),
                RegionFlags::EXTERNAL,
            ))
            .unwrap(),
    ];
    space
        .set_access_both(0, 0x30000, AccessPair::INTERNAL)
        .unwrap();
    (space, handles)
}

#[derive(Debug, PartialEq)]
enum Observed {
    Value(u32),
    Resolved(Option<crate::Resolved>),
    Done,
}

fn apply(space: &mut AddressSpace, handles: &[RegionHandle], op: &Op) -> Vec<Observed> {
    match *op {
        Op::Read(addr, size) => {
            let value = match size {
                1 => u32::from(space.read_u8(addr)),
                2 => u32::from(space.read_u16(addr)),
                _ => space.read_u32(addr),
            };
            let first = space.resolve(addr, AccessKind::Read);
            let second = space.resolve(addr, AccessKind::Read);
            assert_eq!(first, second);
            vec![Observed::Value(value), Observed::Resolved(first)]
        }
        Op::Fetch(addr) => vec![
            Observed::Value(space.fetch_u32(addr)),
            Observed::Resolved(space.resolve(addr, AccessKind::Fetch)),
        ],
        Op::Write(addr, value, size) => {
            match size {
                1 => space.write_u8(addr, value as u8),
                2 => space.write_u16(addr, value as u16),
                _ => space.write_u32(addr, value),
            }
            vec![Observed::Done]
        }
        Op::BusRead(addr) => vec![Observed::Value(space.bus_read_u32(addr))],
        Op::SetAccess(page, read, write) => {
            space
                .set_access_both(page << 12, 0x1000, AccessPair::new(read, write))
                .unwrap();
            vec![Observed::Done]
        }
        Op::Toggle(index) => {
            let handle = handles[index];
            let enabled = space.region(handle).unwrap().enabled;
            space.set_enabled(handle, !enabled).unwrap();
            vec![Observed::Done]
        }
        Op::Relocate(index, page, pages) => {
            space
                .set_addr(handles[index], page << 12, pages << 12)
                .unwrap();
            vec![Observed::Done]
        }
        Op::A20(enabled) => {
            space.set_a20(enabled);
            vec![Observed::Done]
        }
        Op::Smm(smm) => {
            space.set_smm(smm);
            vec![Observed::Done]
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cache_is_transparent(ops in prop::collection::vec(arb_op(), 1..96)) {
        let (mut cached, cached_handles) = build(true);
        let (mut uncached, uncached_handles) = build(false);

        for op in &ops {
            let with_cache = apply(&mut cached, &cached_handles, op);
            let without_cache = apply(&mut uncached, &uncached_handles, op);
            prop_assert_eq!(with_cache, without_cache, "diverged at {:?}", op);
        }
        prop_assert_eq!(uncached.cache_stats().fills, 0);
    }
}
