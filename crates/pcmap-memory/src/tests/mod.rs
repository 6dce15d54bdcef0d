mod dispatch;
#[cfg(not(target_arch = "wasm32"))]
mod proptest_cache;

use crate::region::{Handlers, MemoryHandler, SharedHandler};
use crate::{AddressSpace, AddressSpaceConfig};
use std::cell::RefCell;
use std::rc::Rc;

/// Address space without the PC layout.
pub(crate) fn bare_space(ram_size: u32) -> AddressSpace {
    AddressSpace::new(AddressSpaceConfig {
        pc_layout: false,
        ..AddressSpaceConfig::with_ram_size(ram_size)
    })
    .unwrap()
}

pub(crate) fn pc_space(ram_size: u32) -> AddressSpace {
    AddressSpace::new(AddressSpaceConfig::with_ram_size(ram_size)).unwrap()
}

/// Device that answers every read with `value` and logs the absolute addresses it sees.
#[derive(Default)]
pub(crate) struct Recorder {
    pub value: u8,
    pub reads: Vec<u32>,
    pub writes: Vec<(u32, u8)>,
}

impl MemoryHandler for Recorder {
    fn read_u8(&mut self, addr: u32) -> u8 {
        self.reads.push(addr);
        self.value
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        self.writes.push((addr, value));
    }
}

pub(crate) fn recorder(value: u8) -> (Rc<RefCell<Recorder>>, Handlers) {
    let device = Rc::new(RefCell::new(Recorder {
        value,
        ..Recorder::default()
    }));
    let shared: SharedHandler = device.clone();
    (device, Handlers::read_write(shared))
}
