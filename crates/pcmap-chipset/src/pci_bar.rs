use crate::recalc::RegionRecalc;
use pcmap_memory::{AddressSpace, Handlers, MapError, Region, RegionFlags, RegionHandle, Result};

/// PCI command register memory space enable.
pub const COMMAND_MEMORY_SPACE: u16 = 1 << 1;

const BAR_FLAGS_MASK: u32 = 0xF;

/// 32-bit memory BAR of a PCI device, backed by one region of the address space.
///
/// The window decodes while the command register has memory space enabled and the BAR holds a
/// non-zero base. BAR writes keep only the bits above the (power of two) window size, so
/// firmware can size the BAR by writing all ones and reading back.
pub struct PciBarWindow {
    region: RegionHandle,
    size: u32,
    bar: u32,
    command: u16,
}

impl PciBarWindow {
    pub fn new(
        space: &mut AddressSpace,
        name: &'static str,
        size: u32,
        handlers: Handlers,
        flags: RegionFlags,
    ) -> Result<Self> {
        if !size.is_power_of_two() || size < 0x1000 {
            return Err(MapError::InvalidConfig(
                "BAR size must be a power of two of at least 4 KiB",
            ));
        }
        let region = space.add_region(Region::device(name, 0, 0, handlers, flags).disabled())?;
        Ok(Self {
            region,
            size,
            bar: 0,
            command: 0,
        })
    }

    pub fn region(&self) -> RegionHandle {
        self.region
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Base address the window decodes at, once enabled.
    pub fn base(&self) -> u32 {
        self.bar & !BAR_FLAGS_MASK
    }

    pub fn read_bar(&self) -> u32 {
        self.bar
    }

    pub fn write_bar(&mut self, space: &mut AddressSpace, value: u32) {
        self.bar = value & !(self.size - 1) & !BAR_FLAGS_MASK;
        tracing::debug!(bar = self.bar, "PCI BAR write");
        self.recalc(space);
    }

    pub fn command(&self) -> u16 {
        self.command
    }

    pub fn write_command(&mut self, space: &mut AddressSpace, command: u16) {
        let toggled = (self.command ^ command) & COMMAND_MEMORY_SPACE != 0;
        self.command = command;
        if toggled {
            self.recalc(space);
        }
    }

    fn decoding(&self) -> bool {
        self.command & COMMAND_MEMORY_SPACE != 0 && self.base() != 0
    }
}

impl RegionRecalc for PciBarWindow {
    fn teardown(&mut self, space: &mut AddressSpace) -> Result<()> {
        space.disable(self.region)
    }

    fn setup(&mut self, space: &mut AddressSpace) -> Result<()> {
        if self.decoding() {
            space.set_addr(self.region, self.base(), self.size)?;
        }
        Ok(())
    }
}
