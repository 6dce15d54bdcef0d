//! VLSI 82C311 "SCAMP" 386SX chipset.
//!
//! Configuration registers sit behind an index/data pair at `0xEC`/`0xED`. The EMS page
//! registers use `0xE8` (index) and `0xEA`/`0xEB` (low/high byte of the page number). `0xEE`
//! drives the fast A20 gate and a read of `0xEF` requests a CPU soft reset.

use crate::recalc::{report, PortIo, RegionRecalc};
use crate::shadow::{SegmentState, ShadowSegment};
use pcmap_memory::{
    AccessPair, AddressSpace, MapError, ModeMask, Region, RegionHandle, Result, CONVENTIONAL_END,
    HIGH_MEMORY_BASE,
};

pub const PORT_EMS_INDEX: u16 = 0xE8;
pub const PORT_EMS_LOW: u16 = 0xEA;
pub const PORT_EMS_HIGH: u16 = 0xEB;
pub const PORT_CFG_INDEX: u16 = 0xEC;
pub const PORT_CFG_DATA: u16 = 0xED;
pub const PORT_FAST_A20: u16 = 0xEE;
pub const PORT_SOFT_RESET: u16 = 0xEF;

const PORTS: [u16; 7] = [
    PORT_EMS_INDEX,
    PORT_EMS_LOW,
    PORT_EMS_HIGH,
    PORT_CFG_INDEX,
    PORT_CFG_DATA,
    PORT_FAST_A20,
    PORT_SOFT_RESET,
];

pub const CFG_ID: u8 = 0x00;
pub const CFG_SLTPTR: u8 = 0x02;
pub const CFG_RAMMAP: u8 = 0x03;
pub const CFG_EMSEN1: u8 = 0x0B;
pub const CFG_EMSEN2: u8 = 0x0C;
pub const CFG_ABAXS: u8 = 0x0E;
pub const CFG_CAXS: u8 = 0x0F;
pub const CFG_DAXS: u8 = 0x10;
pub const CFG_FEAXS: u8 = 0x11;
const CFG_LAST: u8 = 0x16;

const ID_VL82C311: u8 = 0xD6;

const RAMMAP_REMP386: u8 = 1 << 4;
const EMSEN1_EMSMAP: u8 = 1 << 4;
const EMSEN1_EMSENAB: u8 = 1 << 7;

const EMS_PAGE_REGS: usize = 0x24;
const EMS_WINDOW_SIZE: u32 = 0x4000;
/// 16 KiB windows covering `A0000..EFFFF`.
const EMS_WINDOWS: usize = 20;
/// EMS page registers 0..12 map the `C0000..EFFFF` windows.
const EMS_PAGED_WINDOWS: usize = 12;
const EMS_PAGED_BASE: u32 = 0xC0000;

const BIOS_BASE: u32 = 0xF0000;
const BIOS_SIZE: u32 = 0x10000;
const ROM_ALIAS_BASE: u32 = 0xFE_0000;
const ROM_ALIAS_SIZE: u32 = 0x2_0000;
const BUS_TOP: u32 = 0x100_0000;
const REMAP_KIB: u32 = 384;

fn window_base(window: usize) -> u32 {
    CONVENTIONAL_END + window as u32 * EMS_WINDOW_SIZE
}

pub struct Scamp {
    cfg_index: u8,
    cfg_regs: [u8; 256],
    ems_index: u8,
    ems_autoinc: bool,
    ems: [u16; EMS_PAGE_REGS],
    /// RAM-backed windows over `A0000..EFFFF`; each points at the RAM page currently mapped.
    ems_regions: [RegionHandle; EMS_WINDOWS],
    mappings: [u32; EMS_WINDOWS],
    soft_reset: bool,
}

impl Scamp {
    /// Installs the chipset's memory decoding on a PC-layout address space.
    pub fn new(space: &mut AddressSpace) -> Result<Self> {
        let layout = space
            .pc_layout()
            .ok_or(MapError::InvalidConfig("SCAMP needs the PC memory layout"))?;
        let ram = space.ram_size();
        let mut batch = space.batch();

        // ram_mid only backs the BIOS shadow; A0000..EFFFF is served by the EMS windows.
        if let Some(ram_mid) = layout.ram_mid {
            if ram >= HIGH_MEMORY_BASE {
                batch.set_addr(ram_mid, BIOS_BASE, BIOS_SIZE)?;
                batch.set_direct(ram_mid, Some(BIOS_BASE))?;
            } else {
                tracing::warn!(ram, "no RAM behind the BIOS area, shadowing disabled");
                batch.disable(ram_mid)?;
            }
        }
        batch.set_access_normal(ROM_ALIAS_BASE, ROM_ALIAS_SIZE, AccessPair::EXTANY)?;

        let mut ems_regions = Vec::with_capacity(EMS_WINDOWS);
        let mut mappings = [0u32; EMS_WINDOWS];
        for (window, mapping) in mappings.iter_mut().enumerate() {
            let base = window_base(window);
            let region = if base + EMS_WINDOW_SIZE <= ram {
                Region::ram("ems", base, EMS_WINDOW_SIZE, base)
            } else {
                Region::ram("ems", base, EMS_WINDOW_SIZE, base)
                    .with_direct(None)
                    .disabled()
            };
            ems_regions.push(batch.add_region(region)?);
            *mapping = base;
        }
        let ems_regions = ems_regions
            .try_into()
            .map_err(|_| MapError::InvalidConfig("EMS window count mismatch"))?;

        let mut cfg_regs = [0u8; 256];
        cfg_regs[usize::from(CFG_ID)] = ID_VL82C311;

        Ok(Self {
            cfg_index: 0,
            cfg_regs,
            ems_index: 0,
            ems_autoinc: false,
            ems: [0; EMS_PAGE_REGS],
            ems_regions,
            mappings,
            soft_reset: false,
        })
    }

    pub fn cfg_reg(&self, index: u8) -> u8 {
        self.cfg_regs[usize::from(index)]
    }

    /// RAM address currently mapped into EMS window `window` (`A0000 + window * 16K`).
    pub fn ems_mapping(&self, window: usize) -> Option<u32> {
        self.mappings.get(window).copied()
    }

    /// Returns and clears the soft reset request raised by a read of port `0xEF`.
    pub fn take_soft_reset(&mut self) -> bool {
        std::mem::take(&mut self.soft_reset)
    }

    fn remapping(&self) -> bool {
        self.cfg_regs[usize::from(CFG_RAMMAP)] & RAMMAP_REMP386 != 0
    }

    fn write_cfg(&mut self, space: &mut AddressSpace, value: u8) {
        let index = self.cfg_index;
        if !(CFG_SLTPTR..=CFG_LAST).contains(&index) {
            return;
        }
        self.cfg_regs[usize::from(index)] = value;
        tracing::trace!(index, value, "SCAMP config write");

        match index {
            CFG_SLTPTR => report("slot pointer", self.recalc_sltptr(space)),
            CFG_RAMMAP => self.recalc(space),
            CFG_EMSEN1 | CFG_EMSEN2 => {
                let mut batch = space.batch();
                report("EMS enable", self.setup(&mut batch))
            }
            CFG_ABAXS | CFG_CAXS | CFG_DAXS | CFG_FEAXS => {
                report("shadow", self.shadow_recalc(space))
            }
            _ => {}
        }
    }

    /// Splits memory between on-board DRAM and the bus at the slot pointer.
    fn recalc_sltptr(&self, space: &mut AddressSpace) -> Result<()> {
        let mut sltptr = u32::from(self.cfg_regs[usize::from(CFG_SLTPTR)]) << 16;
        if (CONVENTIONAL_END..HIGH_MEMORY_BASE).contains(&sltptr) {
            sltptr = HIGH_MEMORY_BASE;
        }
        sltptr = sltptr.min(ROM_ALIAS_BASE);
        tracing::debug!(sltptr, "SCAMP slot pointer");

        let mut batch = space.batch();
        if sltptr >= CONVENTIONAL_END {
            batch.set_access_normal(0, CONVENTIONAL_END, AccessPair::INTERNAL)?;
            batch.set_access_normal(
                HIGH_MEMORY_BASE,
                sltptr - HIGH_MEMORY_BASE,
                AccessPair::INTERNAL,
            )?;
            batch.set_access_normal(sltptr, BUS_TOP - sltptr, AccessPair::EXTANY)?;
        } else {
            batch.set_access_normal(0, sltptr, AccessPair::INTERNAL)?;
            batch.set_access_normal(sltptr, CONVENTIONAL_END - sltptr, AccessPair::EXTANY)?;
            batch.set_access_normal(
                HIGH_MEMORY_BASE,
                BUS_TOP - HIGH_MEMORY_BASE,
                AccessPair::EXTANY,
            )?;
        }
        Ok(())
    }

    /// Puts conventional and extended RAM back on the board and everything above it on the bus.
    fn restore_decoding(&self, space: &mut AddressSpace) -> Result<()> {
        let ram = space.ram_size();
        let low = ram.min(CONVENTIONAL_END);
        let top = ram.clamp(HIGH_MEMORY_BASE, ROM_ALIAS_BASE);

        let mut batch = space.batch();
        batch.set_access_normal(0, low, AccessPair::INTERNAL)?;
        batch.set_access_normal(low, CONVENTIONAL_END - low, AccessPair::EXTERNAL)?;
        batch.set_access_normal(
            HIGH_MEMORY_BASE,
            top - HIGH_MEMORY_BASE,
            AccessPair::INTERNAL,
        )?;
        batch.set_access_normal(top, ROM_ALIAS_BASE - top, AccessPair::EXTERNAL)?;
        batch.set_access_normal(ROM_ALIAS_BASE, ROM_ALIAS_SIZE, AccessPair::EXTANY)?;
        Ok(())
    }

    /// Points every EMS window at its mapped page, or back at its own address.
    fn recalc_ems(&mut self, space: &mut AddressSpace) -> Result<()> {
        let ram = space.ram_size();
        let mut next: [u32; EMS_WINDOWS] = core::array::from_fn(window_base);

        let emsen1 = self.cfg_regs[usize::from(CFG_EMSEN1)];
        let enabled = if emsen1 & EMSEN1_EMSENAB != 0 {
            u16::from(self.cfg_regs[usize::from(CFG_EMSEN2)]) | (u16::from(emsen1 & 0x0F) << 8)
        } else {
            0
        };

        for page in 0..EMS_PAGED_WINDOWS {
            if enabled & (1 << page) == 0 {
                continue;
            }
            let mut phys = u32::from(self.ems[page]) << 14;
            if self.remapping() && (ram..ram.saturating_add(REMAP_KIB * 1024)).contains(&phys) {
                phys = phys - ram + CONVENTIONAL_END;
            }
            let base = EMS_PAGED_BASE + page as u32 * EMS_WINDOW_SIZE;
            next[((base - CONVENTIONAL_END) / EMS_WINDOW_SIZE) as usize] = phys;
        }

        let mut batch = space.batch();
        for (window, &phys) in next.iter().enumerate() {
            if self.mappings[window] == phys {
                continue;
            }
            self.mappings[window] = phys;
            let handle = self.ems_regions[window];
            if u64::from(phys) + u64::from(EMS_WINDOW_SIZE) <= u64::from(ram) {
                tracing::trace!(window, phys, "EMS window mapped");
                batch.set_direct(handle, Some(phys))?;
                batch.enable(handle)?;
            } else {
                tracing::trace!(window, phys, "EMS page beyond RAM, window disabled");
                batch.disable(handle)?;
            }
        }
        Ok(())
    }

    /// Applies the `xAXS` shadow registers and the EMS enables to `A0000..FFFFF`.
    fn shadow_recalc(&self, space: &mut AddressSpace) -> Result<()> {
        let remapping = self.remapping();
        let axs = |reg: u8| {
            if remapping {
                0
            } else {
                self.cfg_regs[usize::from(reg)]
            }
        };
        let (abaxs, caxs, daxs, feaxs) = (
            axs(CFG_ABAXS),
            axs(CFG_CAXS),
            axs(CFG_DAXS),
            axs(CFG_FEAXS),
        );

        let emsen1 = self.cfg_regs[usize::from(CFG_EMSEN1)];
        let emsen2 = self.cfg_regs[usize::from(CFG_EMSEN2)];
        let ems_enable: u32 = if emsen1 & EMSEN1_EMSENAB == 0 {
            0
        } else if emsen1 & EMSEN1_EMSMAP != 0 {
            // A/B and D windows.
            u32::from(emsen2 & 0x0F)
                | (u32::from(emsen1 & 0x0F) << 4)
                | (u32::from(emsen2 & 0xF0) << 8)
        } else {
            // C, D and E windows.
            (u32::from(emsen2) << 8) | (u32::from(emsen1 & 0x0F) << 16)
        };

        let mut batch = space.batch();
        if remapping {
            batch.remap_top(REMAP_KIB)?;
        }

        // Each AXS register holds four 2-bit fields; A/B and E use one field per 32K pair.
        let field = |reg: u8, index: usize| (reg >> (index * 2)) & 0x03;
        let mut controls: Vec<(u32, u32, u8, bool)> = Vec::with_capacity(EMS_WINDOWS + 2);
        for window in 0..8 {
            controls.push((
                window_base(window),
                EMS_WINDOW_SIZE,
                field(abaxs, window / 2),
                ems_enable & (1 << window) != 0,
            ));
        }
        for (reg, first) in [(caxs, 8), (daxs, 12)] {
            for index in 0..4 {
                let window = first + index;
                controls.push((
                    window_base(window),
                    EMS_WINDOW_SIZE,
                    field(reg, index),
                    ems_enable & (1 << window) != 0,
                ));
            }
        }
        for window in 16..EMS_WINDOWS {
            controls.push((
                window_base(window),
                EMS_WINDOW_SIZE,
                field(feaxs, (window - 16) / 2),
                ems_enable & (1 << window) != 0,
            ));
        }
        controls.push((BIOS_BASE, 0x8000, field(feaxs, 2), false));
        controls.push((BIOS_BASE + 0x8000, 0x8000, field(feaxs, 3), false));

        for (base, size, bits, ems) in controls {
            let state = if ems {
                SegmentState::ShadowedRw
            } else {
                SegmentState::new(bits & 0x02 != 0, bits & 0x01 != 0)
            };
            ShadowSegment { base, size, state }.apply(&mut batch, ModeMask::NORMAL)?;
        }
        Ok(())
    }
}

impl RegionRecalc for Scamp {
    /// Drops the relocated top-of-memory RAM.
    fn teardown(&mut self, space: &mut AddressSpace) -> Result<()> {
        space.remap_top(0)
    }

    fn setup(&mut self, space: &mut AddressSpace) -> Result<()> {
        self.shadow_recalc(space)?;
        self.recalc_ems(space)
    }
}

impl PortIo for Scamp {
    fn ports(&self) -> &'static [u16] {
        &PORTS
    }

    fn read_port(&mut self, space: &mut AddressSpace, port: u16) -> u8 {
        let index = usize::from(self.ems_index);
        match port {
            PORT_EMS_INDEX => self.ems_index | (u8::from(self.ems_autoinc) << 6),
            PORT_EMS_LOW => self.ems.get(index).map_or(0xFF, |&page| page as u8),
            PORT_EMS_HIGH => {
                let value = self
                    .ems
                    .get(index)
                    .map_or(0xFF, |&page| (page >> 8) as u8 | 0xFC);
                if self.ems_autoinc {
                    self.ems_index = (self.ems_index + 1) & 0x3F;
                }
                value
            }
            PORT_CFG_DATA if self.cfg_index <= CFG_LAST => {
                self.cfg_regs[usize::from(self.cfg_index)]
            }
            PORT_FAST_A20 => {
                space.set_a20(true);
                0xFF
            }
            PORT_SOFT_RESET => {
                tracing::debug!("SCAMP soft reset requested");
                self.soft_reset = true;
                0xFF
            }
            _ => 0xFF,
        }
    }

    fn write_port(&mut self, space: &mut AddressSpace, port: u16, value: u8) {
        let index = usize::from(self.ems_index);
        match port {
            PORT_EMS_INDEX => {
                self.ems_index = value & 0x1F;
                self.ems_autoinc = value & 0x40 != 0;
            }
            PORT_EMS_LOW => {
                if let Some(page) = self.ems.get_mut(index) {
                    *page = (*page & 0x300) | u16::from(value);
                    let result = self.recalc_ems(space);
                    report("EMS page", result);
                }
            }
            PORT_EMS_HIGH => {
                if let Some(page) = self.ems.get_mut(index) {
                    *page = (*page & 0x0FF) | (u16::from(value & 0x03) << 8);
                    let result = self.recalc_ems(space);
                    report("EMS page", result);
                }
                if self.ems_autoinc {
                    self.ems_index = (self.ems_index + 1) & 0x3F;
                }
            }
            PORT_CFG_INDEX => self.cfg_index = value,
            PORT_CFG_DATA => self.write_cfg(space, value),
            PORT_FAST_A20 => space.set_a20(false),
            _ => {}
        }
    }

    /// Clears the configuration and EMS registers and restores identity EMS mappings.
    fn reset(&mut self, space: &mut AddressSpace) {
        self.cfg_index = 0;
        self.cfg_regs = [0; 256];
        self.cfg_regs[usize::from(CFG_ID)] = ID_VL82C311;
        self.ems_index = 0;
        self.ems_autoinc = false;
        self.ems = [0; EMS_PAGE_REGS];
        self.soft_reset = false;

        let mut batch = space.batch();
        report("slot pointer", self.restore_decoding(&mut batch));
        self.recalc(&mut batch);
    }
}
