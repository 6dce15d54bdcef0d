//! Intel 420/430/440 host bridges: PAM shadow registers and SMRAM control.
//!
//! Register layout follows the datasheets of the respective parts:
//! - `0x59..=0x5F` PAM0-PAM6, two nibbles per register. Bit 0 of a nibble enables reads from
//!   DRAM, bit 1 enables writes.
//! - `0x72` SMRAM control (`D_OPEN`, `D_CLS`, `D_LCK`, `G_SMRAME` on 430FX and later).
//! - `0x73` ESMRAMC on 440BX/ZX (`H_SMRAME`, TSEG size and enable).

use crate::recalc::{report, RegionRecalc};
use crate::shadow::{SegmentState, ShadowSegment};
use pcmap_memory::{
    AccessPair, AccessUpdate, AddressSpace, ModeMask, Region, RegionHandle, Result,
    CONVENTIONAL_END, HIGH_MEMORY_BASE,
};

pub const INTEL_VENDOR_ID: u16 = 0x8086;

const REG_PAM0: u8 = 0x59;
const REG_PAM6: u8 = 0x5F;
const REG_SMRAM: u8 = 0x72;
const REG_ESMRAMC: u8 = 0x73;

const SMRAM_D_OPEN: u8 = 0x40;
const SMRAM_D_CLS: u8 = 0x20;
const SMRAM_D_LCK: u8 = 0x10;
const SMRAM_G_SMRAME: u8 = 0x08;

const ESMRAMC_H_SMRAME: u8 = 0x80;
const ESMRAMC_TSEG_EN: u8 = 0x01;

const LEGACY_SMRAM_SIZE: u32 = 0x20000;
/// High SMRAM alias of `A0000..FFFFF` used when `H_SMRAME` is set.
pub const HIGH_SMRAM_BASE: u32 = 0x100A_0000;
const HIGH_SMRAM_SIZE: u32 = 0x60000;
const TSEG_MAX_SIZE: u32 = 0x10_0000;

/// Supported host bridge generations, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variant {
    I420Tx,
    I420Zx,
    I430Lx,
    I430Nx,
    I430Fx,
    I430Hx,
    I430Vx,
    I430Tx,
    I440Fx,
    I440Bx,
    I440Zx,
}

impl Variant {
    pub fn device_id(self) -> u16 {
        match self {
            Variant::I420Tx | Variant::I420Zx => 0x0483,
            Variant::I430Lx | Variant::I430Nx => 0x04A3,
            Variant::I430Fx => 0x122D,
            Variant::I430Hx => 0x1250,
            Variant::I430Vx => 0x7030,
            Variant::I430Tx => 0x7100,
            Variant::I440Fx => 0x1237,
            Variant::I440Bx | Variant::I440Zx => 0x7190,
        }
    }

    /// 430FX and later use the `D_OPEN`/`D_CLS`/`D_LCK`/`G_SMRAME` SMRAM register.
    fn modern_smram(self) -> bool {
        self >= Variant::I430Fx
    }

    fn has_esmramc(self) -> bool {
        self >= Variant::I440Bx
    }

    /// Parts whose PAM0 low nibble controls the `80000..9FFFF` window.
    fn has_low_pam(self) -> bool {
        self <= Variant::I430Nx
    }
}

/// PCI configuration state and memory map side effects of one host bridge.
pub struct I4x0 {
    variant: Variant,
    regs: [u8; 256],
    smram_locked: bool,
    /// RAM region backing the high SMRAM alias. Absent when RAM does not cover `A0000..FFFFF`.
    smram_high: Option<RegionHandle>,
}

impl I4x0 {
    /// Builds the bridge and applies its power-on register state to `space`.
    pub fn new(space: &mut AddressSpace, variant: Variant) -> Self {
        let mut regs = [0u8; 256];
        regs[0x00..0x02].copy_from_slice(&INTEL_VENDOR_ID.to_le_bytes());
        regs[0x02..0x04].copy_from_slice(&variant.device_id().to_le_bytes());
        regs[0x04] = 0x06;
        regs[0x07] = 0x02;
        regs[0x0B] = 0x06;
        if variant.modern_smram() {
            // C_BASE_SEG is hardwired to the A0000 segment.
            regs[usize::from(REG_SMRAM)] = 0x02;
        } else {
            regs[usize::from(REG_PAM0)] = 0x0F;
        }

        let smram_high = if variant.has_esmramc() && space.ram_size() >= HIGH_MEMORY_BASE {
            let region = Region::ram(
                "smram_high",
                HIGH_SMRAM_BASE,
                HIGH_SMRAM_SIZE,
                CONVENTIONAL_END,
            )
            .disabled();
            match space.add_region(region) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    tracing::warn!(error = %err, "high SMRAM region unavailable");
                    None
                }
            }
        } else {
            None
        };

        let mut bridge = Self {
            variant,
            regs,
            smram_locked: false,
            smram_high,
        };
        bridge.reset(space);
        bridge
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Whether `D_LCK` has frozen the SMRAM configuration until reset.
    pub fn smram_locked(&self) -> bool {
        self.smram_locked
    }

    pub fn read_config(&self, reg: u8) -> u8 {
        self.regs[usize::from(reg)]
    }

    pub fn write_config(&mut self, space: &mut AddressSpace, reg: u8, value: u8) {
        let result = self.write_config_inner(space, reg, value, false);
        report("config write", result);
    }

    /// Restores the power-on SMRAM and shadow configuration. Clears `D_LCK`.
    pub fn reset(&mut self, space: &mut AddressSpace) {
        let result = self.reset_registers(space);
        report("reset", result);
    }

    fn reset_registers(&mut self, space: &mut AddressSpace) -> Result<()> {
        self.smram_locked = false;
        if self.variant.has_esmramc() {
            self.regs[usize::from(REG_ESMRAMC)] = 0x38;
        }
        let (pam0, smram) = if self.variant.modern_smram() {
            (0x00, 0x02)
        } else {
            (0x0F, 0x00)
        };

        // Every PAM window is rewritten, whatever the previous register contents.
        let mut batch = space.batch();
        self.write_config_inner(&mut batch, REG_PAM0, pam0, true)?;
        for reg in REG_PAM0 + 1..=REG_PAM6 {
            self.write_config_inner(&mut batch, reg, 0x00, true)?;
        }
        self.write_config_inner(&mut batch, REG_SMRAM, smram, true)
    }

    fn write_config_inner(
        &mut self,
        space: &mut AddressSpace,
        reg: u8,
        value: u8,
        force: bool,
    ) -> Result<()> {
        match reg {
            0x00..=0x03 | 0x08..=0x0B | 0x0E => {
                tracing::trace!(reg, value, "write to read-only host bridge register ignored");
                Ok(())
            }
            REG_PAM0..=REG_PAM6 => self.write_pam(space, reg, value, force),
            REG_SMRAM => {
                let mut batch = space.batch();
                self.teardown(&mut batch)?;
                self.update_smram(value);
                self.setup(&mut batch)
            }
            REG_ESMRAMC => self.write_esmramc(space, value),
            _ => {
                self.regs[usize::from(reg)] = value;
                Ok(())
            }
        }
    }

    /// Windows controlled by the low and high nibble of a PAM register.
    fn pam_windows(&self, reg: u8) -> [Option<(u32, u32)>; 2] {
        match reg {
            REG_PAM0 => [
                self.variant.has_low_pam().then_some((0x80000, 0x20000)),
                Some((0xF0000, 0x10000)),
            ],
            _ => {
                let base = 0xC0000 + u32::from(reg - (REG_PAM0 + 1)) * 0x8000;
                [Some((base, 0x4000)), Some((base + 0x4000, 0x4000))]
            }
        }
    }

    fn write_pam(
        &mut self,
        space: &mut AddressSpace,
        reg: u8,
        value: u8,
        force: bool,
    ) -> Result<()> {
        let old = self.regs[usize::from(reg)];
        let mut batch = space.batch();
        for (nibble, window) in self.pam_windows(reg).into_iter().enumerate() {
            let Some((base, size)) = window else {
                continue;
            };
            let shift = nibble * 4;
            if !force && ((old ^ value) >> shift) & 0x0F == 0 {
                continue;
            }
            let bits = (value >> shift) & 0x03;
            let segment = ShadowSegment {
                base,
                size,
                state: SegmentState::new(bits & 0x01 != 0, bits & 0x02 != 0),
            };
            segment.apply(&mut batch, ModeMask::ALL)?;
        }

        let mask = if reg == REG_PAM0 && !self.variant.has_low_pam() {
            0x70
        } else {
            0x77
        };
        self.regs[usize::from(reg)] = value & mask;
        Ok(())
    }

    fn update_smram(&mut self, value: u8) {
        let reg = &mut self.regs[usize::from(REG_SMRAM)];
        if self.variant.modern_smram() {
            if self.smram_locked {
                *reg = (*reg & !SMRAM_D_CLS) | (value & SMRAM_D_CLS);
            } else {
                *reg = (*reg & 0x87) | (value & 0x78);
                self.smram_locked = value & SMRAM_D_LCK != 0;
                if self.smram_locked {
                    *reg &= !SMRAM_D_OPEN;
                }
            }
        } else if self.smram_locked {
            *reg = (*reg & 0xEF) | (value & 0x10);
        } else {
            *reg = (*reg & 0xC0) | (value & 0x3F);
            self.smram_locked = value & 0x08 != 0;
            if self.smram_locked {
                *reg &= 0xEF;
            }
        }
        tracing::debug!(smram = *reg, locked = self.smram_locked, "SMRAM control write");
    }

    fn write_esmramc(&mut self, space: &mut AddressSpace, value: u8) -> Result<()> {
        let reg = usize::from(REG_ESMRAMC);
        match self.variant {
            Variant::I430Vx => {
                self.regs[reg] = value & 0x03;
                Ok(())
            }
            Variant::I440Bx | Variant::I440Zx => {
                if self.smram_locked {
                    return Ok(());
                }
                let mut batch = space.batch();
                self.teardown(&mut batch)?;
                self.regs[reg] = (self.regs[reg] & 0x38) | (value & 0xC7);
                self.setup(&mut batch)
            }
            _ => {
                self.regs[reg] = value;
                Ok(())
            }
        }
    }
}

/// Sets `[base, base + size)` to RAM or to the expansion bus, for normal or SMM cycles.
fn smram_map(space: &mut AddressSpace, smm: bool, base: u32, size: u32, ram: bool) -> Result<()> {
    let modes = if smm { ModeMask::SMM } else { ModeMask::NORMAL };
    let pair = if ram {
        AccessPair::INTERNAL
    } else {
        AccessPair::EXTANY
    };
    space.set_access(modes, base, size, AccessUpdate::Set(pair))
}

/// Base of the top `size` bytes of RAM, when they lie entirely in extended memory.
fn top_of_memory(ram: u32, size: u32) -> Option<u32> {
    ram.checked_sub(size).filter(|&base| base >= HIGH_MEMORY_BASE)
}

impl RegionRecalc for I4x0 {
    /// Returns every SMRAM window to its non-SMRAM decoding.
    fn teardown(&mut self, space: &mut AddressSpace) -> Result<()> {
        let ram = space.ram_size();
        if self.variant.modern_smram() {
            if self.variant.has_esmramc() {
                let ram_part = ram.saturating_sub(HIGH_SMRAM_BASE).min(HIGH_SMRAM_SIZE);
                for smm in [false, true] {
                    smram_map(space, smm, HIGH_SMRAM_BASE, ram_part, true)?;
                    smram_map(
                        space,
                        smm,
                        HIGH_SMRAM_BASE + ram_part,
                        HIGH_SMRAM_SIZE - ram_part,
                        false,
                    )?;
                    if let Some(base) = top_of_memory(ram, TSEG_MAX_SIZE) {
                        smram_map(space, smm, base, TSEG_MAX_SIZE, true)?;
                    }
                }
                if let Some(handle) = self.smram_high {
                    space.disable(handle)?;
                }
            }
            for smm in [false, true] {
                smram_map(space, smm, CONVENTIONAL_END, LEGACY_SMRAM_SIZE, false)?;
            }
        } else {
            for smm in [false, true] {
                smram_map(space, smm, CONVENTIONAL_END, LEGACY_SMRAM_SIZE, false)?;
                if let Some(base) = top_of_memory(ram, 0x10000) {
                    smram_map(space, smm, base, 0x10000, true)?;
                }
            }
        }
        Ok(())
    }

    /// Maps SMRAM according to the current `0x72`/`0x73` contents.
    fn setup(&mut self, space: &mut AddressSpace) -> Result<()> {
        let ram = space.ram_size();
        let smram = self.regs[usize::from(REG_SMRAM)];
        let esmramc = self.regs[usize::from(REG_ESMRAMC)];

        if self.variant.modern_smram() {
            let high = self.variant.has_esmramc() && esmramc & ESMRAMC_H_SMRAME != 0;
            let (base, size) = if high {
                if let Some(handle) = self.smram_high {
                    space.enable(handle)?;
                }
                (HIGH_SMRAM_BASE, HIGH_SMRAM_SIZE)
            } else {
                (CONVENTIONAL_END, LEGACY_SMRAM_SIZE)
            };

            let open = smram & (SMRAM_D_OPEN | SMRAM_D_CLS | SMRAM_D_LCK) == SMRAM_D_OPEN;
            let smm = smram & SMRAM_G_SMRAME != 0 && smram & SMRAM_D_CLS == 0;
            smram_map(space, false, base, size, open)?;
            smram_map(space, true, base, size, smm)?;

            if self.variant.has_esmramc()
                && smram & SMRAM_G_SMRAME != 0
                && esmramc & ESMRAMC_TSEG_EN != 0
            {
                let tseg = 1u32 << (17 + ((esmramc >> 1) & 0x03));
                if let Some(tseg_base) = top_of_memory(ram, tseg) {
                    tracing::debug!(tseg_base, tseg, "TSEG enabled");
                    smram_map(space, false, tseg_base, tseg, false)?;
                    smram_map(space, true, tseg_base, tseg, true)?;
                }
            }
        } else {
            let (base, at_top) = match smram & 0x03 {
                0 => (top_of_memory(ram, 0x10000), true),
                1 => (None, false),
                2 => (Some(CONVENTIONAL_END), false),
                _ => (Some(0xB0000), false),
            };
            if let Some(base) = base {
                let open = smram & 0x38 == 0x20 || at_top;
                let smm = smram & 0x10 == 0 || at_top;
                smram_map(space, false, base, 0x10000, open)?;
                smram_map(space, true, base, 0x10000, smm)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_are_ordered_by_generation() {
        assert!(Variant::I420Tx < Variant::I430Nx);
        assert!(Variant::I430Nx < Variant::I430Fx);
        assert!(Variant::I440Fx < Variant::I440Bx);
        assert!(Variant::I430Nx.has_low_pam());
        assert!(!Variant::I430Fx.has_low_pam());
        assert!(Variant::I440Zx.has_esmramc());
    }

    #[test]
    fn device_ids() {
        assert_eq!(Variant::I430Fx.device_id(), 0x122D);
        assert_eq!(Variant::I440Fx.device_id(), 0x1237);
        assert_eq!(Variant::I440Zx.device_id(), 0x7190);
    }
}
