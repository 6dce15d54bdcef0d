//! 32-bit (non-PAE) page walk with 4 KiB pages and, when `CR4.PSE=1`, 4 MiB pages.

use crate::bus::MemoryBus;
use crate::mmu::{AccessType, PageFault, PagingState, CR0_WP, CR4_PSE};

const PTE_P: u32 = 1 << 0;
const PTE_RW: u32 = 1 << 1;
const PTE_US: u32 = 1 << 2;
const PTE_A: u32 = 1 << 5;
const PTE_D: u32 = 1 << 6;
const PDE_PS: u32 = 1 << 7;

const FRAME_MASK_4K: u32 = 0xFFFF_F000;
const FRAME_MASK_4M: u32 = 0xFFC0_0000;
/// PDE bits 21:13 must be clear for a 4 MiB page without PSE-36.
const PDE_4M_RESERVED: u32 = 0x003F_E000;

/// Permission check shared by 4 KiB and 4 MiB leaves. `writable`/`user` are the effective rights
/// of the whole walk.
fn check_rights(
    linear: u32,
    access: AccessType,
    paging: &PagingState,
    writable: bool,
    user: bool,
) -> Result<(), PageFault> {
    let is_user = paging.cpl == 3;
    if is_user && !user {
        return Err(PageFault::protection(linear, access, paging.cpl));
    }
    if access == AccessType::Write && !writable && (is_user || paging.cr0 & CR0_WP != 0) {
        return Err(PageFault::protection(linear, access, paging.cpl));
    }
    Ok(())
}

fn set_bits(bus: &mut impl MemoryBus, entry_addr: u32, entry: u32, bits: u32) {
    if entry & bits != bits {
        bus.write_phys_u32(entry_addr, entry | bits);
    }
}

pub fn translate(
    bus: &mut impl MemoryBus,
    linear: u32,
    access: AccessType,
    paging: &PagingState,
) -> Result<u32, PageFault> {
    let dirty = if access == AccessType::Write { PTE_D } else { 0 };

    let pde_addr = (paging.cr3 & FRAME_MASK_4K) | ((linear >> 22) << 2);
    let pde = bus.read_phys_u32(pde_addr);
    if pde & PTE_P == 0 {
        return Err(PageFault::not_present(linear, access, paging.cpl));
    }

    if pde & PDE_PS != 0 {
        if paging.cr4 & CR4_PSE == 0 || pde & PDE_4M_RESERVED != 0 {
            return Err(PageFault::rsvd(linear, access, paging.cpl));
        }
        check_rights(linear, access, paging, pde & PTE_RW != 0, pde & PTE_US != 0)?;
        set_bits(bus, pde_addr, pde, PTE_A | dirty);
        return Ok((pde & FRAME_MASK_4M) | (linear & !FRAME_MASK_4M));
    }

    let pte_addr = (pde & FRAME_MASK_4K) | (((linear >> 12) & 0x3FF) << 2);
    let pte = bus.read_phys_u32(pte_addr);
    if pte & PTE_P == 0 {
        return Err(PageFault::not_present(linear, access, paging.cpl));
    }

    check_rights(
        linear,
        access,
        paging,
        pde & pte & PTE_RW != 0,
        pde & pte & PTE_US != 0,
    )?;

    set_bits(bus, pde_addr, pde, PTE_A);
    set_bits(bus, pte_addr, pte, PTE_A | dirty);
    Ok((pte & FRAME_MASK_4K) | (linear & !FRAME_MASK_4K))
}
