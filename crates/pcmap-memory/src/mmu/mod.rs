//! Linear to physical translation for `get_phys`.

pub mod fault;
pub mod mode32;

pub use fault::PageFault;

use crate::bus::MemoryBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

pub const CR0_PG: u32 = 1 << 31;
pub const CR0_WP: u32 = 1 << 16;
pub const CR4_PSE: u32 = 1 << 4;
pub const CR4_PAE: u32 = 1 << 5;

/// Control register state that affects translation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagingState {
    pub cr0: u32,
    pub cr3: u32,
    pub cr4: u32,
    pub cpl: u8,
}

impl PagingState {
    pub fn enabled(&self) -> bool {
        self.cr0 & CR0_PG != 0
    }
}

/// Translate a linear address to a physical address.
///
/// Paging disabled is an identity mapping. With `CR0.PG=1` only 32-bit (non-PAE) paging is
/// walked; PAE is reported as a reserved-bit fault.
pub fn translate(
    bus: &mut impl MemoryBus,
    linear: u32,
    access: AccessType,
    paging: &PagingState,
) -> Result<u32, PageFault> {
    if !paging.enabled() {
        return Ok(linear);
    }

    if paging.cr4 & CR4_PAE != 0 {
        return Err(PageFault::new(
            linear,
            true,
            access == AccessType::Write,
            paging.cpl == 3,
            true,
            access == AccessType::Execute,
        ));
    }

    mode32::translate(bus, linear, access, paging)
}
