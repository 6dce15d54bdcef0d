//! Per-page access state.
//!
//! Every 4 KiB page of the 32-bit physical address space carries one [`PageAccess`] entry per
//! [`AccessMode`]. The entry names the class of region that may service reads (and instruction
//! fetches) and the class that may service writes, plus an SMRAM overlay written by SMM-aware
//! chipsets. Region resolution filters candidates through these classes before registration order
//! is considered.

use crate::region::RegionFlags;
use bitflags::bitflags;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u32 = 1 << PAGE_SHIFT;
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;
/// Number of 4 KiB pages in the 32-bit physical address space.
pub const PAGE_COUNT: usize = 1 << (32 - PAGE_SHIFT);

const CHUNK_PAGES: usize = 1024;
const CHUNK_COUNT: usize = PAGE_COUNT / CHUNK_PAGES;

/// Class of region allowed to service one direction of an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessClass {
    /// Any region that is not SMRAM.
    Any,
    /// Board memory (RAM, shadow RAM).
    Internal,
    /// Bus devices that do not decode ROMCS#.
    External,
    /// Any bus device, ROMCS# or not.
    ExtAny,
    /// Bus devices that decode ROMCS# (BIOS ROM).
    Romcs,
    Smram,
    Cache,
    /// Nothing responds; reads float, writes are dropped.
    Disabled,
}

impl AccessClass {
    /// Whether a region with `flags` participates in resolution for this class.
    pub fn admits(self, flags: RegionFlags) -> bool {
        let internal = flags.contains(RegionFlags::INTERNAL);
        let external = flags.contains(RegionFlags::EXTERNAL);
        let romcs = flags.contains(RegionFlags::REQUIRES_ROMCS);
        let smram = flags.contains(RegionFlags::SMRAM);

        match self {
            AccessClass::Any => !smram,
            AccessClass::Internal => !external && !smram,
            AccessClass::External => !internal && !romcs && !smram,
            AccessClass::ExtAny => !internal && !smram,
            AccessClass::Romcs => !internal && romcs && !smram,
            AccessClass::Smram => smram,
            AccessClass::Cache => flags.contains(RegionFlags::CACHE),
            AccessClass::Disabled => false,
        }
    }
}

/// Kind of memory cycle being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    /// Instruction fetch. Uses the read class unless an SMRAM overlay restricts it.
    Fetch,
}

impl AccessKind {
    pub const ALL: [AccessKind; 3] = [AccessKind::Read, AccessKind::Write, AccessKind::Fetch];

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            AccessKind::Read => 0,
            AccessKind::Write => 1,
            AccessKind::Fetch => 2,
        }
    }

    #[inline]
    pub fn is_write(self) -> bool {
        self == AccessKind::Write
    }
}

/// Who initiates the cycle and whether the CPU is in System Management Mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    CpuNormal,
    CpuSmm,
    BusNormal,
    BusSmm,
}

impl AccessMode {
    pub const ALL: [AccessMode; 4] = [
        AccessMode::CpuNormal,
        AccessMode::CpuSmm,
        AccessMode::BusNormal,
        AccessMode::BusSmm,
    ];

    pub fn new(bus_master: bool, smm: bool) -> Self {
        match (bus_master, smm) {
            (false, false) => AccessMode::CpuNormal,
            (false, true) => AccessMode::CpuSmm,
            (true, false) => AccessMode::BusNormal,
            (true, true) => AccessMode::BusSmm,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            AccessMode::CpuNormal => 0,
            AccessMode::CpuSmm => 1,
            AccessMode::BusNormal => 2,
            AccessMode::BusSmm => 3,
        }
    }

    pub fn mask(self) -> ModeMask {
        match self {
            AccessMode::CpuNormal => ModeMask::CPU,
            AccessMode::CpuSmm => ModeMask::CPU_SMM,
            AccessMode::BusNormal => ModeMask::BUS,
            AccessMode::BusSmm => ModeMask::BUS_SMM,
        }
    }
}

bitflags! {
    /// Set of [`AccessMode`]s an access-state update applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeMask: u8 {
        const CPU = 1 << 0;
        const CPU_SMM = 1 << 1;
        const BUS = 1 << 2;
        const BUS_SMM = 1 << 3;

        const NORMAL = Self::CPU.bits() | Self::BUS.bits();
        const SMM = Self::CPU_SMM.bits() | Self::BUS_SMM.bits();
        const CPU_BOTH = Self::CPU.bits() | Self::CPU_SMM.bits();
        const BUS_BOTH = Self::BUS.bits() | Self::BUS_SMM.bits();
        const ALL = Self::NORMAL.bits() | Self::SMM.bits();
    }
}

/// SMRAM visibility written on top of the base classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SmramOverlay {
    #[default]
    None,
    /// Reads, writes and fetches go to SMRAM regions.
    Smram,
    /// Only instruction fetches go to SMRAM regions.
    SmramExec,
    /// Nothing responds.
    Disabled,
}

/// Read/write class pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessPair {
    pub read: AccessClass,
    pub write: AccessClass,
}

impl AccessPair {
    pub const EXTERNAL: Self = Self::new(AccessClass::External, AccessClass::External);
    pub const EXTANY: Self = Self::new(AccessClass::ExtAny, AccessClass::ExtAny);
    pub const INTERNAL: Self = Self::new(AccessClass::Internal, AccessClass::Internal);
    pub const DISABLED: Self = Self::new(AccessClass::Disabled, AccessClass::Disabled);

    pub const fn new(read: AccessClass, write: AccessClass) -> Self {
        Self { read, write }
    }
}

/// One access-state mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessUpdate {
    /// Overwrite the read and write classes. The SMRAM overlay is kept.
    Set(AccessPair),
    /// Map (`true`) or unmap SMRAM for reads and writes.
    Smram(bool),
    /// Write the SMRAM overlay directly.
    SmramExtended(SmramOverlay),
}

impl AccessUpdate {
    fn apply(self, entry: &mut PageAccess) {
        match self {
            AccessUpdate::Set(pair) => {
                entry.read = pair.read;
                entry.write = pair.write;
            }
            AccessUpdate::Smram(on) => {
                entry.overlay = if on {
                    SmramOverlay::Smram
                } else {
                    SmramOverlay::None
                };
            }
            AccessUpdate::SmramExtended(overlay) => entry.overlay = overlay,
        }
    }
}

/// Access state of one page in one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageAccess {
    pub read: AccessClass,
    pub write: AccessClass,
    pub overlay: SmramOverlay,
}

impl Default for PageAccess {
    fn default() -> Self {
        Self {
            read: AccessClass::External,
            write: AccessClass::External,
            overlay: SmramOverlay::None,
        }
    }
}

impl PageAccess {
    /// Effective class for `kind` after applying the SMRAM overlay.
    pub fn class(&self, kind: AccessKind) -> AccessClass {
        let base = if kind.is_write() { self.write } else { self.read };
        match self.overlay {
            SmramOverlay::None => base,
            SmramOverlay::Smram => AccessClass::Smram,
            SmramOverlay::SmramExec if kind == AccessKind::Fetch => AccessClass::Smram,
            SmramOverlay::SmramExec => base,
            SmramOverlay::Disabled => AccessClass::Disabled,
        }
    }
}

type PageEntry = [PageAccess; 4];

/// Sparse per-page access-state table covering 4 GiB.
///
/// Pages live in 1024-page chunks that are allocated on the first update that moves a page away
/// from the default state.
#[derive(Debug, Clone)]
pub struct AccessStateTable {
    chunks: Vec<Option<Box<[PageEntry]>>>,
}

impl Default for AccessStateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessStateTable {
    pub fn new() -> Self {
        Self {
            chunks: vec![None; CHUNK_COUNT],
        }
    }

    /// Drops every chunk, returning all pages to the default state.
    pub fn clear(&mut self) {
        self.chunks.iter_mut().for_each(|chunk| *chunk = None);
    }

    pub fn get(&self, page: u32, mode: AccessMode) -> PageAccess {
        let page = page as usize;
        match &self.chunks[page / CHUNK_PAGES] {
            Some(chunk) => chunk[page % CHUNK_PAGES][mode.index()],
            None => PageAccess::default(),
        }
    }

    #[inline]
    pub fn class(&self, addr: u32, mode: AccessMode, kind: AccessKind) -> AccessClass {
        self.get(addr >> PAGE_SHIFT, mode).class(kind)
    }

    /// Applies `update` to `pages` pages starting at `first_page` for every mode in `modes`.
    ///
    /// The range must lie inside the table.
    pub fn apply(&mut self, modes: ModeMask, first_page: u32, pages: u32, update: AccessUpdate) {
        let start = first_page as usize;
        let end = start + pages as usize;
        debug_assert!(end <= PAGE_COUNT);

        let mut defaulted = [PageAccess::default(); 4];
        for mode in AccessMode::ALL {
            if modes.contains(mode.mask()) {
                update.apply(&mut defaulted[mode.index()]);
            }
        }
        let touches_default = defaulted != [PageAccess::default(); 4];

        let mut page = start;
        while page < end {
            let chunk_idx = page / CHUNK_PAGES;
            let chunk_end = ((chunk_idx + 1) * CHUNK_PAGES).min(end);
            let slot = &mut self.chunks[chunk_idx];

            if slot.is_none() {
                if !touches_default {
                    page = chunk_end;
                    continue;
                }
                *slot = Some(vec![[PageAccess::default(); 4]; CHUNK_PAGES].into_boxed_slice());
            }

            if let Some(chunk) = slot.as_mut() {
                for entry in &mut chunk[page % CHUNK_PAGES..=(chunk_end - 1) % CHUNK_PAGES] {
                    for mode in AccessMode::ALL {
                        if modes.contains(mode.mask()) {
                            update.apply(&mut entry[mode.index()]);
                        }
                    }
                }
            }
            page = chunk_end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_is_external_everywhere() {
        let table = AccessStateTable::new();
        for mode in AccessMode::ALL {
            assert_eq!(table.class(0, mode, AccessKind::Read), AccessClass::External);
            assert_eq!(
                table.class(0xFFFF_F000, mode, AccessKind::Write),
                AccessClass::External
            );
        }
        assert!(table.chunks.iter().all(Option::is_none));
    }

    #[test]
    fn set_only_touches_selected_modes() {
        let mut table = AccessStateTable::new();
        table.apply(
            ModeMask::CPU_SMM,
            0xA0,
            0x20,
            AccessUpdate::Set(AccessPair::INTERNAL),
        );

        assert_eq!(
            table.class(0xA0000, AccessMode::CpuSmm, AccessKind::Read),
            AccessClass::Internal
        );
        assert_eq!(
            table.class(0xBF000, AccessMode::CpuSmm, AccessKind::Write),
            AccessClass::Internal
        );
        assert_eq!(
            table.class(0xC0000, AccessMode::CpuSmm, AccessKind::Read),
            AccessClass::External
        );
        assert_eq!(
            table.class(0xA0000, AccessMode::CpuNormal, AccessKind::Read),
            AccessClass::External
        );
        assert_eq!(
            table.class(0xA0000, AccessMode::BusSmm, AccessKind::Read),
            AccessClass::External
        );
    }

    #[test]
    fn default_updates_do_not_allocate() {
        let mut table = AccessStateTable::new();
        table.apply(
            ModeMask::ALL,
            0x1000,
            0xF_F000,
            AccessUpdate::Set(AccessPair::EXTERNAL),
        );
        assert!(table.chunks.iter().all(Option::is_none));
    }

    #[test]
    fn update_spanning_chunks() {
        let mut table = AccessStateTable::new();
        table.apply(ModeMask::CPU, 1000, 100, AccessUpdate::Set(AccessPair::DISABLED));

        assert_eq!(table.get(999, AccessMode::CpuNormal).read, AccessClass::External);
        assert_eq!(table.get(1000, AccessMode::CpuNormal).read, AccessClass::Disabled);
        assert_eq!(table.get(1023, AccessMode::CpuNormal).read, AccessClass::Disabled);
        assert_eq!(table.get(1024, AccessMode::CpuNormal).read, AccessClass::Disabled);
        assert_eq!(table.get(1099, AccessMode::CpuNormal).write, AccessClass::Disabled);
        assert_eq!(table.get(1100, AccessMode::CpuNormal).write, AccessClass::External);
    }

    #[test]
    fn smram_overlay_survives_class_updates() {
        let mut table = AccessStateTable::new();
        table.apply(ModeMask::SMM, 0xA0, 1, AccessUpdate::Smram(true));
        table.apply(ModeMask::ALL, 0xA0, 1, AccessUpdate::Set(AccessPair::INTERNAL));

        let entry = table.get(0xA0, AccessMode::CpuSmm);
        assert_eq!(entry.overlay, SmramOverlay::Smram);
        assert_eq!(entry.class(AccessKind::Read), AccessClass::Smram);

        table.apply(ModeMask::SMM, 0xA0, 1, AccessUpdate::Smram(false));
        let entry = table.get(0xA0, AccessMode::CpuSmm);
        assert_eq!(entry.class(AccessKind::Write), AccessClass::Internal);
    }

    #[test]
    fn exec_only_overlay_affects_fetches() {
        let entry = PageAccess {
            read: AccessClass::External,
            write: AccessClass::Internal,
            overlay: SmramOverlay::SmramExec,
        };
        assert_eq!(entry.class(AccessKind::Fetch), AccessClass::Smram);
        assert_eq!(entry.class(AccessKind::Read), AccessClass::External);
        assert_eq!(entry.class(AccessKind::Write), AccessClass::Internal);

        let disabled = PageAccess {
            overlay: SmramOverlay::Disabled,
            ..entry
        };
        for kind in AccessKind::ALL {
            assert_eq!(disabled.class(kind), AccessClass::Disabled);
        }
    }

    #[test]
    fn class_compatibility() {
        let ram = RegionFlags::INTERNAL;
        let rom = RegionFlags::EXTERNAL | RegionFlags::ROM | RegionFlags::REQUIRES_ROMCS;
        let card = RegionFlags::EXTERNAL;
        let smram = RegionFlags::INTERNAL | RegionFlags::SMRAM;

        assert!(AccessClass::Internal.admits(ram));
        assert!(!AccessClass::Internal.admits(rom));
        assert!(!AccessClass::External.admits(rom));
        assert!(AccessClass::External.admits(card));
        assert!(AccessClass::Romcs.admits(rom));
        assert!(!AccessClass::Romcs.admits(card));
        assert!(AccessClass::ExtAny.admits(rom));
        assert!(AccessClass::ExtAny.admits(card));
        assert!(!AccessClass::ExtAny.admits(ram));
        assert!(AccessClass::Smram.admits(smram));
        assert!(!AccessClass::Any.admits(smram));
        assert!(AccessClass::Any.admits(ram));
        assert!(AccessClass::Cache.admits(RegionFlags::CACHE));
        assert!(!AccessClass::Disabled.admits(ram));
    }
}
