//! The address space: regions, per-page access state, resolution cache and RAM behind one owner.

use crate::access::{
    AccessClass, AccessKind, AccessMode, AccessPair, AccessStateTable, AccessUpdate, ModeMask,
    PageAccess, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE,
};
use crate::bus::MemoryBus;
use crate::cache::{CacheStats, ResolutionCache};
use crate::config::AddressSpaceConfig;
use crate::error::{MapError, Result};
use crate::mmu::{self, AccessType, PageFault, PagingState};
use crate::phys::GuestMemory;
use crate::region::{Handlers, Region, RegionFlags, RegionHandle, SharedHandler};
use crate::registry::Registry;
use std::ops::{Deref, DerefMut};

const A20_BIT: u32 = 1 << 20;
const KIB: u32 = 1024;
const ADDRESS_SPACE_END: u64 = 1 << 32;

/// End of conventional memory; start of the adapter/ROM hole.
pub const CONVENTIONAL_END: u32 = 0x000A_0000;
/// Start of extended memory.
pub const HIGH_MEMORY_BASE: u32 = 0x0010_0000;

/// Value of an unclaimed read of `size` bytes.
#[inline]
fn all_ones(size: u32) -> u32 {
    if size >= 4 {
        u32::MAX
    } else {
        (1u32 << (size * 8)) - 1
    }
}

/// Handles of the RAM regions installed by the PC layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcLayout {
    /// `[0, min(ram, 640K))`.
    pub ram_low: RegionHandle,
    /// `[1M, ram)`, when RAM extends past 1 MiB.
    pub ram_high: Option<RegionHandle>,
    /// RAM behind the `A0000..FFFFF` hole, inert until shadowing marks pages internal.
    pub ram_mid: Option<RegionHandle>,
    /// Hole RAM relocated above the top of memory by [`AddressSpace::remap_top`].
    pub ram_remapped: RegionHandle,
}

/// Outcome of resolving one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub handle: RegionHandle,
    pub class: AccessClass,
}

enum Target {
    Handler(SharedHandler),
    Ram(u32),
    Float,
}

/// Resolved target for one address and the exclusive end of the span it is known to cover.
struct Resolution {
    target: Target,
    end: u64,
}

impl Resolution {
    fn float(addr: u32) -> Self {
        Self {
            target: Target::Float,
            end: u64::from(addr) + 1,
        }
    }
}

/// Cache invalidation deferred by an open [`UpdateBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dirty {
    Clean,
    Pages { first: u32, end: u64 },
    All,
}

impl Dirty {
    fn merge(&mut self, first: u32, count: u32) {
        let end = u64::from(first) + u64::from(count);
        *self = match *self {
            Dirty::Clean => Dirty::Pages { first, end },
            Dirty::Pages { first: f, end: e } => Dirty::Pages {
                first: f.min(first),
                end: e.max(end),
            },
            Dirty::All => Dirty::All,
        };
    }
}

#[derive(Debug, Clone, Copy)]
struct Translation {
    page: u32,
    frame: u32,
    access: AccessType,
}

/// Physical address space of one emulated machine.
///
/// All reconfiguration goes through methods that invalidate the affected part of the resolution
/// cache, so callers never flush by hand. Callers applying many updates at once can open a
/// [`batch`](Self::batch) to fold the invalidations into one.
pub struct AddressSpace {
    config: AddressSpaceConfig,
    ram: Box<dyn GuestMemory>,
    access: AccessStateTable,
    regions: Registry,
    cache: ResolutionCache,
    batch_depth: u32,
    dirty: Dirty,
    smm: bool,
    a20: bool,
    paging: PagingState,
    last_translation: Option<Translation>,
    layout: Option<PcLayout>,
}

impl AddressSpace {
    /// Allocates RAM and tables. With `pc_layout` set the standard PC RAM map is installed.
    pub fn new(config: AddressSpaceConfig) -> Result<Self> {
        config.validate()?;
        let ram = config.allocate_ram()?;
        let mut space = Self {
            cache: ResolutionCache::new(config.cache_entries),
            a20: config.a20_enabled,
            config,
            ram,
            access: AccessStateTable::new(),
            regions: Registry::new(),
            batch_depth: 0,
            dirty: Dirty::Clean,
            smm: false,
            paging: PagingState::default(),
            last_translation: None,
            layout: None,
        };
        if space.config.pc_layout {
            space.install_pc_layout()?;
        }
        Ok(space)
    }

    /// Returns the machine to its power-on state: every region is dropped, RAM is cleared and the
    /// PC layout (if configured) is installed again.
    pub fn reset(&mut self) -> Result<()> {
        self.ram = self.config.allocate_ram()?;
        self.regions.clear();
        self.access.clear();
        self.cache.flush();
        self.dirty = if self.batch_depth > 0 {
            Dirty::All
        } else {
            Dirty::Clean
        };
        self.smm = false;
        self.a20 = self.config.a20_enabled;
        self.paging = PagingState::default();
        self.last_translation = None;
        self.layout = None;
        if self.config.pc_layout {
            self.install_pc_layout()?;
        }
        tracing::debug!("address space reset");
        Ok(())
    }

    /// Removes every region. Access state and RAM contents are left alone.
    pub fn teardown(&mut self) {
        let handles: Vec<_> = self.regions.iter().map(|(handle, _)| handle).collect();
        let mut batch = self.batch();
        for handle in handles {
            let removed = batch.remove_region(handle);
            debug_assert!(removed.is_ok(), "registry handed out a stale handle");
        }
        batch.layout = None;
    }

    fn install_pc_layout(&mut self) -> Result<()> {
        let ram = self.config.ram_size;
        let low = ram.min(CONVENTIONAL_END);

        let layout = {
            let mut batch = self.batch();
            batch.set_access_both(0, low, AccessPair::INTERNAL)?;
            batch.set_access_both(
                CONVENTIONAL_END,
                HIGH_MEMORY_BASE - CONVENTIONAL_END,
                AccessPair::EXTERNAL,
            )?;

            let ram_low = batch.add_region(Region::ram("ram_low", 0, low, 0))?;
            let ram_high = if ram > HIGH_MEMORY_BASE {
                batch.set_access_both(
                    HIGH_MEMORY_BASE,
                    ram - HIGH_MEMORY_BASE,
                    AccessPair::INTERNAL,
                )?;
                Some(batch.add_region(Region::ram(
                    "ram_high",
                    HIGH_MEMORY_BASE,
                    ram - HIGH_MEMORY_BASE,
                    HIGH_MEMORY_BASE,
                ))?)
            } else {
                None
            };
            let ram_mid = if ram > 768 * KIB {
                let size = (ram - CONVENTIONAL_END).min(HIGH_MEMORY_BASE - CONVENTIONAL_END);
                Some(batch.add_region(Region::ram(
                    "ram_mid",
                    CONVENTIONAL_END,
                    size,
                    CONVENTIONAL_END,
                ))?)
            } else {
                None
            };
            let ram_remapped = batch.add_region(
                Region::ram("ram_remapped", ram.max(HIGH_MEMORY_BASE), 0, 0).with_direct(None),
            )?;

            PcLayout {
                ram_low,
                ram_high,
                ram_mid,
                ram_remapped,
            }
        };

        tracing::debug!(ram_kib = ram / KIB, "installed PC memory layout");
        self.layout = Some(layout);
        Ok(())
    }

    pub fn config(&self) -> &AddressSpaceConfig {
        &self.config
    }

    pub fn ram_size(&self) -> u32 {
        self.config.ram_size
    }

    pub fn ram(&self) -> &dyn GuestMemory {
        &*self.ram
    }

    /// Raw RAM access, bypassing decoding (firmware loading, tests).
    pub fn ram_mut(&mut self) -> &mut dyn GuestMemory {
        &mut *self.ram
    }

    pub fn pc_layout(&self) -> Option<PcLayout> {
        self.layout
    }

    // ---------------------------------------------------------------------------------------------
    // Batching and invalidation
    // ---------------------------------------------------------------------------------------------

    /// Opens an update batch. Until the returned guard (and any nested one) is dropped, the cache
    /// is bypassed and invalidations are accumulated; they are applied once on drop.
    pub fn batch(&mut self) -> UpdateBatch<'_> {
        self.batch_depth += 1;
        UpdateBatch { space: self }
    }

    pub fn in_batch(&self) -> bool {
        self.batch_depth > 0
    }

    fn end_batch(&mut self) {
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return;
        }
        match std::mem::replace(&mut self.dirty, Dirty::Clean) {
            Dirty::Clean => {}
            Dirty::Pages { first, end } => {
                self.cache
                    .invalidate_pages(first, (end - u64::from(first)) as u32);
            }
            Dirty::All => self.cache.flush(),
        }
    }

    fn invalidate_range(&mut self, start: u64, end: u64) {
        if end <= start {
            return;
        }
        let first = start >> PAGE_SHIFT;
        let last = (end - 1) >> PAGE_SHIFT;
        let (first, count) = (first as u32, (last - first + 1) as u32);
        self.last_translation = None;
        if self.batch_depth > 0 {
            self.dirty.merge(first, count);
        } else {
            self.cache.invalidate_pages(first, count);
        }
    }

    fn invalidate_all(&mut self) {
        self.last_translation = None;
        if self.batch_depth > 0 {
            self.dirty = Dirty::All;
        } else {
            self.cache.flush();
        }
    }

    /// Drops every cached resolution and the `get_phys` translation.
    pub fn flush_cache(&mut self) {
        self.invalidate_all();
    }

    /// Drops cached read and write resolutions, keeping instruction fetch lines.
    pub fn flush_data_cache(&mut self) {
        self.last_translation = None;
        if self.batch_depth > 0 {
            self.dirty = Dirty::All;
        } else {
            self.cache.flush_data();
        }
    }

    /// Drops the `get_phys` translation only (page directory change).
    pub fn flush_translation(&mut self) {
        self.last_translation = None;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[inline]
    fn cache_active(&self) -> bool {
        self.config.cache_enabled && self.batch_depth == 0
    }

    // ---------------------------------------------------------------------------------------------
    // Region registry
    // ---------------------------------------------------------------------------------------------

    fn check_direct(&self, direct: Option<u32>, size: u32) -> Result<()> {
        let Some(offset) = direct else {
            return Ok(());
        };
        let ram_size = self.ram.size();
        if u64::from(offset) + u64::from(size) > ram_size {
            return Err(MapError::DirectOutOfRange {
                offset,
                size,
                ram_size,
            });
        }
        Ok(())
    }

    /// Appends `region` to the resolution order.
    pub fn add_region(&mut self, region: Region) -> Result<RegionHandle> {
        self.check_direct(region.direct, region.size)?;
        if region.end() > ADDRESS_SPACE_END {
            return Err(MapError::OutOfRange {
                base: region.base,
                size: region.size,
            });
        }
        tracing::debug!(
            "add region {} [{:#x}, {:#x}) flags={:?} enabled={}",
            region.name,
            region.base,
            region.end(),
            region.flags,
            region.enabled
        );
        let (start, end) = (u64::from(region.base), region.end());
        let handle = self.regions.insert(region);
        self.invalidate_range(start, end);
        Ok(handle)
    }

    pub fn remove_region(&mut self, handle: RegionHandle) -> Result<Region> {
        let region = self.regions.remove(handle).ok_or(MapError::StaleHandle)?;
        tracing::debug!("remove region {}", region.name);
        self.invalidate_range(u64::from(region.base), region.end());
        Ok(region)
    }

    pub fn region(&self, handle: RegionHandle) -> Result<&Region> {
        self.regions.get(handle).ok_or(MapError::StaleHandle)
    }

    /// Regions in resolution order.
    pub fn regions(&self) -> impl Iterator<Item = (RegionHandle, &Region)> + '_ {
        self.regions.iter()
    }

    /// Logs the region table at debug level.
    pub fn dump_regions(&self) {
        for (position, (handle, region)) in self.regions.iter().enumerate() {
            tracing::debug!(
                "#{position} slot={} {} [{:#x}, {:#x}) flags={:?} direct={:?} handlers={:?} enabled={}",
                handle.index(),
                region.name,
                region.base,
                region.end(),
                region.flags,
                region.direct,
                region.handlers,
                region.enabled
            );
        }
    }

    fn update_region(
        &mut self,
        handle: RegionHandle,
        update: impl FnOnce(&mut Region),
    ) -> Result<()> {
        let region = self.regions.get_mut(handle).ok_or(MapError::StaleHandle)?;
        let old = (u64::from(region.base), region.end());
        update(region);
        let new = (u64::from(region.base), region.end());
        self.invalidate_range(old.0, old.1);
        self.invalidate_range(new.0, new.1);
        Ok(())
    }

    /// Moves and resizes a region. A non-empty region is enabled, an empty one disabled.
    pub fn set_addr(&mut self, handle: RegionHandle, base: u32, size: u32) -> Result<()> {
        let direct = self.region(handle)?.direct;
        self.check_direct(direct, size)?;
        if u64::from(base) + u64::from(size) > ADDRESS_SPACE_END {
            return Err(MapError::OutOfRange { base, size });
        }
        self.update_region(handle, |region| {
            tracing::debug!(
                "relocate region {} [{:#x}, {:#x}) -> [{:#x}, {:#x})",
                region.name,
                region.base,
                region.end(),
                base,
                u64::from(base) + u64::from(size)
            );
            region.base = base;
            region.size = size;
            region.enabled = size != 0;
        })
    }

    /// Attaches, moves or removes the RAM backing of a region.
    pub fn set_direct(&mut self, handle: RegionHandle, direct: Option<u32>) -> Result<()> {
        let size = self.region(handle)?.size;
        self.check_direct(direct, size)?;
        self.update_region(handle, |region| region.direct = direct)
    }

    pub fn set_handlers(&mut self, handle: RegionHandle, handlers: Handlers) -> Result<()> {
        self.update_region(handle, |region| region.handlers = handlers)
    }

    pub fn set_flags(&mut self, handle: RegionHandle, flags: RegionFlags) -> Result<()> {
        self.update_region(handle, |region| region.flags = flags)
    }

    pub fn enable(&mut self, handle: RegionHandle) -> Result<()> {
        self.set_enabled(handle, true)
    }

    pub fn disable(&mut self, handle: RegionHandle) -> Result<()> {
        self.set_enabled(handle, false)
    }

    pub fn set_enabled(&mut self, handle: RegionHandle, enabled: bool) -> Result<()> {
        if self.region(handle)?.enabled == enabled {
            return Ok(());
        }
        self.update_region(handle, |region| {
            let verb = if enabled { "enable" } else { "disable" };
            tracing::debug!("{verb} region {}", region.name);
            region.enabled = enabled;
        })
    }

    // ---------------------------------------------------------------------------------------------
    // Access state
    // ---------------------------------------------------------------------------------------------

    /// Applies `update` to every page of `[base, base + size)` for each mode in `modes`.
    ///
    /// `base` and `size` must be multiples of 4 KiB and the range must end at or below 4 GiB. An
    /// empty range is a no-op.
    pub fn set_access(
        &mut self,
        modes: ModeMask,
        base: u32,
        size: u32,
        update: AccessUpdate,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        if base & PAGE_MASK != 0 || size & PAGE_MASK != 0 {
            return Err(MapError::Misaligned { base, size });
        }
        let end = u64::from(base) + u64::from(size);
        if end > ADDRESS_SPACE_END {
            return Err(MapError::OutOfRange { base, size });
        }
        tracing::trace!(
            "access [{base:#x}, {end:#x}) modes={modes:?} {update:?}"
        );
        self.access
            .apply(modes, base >> PAGE_SHIFT, size >> PAGE_SHIFT, update);
        self.invalidate_range(u64::from(base), end);
        Ok(())
    }

    /// Sets read/write classes in every mode.
    pub fn set_access_both(&mut self, base: u32, size: u32, pair: AccessPair) -> Result<()> {
        self.set_access(ModeMask::ALL, base, size, AccessUpdate::Set(pair))
    }

    /// Sets read/write classes outside SMM (CPU and bus masters).
    pub fn set_access_normal(&mut self, base: u32, size: u32, pair: AccessPair) -> Result<()> {
        self.set_access(ModeMask::NORMAL, base, size, AccessUpdate::Set(pair))
    }

    /// Sets read/write classes inside SMM (CPU and bus masters).
    pub fn set_access_smm(&mut self, base: u32, size: u32, pair: AccessPair) -> Result<()> {
        self.set_access(ModeMask::SMM, base, size, AccessUpdate::Set(pair))
    }

    pub fn access_state(&self, addr: u32, mode: AccessMode) -> PageAccess {
        self.access.get(addr >> PAGE_SHIFT, mode)
    }

    // ---------------------------------------------------------------------------------------------
    // Machine state
    // ---------------------------------------------------------------------------------------------

    /// Enters or leaves System Management Mode. Cache lines are keyed by mode, so nothing is
    /// invalidated.
    pub fn set_smm(&mut self, smm: bool) {
        if self.smm != smm {
            tracing::debug!(smm, "SMM state change");
            self.smm = smm;
        }
    }

    pub fn in_smm(&self) -> bool {
        self.smm
    }

    pub fn set_a20(&mut self, enabled: bool) {
        if self.a20 != enabled {
            tracing::debug!(enabled, "A20 gate change");
            self.a20 = enabled;
            self.invalidate_all();
        }
    }

    pub fn a20_enabled(&self) -> bool {
        self.a20
    }

    #[inline]
    fn mask_a20(&self, addr: u32) -> u32 {
        if self.a20 {
            addr
        } else {
            addr & !A20_BIT
        }
    }

    /// Relocates up to `kb` KiB of the RAM hidden behind `A0000..FFFFF` to the top of memory.
    /// `kb == 0` removes the relocation.
    pub fn remap_top(&mut self, kb: u32) -> Result<()> {
        let layout = self
            .layout
            .ok_or(MapError::InvalidConfig("RAM remapping needs the PC layout"))?;
        let handle = layout.ram_remapped;

        let ram = self.config.ram_size;
        let start = ram.max(HIGH_MEMORY_BASE);
        let size = ram
            .saturating_sub(CONVENTIONAL_END)
            .min(kb.saturating_mul(KIB))
            & !PAGE_MASK;
        if size == 0 {
            tracing::debug!("RAM top remap disabled");
            return self.disable(handle);
        }

        tracing::debug!(start, size, "RAM top remap");
        let mut batch = self.batch();
        batch.set_access_both(start, size, AccessPair::INTERNAL)?;
        batch.set_direct(handle, None)?;
        batch.set_addr(handle, start, size)?;
        batch.set_direct(handle, Some(CONVENTIONAL_END))?;
        Ok(())
    }

    // ---------------------------------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------------------------------

    /// Which region services `addr` for `kind` in the current CPU mode. Ignores the cache.
    pub fn resolve(&self, addr: u32, kind: AccessKind) -> Option<Resolved> {
        self.resolve_in(addr, kind, AccessMode::new(false, self.smm))
    }

    pub fn resolve_in(&self, addr: u32, kind: AccessKind, mode: AccessMode) -> Option<Resolved> {
        let addr = self.mask_a20(addr);
        let class = self.access.class(addr, mode, kind);
        self.regions
            .find(addr, kind, class)
            .map(|(handle, _)| Resolved { handle, class })
    }

    /// Whether the region servicing `addr` decodes ROMCS#.
    pub fn is_romcs(&self, addr: u32, write: bool) -> bool {
        let kind = if write {
            AccessKind::Write
        } else {
            AccessKind::Read
        };
        self.resolve(addr, kind)
            .and_then(|resolved| self.regions.get(resolved.handle))
            .is_some_and(|region| region.flags.contains(RegionFlags::REQUIRES_ROMCS))
    }

    fn resolve_target(
        &mut self,
        addr: u32,
        kind: AccessKind,
        mode: AccessMode,
        cacheable: bool,
    ) -> Resolution {
        let page = addr >> PAGE_SHIFT;
        let page_start = u64::from(addr & !PAGE_MASK);
        let page_end = page_start + u64::from(PAGE_SIZE);
        let use_cache = cacheable && self.cache_active();

        if use_cache {
            if let Some(ram) = self.cache.lookup(page, mode, kind) {
                return Resolution {
                    target: Target::Ram(ram | (addr & PAGE_MASK)),
                    end: page_end,
                };
            }
        }

        let class = self.access.class(addr, mode, kind);
        let Some((handle, region)) = self.regions.find(addr, kind, class) else {
            tracing::trace!(addr, ?kind, ?mode, ?class, "unclaimed access");
            return Resolution::float(addr);
        };
        let end = region.end();
        let target = match (region.handlers.for_kind(kind), region.ram_offset(addr)) {
            (Some(handler), _) => Target::Handler(handler.clone()),
            (None, Some(offset)) => Target::Ram(offset),
            (None, None) => return Resolution::float(addr),
        };

        if use_cache && matches!(target, Target::Ram(_)) {
            self.try_fill(handle, page, page_start, page_end, kind, mode, class);
        }
        Resolution { target, end }
    }

    /// Caches the page if `handle` alone services all of it straight from RAM.
    #[allow(clippy::too_many_arguments)]
    fn try_fill(
        &mut self,
        handle: RegionHandle,
        page: u32,
        page_start: u64,
        page_end: u64,
        kind: AccessKind,
        mode: AccessMode,
        class: AccessClass,
    ) {
        let Some((winner, region)) = self.regions.find_covering(page_start, page_end, kind, class)
        else {
            return;
        };
        if winner != handle || region.handlers.for_kind(kind).is_some() {
            return;
        }
        let Some(ram) = region.ram_offset(page_start as u32) else {
            return;
        };
        if ram & PAGE_MASK != 0 || u64::from(ram) + u64::from(PAGE_SIZE) > self.ram.size() {
            return;
        }
        self.cache.fill(page, mode, kind, ram);
    }

    // ---------------------------------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------------------------------

    fn ram_read(&self, offset: u32, size: u32) -> u32 {
        let mut buf = [0xFFu8; 4];
        if self
            .ram
            .read_into(u64::from(offset), &mut buf[..size as usize])
            .is_err()
        {
            return all_ones(size);
        }
        u32::from_le_bytes(buf) & all_ones(size)
    }

    fn ram_write(&mut self, offset: u32, size: u32, value: u32) {
        let bytes = value.to_le_bytes();
        if self
            .ram
            .write_from(u64::from(offset), &bytes[..size as usize])
            .is_err()
        {
            tracing::trace!(offset, size, "write past end of RAM dropped");
        }
    }

    fn read_sized(&mut self, addr: u32, size: u32, kind: AccessKind, bus_master: bool) -> u32 {
        let addr = self.mask_a20(addr);
        let mode = AccessMode::new(bus_master, self.smm);

        if addr & (size - 1) == 0 {
            let resolution = self.resolve_target(addr, kind, mode, !bus_master);
            if u64::from(addr) + u64::from(size) <= resolution.end {
                return match resolution.target {
                    Target::Handler(handler) => {
                        let mut device = handler.borrow_mut();
                        match size {
                            1 => u32::from(device.read_u8(addr)),
                            2 => u32::from(device.read_u16(addr)),
                            _ => device.read_u32(addr),
                        }
                    }
                    Target::Ram(offset) => self.ram_read(offset, size),
                    Target::Float => all_ones(size),
                };
            }
        }

        let mut value = 0;
        for i in 0..size {
            let byte = self.read_sized(addr.wrapping_add(i), 1, kind, bus_master);
            value |= byte << (8 * i);
        }
        value
    }

    fn write_sized(&mut self, addr: u32, size: u32, value: u32, bus_master: bool) {
        let addr = self.mask_a20(addr);
        let mode = AccessMode::new(bus_master, self.smm);

        if addr & (size - 1) == 0 {
            let resolution = self.resolve_target(addr, AccessKind::Write, mode, !bus_master);
            if u64::from(addr) + u64::from(size) <= resolution.end {
                match resolution.target {
                    Target::Handler(handler) => {
                        let mut device = handler.borrow_mut();
                        match size {
                            1 => device.write_u8(addr, value as u8),
                            2 => device.write_u16(addr, value as u16),
                            _ => device.write_u32(addr, value),
                        }
                    }
                    Target::Ram(offset) => self.ram_write(offset, size, value),
                    Target::Float => {}
                }
                return;
            }
        }

        for i in 0..size {
            self.write_sized(addr.wrapping_add(i), 1, value >> (8 * i), bus_master);
        }
    }

    pub fn read_u8(&mut self, addr: u32) -> u8 {
        self.read_sized(addr, 1, AccessKind::Read, false) as u8
    }

    pub fn read_u16(&mut self, addr: u32) -> u16 {
        self.read_sized(addr, 2, AccessKind::Read, false) as u16
    }

    pub fn read_u32(&mut self, addr: u32) -> u32 {
        self.read_sized(addr, 4, AccessKind::Read, false)
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) {
        self.write_sized(addr, 1, u32::from(value), false);
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) {
        self.write_sized(addr, 2, u32::from(value), false);
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) {
        self.write_sized(addr, 4, value, false);
    }

    pub fn fetch_u8(&mut self, addr: u32) -> u8 {
        self.read_sized(addr, 1, AccessKind::Fetch, false) as u8
    }

    pub fn fetch_u16(&mut self, addr: u32) -> u16 {
        self.read_sized(addr, 2, AccessKind::Fetch, false) as u16
    }

    pub fn fetch_u32(&mut self, addr: u32) -> u32 {
        self.read_sized(addr, 4, AccessKind::Fetch, false)
    }

    /// Bus-master (DMA) reads. Resolved in the bus modes and never cached.
    pub fn bus_read_u8(&mut self, addr: u32) -> u8 {
        self.read_sized(addr, 1, AccessKind::Read, true) as u8
    }

    pub fn bus_read_u16(&mut self, addr: u32) -> u16 {
        self.read_sized(addr, 2, AccessKind::Read, true) as u16
    }

    pub fn bus_read_u32(&mut self, addr: u32) -> u32 {
        self.read_sized(addr, 4, AccessKind::Read, true)
    }

    pub fn bus_write_u8(&mut self, addr: u32, value: u8) {
        self.write_sized(addr, 1, u32::from(value), true);
    }

    pub fn bus_write_u16(&mut self, addr: u32, value: u16) {
        self.write_sized(addr, 2, u32::from(value), true);
    }

    pub fn bus_write_u32(&mut self, addr: u32, value: u32) {
        self.write_sized(addr, 4, value, true);
    }

    pub fn bus_read_bytes(&mut self, addr: u32, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.read_sized(addr.wrapping_add(i as u32), 1, AccessKind::Read, true) as u8;
        }
    }

    pub fn bus_write_bytes(&mut self, addr: u32, buf: &[u8]) {
        for (i, byte) in buf.iter().enumerate() {
            self.write_sized(addr.wrapping_add(i as u32), 1, u32::from(*byte), true);
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Paging
    // ---------------------------------------------------------------------------------------------

    pub fn set_paging(&mut self, paging: PagingState) {
        if self.paging != paging {
            self.paging = paging;
            self.last_translation = None;
        }
    }

    pub fn paging(&self) -> PagingState {
        self.paging
    }

    /// Translates a linear address using the current paging state.
    ///
    /// The last successful translation is remembered per access type and reused while the
    /// linear page matches.
    pub fn get_phys(&mut self, linear: u32, access: AccessType) -> Result<u32, PageFault> {
        if !self.paging.enabled() {
            return Ok(linear);
        }
        let page = linear & !PAGE_MASK;
        if let Some(last) = self.last_translation {
            if last.page == page && last.access == access {
                return Ok(last.frame | (linear & PAGE_MASK));
            }
        }

        let paging = self.paging;
        let phys = mmu::translate(self, linear, access, &paging)?;
        self.last_translation = Some(Translation {
            page,
            frame: phys & !PAGE_MASK,
            access,
        });
        Ok(phys)
    }

    fn read_linear_sized(
        &mut self,
        linear: u32,
        size: u32,
        access: AccessType,
    ) -> Result<u32, PageFault> {
        let kind = if access == AccessType::Execute {
            AccessKind::Fetch
        } else {
            AccessKind::Read
        };
        if (linear & PAGE_MASK) + size <= PAGE_SIZE {
            let phys = self.get_phys(linear, access)?;
            return Ok(self.read_sized(phys, size, kind, false));
        }

        // Both pages must translate before any byte is read.
        let mut phys = [0u32; 4];
        for (i, slot) in phys.iter_mut().enumerate().take(size as usize) {
            *slot = self.get_phys(linear.wrapping_add(i as u32), access)?;
        }
        let mut value = 0;
        for (i, paddr) in phys.iter().enumerate().take(size as usize) {
            value |= self.read_sized(*paddr, 1, kind, false) << (8 * i);
        }
        Ok(value)
    }

    fn write_linear_sized(
        &mut self,
        linear: u32,
        size: u32,
        value: u32,
    ) -> Result<(), PageFault> {
        if (linear & PAGE_MASK) + size <= PAGE_SIZE {
            let phys = self.get_phys(linear, AccessType::Write)?;
            self.write_sized(phys, size, value, false);
            return Ok(());
        }

        let mut phys = [0u32; 4];
        for (i, slot) in phys.iter_mut().enumerate().take(size as usize) {
            *slot = self.get_phys(linear.wrapping_add(i as u32), AccessType::Write)?;
        }
        for (i, paddr) in phys.iter().enumerate().take(size as usize) {
            self.write_sized(*paddr, 1, value >> (8 * i), false);
        }
        Ok(())
    }

    pub fn read_linear_u8(&mut self, linear: u32) -> Result<u8, PageFault> {
        self.read_linear_sized(linear, 1, AccessType::Read).map(|v| v as u8)
    }

    pub fn read_linear_u16(&mut self, linear: u32) -> Result<u16, PageFault> {
        self.read_linear_sized(linear, 2, AccessType::Read).map(|v| v as u16)
    }

    pub fn read_linear_u32(&mut self, linear: u32) -> Result<u32, PageFault> {
        self.read_linear_sized(linear, 4, AccessType::Read)
    }

    pub fn fetch_linear_u8(&mut self, linear: u32) -> Result<u8, PageFault> {
        self.read_linear_sized(linear, 1, AccessType::Execute).map(|v| v as u8)
    }

    pub fn write_linear_u8(&mut self, linear: u32, value: u8) -> Result<(), PageFault> {
        self.write_linear_sized(linear, 1, u32::from(value))
    }

    pub fn write_linear_u16(
        &mut self,
        linear: u32,
        value: u16,
    ) -> Result<(), PageFault> {
        self.write_linear_sized(linear, 2, u32::from(value))
    }

    pub fn write_linear_u32(
        &mut self,
        linear: u32,
        value: u32,
    ) -> Result<(), PageFault> {
        self.write_linear_sized(linear, 4, value)
    }
}

impl MemoryBus for AddressSpace {
    fn read_physical(&mut self, paddr: u32, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.read_sized(paddr.wrapping_add(i as u32), 1, AccessKind::Read, false) as u8;
        }
    }

    fn write_physical(&mut self, paddr: u32, buf: &[u8]) {
        for (i, byte) in buf.iter().enumerate() {
            self.write_sized(paddr.wrapping_add(i as u32), 1, u32::from(*byte), false);
        }
    }

    fn read_phys_u32(&mut self, paddr: u32) -> u32 {
        self.read_sized(paddr, 4, AccessKind::Read, false)
    }

    fn write_phys_u32(&mut self, paddr: u32, val: u32) {
        self.write_sized(paddr, 4, val, false);
    }
}

/// Scoped update batch returned by [`AddressSpace::batch`].
///
/// Dereferences to the address space, so every reconfiguration method is available on the
/// guard. Dropping the outermost guard applies the accumulated cache invalidation.
pub struct UpdateBatch<'a> {
    space: &'a mut AddressSpace,
}

impl Deref for UpdateBatch<'_> {
    type Target = AddressSpace;

    fn deref(&self) -> &AddressSpace {
        self.space
    }
}

impl DerefMut for UpdateBatch<'_> {
    fn deref_mut(&mut self) -> &mut AddressSpace {
        self.space
    }
}

impl Drop for UpdateBatch<'_> {
    fn drop(&mut self) {
        self.space.end_batch();
    }
}
