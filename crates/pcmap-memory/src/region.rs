use crate::access::AccessKind;
use bitflags::bitflags;
use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

bitflags! {
    /// Decode attributes of a [`Region`], matched against the page's access class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegionFlags: u16 {
        /// Device on the expansion bus.
        const EXTERNAL = 1 << 0;
        /// Board memory behind the memory controller.
        const INTERNAL = 1 << 1;
        const ROM_WAIT_STATE = 1 << 2;
        const IS_ROM = 1 << 3;
        /// Only responds to cycles with ROMCS# asserted.
        const REQUIRES_ROMCS = 1 << 4;
        const SMRAM = 1 << 5;
        const CACHE = 1 << 6;

        const ROM = Self::ROM_WAIT_STATE.bits() | Self::IS_ROM.bits();
    }
}

/// Device side of a memory-mapped region.
///
/// Addresses passed to handlers are absolute physical addresses (after A20 masking). Only the byte
/// accessors are required; wider accesses compose from narrower ones in little-endian order
/// unless the device overrides them.
pub trait MemoryHandler {
    fn read_u8(&mut self, addr: u32) -> u8;
    fn write_u8(&mut self, addr: u32, value: u8);

    fn read_u16(&mut self, addr: u32) -> u16 {
        let lo = self.read_u8(addr) as u16;
        let hi = self.read_u8(addr.wrapping_add(1)) as u16;
        lo | (hi << 8)
    }

    fn read_u32(&mut self, addr: u32) -> u32 {
        let lo = self.read_u16(addr) as u32;
        let hi = self.read_u16(addr.wrapping_add(2)) as u32;
        lo | (hi << 16)
    }

    fn write_u16(&mut self, addr: u32, value: u16) {
        self.write_u8(addr, value as u8);
        self.write_u8(addr.wrapping_add(1), (value >> 8) as u8);
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        self.write_u16(addr, value as u16);
        self.write_u16(addr.wrapping_add(2), (value >> 16) as u16);
    }
}

/// Handler shared between the device that owns it and the address space.
pub type SharedHandler = Rc<RefCell<dyn MemoryHandler>>;

/// Read and write handlers of a region. Either side may be absent.
#[derive(Clone, Default)]
pub struct Handlers {
    pub read: Option<SharedHandler>,
    pub write: Option<SharedHandler>,
}

impl Handlers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn read_write(handler: SharedHandler) -> Self {
        Self {
            read: Some(handler.clone()),
            write: Some(handler),
        }
    }

    pub fn read_only(handler: SharedHandler) -> Self {
        Self {
            read: Some(handler),
            write: None,
        }
    }

    pub fn write_only(handler: SharedHandler) -> Self {
        Self {
            read: None,
            write: Some(handler),
        }
    }

    pub fn for_kind(&self, kind: AccessKind) -> Option<&SharedHandler> {
        if kind.is_write() {
            self.write.as_ref()
        } else {
            self.read.as_ref()
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .finish()
    }
}

/// One address-space-owning device window.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: &'static str,
    pub base: u32,
    pub size: u32,
    pub handlers: Handlers,
    /// Offset into guest RAM backing the region. Used for directions without a handler.
    pub direct: Option<u32>,
    pub flags: RegionFlags,
    pub enabled: bool,
}

impl Region {
    /// Board RAM window: `[base, base + size)` maps to RAM starting at `ram_offset`.
    pub fn ram(name: &'static str, base: u32, size: u32, ram_offset: u32) -> Self {
        Self {
            name,
            base,
            size,
            handlers: Handlers::none(),
            direct: Some(ram_offset),
            flags: RegionFlags::INTERNAL,
            enabled: size != 0,
        }
    }

    /// Handler-backed device window.
    pub fn device(
        name: &'static str,
        base: u32,
        size: u32,
        handlers: Handlers,
        flags: RegionFlags,
    ) -> Self {
        Self {
            name,
            base,
            size,
            handlers,
            direct: None,
            flags,
            enabled: size != 0,
        }
    }

    pub fn with_flags(mut self, flags: RegionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_direct(mut self, ram_offset: Option<u32>) -> Self {
        self.direct = ram_offset;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    /// Exclusive end address.
    #[inline]
    pub fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.size)
    }

    pub fn intersects(&self, start: u64, end: u64) -> bool {
        self.size != 0 && u64::from(self.base) < end && self.end() > start
    }

    /// Whether the region can service `kind` at all (handler or RAM backing).
    #[inline]
    pub fn services(&self, kind: AccessKind) -> bool {
        self.handlers.for_kind(kind).is_some() || self.direct.is_some()
    }

    /// RAM offset backing `addr`, if the region is RAM-backed.
    #[inline]
    pub fn ram_offset(&self, addr: u32) -> Option<u32> {
        self.direct
            .map(|offset| offset.wrapping_add(addr.wrapping_sub(self.base)))
    }
}

/// Stable reference to a registered region.
///
/// Handles carry a generation so that a handle kept across `remove_region` cannot alias a region
/// registered later in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl RegionHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}
