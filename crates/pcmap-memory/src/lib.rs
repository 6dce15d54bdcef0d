//! PC physical address decoding: which device answers each memory cycle.
//!
//! The crate models the memory map of an x86 PC chipset:
//! - a per-page access state table (internal RAM vs. expansion bus, per CPU/bus and SMM mode)
//! - a registry of memory regions resolved in registration order
//! - a resolution cache that short-circuits the lookup for RAM-backed pages
//! - byte/word/dword dispatch, bus-master access and linear (`get_phys`) translation
//!
//! Chipset shadow/SMRAM register logic lives in `pcmap-chipset`; it only drives the public
//! reconfiguration API of [`AddressSpace`].

pub mod access;
pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod mmu;
pub mod phys;
pub mod region;
pub mod registry;
pub mod space;

pub use access::{
    AccessClass, AccessKind, AccessMode, AccessPair, AccessUpdate, ModeMask, PageAccess,
    SmramOverlay, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE,
};
pub use bus::MemoryBus;
pub use cache::CacheStats;
pub use config::{AddressSpaceConfig, RamBacking};
pub use error::{MapError, Result};
pub use mmu::{AccessType, PageFault, PagingState};
pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, SparseMemory};
pub use region::{Handlers, MemoryHandler, Region, RegionFlags, RegionHandle, SharedHandler};
pub use space::{AddressSpace, PcLayout, Resolved, UpdateBatch, CONVENTIONAL_END, HIGH_MEMORY_BASE};

#[cfg(test)]
mod tests;
