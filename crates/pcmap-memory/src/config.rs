use crate::access::PAGE_SIZE;
use crate::error::{MapError, Result};
use crate::phys::{DenseMemory, GuestMemory, SparseMemory};

/// Guest RAM allocation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamBacking {
    Dense,
    Sparse { chunk_size: usize },
}

/// Construction-time parameters of an [`AddressSpace`](crate::AddressSpace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpaceConfig {
    /// Installed RAM in bytes. Must be page aligned and at most 2 GiB.
    pub ram_size: u32,
    pub ram_backing: RamBacking,
    /// Install the conventional PC RAM regions and access state on reset.
    pub pc_layout: bool,
    pub cache_enabled: bool,
    /// Lines per access kind; rounded up to a power of two.
    pub cache_entries: usize,
    /// A20 gate state after reset.
    pub a20_enabled: bool,
}

impl Default for AddressSpaceConfig {
    fn default() -> Self {
        Self {
            ram_size: 16 * 1024 * 1024,
            ram_backing: RamBacking::Dense,
            pc_layout: true,
            cache_enabled: true,
            cache_entries: 256,
            a20_enabled: true,
        }
    }
}

pub const MAX_RAM_SIZE: u32 = 0x8000_0000;

impl AddressSpaceConfig {
    pub fn with_ram_size(ram_size: u32) -> Self {
        Self {
            ram_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ram_size % PAGE_SIZE != 0 {
            return Err(MapError::InvalidConfig("RAM size must be a multiple of 4 KiB"));
        }
        if self.ram_size > MAX_RAM_SIZE {
            return Err(MapError::InvalidConfig("RAM size must not exceed 2 GiB"));
        }
        if self.cache_entries == 0 {
            return Err(MapError::InvalidConfig("cache needs at least one line"));
        }
        Ok(())
    }

    pub(crate) fn allocate_ram(&self) -> Result<Box<dyn GuestMemory>> {
        let size = u64::from(self.ram_size);
        Ok(match self.ram_backing {
            RamBacking::Dense => Box::new(DenseMemory::new(size)?),
            RamBacking::Sparse { chunk_size } => {
                Box::new(SparseMemory::with_chunk_size(size, chunk_size)?)
            }
        })
    }
}
