use crate::phys::GuestMemoryError;
use thiserror::Error;

/// Errors returned by address space reconfiguration.
///
/// Per-access paths never fail: an access nothing responds to floats on reads and is dropped on
/// writes.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("region handle is stale or was never registered")]
    StaleHandle,

    #[error("access range base=0x{base:x} size=0x{size:x} is not page aligned")]
    Misaligned { base: u32, size: u32 },

    #[error("access range base=0x{base:x} size=0x{size:x} extends past 4 GiB")]
    OutOfRange { base: u32, size: u32 },

    #[error(
        "direct mapping at RAM offset 0x{offset:x} (size 0x{size:x}) exceeds RAM size 0x{ram_size:x}"
    )]
    DirectOutOfRange { offset: u32, size: u32, ram_size: u64 },

    #[error("invalid address space configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("failed to allocate guest RAM: {0}")]
    RamAllocation(#[from] GuestMemoryError),
}

pub type Result<T, E = MapError> = core::result::Result<T, E>;
