//! Per-segment shadow RAM state shared by the chipset adapters.

use pcmap_memory::{AccessClass, AccessPair, AccessUpdate, AddressSpace, ModeMask, Result};

/// Where one shadowable segment sends reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SegmentState {
    /// Both directions go to the expansion bus (ROM, option ROMs, adapters).
    #[default]
    External,
    /// Reads from shadow RAM, writes to the bus (write protected shadow).
    ShadowedRo,
    /// Reads from the bus, writes to shadow RAM (used while copying a ROM down).
    ShadowedWo,
    /// Both directions go to shadow RAM.
    ShadowedRw,
}

impl SegmentState {
    pub fn new(read_internal: bool, write_internal: bool) -> Self {
        match (read_internal, write_internal) {
            (false, false) => SegmentState::External,
            (true, false) => SegmentState::ShadowedRo,
            (false, true) => SegmentState::ShadowedWo,
            (true, true) => SegmentState::ShadowedRw,
        }
    }

    pub fn reads_internal(self) -> bool {
        matches!(self, SegmentState::ShadowedRo | SegmentState::ShadowedRw)
    }

    pub fn writes_internal(self) -> bool {
        matches!(self, SegmentState::ShadowedWo | SegmentState::ShadowedRw)
    }

    /// Access classes for this state. Bus-side directions accept any external device, ROMCS#
    /// decoders included.
    pub fn access(self) -> AccessPair {
        let class = |internal| {
            if internal {
                AccessClass::Internal
            } else {
                AccessClass::ExtAny
            }
        };
        AccessPair::new(
            class(self.reads_internal()),
            class(self.writes_internal()),
        )
    }
}

/// One shadowable window of the upper memory area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowSegment {
    pub base: u32,
    pub size: u32,
    pub state: SegmentState,
}

impl ShadowSegment {
    pub const fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            size,
            state: SegmentState::External,
        }
    }

    /// Writes the segment's access classes for `modes`.
    pub fn apply(&self, space: &mut AddressSpace, modes: ModeMask) -> Result<()> {
        tracing::debug!(
            "shadow [{:#x}, {:#x}) -> {:?}",
            self.base,
            u64::from(self.base) + u64::from(self.size),
            self.state
        );
        space.set_access(
            modes,
            self.base,
            self.size,
            AccessUpdate::Set(self.state.access()),
        )
    }
}
