//! ACC Micro 2168 shadow RAM control.
//!
//! Registers are reached through an index port (`0xF2`) and a data port (`0xF3`). Register
//! `0x02` controls shadowing of the four 64 KiB segments `C0000..FFFFF`:
//!
//! | bit | meaning                                   |
//! |-----|-------------------------------------------|
//! | 0-3 | shadow enable for C, D, E and F segments  |
//! | 4   | reads of enabled segments come from DRAM  |
//! | 5   | enabled segments are write protected      |

use crate::recalc::{PortIo, RegionRecalc};
use crate::shadow::{SegmentState, ShadowSegment};
use pcmap_memory::{AddressSpace, ModeMask, Result};

pub const PORT_INDEX: u16 = 0xF2;
pub const PORT_DATA: u16 = 0xF3;

const PORTS: [u16; 2] = [PORT_INDEX, PORT_DATA];

pub const REG_SHADOW: u8 = 0x02;

const SHADOW_READ_DRAM: u8 = 1 << 4;
const SHADOW_WRITE_PROTECT: u8 = 1 << 5;

const SEGMENT_SIZE: u32 = 0x10000;

pub struct Acc2168 {
    index: u8,
    regs: [u8; 256],
    segments: [ShadowSegment; 4],
}

impl Default for Acc2168 {
    fn default() -> Self {
        Self::new()
    }
}

impl Acc2168 {
    pub fn new() -> Self {
        Self {
            index: 0,
            regs: [0; 256],
            segments: core::array::from_fn(|segment| {
                ShadowSegment::new(0xC0000 + segment as u32 * SEGMENT_SIZE, SEGMENT_SIZE)
            }),
        }
    }

    pub fn reg(&self, index: u8) -> u8 {
        self.regs[usize::from(index)]
    }

    /// Current decoding of segment `segment` (0 = `C0000`, 3 = `F0000`).
    pub fn segment(&self, segment: usize) -> Option<SegmentState> {
        self.segments.get(segment).map(|segment| segment.state)
    }

    fn segment_state(&self, segment: usize) -> SegmentState {
        let shadow = self.regs[usize::from(REG_SHADOW)];
        if shadow & (1 << segment) == 0 {
            return SegmentState::External;
        }
        SegmentState::new(
            shadow & SHADOW_READ_DRAM != 0,
            shadow & SHADOW_WRITE_PROTECT == 0,
        )
    }
}

impl RegionRecalc for Acc2168 {
    /// Hands every segment back to the expansion bus.
    fn teardown(&mut self, space: &mut AddressSpace) -> Result<()> {
        for segment in &mut self.segments {
            segment.state = SegmentState::External;
            segment.apply(space, ModeMask::ALL)?;
        }
        Ok(())
    }

    fn setup(&mut self, space: &mut AddressSpace) -> Result<()> {
        for index in 0..self.segments.len() {
            let state = self.segment_state(index);
            let segment = &mut self.segments[index];
            segment.state = state;
            if state != SegmentState::External {
                segment.apply(space, ModeMask::ALL)?;
            }
        }
        Ok(())
    }
}

impl PortIo for Acc2168 {
    fn ports(&self) -> &'static [u16] {
        &PORTS
    }

    fn read_port(&mut self, _space: &mut AddressSpace, port: u16) -> u8 {
        match port {
            PORT_INDEX => self.index,
            PORT_DATA => self.regs[usize::from(self.index)],
            _ => 0xFF,
        }
    }

    fn write_port(&mut self, space: &mut AddressSpace, port: u16, value: u8) {
        match port {
            PORT_INDEX => self.index = value,
            PORT_DATA => {
                self.regs[usize::from(self.index)] = value;
                if self.index == REG_SHADOW {
                    tracing::debug!(value, "ACC 2168 shadow control write");
                    self.recalc(space);
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self, space: &mut AddressSpace) {
        self.index = 0;
        self.regs = [0; 256];
        self.recalc(space);
    }
}
