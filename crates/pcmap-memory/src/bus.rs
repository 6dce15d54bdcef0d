/// Physical memory as seen by the page walker.
///
/// Page tables may live in RAM or in anything else a region maps, so reads take `&mut self` to
/// allow handlers with side effects.
pub trait MemoryBus {
    fn read_physical(&mut self, paddr: u32, buf: &mut [u8]);
    fn write_physical(&mut self, paddr: u32, buf: &[u8]);

    fn read_phys_u32(&mut self, paddr: u32) -> u32 {
        let mut buf = [0u8; 4];
        self.read_physical(paddr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn write_phys_u32(&mut self, paddr: u32, val: u32) {
        self.write_physical(paddr, &val.to_le_bytes());
    }
}
