use pcmap_memory::{AddressSpace, Result};

/// Two-phase memory map recalculation run by every chipset adapter.
///
/// `teardown` drops whatever special mapping the previous register state produced and returns
/// the affected pages to their default classes. `setup` then derives the new mapping from the
/// current register state. Both phases run inside one [`UpdateBatch`](pcmap_memory::UpdateBatch),
/// so the resolution cache is invalidated once at the end.
pub trait RegionRecalc {
    fn teardown(&mut self, space: &mut AddressSpace) -> Result<()>;
    fn setup(&mut self, space: &mut AddressSpace) -> Result<()>;

    fn recalc(&mut self, space: &mut AddressSpace) {
        let mut batch = space.batch();
        let result = self.teardown(&mut batch);
        let result = result.and_then(|()| self.setup(&mut batch));
        report("recalculation", result);
    }
}

/// I/O port side of a chipset adapter.
///
/// Guest port accesses never fail; they may reconfigure the address space as a side effect.
pub trait PortIo {
    /// Ports decoded by the device.
    fn ports(&self) -> &'static [u16];
    fn read_port(&mut self, space: &mut AddressSpace, port: u16) -> u8;
    fn write_port(&mut self, space: &mut AddressSpace, port: u16, value: u8);

    /// Reset the device back to its power-on state.
    fn reset(&mut self, _space: &mut AddressSpace) {}
}

/// Guest register writes cannot fail. A reconfiguration error here is a wiring bug in the
/// adapter; it is logged and the write completes.
pub(crate) fn report(what: &'static str, result: Result<()>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "chipset memory map {what} failed");
    }
}
