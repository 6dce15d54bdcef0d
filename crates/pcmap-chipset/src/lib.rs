//! Chipset adapters that translate register writes into address space reconfiguration.
//!
//! Every adapter follows the same two-phase protocol ([`RegionRecalc`]): tear down what the
//! previous register state mapped, then set up what the new state asks for, inside one update
//! batch of the [`AddressSpace`](pcmap_memory::AddressSpace).

pub mod acc2168;
pub mod intel4x0;
pub mod pci_bar;
pub mod recalc;
pub mod scamp;
pub mod shadow;

pub use acc2168::Acc2168;
pub use intel4x0::{I4x0, Variant};
pub use pci_bar::PciBarWindow;
pub use recalc::{PortIo, RegionRecalc};
pub use scamp::Scamp;
pub use shadow::{SegmentState, ShadowSegment};
