#![forbid(unsafe_code)]

//! Typed access to physical memory, I/O ports, processor registers and PCI
//! configuration space through the PMX driver.
//!
//! [`HwAccess`] turns each operation into a [`pmx_protocol`] frame and submits it over a
//! [`ControlChannel`]. PCI configuration accesses are routed through ECAM when ACPI (or
//! the host bridge) reveals a memory-mapped window, and through the driver's legacy
//! path otherwise.

mod access;
mod channel;
mod config;
mod discovery;
mod error;
mod pci;
mod search;

pub use access::HwAccess;
pub use channel::{ControlChannel, DRIVER_RESPONSE_LEN};
pub use config::{HwConfig, PciDiscovery, ResponseCapacity, VendorProbe};
pub use discovery::{discover, DiscoverySource};
pub use error::{HwError, HwResult};
pub use pci::{PciMmConfig, PciPathState};
pub use search::PatternSearch;

pub use pmx_protocol::{AccessWidth, CpuidRegs, PciAddress, PhysicalAllocation};
