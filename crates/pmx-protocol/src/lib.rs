#![forbid(unsafe_code)]

//! Wire protocol spoken with the PMX hardware access driver.
//!
//! Each hardware operation is a numeric control code ([`opcode`]) plus a fixed-size
//! little-endian request frame; the driver answers in place with a response frame of
//! the same or a closely related layout ([`codec`]).

pub mod codec;
pub mod opcode;

mod address;
mod width;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod proptests;

pub use address::{
    AddressError, PciAddress, PhysicalAllocation, PCI_CONFIG_SPACE_SIZE, PCI_DEVICES_PER_BUS,
    PCI_FUNCTIONS_PER_DEVICE, PCI_LEGACY_CONFIG_SPACE_SIZE,
};
pub use codec::{
    CpuidRegs, CrFrame, DecodeError, Frame, IoFrame, MemTransfer, MsrFrame, PciFrame, PmcFrame,
    SearchRequest, SearchResponse, TscFrame, STAGING_BUFFER,
};
pub use opcode::Operation;
pub use width::AccessWidth;
