#![forbid(unsafe_code)]

//! Just enough ACPI to find the PCIe ECAM window.
//!
//! [`tables`] decodes the RSDT and MCFG fields discovery needs from raw memory bytes;
//! [`builder`] produces the same layouts so simulated firmware can be placed in memory.

pub mod builder;
pub mod tables;

pub use builder::{AcpiImage, OemInfo, PhysicalMemory};
pub use tables::{
    checksum, rsdt_entries, rsdt_entry_count, AcpiError, McfgAllocation, SdtHeader,
    MCFG_ALLOCATION_OFFSET, MCFG_SIGNATURE, MCFG_TABLE_PROBE_LEN, RSDP_RSDT_ADDRESS_OFFSET,
    RSDP_SCAN_END, RSDP_SCAN_START, RSDP_SCAN_STRIDE, RSDP_SIGNATURE, RSDT_SIGNATURE,
    SDT_HEADER_LEN,
};
