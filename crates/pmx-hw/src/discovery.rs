//! Locating the ECAM window from firmware tables or the host bridge.

use pmx_acpi::{
    rsdt_entries, rsdt_entry_count, AcpiError, McfgAllocation, SdtHeader, MCFG_SIGNATURE,
    MCFG_TABLE_PROBE_LEN, RSDP_RSDT_ADDRESS_OFFSET, RSDP_SCAN_END, RSDP_SCAN_START,
    RSDP_SCAN_STRIDE, RSDP_SIGNATURE, RSDT_SIGNATURE, SDT_HEADER_LEN,
};
use pmx_protocol::PciAddress;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{HwConfig, PciMmConfig, VendorProbe};

/// Primitive reads discovery is built from.
///
/// Implementations must not route through the PCI path selector; discovery runs while
/// the selector is still undecided.
pub trait DiscoverySource {
    /// Physical address of the first `pattern` match at `step` granularity, or `None`.
    fn search(&self, address: u64, size: u32, pattern: &[u8], step: u32) -> Option<u64>;

    /// Exactly `len` bytes of physical memory.
    fn read_memory(&self, address: u64, len: usize) -> Option<Vec<u8>>;

    fn read_memory32(&self, address: u64) -> Option<u32> {
        let b = self.read_memory(address, 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn legacy_pci_read16(&self, addr: PciAddress) -> Option<u16>;

    /// High dword at `offset + 4` first, then the low dword.
    fn legacy_pci_read64(&self, addr: PciAddress) -> Option<u64>;
}

#[derive(Debug, Error)]
enum DiscoveryError {
    #[error(transparent)]
    Acpi(#[from] AcpiError),

    #[error("could not read {what} at {address:#x}")]
    ReadFailed { what: &'static str, address: u64 },
}

/// Finds the ECAM window, or [`PciMmConfig::LEGACY`] if there is none.
///
/// Firmware tables are preferred. The chipset register is only consulted when no RSDP
/// exists at all. Malformed or unreadable tables end discovery with the legacy result.
pub fn discover(source: &impl DiscoverySource, config: &HwConfig) -> PciMmConfig {
    let mut result = match find_rsdp(source) {
        Some(rsdp) => match find_mcfg(source, rsdp, config.max_rsdt_len) {
            Ok(Some(alloc)) => PciMmConfig {
                base_address: alloc.base_address,
                top_bus: alloc.end_bus,
            },
            Ok(None) => PciMmConfig::LEGACY,
            Err(err) => {
                warn!(rsdp, %err, "unusable ACPI tables; falling back to legacy PCI access");
                PciMmConfig::LEGACY
            }
        },
        None => match config.ecam_vendor_probe {
            Some(probe) => probe_host_bridge(source, probe),
            None => PciMmConfig::LEGACY,
        },
    };

    if result.is_available() && result.window_end().is_none() {
        warn!(
            base = result.base_address,
            top_bus = result.top_bus,
            "ECAM window wraps the physical address space; falling back to legacy PCI access"
        );
        result = PciMmConfig::LEGACY;
    }

    if result.is_available() {
        info!(
            base = result.base_address,
            top_bus = result.top_bus,
            "PCI configuration space through ECAM"
        );
    } else {
        info!("PCI configuration space through legacy access");
    }
    result
}

fn find_rsdp(source: &impl DiscoverySource) -> Option<u64> {
    let size = (RSDP_SCAN_END - RSDP_SCAN_START) as u32;
    let rsdp = source
        .search(RSDP_SCAN_START, size, &RSDP_SIGNATURE, RSDP_SCAN_STRIDE)
        .filter(|&addr| addr != 0);
    debug!(?rsdp, "RSDP scan");
    rsdp
}

fn read(
    source: &impl DiscoverySource,
    what: &'static str,
    address: u64,
    len: usize,
) -> Result<Vec<u8>, DiscoveryError> {
    source
        .read_memory(address, len)
        .ok_or(DiscoveryError::ReadFailed { what, address })
}

fn find_mcfg(
    source: &impl DiscoverySource,
    rsdp: u64,
    max_rsdt_len: u32,
) -> Result<Option<McfgAllocation>, DiscoveryError> {
    let pointer = rsdp
        .checked_add(RSDP_RSDT_ADDRESS_OFFSET)
        .ok_or(DiscoveryError::ReadFailed {
            what: "RSDT pointer",
            address: rsdp,
        })?;
    let rsdt = source
        .read_memory32(pointer)
        .ok_or(DiscoveryError::ReadFailed {
            what: "RSDT pointer",
            address: pointer,
        })?;
    let rsdt = u64::from(rsdt);

    let header = SdtHeader::parse(&read(source, "RSDT header", rsdt, SdtHeader::PREFIX_LEN)?)?;
    if !header.has_signature(RSDT_SIGNATURE) {
        debug!(rsdt, "RSDP does not point at an RSDT");
        return Ok(None);
    }
    let count = rsdt_entry_count(&header, max_rsdt_len)?;
    debug!(rsdt, entries = count, "walking RSDT");
    if count == 0 {
        return Ok(None);
    }

    let entries = read(
        source,
        "RSDT entries",
        rsdt + u64::from(SDT_HEADER_LEN),
        count * 4,
    )?;
    for entry in rsdt_entries(&entries) {
        let address = u64::from(entry);
        let table = read(source, "ACPI table", address, MCFG_TABLE_PROBE_LEN)?;
        if !SdtHeader::parse(&table)?.has_signature(MCFG_SIGNATURE) {
            continue;
        }
        let alloc = McfgAllocation::parse(&table)?;
        debug!(
            table = address,
            base = alloc.base_address,
            end_bus = alloc.end_bus,
            "MCFG allocation"
        );
        if alloc.base_address != 0 {
            return Ok(Some(alloc));
        }
    }
    Ok(None)
}

fn probe_host_bridge(source: &impl DiscoverySource, probe: VendorProbe) -> PciMmConfig {
    let root = PciAddress::new(0, 0, 0);
    let vendor = source.legacy_pci_read16(root);
    if vendor != Some(probe.vendor_id) {
        debug!(?vendor, expected = probe.vendor_id, "host bridge vendor mismatch");
        return PciMmConfig::LEGACY;
    }
    match source.legacy_pci_read64(root.with_offset(probe.register)) {
        Some(value) => {
            debug!(register = probe.register, value, "host bridge ECAM register");
            PciMmConfig::from_pciexbar(value)
        }
        None => PciMmConfig::LEGACY,
    }
}
