use crate::channel::DRIVER_RESPONSE_LEN;

/// How large a response buffer to offer the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseCapacity {
    /// A fixed 0x1100-byte buffer, or the transfer size when that is larger.
    #[default]
    DriverAbi,
    /// Exactly the response layout's size.
    Exact,
}

impl ResponseCapacity {
    pub fn response_len(self, exact: usize) -> usize {
        match self {
            Self::DriverAbi => exact.max(DRIVER_RESPONSE_LEN),
            Self::Exact => exact,
        }
    }
}

/// When the PCI access path is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PciDiscovery {
    /// On the first PCI configuration access.
    #[default]
    Lazy,
    /// Only on [`crate::HwAccess::detect_pci_mm`]; until then PCI uses the legacy path.
    Manual,
}

/// Chipset register probed for the ECAM window when firmware tables are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorProbe {
    /// Vendor ID expected at 00:00.0.
    pub vendor_id: u16,
    /// Config offset of the 64-bit PCIEXBAR-style register.
    pub register: u16,
}

impl Default for VendorProbe {
    fn default() -> Self {
        Self {
            vendor_id: 0x8086,
            register: 0x60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwConfig {
    pub response_capacity: ResponseCapacity,
    pub pci_discovery: PciDiscovery,
    /// `None` skips the chipset fallback.
    pub ecam_vendor_probe: Option<VendorProbe>,
    /// Largest RSDT length discovery is willing to read.
    pub max_rsdt_len: u32,
}

impl Default for HwConfig {
    fn default() -> Self {
        Self {
            response_capacity: ResponseCapacity::default(),
            pci_discovery: PciDiscovery::default(),
            ecam_vendor_probe: Some(VendorProbe::default()),
            max_rsdt_len: 0x1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_abi_capacity_never_shrinks_below_transfer() {
        assert_eq!(ResponseCapacity::DriverAbi.response_len(8), 0x1100);
        assert_eq!(ResponseCapacity::DriverAbi.response_len(0x2000), 0x2000);
        assert_eq!(ResponseCapacity::Exact.response_len(8), 8);
    }

    #[test]
    fn defaults() {
        let cfg = HwConfig::default();
        assert_eq!(cfg.response_capacity, ResponseCapacity::DriverAbi);
        assert_eq!(cfg.pci_discovery, PciDiscovery::Lazy);
        assert_eq!(
            cfg.ecam_vendor_probe,
            Some(VendorProbe {
                vendor_id: 0x8086,
                register: 0x60
            })
        );
        assert_eq!(cfg.max_rsdt_len, 0x1000);
    }
}
