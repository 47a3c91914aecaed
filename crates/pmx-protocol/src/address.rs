use thiserror::Error;

/// Size of one function's configuration space when reached through ECAM.
pub const PCI_CONFIG_SPACE_SIZE: u16 = 0x1000;

/// Size of the configuration window the legacy driver path can reach.
pub const PCI_LEGACY_CONFIG_SPACE_SIZE: u16 = 0x100;

pub const PCI_DEVICES_PER_BUS: u8 = 32;
pub const PCI_FUNCTIONS_PER_DEVICE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("config offset {offset:#x} {delta:+} leaves the 0..0x1000 window")]
    Overflow { offset: u16, delta: i32 },
}

/// A register inside the configuration space of one PCI function.
///
/// Construction does not validate the fields. Only offset arithmetic is checked here;
/// bus/device/function ranges are checked by whoever encodes the address for the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub offset: u16,
}

impl PciAddress {
    /// Address of register 0 of `bus:device.function`.
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
            offset: 0,
        }
    }

    pub const fn with_offset(self, offset: u16) -> Self {
        Self { offset, ..self }
    }

    /// Moves the register offset by `delta` bytes.
    ///
    /// Fails with [`AddressError::Overflow`] if the result leaves `0..0x1000`.
    pub fn offset_by(self, delta: i32) -> Result<Self, AddressError> {
        let offset = i64::from(self.offset) + i64::from(delta);
        if !(0..i64::from(PCI_CONFIG_SPACE_SIZE)).contains(&offset) {
            return Err(AddressError::Overflow {
                offset: self.offset,
                delta,
            });
        }
        Ok(self.with_offset(offset as u16))
    }

    pub fn checked_add(self, bytes: u16) -> Result<Self, AddressError> {
        self.offset_by(i32::from(bytes))
    }

    pub fn checked_sub(self, bytes: u16) -> Result<Self, AddressError> {
        self.offset_by(-i32::from(bytes))
    }

    /// Byte offset of this register from the start of an ECAM window.
    ///
    /// Every bus takes 1MiB (32 devices * 8 functions * 4KiB).
    pub const fn ecam_offset(&self) -> u64 {
        let function_index =
            ((self.bus as u64) * PCI_DEVICES_PER_BUS as u64 + self.device as u64)
                * PCI_FUNCTIONS_PER_DEVICE as u64
                + self.function as u64;
        self.offset as u64 + function_index * PCI_CONFIG_SPACE_SIZE as u64
    }

    /// True if device and function fit their 5-bit and 3-bit fields.
    pub const fn has_valid_function(&self) -> bool {
        self.device < PCI_DEVICES_PER_BUS && self.function < PCI_FUNCTIONS_PER_DEVICE
    }
}

impl core::fmt::Display for PciAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{}+{:#05x}",
            self.bus, self.device, self.function, self.offset
        )
    }
}

/// A physically contiguous block handed out by the driver.
///
/// `mapped_handle` is the driver's mapping of the block and is only ever passed back to
/// it when the block is freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PhysicalAllocation {
    pub size: u32,
    pub physical_address: u32,
    pub mapped_handle: u64,
}

impl From<PhysicalAllocation> for u64 {
    fn from(value: PhysicalAllocation) -> Self {
        u64::from(value.physical_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecam_offset_matches_bus_device_function_layout() {
        let addr = PciAddress::new(1, 2, 3).with_offset(0x10);
        assert_eq!(addr.ecam_offset(), 0x10 + ((32 + 2) * 8 + 3) * 0x1000);
        assert_eq!(PciAddress::new(0, 0, 0).ecam_offset(), 0);
        assert_eq!(
            PciAddress::new(0xFF, 31, 7).with_offset(0xFFF).ecam_offset(),
            0x0FFF_FFFF
        );
    }

    #[test]
    fn offset_arithmetic_stays_inside_config_space() {
        let addr = PciAddress::new(0, 31, 5);
        assert_eq!(addr.checked_add(0x10).unwrap().offset, 0x10);
        assert_eq!(addr.checked_add(0xFFF).unwrap().offset, 0xFFF);
        assert_eq!(
            addr.checked_add(0x1000),
            Err(AddressError::Overflow {
                offset: 0,
                delta: 0x1000
            })
        );
        assert!(addr.checked_sub(1).is_err());
        assert_eq!(
            addr.with_offset(0x64).checked_sub(4).unwrap(),
            addr.with_offset(0x60)
        );
    }

    #[test]
    fn construction_does_not_validate() {
        let addr = PciAddress::new(0, 40, 9);
        assert!(!addr.has_valid_function());
        assert!(PciAddress::new(0, 31, 7).has_valid_function());
    }

    #[test]
    fn allocation_converts_to_physical_address() {
        let alloc = PhysicalAllocation {
            size: 0x1000,
            physical_address: 0x1234_5000,
            mapped_handle: 0xFFFF_8000_0000_1000,
        };
        assert_eq!(u64::from(alloc), 0x1234_5000);
    }

    #[test]
    fn display_uses_bdf_notation() {
        let addr = PciAddress::new(0, 0x1f, 5).with_offset(0x10);
        assert_eq!(addr.to_string(), "00:1f.5+0x010");
    }
}
