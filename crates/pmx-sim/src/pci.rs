use std::collections::BTreeMap;

use pmx_protocol::{
    AccessWidth, PciAddress, PCI_DEVICES_PER_BUS, PCI_FUNCTIONS_PER_DEVICE,
    PCI_LEGACY_CONFIG_SPACE_SIZE,
};

use crate::SimError;

const SPACE_LEN: usize = PCI_LEGACY_CONFIG_SPACE_SIZE as usize;

type Bdf = (u8, u8, u8);

fn bdf(addr: PciAddress) -> Bdf {
    (addr.bus, addr.device, addr.function)
}

/// The legacy (first 256 bytes) configuration space of every present function.
#[derive(Debug, Default, Clone)]
pub struct PciConfigSpaces {
    functions: BTreeMap<Bdf, [u8; SPACE_LEN]>,
}

impl PciConfigSpaces {
    /// Adds a zeroed function with its vendor and device IDs filled in.
    pub fn add_function(&mut self, addr: PciAddress, vendor_id: u16, device_id: u16) {
        let mut space = [0u8; SPACE_LEN];
        space[0..2].copy_from_slice(&vendor_id.to_le_bytes());
        space[2..4].copy_from_slice(&device_id.to_le_bytes());
        self.functions.insert(bdf(addr), space);
    }

    pub fn is_present(&self, addr: PciAddress) -> bool {
        self.functions.contains_key(&bdf(addr))
    }

    fn check(addr: PciAddress, len: usize) -> Result<usize, SimError> {
        let offset = usize::from(addr.offset);
        if addr.device >= PCI_DEVICES_PER_BUS
            || addr.function >= PCI_FUNCTIONS_PER_DEVICE
            || offset + len > SPACE_LEN
        {
            return Err(SimError::BadPciAddress(addr));
        }
        Ok(offset)
    }

    /// Absent functions read all-ones.
    pub fn read(&self, addr: PciAddress, width: AccessWidth) -> Result<u32, SimError> {
        let offset = Self::check(addr, width.bytes())?;
        let Some(space) = self.functions.get(&bdf(addr)) else {
            return Ok(width.truncate(u32::MAX));
        };
        let mut bytes = [0u8; 4];
        bytes[..width.bytes()].copy_from_slice(&space[offset..offset + width.bytes()]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes to absent functions are dropped.
    pub fn write(
        &mut self,
        addr: PciAddress,
        value: u32,
        width: AccessWidth,
    ) -> Result<(), SimError> {
        let offset = Self::check(addr, width.bytes())?;
        if let Some(space) = self.functions.get_mut(&bdf(addr)) {
            space[offset..offset + width.bytes()]
                .copy_from_slice(&value.to_le_bytes()[..width.bytes()]);
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, addr: PciAddress, data: &[u8]) -> Result<(), SimError> {
        let offset = Self::check(addr, data.len())?;
        if let Some(space) = self.functions.get_mut(&bdf(addr)) {
            space[offset..offset + data.len()].copy_from_slice(data);
        }
        Ok(())
    }
}
