//! Write side: byte-exact RSDP, RSDT and MCFG images with valid checksums.
//!
//! Used to seed simulated physical memory with firmware that discovery can walk.

use crate::tables::{
    checksum, McfgAllocation, MCFG_SIGNATURE, RSDP_SIGNATURE, RSDT_SIGNATURE, SDT_HEADER_LEN,
};

/// Physical memory writing abstraction used to place tables.
pub trait PhysicalMemory {
    fn write(&mut self, paddr: u64, bytes: &[u8]);
}

/// Identification fields stamped into every generated header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OemInfo {
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: [u8; 4],
    pub creator_revision: u32,
}

impl Default for OemInfo {
    fn default() -> Self {
        Self {
            oem_id: *b"PMXSIM",
            oem_table_id: *b"PMXTABLE",
            oem_revision: 1,
            creator_id: *b"PMX ",
            creator_revision: 1,
        }
    }
}

impl OemInfo {
    /// A system description table: header followed by `body`, checksummed.
    pub fn build_table(&self, signature: [u8; 4], revision: u8, body: &[u8]) -> Vec<u8> {
        let total_len = SDT_HEADER_LEN as usize + body.len();
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&signature);
        out.extend_from_slice(&(total_len as u32).to_le_bytes());
        out.push(revision);
        out.push(0); // checksum
        out.extend_from_slice(&self.oem_id);
        out.extend_from_slice(&self.oem_table_id);
        out.extend_from_slice(&self.oem_revision.to_le_bytes());
        out.extend_from_slice(&self.creator_id);
        out.extend_from_slice(&self.creator_revision.to_le_bytes());
        out.extend_from_slice(body);
        out[9] = 0u8.wrapping_sub(checksum(&out));
        out
    }

    /// ACPI 1.0 RSDP (20 bytes).
    pub fn build_rsdp(&self, rsdt_addr: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.extend_from_slice(&RSDP_SIGNATURE);
        out.push(0); // checksum
        out.extend_from_slice(&self.oem_id);
        out.push(0); // revision
        out.extend_from_slice(&rsdt_addr.to_le_bytes());
        out[8] = 0u8.wrapping_sub(checksum(&out));
        out
    }

    pub fn build_rsdt(&self, entries: &[u32]) -> Vec<u8> {
        let body: Vec<u8> = entries.iter().flat_map(|e| e.to_le_bytes()).collect();
        self.build_table(RSDT_SIGNATURE, 1, &body)
    }

    /// MCFG: header, 8 reserved bytes, then one 16-byte entry per allocation.
    pub fn build_mcfg(&self, allocations: &[McfgAllocation]) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        for alloc in allocations {
            alloc.encode_into(&mut body);
        }
        self.build_table(MCFG_SIGNATURE, 1, &body)
    }
}

/// A set of tables and the physical addresses they go to.
///
/// The RSDT is generated from the other tables' addresses in insertion order.
#[derive(Clone, Debug)]
pub struct AcpiImage {
    pub oem: OemInfo,
    pub rsdp_addr: u64,
    pub rsdt_addr: u32,
    tables: Vec<(u32, Vec<u8>)>,
}

impl AcpiImage {
    pub fn new(rsdp_addr: u64, rsdt_addr: u32) -> Self {
        Self {
            oem: OemInfo::default(),
            rsdp_addr,
            rsdt_addr,
            tables: Vec::new(),
        }
    }

    /// Adds an already built table at `addr`.
    pub fn with_table(mut self, addr: u32, table: Vec<u8>) -> Self {
        self.tables.push((addr, table));
        self
    }

    pub fn with_mcfg(self, addr: u32, allocations: &[McfgAllocation]) -> Self {
        let table = self.oem.build_mcfg(allocations);
        self.with_table(addr, table)
    }

    pub fn table_addresses(&self) -> Vec<u32> {
        self.tables.iter().map(|(addr, _)| *addr).collect()
    }

    pub fn write_to(&self, mem: &mut impl PhysicalMemory) {
        for (addr, table) in &self.tables {
            mem.write(u64::from(*addr), table);
        }
        let rsdt = self.oem.build_rsdt(&self.table_addresses());
        mem.write(u64::from(self.rsdt_addr), &rsdt);
        mem.write(self.rsdp_addr, &self.oem.build_rsdp(self.rsdt_addr));
    }
}
