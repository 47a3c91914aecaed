//! Read side of the firmware tables: only the fields ECAM discovery consumes.

use thiserror::Error;

pub const RSDP_SIGNATURE: [u8; 8] = *b"RSD PTR ";
pub const RSDT_SIGNATURE: [u8; 4] = *b"RSDT";
pub const MCFG_SIGNATURE: [u8; 4] = *b"MCFG";

/// The RSDP lives on a 16-byte boundary somewhere in the BIOS area below 1MiB.
pub const RSDP_SCAN_START: u64 = 0x000E_0000;
pub const RSDP_SCAN_END: u64 = 0x0010_0000;
pub const RSDP_SCAN_STRIDE: u32 = 0x10;

/// Offset of the 32-bit RSDT address inside the RSDP.
pub const RSDP_RSDT_ADDRESS_OFFSET: u64 = 0x10;

/// Length of the common system description table header.
pub const SDT_HEADER_LEN: u32 = 0x24;

/// How much of each RSDT entry is fetched to recognise an MCFG and its first allocation.
pub const MCFG_TABLE_PROBE_LEN: usize = 0x40;

/// Offset of the first configuration space allocation in an MCFG.
pub const MCFG_ALLOCATION_OFFSET: usize = 0x2C;

const MCFG_ALLOCATION_END: usize = MCFG_ALLOCATION_OFFSET + 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcpiError {
    #[error("{what} truncated: {len} < {min} bytes")]
    Truncated {
        what: &'static str,
        len: usize,
        min: usize,
    },

    #[error("expected {expected:?} table, found {found:?}")]
    BadSignature {
        expected: &'static str,
        found: String,
    },

    #[error("table length {len:#x} outside {min:#x}..={max:#x}")]
    BadLength { len: u32, min: u32, max: u32 },
}

/// Sums `data` the way ACPI checksums do: a valid table sums to zero.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// The signature and length prefix shared by every system description table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: u32,
}

impl SdtHeader {
    /// Bytes needed to decode the prefix.
    pub const PREFIX_LEN: usize = 8;

    pub fn parse(bytes: &[u8]) -> Result<Self, AcpiError> {
        if bytes.len() < Self::PREFIX_LEN {
            return Err(AcpiError::Truncated {
                what: "table header",
                len: bytes.len(),
                min: Self::PREFIX_LEN,
            });
        }
        Ok(Self {
            signature: [bytes[0], bytes[1], bytes[2], bytes[3]],
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    pub fn has_signature(&self, signature: [u8; 4]) -> bool {
        self.signature == signature
    }

    fn expect_signature(&self, signature: [u8; 4], expected: &'static str) -> Result<(), AcpiError> {
        if self.has_signature(signature) {
            return Ok(());
        }
        Err(AcpiError::BadSignature {
            expected,
            found: String::from_utf8_lossy(&self.signature).into_owned(),
        })
    }
}

/// Number of 32-bit table pointers following an RSDT header.
///
/// `max_len` bounds the length field so a corrupt header cannot ask for an arbitrarily
/// large read.
pub fn rsdt_entry_count(header: &SdtHeader, max_len: u32) -> Result<usize, AcpiError> {
    header.expect_signature(RSDT_SIGNATURE, "RSDT")?;
    if header.length < SDT_HEADER_LEN || header.length > max_len {
        return Err(AcpiError::BadLength {
            len: header.length,
            min: SDT_HEADER_LEN,
            max: max_len,
        });
    }
    Ok(((header.length - SDT_HEADER_LEN) / 4) as usize)
}

/// Splits the RSDT entry area into table addresses. A trailing partial entry is ignored.
pub fn rsdt_entries(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// One PCI segment's ECAM window as described by an MCFG allocation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McfgAllocation {
    pub base_address: u64,
    pub segment: u16,
    pub start_bus: u8,
    pub end_bus: u8,
}

impl McfgAllocation {
    /// Decodes the first allocation of an MCFG table from its leading bytes.
    pub fn parse(table: &[u8]) -> Result<Self, AcpiError> {
        SdtHeader::parse(table)?.expect_signature(MCFG_SIGNATURE, "MCFG")?;
        if table.len() < MCFG_ALLOCATION_END {
            return Err(AcpiError::Truncated {
                what: "MCFG allocation",
                len: table.len(),
                min: MCFG_ALLOCATION_END,
            });
        }
        let a = &table[MCFG_ALLOCATION_OFFSET..MCFG_ALLOCATION_END];
        Ok(Self {
            base_address: u64::from_le_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]),
            segment: u16::from_le_bytes([a[8], a[9]]),
            start_bus: a[10],
            end_bus: a[11],
        })
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.base_address.to_le_bytes());
        out.extend_from_slice(&self.segment.to_le_bytes());
        out.push(self.start_bus);
        out.push(self.end_bus);
        out.extend_from_slice(&[0u8; 4]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mcfg_prefix(base: u64, end_bus: u8) -> Vec<u8> {
        let mut t = vec![0u8; MCFG_TABLE_PROBE_LEN];
        t[0..4].copy_from_slice(b"MCFG");
        t[4..8].copy_from_slice(&60u32.to_le_bytes());
        t[0x2C..0x34].copy_from_slice(&base.to_le_bytes());
        t[0x34..0x36].copy_from_slice(&0u16.to_le_bytes());
        t[0x36] = 0;
        t[0x37] = end_bus;
        t
    }

    #[test]
    fn header_prefix_decodes_signature_and_length() {
        let header = SdtHeader::parse(b"RSDT\x2c\x00\x00\x00trailing").unwrap();
        assert!(header.has_signature(RSDT_SIGNATURE));
        assert_eq!(header.length, 0x2C);
        assert_eq!(
            SdtHeader::parse(b"RSDT"),
            Err(AcpiError::Truncated {
                what: "table header",
                len: 4,
                min: 8
            })
        );
    }

    #[test]
    fn entry_count_follows_length_field() {
        let header = SdtHeader {
            signature: RSDT_SIGNATURE,
            length: 0x24 + 3 * 4,
        };
        assert_eq!(rsdt_entry_count(&header, 0x1000), Ok(3));

        let empty = SdtHeader {
            signature: RSDT_SIGNATURE,
            length: 0x24,
        };
        assert_eq!(rsdt_entry_count(&empty, 0x1000), Ok(0));
    }

    #[test]
    fn entry_count_rejects_bad_headers() {
        let short = SdtHeader {
            signature: RSDT_SIGNATURE,
            length: 0x20,
        };
        assert!(matches!(
            rsdt_entry_count(&short, 0x1000),
            Err(AcpiError::BadLength { len: 0x20, .. })
        ));

        let huge = SdtHeader {
            signature: RSDT_SIGNATURE,
            length: 0xFFFF_FFFF,
        };
        assert!(matches!(
            rsdt_entry_count(&huge, 0x1000),
            Err(AcpiError::BadLength { .. })
        ));

        let xsdt = SdtHeader {
            signature: *b"XSDT",
            length: 0x2C,
        };
        assert_eq!(
            rsdt_entry_count(&xsdt, 0x1000),
            Err(AcpiError::BadSignature {
                expected: "RSDT",
                found: "XSDT".into()
            })
        );
    }

    #[test]
    fn entries_ignore_trailing_partial_pointer() {
        let bytes = [0x00, 0x10, 0x0F, 0x00, 0x40, 0x10, 0x0F, 0x00, 0xAA];
        assert_eq!(rsdt_entries(&bytes), vec![0x000F_1000, 0x000F_1040]);
    }

    #[test]
    fn mcfg_allocation_is_read_from_fixed_offset() {
        let alloc = McfgAllocation::parse(&mcfg_prefix(0x8000_0000, 0xFF)).unwrap();
        assert_eq!(
            alloc,
            McfgAllocation {
                base_address: 0x8000_0000,
                segment: 0,
                start_bus: 0,
                end_bus: 0xFF,
            }
        );
    }

    #[test]
    fn mcfg_parse_checks_signature_and_length() {
        let mut apic = mcfg_prefix(0x8000_0000, 0xFF);
        apic[0..4].copy_from_slice(b"APIC");
        assert!(matches!(
            McfgAllocation::parse(&apic),
            Err(AcpiError::BadSignature { .. })
        ));

        let short = &mcfg_prefix(0x8000_0000, 0xFF)[..0x30];
        assert_eq!(
            McfgAllocation::parse(short),
            Err(AcpiError::Truncated {
                what: "MCFG allocation",
                len: 0x30,
                min: 0x38
            })
        );
    }

    #[test]
    fn checksum_of_valid_table_is_zero() {
        let mut t = vec![1u8, 2, 3, 0];
        t[3] = 0u8.wrapping_sub(checksum(&t));
        assert_eq!(checksum(&t), 0);
    }
}
