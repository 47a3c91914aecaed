//! Golden request vectors for every driver operation.
//!
//! The byte strings were produced by the reference driver client; any change here is a
//! wire break.

use pmx_protocol::opcode;
use pmx_protocol::{
    AccessWidth, CpuidRegs, CrFrame, Frame, IoFrame, MemTransfer, MsrFrame, PciAddress, PciFrame,
    PhysicalAllocation, PmcFrame, SearchRequest, TscFrame, STAGING_BUFFER,
};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn memory_read_dword_vector() {
    let req = MemTransfer::new(0xFED1_F804, 4, AccessWidth::Dword).encode();
    assert_eq!(
        hex(&req),
        "04f8d1fe000000000400000002000000\
         0000000000000000"
    );
    assert_eq!(opcode::MEM_READ, 0x222808);
}

#[test]
fn memory_write_carries_payload_after_header() {
    let req = MemTransfer::new(0xFED1_F808, 4, AccessWidth::Dword)
        .encode_with_payload(&0x40u32.to_le_bytes());
    assert_eq!(
        hex(&req),
        "08f8d1fe000000000400000002000000\
         0000000000000000\
         40000000"
    );
    assert_eq!(opcode::MEM_WRITE, 0x22280C);
}

#[test]
fn io_port_vectors() {
    let read = IoFrame {
        port: 0xCF8,
        value: 0,
    }
    .encode();
    assert_eq!(hex(&read), "f80c000000000000");
    assert_eq!(opcode::io_read(AccessWidth::Dword), 0x222820);

    let write = IoFrame {
        port: 0x80,
        value: 0xAB,
    }
    .encode();
    assert_eq!(hex(&write), "80000000ab000000");
    assert_eq!(opcode::io_write(AccessWidth::Byte), 0x222814);
}

#[test]
fn control_register_vector() {
    let req = CrFrame {
        number: 3,
        value: 0,
    }
    .encode();
    assert_eq!(hex(&req), "03000000000000000000000000000000");
}

#[test]
fn legacy_pci_vector() {
    let req = PciFrame::new(PciAddress::new(0, 0x1F, 5).with_offset(0x10), 0).encode();
    assert_eq!(hex(&req), "001f05001000000000000000");
    assert_eq!(opcode::pci_read(AccessWidth::Dword), 0x222840);
}

#[test]
fn msr_vectors() {
    let read = MsrFrame {
        number: 0x10,
        value: 0,
    }
    .encode();
    assert_eq!(hex(&read), "00000000000000001000000000000000");

    let write = MsrFrame {
        number: 0x1A0,
        value: 0x0000_0040_0085_0089,
    }
    .encode();
    assert_eq!(hex(&write), "8900850000000000a001000040000000");
}

#[test]
fn fixed_zero_requests() {
    assert_eq!(hex(&TscFrame { value: 0 }.encode()), "0000000000000000");
    assert_eq!(
        hex(&PmcFrame {
            counter: 1,
            value: 0
        }
        .encode()),
        "01000000000000000000000000000000"
    );
    assert_eq!(
        hex(&CpuidRegs::leaf(1).encode()),
        "01000000000000000000000000000000"
    );
}

#[test]
fn allocation_vectors() {
    let alloc = PhysicalAllocation {
        size: 0x1000,
        physical_address: 0,
        mapped_handle: 0,
    };
    assert_eq!(hex(&alloc.encode()), "00100000000000000000000000000000");

    let free = PhysicalAllocation {
        size: 0x1000,
        physical_address: 0,
        mapped_handle: 0x0000_0200_0000_0000,
    };
    assert_eq!(hex(&free.encode()), "00100000000000000000000000020000");
}

#[test]
fn rsdp_search_vector() {
    let req = SearchRequest {
        address: 0xE0000,
        size: 0x20000,
        step: 0x10,
        skip: 0,
        pattern: STAGING_BUFFER,
        pattern_len: 8,
        backwards: false,
    }
    .encode();
    assert_eq!(
        hex(&req),
        "00000e00000000000000020010000000\
         00000000000000000000000000000000\
         08000000000000000000000000000000"
    );
}
