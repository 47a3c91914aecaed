//! Operation codes understood by the driver.
//!
//! These are the driver's control codes and must match it bit for bit.

use crate::AccessWidth;

pub const MEM_READ: u32 = 0x0022_2808;
pub const MEM_WRITE: u32 = 0x0022_280C;

/// Byte-wide port read; word and dword reads follow at +8 and +16.
pub const IO_READ_BASE: u32 = 0x0022_2810;
pub const IO_WRITE_BASE: u32 = 0x0022_2814;

pub const PCI_READ_BASE: u32 = 0x0022_2830;
pub const PCI_WRITE_BASE: u32 = 0x0022_2834;

pub const MSR_READ: u32 = 0x0022_2848;
pub const MSR_WRITE: u32 = 0x0022_284C;
pub const CPUID_READ: u32 = 0x0022_2850;
pub const TSC_READ: u32 = 0x0022_2864;
pub const PMC_READ: u32 = 0x0022_2868;
pub const CR_READ: u32 = 0x0022_286C;
pub const CR_WRITE: u32 = 0x0022_2870;

pub const PHYS_ALLOC: u32 = 0x0022_2880;
pub const PHYS_FREE: u32 = 0x0022_2884;
pub const PHYS_SEARCH: u32 = 0x0022_2894;

pub const fn io_read(width: AccessWidth) -> u32 {
    IO_READ_BASE + width.code_offset()
}

pub const fn io_write(width: AccessWidth) -> u32 {
    IO_WRITE_BASE + width.code_offset()
}

pub const fn pci_read(width: AccessWidth) -> u32 {
    PCI_READ_BASE + width.code_offset()
}

pub const fn pci_write(width: AccessWidth) -> u32 {
    PCI_WRITE_BASE + width.code_offset()
}

/// Every operation the driver exposes, decoded from its code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    MemRead,
    MemWrite,
    IoRead(AccessWidth),
    IoWrite(AccessWidth),
    PciRead(AccessWidth),
    PciWrite(AccessWidth),
    MsrRead,
    MsrWrite,
    CpuidRead,
    TscRead,
    PmcRead,
    CrRead,
    CrWrite,
    PhysAlloc,
    PhysFree,
    PhysSearch,
}

impl Operation {
    pub const fn code(self) -> u32 {
        match self {
            Self::MemRead => MEM_READ,
            Self::MemWrite => MEM_WRITE,
            Self::IoRead(width) => io_read(width),
            Self::IoWrite(width) => io_write(width),
            Self::PciRead(width) => pci_read(width),
            Self::PciWrite(width) => pci_write(width),
            Self::MsrRead => MSR_READ,
            Self::MsrWrite => MSR_WRITE,
            Self::CpuidRead => CPUID_READ,
            Self::TscRead => TSC_READ,
            Self::PmcRead => PMC_READ,
            Self::CrRead => CR_READ,
            Self::CrWrite => CR_WRITE,
            Self::PhysAlloc => PHYS_ALLOC,
            Self::PhysFree => PHYS_FREE,
            Self::PhysSearch => PHYS_SEARCH,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        for width in AccessWidth::ALL {
            if code == io_read(width) {
                return Some(Self::IoRead(width));
            }
            if code == io_write(width) {
                return Some(Self::IoWrite(width));
            }
            if code == pci_read(width) {
                return Some(Self::PciRead(width));
            }
            if code == pci_write(width) {
                return Some(Self::PciWrite(width));
            }
        }
        Some(match code {
            MEM_READ => Self::MemRead,
            MEM_WRITE => Self::MemWrite,
            MSR_READ => Self::MsrRead,
            MSR_WRITE => Self::MsrWrite,
            CPUID_READ => Self::CpuidRead,
            TSC_READ => Self::TscRead,
            PMC_READ => Self::PmcRead,
            CR_READ => Self::CrRead,
            CR_WRITE => Self::CrWrite,
            PHYS_ALLOC => Self::PhysAlloc,
            PHYS_FREE => Self::PhysFree,
            PHYS_SEARCH => Self::PhysSearch,
            _ => return None,
        })
    }
}
