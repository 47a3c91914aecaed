use crate::DecodeError;

/// Width of a single hardware access.
///
/// The discriminant doubles as an index: port and legacy PCI operation codes are
/// `base + 8 * index`, and memory transfers carry it as an explicit field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum AccessWidth {
    Byte = 0,
    Word = 1,
    Dword = 2,
}

impl AccessWidth {
    pub const ALL: [AccessWidth; 3] = [Self::Byte, Self::Word, Self::Dword];

    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Payload size in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Dword => 4,
        }
    }

    /// Amount added to a base operation code for this width.
    pub const fn code_offset(self) -> u32 {
        self.index() * 8
    }

    /// Keeps the bits of `value` that fit this width.
    pub const fn truncate(self, value: u32) -> u32 {
        match self {
            Self::Byte => value & 0xFF,
            Self::Word => value & 0xFFFF,
            Self::Dword => value,
        }
    }
}

impl TryFrom<u32> for AccessWidth {
    type Error = DecodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Byte,
            1 => Self::Word,
            2 => Self::Dword,
            _ => return Err(DecodeError::InvalidWidth(value)),
        })
    }
}
