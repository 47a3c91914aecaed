use pmx_protocol::{AddressError, DecodeError};
use thiserror::Error;

pub type HwResult<T> = std::result::Result<T, HwError>;

/// Everything that can go wrong talking to the driver.
///
/// Only [`HwError::InvalidAddress`] and [`HwError::AddressOverflow`] are ever returned to
/// callers: they are raised before any request is sent. The remaining variants describe
/// faults; operations report those as an absent value and keep the fault for
/// [`crate::HwAccess::last_fault`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    AddressOverflow(#[from] AddressError),

    #[error("operation {code:#x}: short response ({len} < {min} bytes)")]
    ProtocolShortResponse { code: u32, len: usize, min: usize },

    #[error("operation {code:#x}: malformed response: {source}")]
    MalformedResponse { code: u32, source: DecodeError },

    #[error("operation {code:#x}: driver unavailable or request failed")]
    TransportUnavailable { code: u32 },
}

impl HwError {
    pub(crate) fn from_decode(code: u32, err: DecodeError) -> Self {
        match err {
            DecodeError::ShortResponse { len, min } => Self::ProtocolShortResponse { code, len, min },
            source => Self::MalformedResponse { code, source },
        }
    }

    /// True for faults that turn into absent values rather than errors.
    pub fn is_fault(&self) -> bool {
        !matches!(self, Self::InvalidAddress(_) | Self::AddressOverflow(_))
    }
}
