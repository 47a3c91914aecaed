use pmx_protocol::{DecodeError, PciAddress};
use thiserror::Error;

/// Why the simulated driver refused a request. The caller only ever sees a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("unknown operation code {0:#x}")]
    UnknownCode(u32),

    #[error("operation {0:#x} denied")]
    Denied(u32),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("payload of {len} bytes, header announced {expected}")]
    ShortPayload { len: usize, expected: usize },

    #[error("response needs {needed} bytes, caller offered {capacity}")]
    ResponseTooLarge { needed: usize, capacity: usize },

    #[error("I/O port {0:#x} out of range")]
    BadPort(u32),

    #[error("control register {0} does not exist")]
    BadControlRegister(u32),

    #[error("MSR {0:#x} not implemented")]
    UnknownMsr(u32),

    #[error("PCI access outside the legacy window: {0}")]
    BadPciAddress(PciAddress),

    #[error("zero-sized allocation")]
    EmptyAllocation,

    #[error("out of physical memory for {0:#x} bytes")]
    OutOfMemory(u32),

    #[error("no allocation with handle {0:#x}")]
    UnknownAllocation(u64),

    #[error("search step must be non-zero")]
    ZeroStep,
}
