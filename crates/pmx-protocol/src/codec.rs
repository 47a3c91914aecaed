//! Fixed-layout request and response frames.
//!
//! Every frame is little-endian and has a fixed length. The driver works in place on the
//! request buffer, so most responses share the request layout and carry the result in a
//! field the request left zero. Decoders only look at the prefix they need and reject
//! buffers shorter than that prefix.
//!
//! Buffers the driver reads or fills on its own (memory transfer data, search patterns)
//! are never aliased: the pointer field holds [`STAGING_BUFFER`] and the bytes travel
//! after the header (outbound) or as the whole response (memory reads). The channel is
//! responsible for staging them and patching the pointer field.

use thiserror::Error;

use crate::{AccessWidth, PciAddress, PhysicalAllocation};

/// Pointer value written into buffer fields; the channel replaces it with its own
/// staging buffer address.
pub const STAGING_BUFFER: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame too short: {len} < {min}")]
    ShortResponse { len: usize, min: usize },

    #[error("invalid access width {0}")]
    InvalidWidth(u32),
}

/// A fixed-size little-endian wire layout.
pub trait Frame: Sized {
    /// Number of bytes the layout occupies.
    const LEN: usize;

    fn encode_into(&self, out: &mut Vec<u8>);

    /// Decodes the frame from the first [`Self::LEN`] bytes of `bytes`.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        self.encode_into(&mut out);
        debug_assert_eq!(out.len(), Self::LEN);
        out
    }

    /// Encodes the frame followed by a staged payload.
    fn encode_with_payload(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN + payload.len());
        self.encode_into(&mut out);
        out.extend_from_slice(payload);
        out
    }

    /// Decodes the frame and returns whatever follows it.
    fn decode_with_payload(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let frame = Self::decode(bytes)?;
        Ok((frame, &bytes[Self::LEN..]))
    }
}

/// Header of a physical memory read or write.
///
/// `width` selects the bus access size the driver uses while copying `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemTransfer {
    pub address: u64,
    pub size: u32,
    pub width: AccessWidth,
    pub buffer: u64,
}

impl MemTransfer {
    pub const fn new(address: u64, size: u32, width: AccessWidth) -> Self {
        Self {
            address,
            size,
            width,
            buffer: STAGING_BUFFER,
        }
    }
}

impl Frame for MemTransfer {
    const LEN: usize = 24;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u64(out, self.address);
        push_u32(out, self.size);
        push_u32(out, self.width.index());
        push_u64(out, self.buffer);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            address: r.u64(0),
            size: r.u32(8),
            width: AccessWidth::try_from(r.u32(12))?,
            buffer: r.u64(16),
        })
    }
}

/// I/O port access; the driver returns the value read at offset 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoFrame {
    pub port: u32,
    pub value: u32,
}

impl Frame for IoFrame {
    const LEN: usize = 8;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u32(out, self.port);
        push_u32(out, self.value);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            port: r.u32(0),
            value: r.u32(4),
        })
    }
}

/// Control register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrFrame {
    pub number: u32,
    pub value: u64,
}

impl Frame for CrFrame {
    const LEN: usize = 16;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u32(out, self.number);
        push_u32(out, 0);
        push_u64(out, self.value);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            number: r.u32(0),
            value: r.u64(8),
        })
    }
}

/// Legacy (bus/device/function/offset) configuration access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciFrame {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub offset: u16,
    pub value: u32,
}

impl PciFrame {
    pub const fn new(addr: PciAddress, value: u32) -> Self {
        Self {
            bus: addr.bus,
            device: addr.device,
            function: addr.function,
            offset: addr.offset,
            value,
        }
    }

    pub const fn address(&self) -> PciAddress {
        PciAddress::new(self.bus, self.device, self.function).with_offset(self.offset)
    }
}

impl Frame for PciFrame {
    const LEN: usize = 12;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.bus);
        out.push(self.device);
        out.push(self.function);
        out.push(0);
        push_u16(out, self.offset);
        push_u16(out, 0);
        push_u32(out, self.value);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            bus: r.u8(0),
            device: r.u8(1),
            function: r.u8(2),
            offset: r.u16(4),
            value: r.u32(8),
        })
    }
}

/// Model-specific register access.
///
/// Layout is `lo, pad, number, hi`; reads send `value = 0` and get the register back in
/// the same frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsrFrame {
    pub number: u32,
    pub value: u64,
}

impl Frame for MsrFrame {
    const LEN: usize = 16;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u32(out, self.value as u32);
        push_u32(out, 0);
        push_u32(out, self.number);
        push_u32(out, (self.value >> 32) as u32);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        let lo = u64::from(r.u32(0));
        let hi = u64::from(r.u32(12));
        Ok(Self {
            number: r.u32(8),
            value: lo | (hi << 32),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TscFrame {
    pub value: u64,
}

impl Frame for TscFrame {
    const LEN: usize = 8;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u64(out, self.value);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self { value: r.u64(0) })
    }
}

/// Performance-monitoring counter read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmcFrame {
    pub counter: u32,
    pub value: u64,
}

impl Frame for PmcFrame {
    const LEN: usize = 16;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u32(out, self.counter);
        push_u32(out, 0);
        push_u64(out, self.value);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            counter: r.u32(0),
            value: r.u64(8),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CpuidRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl CpuidRegs {
    /// Request frame for `leaf` (the other registers go out as zero).
    pub const fn leaf(eax: u32) -> Self {
        Self {
            eax,
            ebx: 0,
            ecx: 0,
            edx: 0,
        }
    }
}

impl Frame for CpuidRegs {
    const LEN: usize = 16;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u32(out, self.eax);
        push_u32(out, self.ebx);
        push_u32(out, self.ecx);
        push_u32(out, self.edx);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            eax: r.u32(0),
            ebx: r.u32(4),
            ecx: r.u32(8),
            edx: r.u32(12),
        })
    }
}

/// Allocate requests send only `size`; free requests send `size` and `mapped_handle`
/// with the physical address slot zeroed.
impl Frame for PhysicalAllocation {
    const LEN: usize = 16;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u32(out, self.size);
        push_u32(out, self.physical_address);
        push_u64(out, self.mapped_handle);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            size: r.u32(0),
            physical_address: r.u32(4),
            mapped_handle: r.u64(8),
        })
    }
}

/// Header of a physical memory pattern search. The pattern follows the header.
///
/// The header ends in an 8-byte slot at 0x28 the driver overwrites with the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRequest {
    pub address: u64,
    pub size: u32,
    pub step: u32,
    pub skip: u32,
    pub pattern: u64,
    pub pattern_len: u32,
    pub backwards: bool,
}

impl Frame for SearchRequest {
    const LEN: usize = 48;

    fn encode_into(&self, out: &mut Vec<u8>) {
        push_u64(out, self.address);
        push_u32(out, self.size);
        push_u32(out, self.step);
        push_u32(out, self.skip);
        push_u32(out, 0);
        push_u64(out, self.pattern);
        push_u32(out, self.pattern_len);
        push_u32(out, u32::from(self.backwards));
        push_u64(out, 0);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            address: r.u64(0),
            size: r.u32(8),
            step: r.u32(12),
            skip: r.u32(16),
            pattern: r.u64(24),
            pattern_len: r.u32(32),
            backwards: r.u32(36) != 0,
        })
    }
}

/// Result of a pattern search: the matching physical address, or 0 if nothing matched.
///
/// The driver echoes the request header with the result stored at offset 0x28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResponse {
    pub matched: u64,
}

impl SearchResponse {
    pub const MATCH_OFFSET: usize = 0x28;

    pub fn encode_after(&self, request: &SearchRequest) -> Vec<u8> {
        let mut out = request.encode();
        out[Self::MATCH_OFFSET..Self::LEN].copy_from_slice(&self.matched.to_le_bytes());
        out
    }
}

impl Frame for SearchResponse {
    const LEN: usize = Self::MATCH_OFFSET + 8;

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.resize(out.len() + Self::MATCH_OFFSET, 0);
        push_u64(out, self.matched);
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = Reader::new(bytes, Self::LEN)?;
        Ok(Self {
            matched: r.u64(Self::MATCH_OFFSET),
        })
    }
}

/// Checks that a raw (memory read) payload has at least `min` bytes.
pub fn ensure_len(bytes: &[u8], min: usize) -> Result<(), DecodeError> {
    if bytes.len() < min {
        return Err(DecodeError::ShortResponse {
            len: bytes.len(),
            min,
        });
    }
    Ok(())
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Fixed-offset reader over a buffer whose length was checked up front.
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], min: usize) -> Result<Self, DecodeError> {
        ensure_len(bytes, min)?;
        Ok(Self { bytes })
    }

    fn u8(&self, off: usize) -> u8 {
        self.bytes[off]
    }

    fn u16(&self, off: usize) -> u16 {
        let b = self.bytes;
        u16::from_le_bytes([b[off], b[off + 1]])
    }

    fn u32(&self, off: usize) -> u32 {
        let b = self.bytes;
        u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
    }

    fn u64(&self, off: usize) -> u64 {
        let b = self.bytes;
        u64::from_le_bytes([
            b[off],
            b[off + 1],
            b[off + 2],
            b[off + 3],
            b[off + 4],
            b[off + 5],
            b[off + 6],
            b[off + 7],
        ])
    }
}
