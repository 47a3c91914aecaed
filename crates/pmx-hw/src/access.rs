use std::sync::Mutex;

use pmx_protocol::codec::ensure_len;
use pmx_protocol::opcode;
use pmx_protocol::{
    AccessWidth, CpuidRegs, CrFrame, Frame, IoFrame, MemTransfer, MsrFrame, PciAddress,
    PciFrame, PhysicalAllocation, PmcFrame, SearchRequest, SearchResponse, TscFrame,
    PCI_CONFIG_SPACE_SIZE, STAGING_BUFFER,
};
use tracing::{debug, trace};

use crate::discovery::{discover, DiscoverySource};
use crate::pci::{check_function, check_legacy, PciAccessPath, PciMmConfig, PciPathState};
use crate::{ControlChannel, HwConfig, HwError, HwResult, PatternSearch, PciDiscovery};

const MAX_IO_PORT: u32 = 0xFFFF;

/// Typed hardware operations over a [`ControlChannel`].
///
/// Reads return `Ok(None)` and writes `Ok(false)` when the driver call fails or its
/// response is too short; the reason is available from [`HwAccess::last_fault`].
/// `Err` is reserved for arguments rejected before anything is sent.
///
/// PCI configuration accesses go through ECAM when a window has been discovered and
/// through the driver's legacy path otherwise. The discovery result belongs to this
/// instance.
#[derive(Debug)]
pub struct HwAccess<C> {
    channel: C,
    config: HwConfig,
    pci_path: PciAccessPath,
    last_fault: Mutex<Option<HwError>>,
}

impl<C: ControlChannel> HwAccess<C> {
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, HwConfig::default())
    }

    pub fn with_config(channel: C, config: HwConfig) -> Self {
        Self {
            channel,
            config,
            pci_path: PciAccessPath::default(),
            last_fault: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn config(&self) -> &HwConfig {
        &self.config
    }

    /// The most recent fault that turned a result into an absent value.
    pub fn last_fault(&self) -> Option<HwError> {
        self.last_fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_fault(&self, fault: HwError) {
        debug_assert!(fault.is_fault(), "caller error recorded as fault: {fault}");
        debug!(%fault, "hardware access failed");
        *self
            .last_fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(fault);
    }

    fn call(&self, code: u32, request: &[u8], exact_response_len: usize) -> Option<Vec<u8>> {
        let response_len = self.config.response_capacity.response_len(exact_response_len);
        trace!(code, request_len = request.len(), response_len, "submit");
        let response = self.channel.submit(code, request, response_len);
        if response.is_none() {
            self.record_fault(HwError::TransportUnavailable { code });
        }
        response
    }

    fn decode<F: Frame>(&self, code: u32, response: &[u8]) -> Option<F> {
        match F::decode(response) {
            Ok(frame) => Some(frame),
            Err(err) => {
                self.record_fault(HwError::from_decode(code, err));
                None
            }
        }
    }

    /// One round trip whose response is decoded as `R`.
    fn exchange<Q: Frame, R: Frame>(&self, code: u32, request: &Q) -> Option<R> {
        let response = self.call(code, &request.encode(), R::LEN.max(Q::LEN))?;
        self.decode(code, &response)
    }

    /// One round trip whose only output is success.
    fn command(&self, code: u32, request: &[u8], exact_response_len: usize) -> bool {
        self.call(code, request, exact_response_len).is_some()
    }

    // Physical memory.

    /// Fills `buf` from physical memory at `address` using `width`-sized bus accesses.
    pub fn mem_read(&self, address: u64, buf: &mut [u8], width: AccessWidth) -> HwResult<bool> {
        let size = transfer_size(address, buf.len())?;
        let request = MemTransfer::new(address, size, width).encode();
        let Some(response) = self.call(opcode::MEM_READ, &request, buf.len()) else {
            return Ok(false);
        };
        if let Err(err) = ensure_len(&response, buf.len()) {
            self.record_fault(HwError::from_decode(opcode::MEM_READ, err));
            return Ok(false);
        }
        buf.copy_from_slice(&response[..buf.len()]);
        Ok(true)
    }

    fn mem_read_array<const N: usize>(
        &self,
        address: u64,
        width: AccessWidth,
    ) -> HwResult<Option<[u8; N]>> {
        let mut buf = [0u8; N];
        Ok(self.mem_read(address, &mut buf, width)?.then_some(buf))
    }

    pub fn mem_read8(&self, address: u64) -> HwResult<Option<u8>> {
        Ok(self
            .mem_read_array(address, AccessWidth::Byte)?
            .map(u8::from_le_bytes))
    }

    pub fn mem_read16(&self, address: u64) -> HwResult<Option<u16>> {
        Ok(self
            .mem_read_array(address, AccessWidth::Word)?
            .map(u16::from_le_bytes))
    }

    pub fn mem_read32(&self, address: u64) -> HwResult<Option<u32>> {
        Ok(self
            .mem_read_array(address, AccessWidth::Dword)?
            .map(u32::from_le_bytes))
    }

    /// Eight bytes transferred as dwords.
    pub fn mem_read64(&self, address: u64) -> HwResult<Option<u64>> {
        Ok(self
            .mem_read_array(address, AccessWidth::Dword)?
            .map(u64::from_le_bytes))
    }

    pub fn mem_write(&self, address: u64, data: &[u8], width: AccessWidth) -> HwResult<bool> {
        let size = transfer_size(address, data.len())?;
        let request = MemTransfer::new(address, size, width).encode_with_payload(data);
        Ok(self.command(opcode::MEM_WRITE, &request, MemTransfer::LEN))
    }

    pub fn mem_write8(&self, address: u64, value: u8) -> HwResult<bool> {
        self.mem_write(address, &value.to_le_bytes(), AccessWidth::Byte)
    }

    pub fn mem_write16(&self, address: u64, value: u16) -> HwResult<bool> {
        self.mem_write(address, &value.to_le_bytes(), AccessWidth::Word)
    }

    pub fn mem_write32(&self, address: u64, value: u32) -> HwResult<bool> {
        self.mem_write(address, &value.to_le_bytes(), AccessWidth::Dword)
    }

    // I/O ports.

    pub fn io_read(&self, port: u32, width: AccessWidth) -> HwResult<Option<u32>> {
        check_port(port)?;
        let request = IoFrame { port, value: 0 };
        Ok(self
            .exchange::<_, IoFrame>(opcode::io_read(width), &request)
            .map(|frame| width.truncate(frame.value)))
    }

    pub fn io_read8(&self, port: u32) -> HwResult<Option<u8>> {
        Ok(self.io_read(port, AccessWidth::Byte)?.map(|v| v as u8))
    }

    pub fn io_read16(&self, port: u32) -> HwResult<Option<u16>> {
        Ok(self.io_read(port, AccessWidth::Word)?.map(|v| v as u16))
    }

    pub fn io_read32(&self, port: u32) -> HwResult<Option<u32>> {
        self.io_read(port, AccessWidth::Dword)
    }

    /// Writes the low `width` bytes of `value` to `port`.
    pub fn io_write(&self, port: u32, value: u32, width: AccessWidth) -> HwResult<bool> {
        check_port(port)?;
        let request = IoFrame {
            port,
            value: width.truncate(value),
        };
        Ok(self.command(opcode::io_write(width), &request.encode(), IoFrame::LEN))
    }

    pub fn io_write8(&self, port: u32, value: u8) -> HwResult<bool> {
        self.io_write(port, u32::from(value), AccessWidth::Byte)
    }

    pub fn io_write16(&self, port: u32, value: u16) -> HwResult<bool> {
        self.io_write(port, u32::from(value), AccessWidth::Word)
    }

    pub fn io_write32(&self, port: u32, value: u32) -> HwResult<bool> {
        self.io_write(port, value, AccessWidth::Dword)
    }

    // Processor registers.

    pub fn cr_read(&self, number: u32) -> HwResult<Option<u64>> {
        let request = CrFrame { number, value: 0 };
        Ok(self
            .exchange::<_, CrFrame>(opcode::CR_READ, &request)
            .map(|frame| frame.value))
    }

    pub fn cr_write(&self, number: u32, value: u64) -> HwResult<bool> {
        let request = CrFrame { number, value };
        Ok(self.command(opcode::CR_WRITE, &request.encode(), CrFrame::LEN))
    }

    pub fn msr_read(&self, number: u32) -> HwResult<Option<u64>> {
        let request = MsrFrame { number, value: 0 };
        Ok(self
            .exchange::<_, MsrFrame>(opcode::MSR_READ, &request)
            .map(|frame| frame.value))
    }

    pub fn msr_write(&self, number: u32, value: u64) -> HwResult<bool> {
        let request = MsrFrame { number, value };
        Ok(self.command(opcode::MSR_WRITE, &request.encode(), MsrFrame::LEN))
    }

    pub fn tsc_read(&self) -> HwResult<Option<u64>> {
        Ok(self
            .exchange::<_, TscFrame>(opcode::TSC_READ, &TscFrame { value: 0 })
            .map(|frame| frame.value))
    }

    pub fn pmc_read(&self, counter: u32) -> HwResult<Option<u64>> {
        let request = PmcFrame { counter, value: 0 };
        Ok(self
            .exchange::<_, PmcFrame>(opcode::PMC_READ, &request)
            .map(|frame| frame.value))
    }

    pub fn cpuid(&self, leaf: u32) -> HwResult<Option<CpuidRegs>> {
        Ok(self.exchange(opcode::CPUID_READ, &CpuidRegs::leaf(leaf)))
    }

    // Physical allocations.

    /// Asks the driver for `size` bytes of physically contiguous memory.
    pub fn phys_alloc(&self, size: u32) -> HwResult<Option<PhysicalAllocation>> {
        let request = PhysicalAllocation {
            size,
            physical_address: 0,
            mapped_handle: 0,
        };
        Ok(self.exchange(opcode::PHYS_ALLOC, &request))
    }

    pub fn phys_free(&self, allocation: &PhysicalAllocation) -> HwResult<bool> {
        let request = PhysicalAllocation {
            physical_address: 0,
            ..*allocation
        };
        Ok(self.command(
            opcode::PHYS_FREE,
            &request.encode(),
            PhysicalAllocation::LEN,
        ))
    }

    /// Address of the matching pattern, or `None` if nothing matched or the call failed.
    pub fn phys_search(&self, search: &PatternSearch<'_>) -> HwResult<Option<u64>> {
        if search.pattern.is_empty() {
            return Err(HwError::InvalidAddress("empty search pattern".into()));
        }
        let pattern_len = u32::try_from(search.pattern.len()).map_err(|_| {
            HwError::InvalidAddress(format!(
                "search pattern of {} bytes",
                search.pattern.len()
            ))
        })?;
        check_range(search.address, search.size)?;
        let request = SearchRequest {
            address: search.address,
            size: search.size,
            step: search.step,
            skip: search.skip,
            pattern: STAGING_BUFFER,
            pattern_len,
            backwards: search.backwards,
        };
        let code = opcode::PHYS_SEARCH;
        let Some(response) = self.call(
            code,
            &request.encode_with_payload(search.pattern),
            SearchResponse::LEN,
        ) else {
            return Ok(None);
        };
        Ok(self
            .decode::<SearchResponse>(code, &response)
            .map(|r| r.matched)
            .filter(|&addr| addr != 0))
    }

    // PCI configuration space.

    /// Runs ECAM discovery unless it already ran, and returns the window (base 0 when PCI
    /// stays on the legacy path).
    pub fn detect_pci_mm(&self) -> PciMmConfig {
        self.pci_path
            .resolve(|| discover(self, &self.config))
            .mm_config()
    }

    pub fn pci_path_state(&self) -> PciPathState {
        self.pci_path.state()
    }

    fn pci_route(&self) -> PciPathState {
        match self.config.pci_discovery {
            PciDiscovery::Lazy => self.pci_path.resolve(|| discover(self, &self.config)),
            PciDiscovery::Manual => self.pci_path.state(),
        }
    }

    pub fn pci_read(&self, addr: PciAddress, width: AccessWidth) -> HwResult<Option<u32>> {
        check_function(addr, PCI_CONFIG_SPACE_SIZE)?;
        let route = self.pci_route();
        if let PciPathState::Ecam { .. } = route {
            let phys = route.mm_config().config_address(addr)?;
            return Ok(match width {
                AccessWidth::Byte => self.mem_read8(phys)?.map(u32::from),
                AccessWidth::Word => self.mem_read16(phys)?.map(u32::from),
                AccessWidth::Dword => self.mem_read32(phys)?,
            });
        }
        self.pci_legacy_read(addr, width)
    }

    pub fn pci_read8(&self, addr: PciAddress) -> HwResult<Option<u8>> {
        Ok(self.pci_read(addr, AccessWidth::Byte)?.map(|v| v as u8))
    }

    pub fn pci_read16(&self, addr: PciAddress) -> HwResult<Option<u16>> {
        Ok(self.pci_read(addr, AccessWidth::Word)?.map(|v| v as u16))
    }

    pub fn pci_read32(&self, addr: PciAddress) -> HwResult<Option<u32>> {
        self.pci_read(addr, AccessWidth::Dword)
    }

    /// Two dword reads, high half first.
    pub fn pci_read64(&self, addr: PciAddress) -> HwResult<Option<u64>> {
        let high_addr = addr.checked_add(4)?;
        let Some(high) = self.pci_read32(high_addr)? else {
            return Ok(None);
        };
        let Some(low) = self.pci_read32(addr)? else {
            return Ok(None);
        };
        Ok(Some(join_dwords(low, high)))
    }

    pub fn pci_write(&self, addr: PciAddress, value: u32, width: AccessWidth) -> HwResult<bool> {
        check_function(addr, PCI_CONFIG_SPACE_SIZE)?;
        let route = self.pci_route();
        if let PciPathState::Ecam { .. } = route {
            let phys = route.mm_config().config_address(addr)?;
            return match width {
                AccessWidth::Byte => self.mem_write8(phys, value as u8),
                AccessWidth::Word => self.mem_write16(phys, value as u16),
                AccessWidth::Dword => self.mem_write32(phys, value),
            };
        }
        self.pci_legacy_write(addr, value, width)
    }

    pub fn pci_write8(&self, addr: PciAddress, value: u8) -> HwResult<bool> {
        self.pci_write(addr, u32::from(value), AccessWidth::Byte)
    }

    pub fn pci_write16(&self, addr: PciAddress, value: u16) -> HwResult<bool> {
        self.pci_write(addr, u32::from(value), AccessWidth::Word)
    }

    pub fn pci_write32(&self, addr: PciAddress, value: u32) -> HwResult<bool> {
        self.pci_write(addr, value, AccessWidth::Dword)
    }

    /// Two dword writes, high half first; the low half is skipped if the high half fails.
    pub fn pci_write64(&self, addr: PciAddress, value: u64) -> HwResult<bool> {
        let high_addr = addr.checked_add(4)?;
        Ok(self.pci_write32(high_addr, (value >> 32) as u32)?
            && self.pci_write32(addr, value as u32)?)
    }

    /// Configuration read through the driver, bypassing ECAM. Limited to the first
    /// 256 bytes of each function.
    pub fn pci_legacy_read(&self, addr: PciAddress, width: AccessWidth) -> HwResult<Option<u32>> {
        check_legacy(addr)?;
        Ok(self
            .exchange::<_, PciFrame>(opcode::pci_read(width), &PciFrame::new(addr, 0))
            .map(|frame| width.truncate(frame.value)))
    }

    pub fn pci_legacy_write(
        &self,
        addr: PciAddress,
        value: u32,
        width: AccessWidth,
    ) -> HwResult<bool> {
        check_legacy(addr)?;
        let request = PciFrame::new(addr, width.truncate(value));
        Ok(self.command(opcode::pci_write(width), &request.encode(), PciFrame::LEN))
    }

    pub fn pci_legacy_read64(&self, addr: PciAddress) -> HwResult<Option<u64>> {
        let high_addr = addr.checked_add(4)?;
        let Some(high) = self.pci_legacy_read(high_addr, AccessWidth::Dword)? else {
            return Ok(None);
        };
        let Some(low) = self.pci_legacy_read(addr, AccessWidth::Dword)? else {
            return Ok(None);
        };
        Ok(Some(join_dwords(low, high)))
    }
}

/// Discovery only touches raw memory and the legacy PCI path, never [`HwAccess::pci_read`].
impl<C: ControlChannel> DiscoverySource for HwAccess<C> {
    fn search(&self, address: u64, size: u32, pattern: &[u8], step: u32) -> Option<u64> {
        self.phys_search(&PatternSearch::new(address, size, pattern).step(step))
            .ok()
            .flatten()
    }

    fn read_memory(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        match self.mem_read(address, &mut buf, AccessWidth::Dword) {
            Ok(true) => Some(buf),
            _ => None,
        }
    }

    fn read_memory32(&self, address: u64) -> Option<u32> {
        self.mem_read32(address).ok().flatten()
    }

    fn legacy_pci_read16(&self, addr: PciAddress) -> Option<u16> {
        self.pci_legacy_read(addr, AccessWidth::Word)
            .ok()
            .flatten()
            .map(|v| v as u16)
    }

    fn legacy_pci_read64(&self, addr: PciAddress) -> Option<u64> {
        self.pci_legacy_read64(addr).ok().flatten()
    }
}

fn join_dwords(low: u32, high: u32) -> u64 {
    u64::from(low) | (u64::from(high) << 32)
}

fn check_port(port: u32) -> HwResult<()> {
    if port > MAX_IO_PORT {
        return Err(HwError::InvalidAddress(format!(
            "I/O port {port:#x} beyond 16 bits"
        )));
    }
    Ok(())
}

/// Transfer length as the driver's 32-bit size field; the range must not wrap.
fn transfer_size(address: u64, len: usize) -> HwResult<u32> {
    let size = u32::try_from(len)
        .map_err(|_| HwError::InvalidAddress(format!("transfer of {len} bytes")))?;
    check_range(address, size)?;
    Ok(size)
}

fn check_range(address: u64, size: u32) -> HwResult<()> {
    if address.checked_add(u64::from(size)).is_none() {
        return Err(HwError::InvalidAddress(format!(
            "{address:#x}+{size:#x} wraps the physical address space"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_is_sixteen_bits() {
        assert!(check_port(0xFFFF).is_ok());
        assert!(matches!(check_port(0x1_0000), Err(HwError::InvalidAddress(_))));
    }

    #[test]
    fn transfer_size_rejects_wrapping_ranges() {
        assert_eq!(transfer_size(0x1000, 8).unwrap(), 8);
        assert!(transfer_size(u64::MAX - 3, 8).is_err());
        assert!(transfer_size(u64::MAX - 8, 8).is_ok());
    }

    #[test]
    fn dwords_join_low_first() {
        assert_eq!(join_dwords(0x9abc_def0, 0x1234_5678), 0x1234_5678_9abc_def0);
    }
}
