#![forbid(unsafe_code)]

//! An in-process PMX driver.
//!
//! [`SimDriver`] decodes requests exactly as the kernel driver would and answers them
//! from emulated machine state, so [`pmx_hw::HwAccess`] can be exercised without
//! hardware. Operation codes can be denied and responses truncated to provoke faults,
//! and every submitted request is recorded.

mod error;
mod memory;
mod pci;

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use pmx_acpi::PhysicalMemory;
use pmx_hw::ControlChannel;
use pmx_protocol::{
    CpuidRegs, CrFrame, Frame, IoFrame, MemTransfer, MsrFrame, Operation, PciAddress, PciFrame,
    PhysicalAllocation, PmcFrame, SearchRequest, SearchResponse, TscFrame,
};
use tracing::{debug, trace};

pub use error::SimError;
pub use memory::{SparseMemory, OPEN_BUS, PAGE_SIZE};
pub use pci::PciConfigSpaces;

/// Start of the physical range handed out by the allocator.
pub const ALLOCATION_BASE: u32 = 0x1000_0000;

const CONTROL_REGISTERS: usize = 16;
const MAX_PORT: u32 = 0xFFFF;
const KERNEL_MAPPING_BASE: u64 = 0xFFFF_8000_0000_0000;

/// One request as the driver received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCall {
    pub code: u32,
    pub request: Vec<u8>,
    pub response_len: usize,
}

#[derive(Debug)]
struct SimState {
    memory: SparseMemory,
    ports: HashMap<u32, u32>,
    msrs: HashMap<u32, u64>,
    control_registers: [u64; CONTROL_REGISTERS],
    tsc: u64,
    tsc_step: u64,
    pmcs: HashMap<u32, u64>,
    cpuid: HashMap<u32, CpuidRegs>,
    pci: PciConfigSpaces,
    next_allocation: u64,
    allocations: HashMap<u64, PhysicalAllocation>,
    denied: HashSet<u32>,
    truncate_responses: Option<usize>,
    calls: Vec<SimCall>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            memory: SparseMemory::new(),
            ports: HashMap::new(),
            msrs: HashMap::new(),
            control_registers: [0; CONTROL_REGISTERS],
            tsc: 0,
            tsc_step: 1,
            pmcs: HashMap::new(),
            cpuid: HashMap::new(),
            pci: PciConfigSpaces::default(),
            next_allocation: u64::from(ALLOCATION_BASE),
            allocations: HashMap::new(),
            denied: HashSet::new(),
            truncate_responses: None,
            calls: Vec::new(),
        }
    }
}

impl SimState {
    fn handle(&mut self, op: Operation, req: &[u8]) -> Result<Vec<u8>, SimError> {
        match op {
            Operation::MemRead => {
                let t = MemTransfer::decode(req)?;
                Ok(self.memory.read(t.address, t.size as usize))
            }
            Operation::MemWrite => {
                let (t, payload) = MemTransfer::decode_with_payload(req)?;
                let size = t.size as usize;
                if payload.len() < size {
                    return Err(SimError::ShortPayload {
                        len: payload.len(),
                        expected: size,
                    });
                }
                self.memory.write(t.address, &payload[..size]);
                Ok(Vec::new())
            }
            Operation::IoRead(width) => {
                let f = IoFrame::decode(req)?;
                check_port(f.port)?;
                let value = self.ports.get(&f.port).copied().unwrap_or(u32::MAX);
                Ok(IoFrame {
                    port: f.port,
                    value: width.truncate(value),
                }
                .encode())
            }
            Operation::IoWrite(width) => {
                let f = IoFrame::decode(req)?;
                check_port(f.port)?;
                self.ports.insert(f.port, width.truncate(f.value));
                Ok(Vec::new())
            }
            Operation::PciRead(width) => {
                let f = PciFrame::decode(req)?;
                let value = self.pci.read(f.address(), width)?;
                Ok(PciFrame { value, ..f }.encode())
            }
            Operation::PciWrite(width) => {
                let f = PciFrame::decode(req)?;
                self.pci.write(f.address(), f.value, width)?;
                Ok(Vec::new())
            }
            Operation::MsrRead => {
                let f = MsrFrame::decode(req)?;
                let value = *self
                    .msrs
                    .get(&f.number)
                    .ok_or(SimError::UnknownMsr(f.number))?;
                Ok(MsrFrame {
                    number: f.number,
                    value,
                }
                .encode())
            }
            Operation::MsrWrite => {
                let f = MsrFrame::decode(req)?;
                self.msrs.insert(f.number, f.value);
                Ok(Vec::new())
            }
            Operation::CpuidRead => {
                let f = CpuidRegs::decode(req)?;
                Ok(self.cpuid.get(&f.eax).copied().unwrap_or_default().encode())
            }
            Operation::TscRead => {
                self.tsc = self.tsc.wrapping_add(self.tsc_step);
                Ok(TscFrame { value: self.tsc }.encode())
            }
            Operation::PmcRead => {
                let f = PmcFrame::decode(req)?;
                let value = self.pmcs.get(&f.counter).copied().unwrap_or(0);
                Ok(PmcFrame {
                    counter: f.counter,
                    value,
                }
                .encode())
            }
            Operation::CrRead => {
                let f = CrFrame::decode(req)?;
                let value = *self
                    .control_registers
                    .get(f.number as usize)
                    .ok_or(SimError::BadControlRegister(f.number))?;
                Ok(CrFrame {
                    number: f.number,
                    value,
                }
                .encode())
            }
            Operation::CrWrite => {
                let f = CrFrame::decode(req)?;
                let slot = self
                    .control_registers
                    .get_mut(f.number as usize)
                    .ok_or(SimError::BadControlRegister(f.number))?;
                *slot = f.value;
                Ok(Vec::new())
            }
            Operation::PhysAlloc => {
                let f = PhysicalAllocation::decode(req)?;
                Ok(self.allocate(f.size)?.encode())
            }
            Operation::PhysFree => {
                let f = PhysicalAllocation::decode(req)?;
                self.allocations
                    .remove(&f.mapped_handle)
                    .ok_or(SimError::UnknownAllocation(f.mapped_handle))?;
                Ok(Vec::new())
            }
            Operation::PhysSearch => {
                let (f, payload) = SearchRequest::decode_with_payload(req)?;
                let len = f.pattern_len as usize;
                if payload.len() < len {
                    return Err(SimError::ShortPayload {
                        len: payload.len(),
                        expected: len,
                    });
                }
                if f.step == 0 {
                    return Err(SimError::ZeroStep);
                }
                let matched = self
                    .memory
                    .search(
                        f.address,
                        u64::from(f.size),
                        &payload[..len],
                        u64::from(f.step),
                        f.skip,
                        f.backwards,
                    )
                    .unwrap_or(0);
                Ok(SearchResponse { matched }.encode_after(&f))
            }
        }
    }

    fn allocate(&mut self, size: u32) -> Result<PhysicalAllocation, SimError> {
        if size == 0 {
            return Err(SimError::EmptyAllocation);
        }
        let start = self.next_allocation;
        let pages = u64::from(size).div_ceil(PAGE_SIZE);
        let end = start + pages * PAGE_SIZE;
        let physical_address = u32::try_from(start).map_err(|_| SimError::OutOfMemory(size))?;
        if end > 1 << 32 {
            return Err(SimError::OutOfMemory(size));
        }
        self.next_allocation = end;
        self.memory.fill(start, size as usize, 0);

        let alloc = PhysicalAllocation {
            size,
            physical_address,
            mapped_handle: KERNEL_MAPPING_BASE | start,
        };
        self.allocations.insert(alloc.mapped_handle, alloc);
        Ok(alloc)
    }
}

fn check_port(port: u32) -> Result<(), SimError> {
    if port > MAX_PORT {
        return Err(SimError::BadPort(port));
    }
    Ok(())
}

/// Simulated driver. All state sits behind one lock, so calls are serialised the way a
/// single device handle serialises them.
#[derive(Debug, Default)]
pub struct SimDriver {
    state: Mutex<SimState>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write_phys(&self, address: u64, data: &[u8]) {
        self.lock().memory.write(address, data);
    }

    pub fn read_phys(&self, address: u64, len: usize) -> Vec<u8> {
        self.lock().memory.read(address, len)
    }

    pub fn set_port(&self, port: u32, value: u32) {
        self.lock().ports.insert(port, value);
    }

    pub fn port(&self, port: u32) -> Option<u32> {
        self.lock().ports.get(&port).copied()
    }

    pub fn set_msr(&self, number: u32, value: u64) {
        self.lock().msrs.insert(number, value);
    }

    pub fn msr(&self, number: u32) -> Option<u64> {
        self.lock().msrs.get(&number).copied()
    }

    pub fn set_control_register(&self, number: u32, value: u64) -> Result<(), SimError> {
        let mut state = self.lock();
        let slot = state
            .control_registers
            .get_mut(number as usize)
            .ok_or(SimError::BadControlRegister(number))?;
        *slot = value;
        Ok(())
    }

    pub fn control_register(&self, number: u32) -> Option<u64> {
        self.lock().control_registers.get(number as usize).copied()
    }

    /// The counter starts at `start` and advances by `step` before every read.
    pub fn set_tsc(&self, start: u64, step: u64) {
        let mut state = self.lock();
        state.tsc = start;
        state.tsc_step = step;
    }

    pub fn set_pmc(&self, counter: u32, value: u64) {
        self.lock().pmcs.insert(counter, value);
    }

    /// Unlisted leaves answer with all registers zero.
    pub fn set_cpuid(&self, leaf: u32, regs: CpuidRegs) {
        self.lock().cpuid.insert(leaf, regs);
    }

    pub fn add_pci_function(&self, addr: PciAddress, vendor_id: u16, device_id: u16) {
        self.lock().pci.add_function(addr, vendor_id, device_id);
    }

    /// Seeds config bytes of a present function starting at `addr.offset`.
    pub fn write_pci_config(&self, addr: PciAddress, data: &[u8]) -> Result<(), SimError> {
        self.lock().pci.write_bytes(addr, data)
    }

    pub fn allocations(&self) -> Vec<PhysicalAllocation> {
        let mut out: Vec<_> = self.lock().allocations.values().copied().collect();
        out.sort_by_key(|a| a.physical_address);
        out
    }

    /// Makes every request with `code` fail.
    pub fn deny(&self, code: u32) {
        self.lock().denied.insert(code);
    }

    pub fn allow(&self, code: u32) {
        self.lock().denied.remove(&code);
    }

    /// Cuts every successful response to at most `len` bytes.
    pub fn truncate_responses(&self, len: Option<usize>) {
        self.lock().truncate_responses = len;
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, code: u32) -> usize {
        self.lock().calls.iter().filter(|c| c.code == code).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn process(
        state: &mut SimState,
        code: u32,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, SimError> {
        if state.denied.contains(&code) {
            return Err(SimError::Denied(code));
        }
        let op = Operation::from_code(code).ok_or(SimError::UnknownCode(code))?;
        let mut response = state.handle(op, request)?;
        if response.len() > response_len {
            return Err(SimError::ResponseTooLarge {
                needed: response.len(),
                capacity: response_len,
            });
        }
        response.resize(response_len, 0);
        if let Some(limit) = state.truncate_responses {
            response.truncate(limit);
        }
        Ok(response)
    }
}

impl ControlChannel for SimDriver {
    fn submit(&self, code: u32, request: &[u8], response_len: usize) -> Option<Vec<u8>> {
        let mut state = self.lock();
        trace!(code, request_len = request.len(), response_len, "sim driver request");
        state.calls.push(SimCall {
            code,
            request: request.to_vec(),
            response_len,
        });
        match Self::process(&mut state, code, request, response_len) {
            Ok(response) => Some(response),
            Err(err) => {
                debug!(code, %err, "sim driver failed request");
                None
            }
        }
    }
}

impl PhysicalMemory for SimDriver {
    fn write(&mut self, paddr: u64, bytes: &[u8]) {
        self.write_phys(paddr, bytes);
    }
}

#[cfg(test)]
mod tests {
    use pmx_protocol::{opcode, AccessWidth, STAGING_BUFFER};

    use super::*;

    fn submit<F: Frame>(sim: &SimDriver, code: u32, frame: &F) -> Option<Vec<u8>> {
        sim.submit(code, &frame.encode(), 0x1100)
    }

    #[test]
    fn responses_are_padded_to_offered_capacity() {
        let sim = SimDriver::new();
        sim.set_port(0x80, 0x12);
        let resp = submit(
            &sim,
            opcode::io_read(AccessWidth::Byte),
            &IoFrame {
                port: 0x80,
                value: 0,
            },
        )
        .unwrap();
        assert_eq!(resp.len(), 0x1100);
        assert_eq!(IoFrame::decode(&resp).unwrap().value, 0x12);
    }

    #[test]
    fn undersized_capacity_fails_the_call() {
        let sim = SimDriver::new();
        let req = MemTransfer::new(0, 0x20, AccessWidth::Byte).encode();
        assert!(sim.submit(opcode::MEM_READ, &req, 0x10).is_none());
        assert!(sim.submit(opcode::MEM_READ, &req, 0x20).is_some());
    }

    #[test]
    fn unknown_codes_and_denied_codes_fail() {
        let sim = SimDriver::new();
        assert!(sim.submit(0x222800, &[], 0x1100).is_none());

        sim.deny(opcode::TSC_READ);
        assert!(submit(&sim, opcode::TSC_READ, &TscFrame { value: 0 }).is_none());
        sim.allow(opcode::TSC_READ);
        assert!(submit(&sim, opcode::TSC_READ, &TscFrame { value: 0 }).is_some());
        assert_eq!(sim.call_count(opcode::TSC_READ), 2);
    }

    #[test]
    fn truncation_applies_after_padding() {
        let sim = SimDriver::new();
        sim.truncate_responses(Some(3));
        let resp = submit(&sim, opcode::TSC_READ, &TscFrame { value: 0 }).unwrap();
        assert_eq!(resp.len(), 3);
    }

    #[test]
    fn unknown_msr_faults() {
        let sim = SimDriver::new();
        let req = MsrFrame {
            number: 0xC000_0080,
            value: 0,
        };
        assert!(submit(&sim, opcode::MSR_READ, &req).is_none());
        sim.set_msr(0xC000_0080, 0xD01);
        let resp = submit(&sim, opcode::MSR_READ, &req).unwrap();
        assert_eq!(MsrFrame::decode(&resp).unwrap().value, 0xD01);
    }

    #[test]
    fn allocator_hands_out_page_aligned_zeroed_blocks() {
        let sim = SimDriver::new();
        let req = PhysicalAllocation {
            size: 0x1800,
            physical_address: 0,
            mapped_handle: 0,
        };
        let a = PhysicalAllocation::decode(&submit(&sim, opcode::PHYS_ALLOC, &req).unwrap())
            .unwrap();
        let b = PhysicalAllocation::decode(&submit(&sim, opcode::PHYS_ALLOC, &req).unwrap())
            .unwrap();
        assert_eq!(a.physical_address, ALLOCATION_BASE);
        assert_eq!(b.physical_address, ALLOCATION_BASE + 0x2000);
        assert_eq!(sim.read_phys(u64::from(a.physical_address), 4), vec![0; 4]);

        let free = PhysicalAllocation {
            physical_address: 0,
            ..a
        };
        assert!(submit(&sim, opcode::PHYS_FREE, &free).is_some());
        assert!(submit(&sim, opcode::PHYS_FREE, &free).is_none());
        assert_eq!(sim.allocations(), vec![b]);
    }

    #[test]
    fn search_reads_pattern_after_header() {
        let sim = SimDriver::new();
        sim.write_phys(0xF_6A40, b"RSD PTR ");
        let req = SearchRequest {
            address: 0xE_0000,
            size: 0x2_0000,
            step: 0x10,
            skip: 0,
            pattern: STAGING_BUFFER,
            pattern_len: 8,
            backwards: false,
        };
        let resp = sim
            .submit(opcode::PHYS_SEARCH, &req.encode_with_payload(b"RSD PTR "), 0x30)
            .unwrap();
        assert_eq!(SearchResponse::decode(&resp).unwrap().matched, 0xF_6A40);

        // Header says 8 bytes but only 4 follow.
        assert!(sim
            .submit(opcode::PHYS_SEARCH, &req.encode_with_payload(b"RSD "), 0x30)
            .is_none());
    }
}
