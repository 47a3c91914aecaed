#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use pmx_acpi::{AcpiImage, McfgAllocation};
use pmx_hw::{ControlChannel, HwAccess, HwConfig, PciAddress, PciDiscovery};
use pmx_sim::SimDriver;

pub const RSDP_ADDR: u64 = 0x000F_6A40;
pub const RSDT_ADDR: u32 = 0x7FFE_0000;
pub const MCFG_ADDR: u32 = 0x7FFE_1000;
pub const ECAM_BASE: u64 = 0x8000_0000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A request as the channel saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub code: u32,
    pub request: Vec<u8>,
    pub response_len: usize,
}

/// Channel answering from a queue of canned responses; an empty queue fails the call.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    responses: Mutex<VecDeque<Option<Vec<u8>>>>,
    sent: Mutex<Vec<Sent>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, response: Option<Vec<u8>>) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn codes(&self) -> Vec<u32> {
        self.sent().iter().map(|s| s.code).collect()
    }
}

impl ControlChannel for ScriptedChannel {
    fn submit(&self, code: u32, request: &[u8], response_len: usize) -> Option<Vec<u8>> {
        self.sent.lock().unwrap().push(Sent {
            code,
            request: request.to_vec(),
            response_len,
        });
        self.responses.lock().unwrap().pop_front().flatten()
    }
}

pub fn manual_config() -> HwConfig {
    HwConfig {
        pci_discovery: PciDiscovery::Manual,
        ..HwConfig::default()
    }
}

pub fn scripted_manual() -> HwAccess<ScriptedChannel> {
    HwAccess::with_config(ScriptedChannel::new(), manual_config())
}

pub fn ecam_allocation(base: u64, end_bus: u8) -> McfgAllocation {
    McfgAllocation {
        base_address: base,
        segment: 0,
        start_bus: 0,
        end_bus,
    }
}

/// A machine whose ACPI tables advertise one ECAM window.
pub fn sim_with_mcfg(base: u64, end_bus: u8) -> SimDriver {
    let mut sim = SimDriver::new();
    AcpiImage::new(RSDP_ADDR, RSDT_ADDR)
        .with_mcfg(MCFG_ADDR, &[ecam_allocation(base, end_bus)])
        .write_to(&mut sim);
    sim
}

/// Puts a host bridge at 00:00.0 with `pciexbar` at config offset 0x60.
pub fn add_host_bridge(sim: &SimDriver, vendor_id: u16, pciexbar: u64) {
    let root = PciAddress::new(0, 0, 0);
    sim.add_pci_function(root, vendor_id, 0x29C0);
    sim.write_pci_config(root.with_offset(0x60), &pciexbar.to_le_bytes())
        .unwrap();
}
