//! PCI configuration path selection.

use std::sync::Mutex;

use pmx_protocol::{PciAddress, PCI_CONFIG_SPACE_SIZE, PCI_LEGACY_CONFIG_SPACE_SIZE};

use crate::{HwError, HwResult};

/// Bytes of ECAM space per bus.
const ECAM_BUS_SIZE: u64 = 1 << 20;

/// Location of the memory-mapped configuration window.
///
/// `base_address == 0` means no window was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PciMmConfig {
    pub base_address: u64,
    pub top_bus: u8,
}

impl PciMmConfig {
    pub const LEGACY: Self = Self {
        base_address: 0,
        top_bus: 0,
    };

    pub const fn is_available(&self) -> bool {
        self.base_address != 0
    }

    /// Decodes a chipset PCIEXBAR-style register: bit 0 enables the window, bits 1-2
    /// select 256/128/64/32 buses, bits 16-31 hold the base.
    pub const fn from_pciexbar(value: u64) -> Self {
        if value & 1 == 0 {
            return Self::LEGACY;
        }
        let size_sel = ((value >> 1) & 3) as u32;
        Self {
            base_address: value & 0xFFFF_0000,
            top_bus: ((1u32 << (8 - size_sel)) - 1) as u8,
        }
    }

    /// First address past the window, or `None` if it would wrap the address space.
    pub fn window_end(&self) -> Option<u64> {
        let len = (u64::from(self.top_bus) + 1) * ECAM_BUS_SIZE;
        self.base_address.checked_add(len)
    }

    /// Physical address of `addr` inside the window.
    pub fn config_address(&self, addr: PciAddress) -> HwResult<u64> {
        if addr.bus >= self.top_bus {
            return Err(HwError::InvalidAddress(format!(
                "{addr}: bus beyond ECAM top bus {:#04x}",
                self.top_bus
            )));
        }
        check_function(addr, PCI_CONFIG_SPACE_SIZE)?;
        self.base_address
            .checked_add(addr.ecam_offset())
            .ok_or_else(|| {
                HwError::InvalidAddress(format!(
                    "{addr}: ECAM base {:#x} wraps the physical address space",
                    self.base_address
                ))
            })
    }
}

/// Validates device, function and offset against a config window of `window` bytes.
pub(crate) fn check_function(addr: PciAddress, window: u16) -> HwResult<()> {
    if !addr.has_valid_function() {
        return Err(HwError::InvalidAddress(format!(
            "{addr}: device or function out of range"
        )));
    }
    if addr.offset >= window {
        return Err(HwError::InvalidAddress(format!(
            "{addr}: offset outside {window:#x}-byte config space"
        )));
    }
    Ok(())
}

pub(crate) fn check_legacy(addr: PciAddress) -> HwResult<()> {
    check_function(addr, PCI_LEGACY_CONFIG_SPACE_SIZE)
}

/// Which path PCI configuration accesses take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PciPathState {
    #[default]
    Unknown,
    Detecting,
    Ecam { base: u64, top_bus: u8 },
    Legacy,
}

impl PciPathState {
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Ecam { .. } | Self::Legacy)
    }

    pub const fn mm_config(&self) -> PciMmConfig {
        match *self {
            Self::Ecam { base, top_bus } => PciMmConfig {
                base_address: base,
                top_bus,
            },
            _ => PciMmConfig::LEGACY,
        }
    }
}

impl From<PciMmConfig> for PciPathState {
    fn from(cfg: PciMmConfig) -> Self {
        if cfg.is_available() {
            Self::Ecam {
                base: cfg.base_address,
                top_bus: cfg.top_bus,
            }
        } else {
            Self::Legacy
        }
    }
}

/// One-shot discovery result shared by every caller of a facade.
///
/// The lock is held across discovery so concurrent callers wait for the outcome
/// instead of racing their own probes.
#[derive(Debug, Default)]
pub(crate) struct PciAccessPath {
    state: Mutex<PciPathState>,
}

impl PciAccessPath {
    pub fn state(&self) -> PciPathState {
        let state = *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only a panicked discovery leaves this behind.
        if state == PciPathState::Detecting {
            PciPathState::Unknown
        } else {
            state
        }
    }

    /// Returns the resolved path, running `detect` first if nothing has resolved it yet.
    pub fn resolve(&self, detect: impl FnOnce() -> PciMmConfig) -> PciPathState {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_resolved() {
            return *guard;
        }
        *guard = PciPathState::Detecting;
        *guard = PciPathState::from(detect());
        *guard
    }
}
