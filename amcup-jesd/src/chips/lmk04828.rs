use amcup_io::{Bus, BusError};
use tracing::debug;

use crate::device::RefClock;

/// TI LMK04828 clock distributor (firmware SPI mirror, word-addressed).
pub(crate) mod regs {
    /// Device power-down / reset control.
    pub const PWR_DOWN: u32 = 0x008;
    /// SYSREF output enable.
    pub const SYSREF_PD: u32 = 0x500;
    /// Writing 1 issues a SYNC event across the clock outputs.
    pub const SYNC_PULSE: u32 = 0x504;
}

pub struct Lmk04828<B> {
    bus: B,
    base: u32,
    bank: usize,
}

impl<B: Bus> Lmk04828<B> {
    pub fn new(bus: B, base: u32, bank: usize) -> Self {
        Self { bus, base, bank }
    }

    fn write(&mut self, reg: u32, value: u32) -> Result<(), BusError> {
        self.bus.write(self.base + reg, value)
    }
}

impl<B: Bus> RefClock for Lmk04828<B> {
    fn power_up_chip(&mut self) -> Result<(), BusError> {
        debug!(bank = self.bank, "LMK chip up");
        self.write(regs::PWR_DOWN, 0)
    }

    fn power_down_chip(&mut self) -> Result<(), BusError> {
        debug!(bank = self.bank, "LMK chip down");
        self.write(regs::PWR_DOWN, 1)
    }

    fn power_up_sysref(&mut self) -> Result<(), BusError> {
        debug!(bank = self.bank, "SYSREF up");
        self.write(regs::SYSREF_PD, 0)?;
        // the output comes up synchronized, so this perturbs converter phase
        self.write(regs::SYNC_PULSE, 1)?;
        self.write(regs::SYNC_PULSE, 0)
    }

    fn power_down_sysref(&mut self) -> Result<(), BusError> {
        debug!(bank = self.bank, "SYSREF down");
        self.write(regs::SYSREF_PD, 1)
    }
}
