use std::time::Duration;

use amcup_io::{Bus, BusError};
use tracing::debug;

use crate::device::{Converter, DeviceId, DeviceKind, InitError};

/// TI ADC32RF45 SYSREF-handling registers (firmware SPI mirror).
mod regs {
    pub const ASSERT_SYSREF: u32 = 0x134;
    pub const SEL_SYSREF: u32 = 0x138;
    pub const PDN_SYSREF: u32 = 0x13C;
}

pub struct Adc32Rf45<B> {
    bus: B,
    base: u32,
    id: DeviceId,
    enabled: bool,
    step: Duration,
}

impl<B: Bus> Adc32Rf45<B> {
    pub fn new(bus: B, base: u32, bank: usize, index: usize) -> Self {
        Self {
            bus,
            base,
            id: DeviceId { bank, kind: DeviceKind::Adc, index },
            enabled: true,
            step: Duration::from_millis(100),
        }
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    fn write(&mut self, reg: u32, value: u32) -> Result<(), BusError> {
        self.bus.write(self.base + reg, value)
    }
}

impl<B: Bus> Converter for Adc32Rf45<B> {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Put SYSREF capture into the known state, then pulse the SYSREF
    /// power-down pin so the digital core re-arms on the next edge.
    fn run_init_hook(&mut self) -> Result<(), InitError> {
        if !self.enabled {
            debug!(device = %self.id, "gated off, skipping init");
            return Ok(());
        }
        self.write(regs::ASSERT_SYSREF, 0)?;
        self.write(regs::SEL_SYSREF, 0)?;
        for value in [1, 0, 1] {
            self.write(regs::PDN_SYSREF, value)?;
            std::thread::sleep(self.step);
        }
        Ok(())
    }

    fn clear_alarms(&mut self) -> Result<(), InitError> {
        // no sticky alarm block on this chip
        Ok(())
    }
}
