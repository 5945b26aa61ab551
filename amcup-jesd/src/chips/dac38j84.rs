use std::time::Duration;

use amcup_io::{Bus, BusError};
use tracing::debug;

use crate::device::{Converter, DeviceId, DeviceKind, InitError};

/// TI DAC38J84 register map, as mirrored into 32-bit words by the firmware
/// SPI bridge.
pub(crate) mod regs {
    pub const ENABLE_TX: u32 = 0x00C;
    pub const INIT_JESD: u32 = 0x128;
    pub const JESD_RST_N: u32 = 0x12C;
    pub const CLEAR_ALARMS: u32 = 0x1B0;
    pub const LANE_ALARMS: u32 = 0x1B4;
}

pub struct Dac38J84<B> {
    bus: B,
    base: u32,
    id: DeviceId,
    enabled: bool,
    /// Settle time between steps of the JESD reset dance. The datasheet
    /// wants "a few ms"; the deployed systems use 10.
    step: Duration,
}

impl<B: Bus> Dac38J84<B> {
    pub fn new(bus: B, base: u32, bank: usize, index: usize) -> Self {
        Self {
            bus,
            base,
            id: DeviceId { bank, kind: DeviceKind::Dac, index },
            enabled: true,
            step: Duration::from_millis(10),
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

impl<B: Bus> Converter for Dac38J84<B> {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The DAC-side JESD core has to see its reset released while the
    /// serializer outputs are off, then get re-enabled; the order and the
    /// inter-step settles come straight from the deployed init procedure.
    fn run_init_hook(&mut self) -> Result<(), InitError> {
        if !self.enabled {
            debug!(device = %self.id, "gated off, skipping init");
            return Ok(());
        }
        let steps = [
            (regs::ENABLE_TX, 0),
            (regs::INIT_JESD, 1),
            (regs::JESD_RST_N, 0),
            (regs::JESD_RST_N, 1),
            (regs::INIT_JESD, 0),
            (regs::ENABLE_TX, 1),
        ];
        for (reg, value) in steps {
            self.write(reg, value)?;
            std::thread::sleep(self.step);
        }
        Ok(())
    }

    fn clear_alarms(&mut self) -> Result<(), InitError> {
        if !self.enabled {
            return Ok(());
        }
        self.write(regs::CLEAR_ALARMS, 1)?;
        self.write(regs::CLEAR_ALARMS, 0)?;
        let residue = self.bus.read(self.base + regs::LANE_ALARMS)?;
        if residue != 0 {
            return Err(InitError::Chip(format!(
                "lane alarms still set after clear: {residue:#010X}"
            )));
        }
        Ok(())
    }
}
