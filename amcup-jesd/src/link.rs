use amcup_io::{Bus, BusError};
use tracing::debug;

use crate::status::LinkStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Direction {
    #[strum(serialize = "Rx")]
    Rx,
    #[strum(serialize = "Tx")]
    Tx,
}

/// One JESD204B direction (RX or TX) of a lane bank.
///
/// Reset handling: on several boards RX and TX share one physical GT reset
/// line, so asserting either direction may assert both. The bring-up
/// sequence therefore always asserts and deasserts both, and `assert_reset`
/// is required to be idempotent.
pub trait LinkChannel {
    fn label(&self) -> String;
    fn direction(&self) -> Direction;
    fn lanes(&self) -> u32;

    fn assert_reset(&mut self) -> Result<(), BusError>;
    fn deassert_reset(&mut self) -> Result<(), BusError>;

    fn enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool) -> Result<(), BusError>;

    /// Reset the sticky error counters. Always followed by a fresh
    /// [`LinkChannel::query_status`] so the counters measure new accumulation.
    fn clear_errors(&mut self) -> Result<(), BusError>;

    /// Pull-based snapshot; nothing is cached.
    fn query_status(&mut self) -> Result<LinkStatus, BusError>;
}

/// Register map of the firmware JESD204B core, one block per direction.
pub mod regs {
    pub const ENABLE: u32 = 0x000;
    pub const RESET_GTS: u32 = 0x004;
    pub const CLEAR_ERRORS: u32 = 0x008;
    pub const DATA_VALID: u32 = 0x010;
    pub const POSITION_ERR: u32 = 0x014;
    pub const ALIGN_ERR: u32 = 0x018;
    pub const SYSREF_PERIOD_MIN: u32 = 0x01C;
    pub const SYSREF_PERIOD_MAX: u32 = 0x020;
    pub const STATUS_VALID_CNT: u32 = 0x024;
}

pub struct JesdLink<B> {
    bus: B,
    base: u32,
    bank: usize,
    direction: Direction,
    lanes: u32,
    enabled: bool,
}

impl<B: Bus> JesdLink<B> {
    pub fn new(bus: B, base: u32, bank: usize, direction: Direction, lanes: u32) -> Self {
        Self {
            bus,
            base,
            bank,
            direction,
            lanes,
            // links start out requested-on; the caller may gate lanes off
            // before bring-up and the orchestrator will restore that choice
            enabled: true,
        }
    }

    fn lane_mask(&self) -> u32 {
        (1u32 << self.lanes) - 1
    }

    fn read(&mut self, reg: u32) -> Result<u32, BusError> {
        self.bus.read(self.base + reg)
    }

    fn write(&mut self, reg: u32, value: u32) -> Result<(), BusError> {
        self.bus.write(self.base + reg, value)
    }
}

impl<B: Bus> LinkChannel for JesdLink<B> {
    fn label(&self) -> String {
        format!("Jesd{}[{}]", self.direction, self.bank)
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn lanes(&self) -> u32 {
        self.lanes
    }

    fn assert_reset(&mut self) -> Result<(), BusError> {
        self.write(regs::RESET_GTS, 1)
    }

    fn deassert_reset(&mut self) -> Result<(), BusError> {
        self.write(regs::RESET_GTS, 0)
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), BusError> {
        let mask = if enabled { self.lane_mask() } else { 0 };
        // plain config register, safe to read back
        self.bus.write_verify(self.base + regs::ENABLE, mask)?;
        self.enabled = enabled;
        Ok(())
    }

    fn clear_errors(&mut self) -> Result<(), BusError> {
        // self-clearing command bit, toggled explicitly anyway
        self.write(regs::CLEAR_ERRORS, 1)?;
        self.write(regs::CLEAR_ERRORS, 0)
    }

    fn query_status(&mut self) -> Result<LinkStatus, BusError> {
        let data_valid = self.read(regs::DATA_VALID)? & self.lane_mask() == self.lane_mask();
        let position_err = self.read(regs::POSITION_ERR)? != 0;
        let align_err = self.read(regs::ALIGN_ERR)? != 0;
        let sysref_period_min = self.read(regs::SYSREF_PERIOD_MIN)?;
        let sysref_period_max = self.read(regs::SYSREF_PERIOD_MAX)?;
        let pending_err_count = self.read(regs::STATUS_VALID_CNT)?;
        let status = LinkStatus {
            data_valid,
            position_err,
            align_err,
            sysref_period_min,
            sysref_period_max,
            pending_err_count,
        };
        debug!(link = %self.label(), ?status, "status");
        Ok(status)
    }
}
