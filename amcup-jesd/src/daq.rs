use amcup_io::{
    Bus, BusError,
    units::{Bytes, Words32},
};
use tracing::debug;

/// Acquisition mux: routes converter sample streams into the waveform
/// engines and bounds how much each capture may write.
mod mux_regs {
    pub const TRIGGER_DAQ: u32 = 0x000;
    pub const DATA_BUFFER_SIZE: u32 = 0x00C;
}

pub struct DaqMux<B> {
    bus: B,
    base: u32,
    bank: usize,
}

impl<B: Bus> DaqMux<B> {
    pub fn new(bus: B, base: u32, bank: usize) -> Self {
        Self { bus, base, bank }
    }

    pub fn trigger(&mut self) -> Result<(), BusError> {
        self.bus.write(self.base + mux_regs::TRIGGER_DAQ, 1)?;
        self.bus.write(self.base + mux_regs::TRIGGER_DAQ, 0)
    }

    pub fn set_buffer_size(&mut self, size: Words32<u32>) -> Result<(), BusError> {
        debug!(bank = self.bank, words = size.0, "DAQ buffer size");
        self.bus
            .write_verify(self.base + mux_regs::DATA_BUFFER_SIZE, size.0)
    }

    pub fn buffer_size(&mut self) -> Result<Words32<u32>, BusError> {
        Ok(Words32(self.bus.read(self.base + mux_regs::DATA_BUFFER_SIZE)?))
    }
}

/// One waveform-engine buffer window in carrier DDR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSlot {
    pub enabled: bool,
    pub start: Bytes<u32>,
    pub end: Bytes<u32>,
}

impl BufferSlot {
    /// Length in bytes, if this slot should participate in reconciliation.
    pub fn usable_len(&self) -> Option<Bytes<u32>> {
        (self.enabled && self.end > self.start).then(|| Bytes(self.end.0 - self.start.0))
    }
}

/// Smallest usable window across a bank's slot pool, or `None` when no slot
/// is enabled and well-formed (meaning: leave the mux setting alone).
pub fn min_buffer_bytes(slots: &[BufferSlot]) -> Option<Bytes<u32>> {
    slots.iter().filter_map(BufferSlot::usable_len).min()
}

/// The waveform engine's slot-descriptor block (4 slots per bank).
mod engine_regs {
    pub fn start_addr(slot: u32) -> u32 {
        slot * 4
    }
    pub fn end_addr(slot: u32) -> u32 {
        0x010 + slot * 4
    }
    pub fn enabled(slot: u32) -> u32 {
        0x020 + slot * 4
    }
}

pub struct WaveformEngine<B> {
    bus: B,
    base: u32,
    slots: u32,
}

impl<B: Bus> WaveformEngine<B> {
    pub fn new(bus: B, base: u32, slots: u32) -> Self {
        Self { bus, base, slots }
    }

    pub fn read_slots(&mut self) -> Result<Vec<BufferSlot>, BusError> {
        (0..self.slots)
            .map(|slot| {
                Ok(BufferSlot {
                    enabled: self.bus.read(self.base + engine_regs::enabled(slot))? != 0,
                    start: Bytes(self.bus.read(self.base + engine_regs::start_addr(slot))?),
                    end: Bytes(self.bus.read(self.base + engine_regs::end_addr(slot))?),
                })
            })
            .collect()
    }

    pub(crate) fn seed_slot(bus: &mut amcup_io::FakeBus, base: u32, slot: u32, s: BufferSlot) {
        bus.set(base + engine_regs::enabled(slot), s.enabled as u32);
        bus.set(base + engine_regs::start_addr(slot), s.start.0);
        bus.set(base + engine_regs::end_addr(slot), s.end.0);
    }
}
