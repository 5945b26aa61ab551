//! Simulated carrier: a [`FakeBus`] preloaded with the register image of a
//! healthy board, so the full bring-up sequence can run (and lock) with no
//! hardware attached.

use amcup_io::{FakeBus, units::Bytes};

use crate::{
    daq::{BufferSlot, WaveformEngine},
    link::regs,
    topology::{BoardTopology, map},
};

/// A bus whose every configured link reads as locked and whose waveform
/// engines carry one usable capture window per active bank.
pub fn locked_board(topology: &BoardTopology) -> FakeBus {
    let mut bus = FakeBus::new();
    seed_locked(&mut bus, topology);
    bus
}

pub fn seed_locked(bus: &mut FakeBus, topology: &BoardTopology) {
    for (bank, cfg) in topology.banks.iter().enumerate() {
        if cfg.rx_lanes > 0 {
            seed_link(bus, map::JESD[bank], cfg.rx_lanes);
        }
        if cfg.tx_lanes > 0 {
            seed_link(bus, map::JESD[bank] + map::JESD_TX, cfg.tx_lanes);
        }
        if cfg.active() {
            let window = BufferSlot {
                enabled: true,
                start: Bytes(0),
                end: Bytes(4 * cfg.sig_gen_size.max(1024)),
            };
            WaveformEngine::<FakeBus>::seed_slot(bus, map::WAVE_ENGINE[bank], 0, window);
        }
    }
}

fn seed_link(bus: &mut FakeBus, base: u32, lanes: u32) {
    bus.set(base + regs::DATA_VALID, (1 << lanes) - 1);
    // steady SYSREF: min and max period agree
    bus.set(base + regs::SYSREF_PERIOD_MIN, 7);
    bus.set(base + regs::SYSREF_PERIOD_MAX, 7);
}
