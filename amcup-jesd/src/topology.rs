use std::time::Duration;

use amcup_io::{Bus, BusError, units::Words32};
use tracing::{debug, warn};

use crate::{
    chips::{Adc32Rf45, Dac38J84, Lmk04828},
    daq::{DaqMux, WaveformEngine, min_buffer_bytes},
    device::{Converter, RefClock},
    link::{Direction, JesdLink, LinkChannel},
    siggen::DacSigGen,
    status::LinkStatus,
};

pub const BANKS: usize = 2;

/// Carrier address map. Bank-indexed blocks stride by 0x1000_0000, matching
/// the firmware's top-level crossbar.
pub(crate) mod map {
    pub const AMC_BAY: [u32; 2] = [0x0000_0000, 0x0010_0000];
    pub const WAVE_ENGINE: [u32; 2] = [0x0900_0000, 0x0980_0000];
    pub const DAQ_MUX: [u32; 2] = [0x2000_0000, 0x3000_0000];
    pub const JESD: [u32; 2] = [0x4000_0000, 0x5000_0000];
    pub const SIG_GEN: [u32; 2] = [0x6000_0000, 0x7000_0000];
    /// TX block offset within a bank's JESD region.
    pub const JESD_TX: u32 = 0x0100_0000;

    // within an AMC bay
    pub const DAC: u32 = 0x0000_2000;
    pub const DAC_STRIDE: u32 = 0x0000_2000;
    pub const LMK: u32 = 0x0002_0000;
    pub const ADC: u32 = 0x0004_0000;
    pub const ADC_STRIDE: u32 = 0x0002_0000;
}

/// One lane bank: an independent JESD clock domain with its own converters.
#[derive(Clone, Copy, Debug, Default)]
pub struct BankConfig {
    pub rx_lanes: u32,
    pub tx_lanes: u32,
    pub dacs: u32,
    pub adcs: u32,
    pub has_ref_clock: bool,
    pub sig_gen_channels: u32,
    pub sig_gen_size: u32,
}

impl BankConfig {
    pub fn active(&self) -> bool {
        self.rx_lanes > 0 || self.tx_lanes > 0
    }
}

/// Static description of what is stuffed on a carrier. Immutable once built;
/// the [`Board`] constructed from it owns the live device handles.
#[derive(Clone, Copy, Debug)]
pub struct BoardTopology {
    pub banks: [BankConfig; BANKS],
    /// How many sticky status errors a channel may accumulate during
    /// VerifyLock before the channel counts as unlocked. Boards disagree on
    /// this; it is data, not policy.
    pub err_count_threshold: u32,
    /// Waveform-engine buffer slots per bank.
    pub waveform_slots: u32,
}

impl Default for BoardTopology {
    fn default() -> Self {
        Self {
            banks: [BankConfig::default(); BANKS],
            err_count_threshold: 0,
            waveform_slots: 4,
        }
    }
}

impl BoardTopology {
    /// Generic ADC/DAC demo board: one bank, two 2-lane ADCs feeding RX,
    /// one 2-lane DAC on TX, LMK in the bay.
    pub fn generic_adc_dac() -> Self {
        Self {
            banks: [
                BankConfig {
                    rx_lanes: 4,
                    tx_lanes: 2,
                    dacs: 1,
                    adcs: 2,
                    has_ref_clock: true,
                    sig_gen_channels: 2,
                    sig_gen_size: 2048,
                },
                BankConfig::default(),
            ],
            ..Self::default()
        }
    }

    /// Cryo RF board: DAC-heavy, no ADCs on the JESD fabric, and a link
    /// status block that runs a few sticky errors even when healthy.
    pub fn cryo() -> Self {
        Self {
            banks: [
                BankConfig {
                    rx_lanes: 6,
                    tx_lanes: 8,
                    dacs: 2,
                    adcs: 0,
                    has_ref_clock: true,
                    sig_gen_channels: 2,
                    sig_gen_size: 4096,
                },
                BankConfig::default(),
            ],
            err_count_threshold: 4,
            ..Self::default()
        }
    }
}

struct BankIo<B> {
    bank: usize,
    daq: DaqMux<B>,
    engine: WaveformEngine<B>,
}

/// Live handles to everything on one carrier, built once from a topology.
///
/// A bring-up run takes `&mut Board`, so exclusive access to the hardware
/// for the duration of the sequence is enforced by the borrow checker; there
/// is deliberately no way to share a `Board` across threads.
pub struct Board<B> {
    topology: BoardTopology,
    links: Vec<Box<dyn LinkChannel>>,
    converters: Vec<Box<dyn Converter>>,
    ref_clocks: Vec<Box<dyn RefClock>>,
    bank_io: Vec<BankIo<B>>,
    sig_gens: Vec<DacSigGen<B>>,
}

impl<B: Bus + Clone + 'static> Board<B> {
    pub fn new(topology: BoardTopology, bus: B) -> Self {
        Self::with_init_step(topology, bus, None)
    }

    /// As [`Board::new`], with every chip's internal settle delay overridden
    /// (simulation and tests use [`Duration::ZERO`]).
    pub fn with_init_step(topology: BoardTopology, bus: B, init_step: Option<Duration>) -> Self {
        let mut links: Vec<Box<dyn LinkChannel>> = Vec::new();
        let mut converters: Vec<Box<dyn Converter>> = Vec::new();
        let mut ref_clocks: Vec<Box<dyn RefClock>> = Vec::new();
        let mut bank_io = Vec::new();
        let mut sig_gens = Vec::new();

        for (bank, cfg) in topology.banks.iter().enumerate() {
            if cfg.rx_lanes > 0 {
                links.push(Box::new(JesdLink::new(
                    bus.clone(),
                    map::JESD[bank],
                    bank,
                    Direction::Rx,
                    cfg.rx_lanes,
                )));
            }
            if cfg.tx_lanes > 0 {
                links.push(Box::new(JesdLink::new(
                    bus.clone(),
                    map::JESD[bank] + map::JESD_TX,
                    bank,
                    Direction::Tx,
                    cfg.tx_lanes,
                )));
            }

            for j in 0..cfg.dacs {
                let base = map::AMC_BAY[bank] + map::DAC + j * map::DAC_STRIDE;
                let mut dac = Dac38J84::new(bus.clone(), base, bank, j as usize);
                if let Some(step) = init_step {
                    dac = dac.with_step(step);
                }
                converters.push(Box::new(dac));
            }
            for j in 0..cfg.adcs {
                let base = map::AMC_BAY[bank] + map::ADC + j * map::ADC_STRIDE;
                let mut adc = Adc32Rf45::new(bus.clone(), base, bank, j as usize);
                if let Some(step) = init_step {
                    adc = adc.with_step(step);
                }
                converters.push(Box::new(adc));
            }
            if cfg.has_ref_clock {
                ref_clocks.push(Box::new(Lmk04828::new(
                    bus.clone(),
                    map::AMC_BAY[bank] + map::LMK,
                    bank,
                )));
            }

            bank_io.push(BankIo {
                bank,
                daq: DaqMux::new(bus.clone(), map::DAQ_MUX[bank], bank),
                engine: WaveformEngine::new(bus.clone(), map::WAVE_ENGINE[bank], topology.waveform_slots),
            });

            if cfg.sig_gen_channels > 0 && cfg.sig_gen_size > 0 {
                sig_gens.push(DacSigGen::new(
                    bus.clone(),
                    map::SIG_GEN[bank],
                    bank,
                    cfg.sig_gen_channels,
                    cfg.sig_gen_size,
                ));
            }
        }

        Self {
            topology,
            links,
            converters,
            ref_clocks,
            bank_io,
            sig_gens,
        }
    }
}

impl<B: Bus> Board<B> {
    pub fn topology(&self) -> &BoardTopology {
        &self.topology
    }

    pub fn links(&self) -> &[Box<dyn LinkChannel>] {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut [Box<dyn LinkChannel>] {
        &mut self.links
    }

    pub fn converters(&self) -> &[Box<dyn Converter>] {
        &self.converters
    }

    pub fn converters_mut(&mut self) -> &mut [Box<dyn Converter>] {
        &mut self.converters
    }

    pub fn ref_clocks_mut(&mut self) -> &mut [Box<dyn RefClock>] {
        &mut self.ref_clocks
    }

    /// Point every signal generator at a waveform file for the next reload.
    pub fn set_waveform_csv(&mut self, path: &std::path::Path) {
        for sg in &mut self.sig_gens {
            sg.set_csv_path(path);
        }
    }

    /// Fresh status snapshot of every present channel.
    pub fn link_status(&mut self) -> Result<Vec<(String, LinkStatus)>, BusError> {
        self.links
            .iter_mut()
            .map(|l| Ok((l.label(), l.query_status()?)))
            .collect()
    }

    /// Best-effort sticky alarm clear across the converters. The gate is
    /// raised around the access so a chip parked disabled for crosstalk
    /// reasons still gets its alarms cleared, then goes quiet again.
    pub fn clear_converter_alarms(&mut self) {
        for c in &mut self.converters {
            let enabled = c.enabled();
            c.set_enabled(true);
            if let Err(e) = c.clear_alarms() {
                warn!(device = %c.id(), error = %e, "alarm clear failed");
            }
            c.set_enabled(enabled);
        }
    }

    /// Reload configured waveforms. Never fatal.
    pub fn reload_sig_gens(&mut self) {
        for sg in &mut self.sig_gens {
            if let Err(e) = sg.reload() {
                warn!(error = %e, "waveform reload failed");
            }
        }
    }

    /// Equalize each active bank's DAQ buffer size to the smallest usable
    /// waveform-engine window. Returns the per-bank word count programmed,
    /// `None` where nothing was touched.
    pub fn reconcile_buffers(&mut self) -> Result<Vec<Option<Words32<u32>>>, BusError> {
        let mut programmed = Vec::with_capacity(self.bank_io.len());
        for io in &mut self.bank_io {
            if !self.topology.banks[io.bank].active() {
                programmed.push(None);
                continue;
            }
            let slots = io.engine.read_slots()?;
            match min_buffer_bytes(&slots) {
                Some(bytes) => {
                    let words = bytes.into();
                    io.daq.set_buffer_size(words)?;
                    programmed.push(Some(words));
                }
                None => {
                    debug!(bank = io.bank, "no usable waveform slots, buffer size left alone");
                    programmed.push(None);
                }
            }
        }
        Ok(programmed)
    }

    /// Software DAQ trigger across all banks.
    pub fn trigger_daq(&mut self) -> Result<(), BusError> {
        for io in &mut self.bank_io {
            io.daq.trigger()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use amcup_io::{FakeBus, SharedBus, units::Bytes};

    use super::*;
    use crate::daq::BufferSlot;

    fn board(topology: BoardTopology) -> (Board<SharedBus<FakeBus>>, SharedBus<FakeBus>) {
        let bus = SharedBus::new(FakeBus::new());
        let board = Board::with_init_step(topology, bus.clone(), Some(Duration::ZERO));
        (board, bus)
    }

    #[test]
    fn generic_board_builds_expected_devices() {
        let (board, _) = board(BoardTopology::generic_adc_dac());
        assert_eq!(board.links().len(), 2);
        assert_eq!(board.converters().len(), 3);
        assert_eq!(board.ref_clocks.len(), 1);
        assert_eq!(board.sig_gens.len(), 1);
    }

    #[test]
    fn inactive_bank_gets_no_links() {
        let (board, _) = board(BoardTopology::default());
        assert!(board.links().is_empty());
        assert!(board.converters().is_empty());
    }

    #[test]
    fn reconcile_programs_min_window_on_active_banks_only() {
        let (mut board, bus) = board(BoardTopology::generic_adc_dac());
        bus.with(|b| {
            let slot = |enabled, start, end| BufferSlot {
                enabled,
                start: Bytes(start),
                end: Bytes(end),
            };
            WaveformEngine::<SharedBus<FakeBus>>::seed_slot(
                b,
                map::WAVE_ENGINE[0],
                0,
                slot(true, 0, 1024),
            );
            WaveformEngine::<SharedBus<FakeBus>>::seed_slot(
                b,
                map::WAVE_ENGINE[0],
                1,
                slot(true, 0, 512),
            );
            WaveformEngine::<SharedBus<FakeBus>>::seed_slot(
                b,
                map::WAVE_ENGINE[0],
                2,
                slot(false, 0, 99999),
            );
        });
        let programmed = board.reconcile_buffers().unwrap();
        assert_eq!(programmed, vec![Some(Words32(128)), None]);
    }

    #[test]
    fn reconcile_skips_bank_with_no_usable_slots() {
        let (mut board, bus) = board(BoardTopology::generic_adc_dac());
        bus.with(|b| b.set(map::DAQ_MUX[0] + 0x00C, 777));
        let programmed = board.reconcile_buffers().unwrap();
        assert_eq!(programmed, vec![None, None]);
        // caller's existing value untouched
        bus.with(|b| assert_eq!(b.get(map::DAQ_MUX[0] + 0x00C), 777));
    }
}
