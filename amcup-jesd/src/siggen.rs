use std::path::{Path, PathBuf};

use amcup_io::{Bus, BusError};
use eyre::{Result, WrapErr, eyre};
use tracing::{info, warn};

/// Software-defined waveform generator feeding the DAC streams.
///
/// Waveform memory is one window per channel; the control block carries the
/// per-channel period and an enable mask that must be dropped while the
/// memories are being rewritten.
mod regs {
    pub const ENABLE_MASK: u32 = 0x000;
    pub const SW_TRIGGER: u32 = 0x004;

    pub fn period_size(ch: u32) -> u32 {
        0x010 + ch * 4
    }
    pub fn waveform(ch: u32) -> u32 {
        0x0100_0000 * (ch + 1)
    }
}

pub struct DacSigGen<B> {
    bus: B,
    base: u32,
    bank: usize,
    channels: u32,
    buff_size: u32,
    csv_path: Option<PathBuf>,
}

impl<B: Bus> DacSigGen<B> {
    pub fn new(bus: B, base: u32, bank: usize, channels: u32, buff_size: u32) -> Self {
        Self {
            bus,
            base,
            bank,
            channels,
            buff_size,
            csv_path: None,
        }
    }

    pub fn set_csv_path(&mut self, path: impl Into<PathBuf>) {
        self.csv_path = Some(path.into());
    }

    /// Reload from the configured file, if one is configured. Returns the
    /// number of samples per channel written.
    pub fn reload(&mut self) -> Result<Option<usize>> {
        match self.csv_path.clone() {
            Some(path) => self.load_csv(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Load a comma-separated waveform file, one column per channel.
    pub fn load_csv(&mut self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading waveform file {}", path.display()))?;

        let mut rows: Vec<Vec<u32>> = Vec::new();
        let mut dropped = 0usize;
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if rows.len() as u32 >= self.buff_size {
                dropped += 1;
                continue;
            }
            let row = line
                .split(',')
                .take(self.channels as usize)
                .map(|field| {
                    field
                        .trim()
                        .parse::<i32>()
                        .map(|v| v as u32)
                        .map_err(|e| eyre!("line {}: {e}", lineno + 1))
                })
                .collect::<Result<Vec<u32>>>()?;
            if row.len() < self.channels as usize {
                return Err(eyre!(
                    "line {}: {} columns, need {}",
                    lineno + 1,
                    row.len(),
                    self.channels
                ));
            }
            rows.push(row);
        }
        if dropped > 0 {
            warn!(
                dropped,
                capacity = self.buff_size,
                "waveform file longer than buffer, extra samples dropped"
            );
        }
        if rows.is_empty() {
            return Err(eyre!("waveform file {} is empty", path.display()));
        }

        self.program(&rows)?;
        info!(bank = self.bank, samples = rows.len(), "waveform loaded");
        Ok(rows.len())
    }

    fn program(&mut self, rows: &[Vec<u32>]) -> Result<(), BusError> {
        // keep outputs quiet while the memories are inconsistent; the mask
        // must come back even when a write fails partway through
        let mask = self.bus.read(self.base + regs::ENABLE_MASK)?;
        self.bus.write(self.base + regs::ENABLE_MASK, 0)?;

        let result = self.write_waveforms(rows);
        let restore = self.bus.write(self.base + regs::ENABLE_MASK, mask);
        result.and(restore)
    }

    fn write_waveforms(&mut self, rows: &[Vec<u32>]) -> Result<(), BusError> {
        for ch in 0..self.channels {
            let mem = self.base + regs::waveform(ch);
            for (i, row) in rows.iter().enumerate() {
                self.bus.write(mem + 4 * i as u32, row[ch as usize])?;
            }
            self.bus
                .write(self.base + regs::period_size(ch), rows.len() as u32 - 1)?;
        }
        Ok(())
    }

    /// Trigger all channels from software.
    pub fn sw_trigger(&mut self) -> Result<(), BusError> {
        let all = (1u32 << self.channels) - 1;
        self.bus.write(self.base + regs::SW_TRIGGER, all)?;
        self.bus.write(self.base + regs::SW_TRIGGER, 0)
    }
}

#[cfg(test)]
mod tests {
    use amcup_io::{FakeBus, SharedBus};

    use super::*;

    const BASE: u32 = 0x6000_0000;

    fn siggen(bus: &SharedBus<FakeBus>, buff_size: u32) -> DacSigGen<SharedBus<FakeBus>> {
        DacSigGen::new(bus.clone(), BASE, 0, 2, buff_size)
    }

    fn write_csv(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("amcup-siggen-{name}.csv"));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_programs_both_channels() {
        let bus = SharedBus::new(FakeBus::new());
        bus.with(|b| b.set(BASE + regs::ENABLE_MASK, 0b11));
        let path = write_csv("basic", "0,100\n1,-100\n2,50\n");

        let samples = siggen(&bus, 16).load_csv(&path).unwrap();
        assert_eq!(samples, 3);
        bus.with(|b| {
            assert_eq!(b.get(BASE + regs::waveform(0) + 4), 1);
            assert_eq!(b.get(BASE + regs::waveform(1) + 4), -100i32 as u32);
            assert_eq!(b.get(BASE + regs::period_size(0)), 2);
            // mask dropped during the load, then restored
            assert_eq!(b.get(BASE + regs::ENABLE_MASK), 0b11);
            assert!(!b.write_positions(BASE + regs::ENABLE_MASK, 0).is_empty());
        });
    }

    #[test]
    fn rows_past_capacity_are_dropped() {
        let bus = SharedBus::new(FakeBus::new());
        let path = write_csv("overflow", "0,0\n1,1\n2,2\n3,3\n");
        let samples = siggen(&bus, 2).load_csv(&path).unwrap();
        assert_eq!(samples, 2);
        bus.with(|b| assert_eq!(b.get(BASE + regs::period_size(0)), 1));
    }

    #[test]
    fn short_row_is_an_error() {
        let bus = SharedBus::new(FakeBus::new());
        let path = write_csv("short", "0,1\n7\n");
        assert!(siggen(&bus, 16).load_csv(&path).is_err());
    }

    #[test]
    fn enable_mask_restored_when_programming_fails() {
        let bus = SharedBus::new(FakeBus::new());
        bus.with(|b| {
            b.set(BASE + regs::ENABLE_MASK, 0b11);
            // first sample write of channel 0 dies on the bus
            b.fail_at(BASE + regs::waveform(0));
        });
        let path = write_csv("failed-load", "0,1\n2,3\n");

        assert!(siggen(&bus, 16).load_csv(&path).is_err());
        bus.with(|b| assert_eq!(b.get(BASE + regs::ENABLE_MASK), 0b11));
    }

    #[test]
    fn sw_trigger_hits_all_channels() {
        let bus = SharedBus::new(FakeBus::new());
        siggen(&bus, 16).sw_trigger().unwrap();
        bus.with(|b| {
            assert_eq!(b.write_positions(BASE + regs::SW_TRIGGER, 0b11).len(), 1);
            assert_eq!(b.get(BASE + regs::SW_TRIGGER), 0);
        });
    }

    #[test]
    fn reload_without_path_is_a_no_op() {
        let bus = SharedBus::new(FakeBus::new());
        assert!(siggen(&bus, 16).reload().unwrap().is_none());
        bus.with(|b| assert!(b.journal().is_empty()));
    }
}
