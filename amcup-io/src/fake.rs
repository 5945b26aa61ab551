use std::collections::{HashMap, HashSet, VecDeque};

use crate::bus::{Bus, BusError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read { addr: u32, value: u32 },
    Write { addr: u32, value: u32 },
}

impl Access {
    pub fn addr(self) -> u32 {
        match self {
            Access::Read { addr, .. } | Access::Write { addr, .. } => addr,
        }
    }
}

/// In-memory bus with a transaction journal.
///
/// Reads come from scripted per-address queues first, then from the backing
/// store (default 0). Writes land in the backing store, so read-after-write
/// behaves like an ordinary register unless a script overrides it.
#[derive(Default)]
pub struct FakeBus {
    mem: HashMap<u32, u32>,
    scripted: HashMap<u32, VecDeque<u32>>,
    fail_at: HashSet<u32>,
    journal: Vec<Access>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backing store, without journaling.
    pub fn set(&mut self, addr: u32, value: u32) {
        self.mem.insert(addr, value);
    }

    pub fn get(&self, addr: u32) -> u32 {
        self.mem.get(&addr).copied().unwrap_or(0)
    }

    /// Queue a one-shot read result for `addr`, ahead of the backing store.
    pub fn script_read(&mut self, addr: u32, value: u32) {
        self.scripted.entry(addr).or_default().push_back(value);
    }

    /// Make every transaction touching `addr` fail with a transport error.
    pub fn fail_at(&mut self, addr: u32) {
        self.fail_at.insert(addr);
    }

    pub fn journal(&self) -> &[Access] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Journal positions of every write of `value` to `addr`.
    pub fn write_positions(&self, addr: u32, value: u32) -> Vec<usize> {
        self.journal
            .iter()
            .enumerate()
            .filter(|(_, a)| **a == Access::Write { addr, value })
            .map(|(i, _)| i)
            .collect()
    }

    fn check_fail(&self, addr: u32) -> Result<(), BusError> {
        if self.fail_at.contains(&addr) {
            return Err(BusError::Transport {
                addr,
                reason: "scripted fault".into(),
            });
        }
        Ok(())
    }
}

impl Bus for FakeBus {
    fn read(&mut self, addr: u32) -> Result<u32, BusError> {
        self.check_fail(addr)?;
        let value = match self.scripted.get_mut(&addr).and_then(VecDeque::pop_front) {
            Some(v) => v,
            None => self.get(addr),
        };
        self.journal.push(Access::Read { addr, value });
        Ok(value)
    }

    fn write(&mut self, addr: u32, value: u32) -> Result<(), BusError> {
        self.check_fail(addr)?;
        self.mem.insert(addr, value);
        self.journal.push(Access::Write { addr, value });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_reads_drain_then_fall_back() {
        let mut bus = FakeBus::new();
        bus.set(0x10, 7);
        bus.script_read(0x10, 1);
        bus.script_read(0x10, 2);
        assert_eq!(bus.read(0x10).unwrap(), 1);
        assert_eq!(bus.read(0x10).unwrap(), 2);
        assert_eq!(bus.read(0x10).unwrap(), 7);
    }

    #[test]
    fn journal_keeps_order() {
        let mut bus = FakeBus::new();
        bus.write(0x0, 1).unwrap();
        bus.read(0x4).unwrap();
        assert_eq!(
            bus.journal(),
            &[
                Access::Write { addr: 0x0, value: 1 },
                Access::Read { addr: 0x4, value: 0 },
            ]
        );
    }
}
