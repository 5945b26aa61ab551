use std::{cell::RefCell, rc::Rc};

/// A device that can issue single-beat 32-bit register transactions.
///
/// Transactions are synchronous and blocking; an implementation is allowed to
/// batch internally but must have retired a write before `write` returns and
/// must return fresh data from `read`.
pub trait Bus {
    fn read(&mut self, addr: u32) -> Result<u32, BusError>;
    fn write(&mut self, addr: u32, value: u32) -> Result<(), BusError>;

    /// Write, read back, and compare. Registers with self-clearing bits must
    /// not be verified this way.
    fn write_verify(&mut self, addr: u32, value: u32) -> Result<(), BusError> {
        self.write(addr, value)?;
        let read = self.read(addr)?;
        if read != value {
            return Err(BusError::VerifyMismatch { addr, wrote: value, read });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("transport failure at {addr:#010X}: {reason}")]
    Transport { addr: u32, reason: String },
    #[error("verify mismatch at {addr:#010X}: wrote {wrote:#010X}, read {read:#010X}")]
    VerifyMismatch { addr: u32, wrote: u32, read: u32 },
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn read(&mut self, addr: u32) -> Result<u32, BusError> {
        B::read(&mut *self, addr)
    }

    fn write(&mut self, addr: u32, value: u32) -> Result<(), BusError> {
        B::write(&mut *self, addr, value)
    }
}

/// Cloneable handle to one physical bus, so every device hanging off a
/// carrier shares the same transaction stream. The bring-up model is
/// single-threaded (see `amcup-jesd`), hence `Rc` and not a lock.
pub struct SharedBus<B>(Rc<RefCell<B>>);

impl<B> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self(Rc::new(RefCell::new(bus)))
    }

    /// Borrow the underlying bus directly, e.g. to inspect a
    /// [`crate::FakeBus`] journal after a test run.
    pub fn with<T>(&self, f: impl FnOnce(&mut B) -> T) -> T {
        f(&mut self.0.borrow_mut())
    }
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<B: Bus> Bus for SharedBus<B> {
    fn read(&mut self, addr: u32) -> Result<u32, BusError> {
        self.0.borrow_mut().read(addr)
    }

    fn write(&mut self, addr: u32, value: u32) -> Result<(), BusError> {
        self.0.borrow_mut().write(addr, value)
    }
}
