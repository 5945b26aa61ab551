use amcup_io::BusError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum DeviceKind {
    #[strum(serialize = "DAC")]
    Dac,
    #[strum(serialize = "ADC")]
    Adc,
    #[strum(serialize = "LMK")]
    RefClock,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceId {
    pub bank: usize,
    pub kind: DeviceKind,
    pub index: usize,
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bay[{}].{}[{}]", self.bank, self.kind, self.index)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("{0}")]
    Chip(String),
}

/// One converter chip (ADC or DAC) attached to a carrier bay.
///
/// `enabled` is a software gate on whether register transactions are issued
/// to the chip at all; several boards drop it after configuration to keep
/// SPI crosstalk away from the analog path. Toggling it is not a reset.
pub trait Converter {
    fn id(&self) -> DeviceId;

    fn enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);

    /// Chip-specific JESD bring-up sequence, including any internal reset
    /// toggling and settle delays. Runs only when the gate is enabled; a
    /// gated-off chip reports success without touching the bus.
    fn run_init_hook(&mut self) -> Result<(), InitError>;

    /// Best-effort sticky alarm clear. Callers log failures and move on.
    fn clear_alarms(&mut self) -> Result<(), InitError>;
}

/// The clock/SYSREF distribution chip.
pub trait RefClock {
    fn power_up_chip(&mut self) -> Result<(), BusError>;
    fn power_down_chip(&mut self) -> Result<(), BusError>;

    /// On some boards this also emits a synchronization pulse, which
    /// perturbs downstream converter phase. Only the bring-up sequence may
    /// call it, at its designated point after all link resets are released.
    fn power_up_sysref(&mut self) -> Result<(), BusError>;
    fn power_down_sysref(&mut self) -> Result<(), BusError>;
}
