mod bus;
mod fake;
pub mod units;

pub use crate::{
    bus::{Bus, BusError, SharedBus},
    fake::{Access, FakeBus},
};
