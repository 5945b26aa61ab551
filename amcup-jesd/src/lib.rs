pub mod bringup;
pub mod chips;
pub mod daq;
mod device;
pub mod link;
pub mod siggen;
pub mod sim;
mod status;
pub mod topology;

pub use crate::{
    bringup::{Bringup, BringupExhausted, BringupReport, Failure, FailureReason, Timings},
    device::{Converter, DeviceId, DeviceKind, InitError, RefClock},
    link::{Direction, JesdLink, LinkChannel},
    status::{LinkStatus, LockFaults},
    topology::{BankConfig, Board, BoardTopology},
};
