pub mod adc32rf45;
pub mod dac38j84;
pub mod lmk04828;

pub use self::{adc32rf45::Adc32Rf45, dac38j84::Dac38J84, lmk04828::Lmk04828};
