use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use color_eyre::eyre::OptionExt;

/// Lane counts for bank 0, written `RX:TX` (e.g. `4:2`).
#[derive(Debug, Clone, Copy)]
pub struct LaneSpec {
    pub rx: u32,
    pub tx: u32,
}

impl FromStr for LaneSpec {
    type Err = color_eyre::eyre::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (rx, tx) = s.split_once(':').ok_or_eyre("no ':'")?;
        let rx = rx.parse()?;
        let tx = tx.parse()?;
        Ok(Self { rx, tx })
    }
}

impl Display for LaneSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.rx, self.tx)
    }
}
