bitflags::bitflags! {
    /// Conditions keeping a channel out of lock. Empty means locked.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LockFaults: u8 {
        const DATA_INVALID  = 1 << 0;
        const POSITION_ERR  = 1 << 1;
        const ALIGN_ERR     = 1 << 2;
        /// SYSREF period min/max disagree, i.e. the reference is jittering
        /// or was resampled mid-measurement.
        const SYSREF_JITTER = 1 << 3;
        /// Sticky error counter above the board's configured threshold.
        const ERR_COUNT     = 1 << 4;
    }
}

impl std::fmt::Display for LockFaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("locked");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

/// Snapshot of one JESD204B channel, refreshed only on explicit query.
///
/// Two back-to-back queries may legitimately differ while a link is still
/// training; never cache one of these.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub data_valid: bool,
    pub position_err: bool,
    pub align_err: bool,
    pub sysref_period_min: u32,
    pub sysref_period_max: u32,
    pub pending_err_count: u32,
}

impl LinkStatus {
    /// The lock predicate. Boards disagree on how many sticky errors are
    /// tolerable, so the threshold comes in as configuration.
    pub fn faults(&self, err_count_threshold: u32) -> LockFaults {
        let mut faults = LockFaults::empty();
        if !self.data_valid {
            faults |= LockFaults::DATA_INVALID;
        }
        if self.position_err {
            faults |= LockFaults::POSITION_ERR;
        }
        if self.align_err {
            faults |= LockFaults::ALIGN_ERR;
        }
        if self.sysref_period_min != self.sysref_period_max {
            faults |= LockFaults::SYSREF_JITTER;
        }
        if self.pending_err_count > err_count_threshold {
            faults |= LockFaults::ERR_COUNT;
        }
        faults
    }

    pub fn locked(&self, err_count_threshold: u32) -> bool {
        self.faults(err_count_threshold).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good() -> LinkStatus {
        LinkStatus {
            data_valid: true,
            position_err: false,
            align_err: false,
            sysref_period_min: 7,
            sysref_period_max: 7,
            pending_err_count: 0,
        }
    }

    #[test]
    fn good_status_is_locked() {
        assert!(good().locked(0));
        assert_eq!(good().faults(0), LockFaults::empty());
    }

    #[test]
    fn each_field_flips_the_judgment_alone() {
        let cases = [
            (
                LinkStatus { data_valid: false, ..good() },
                LockFaults::DATA_INVALID,
            ),
            (
                LinkStatus { position_err: true, ..good() },
                LockFaults::POSITION_ERR,
            ),
            (
                LinkStatus { align_err: true, ..good() },
                LockFaults::ALIGN_ERR,
            ),
            (
                LinkStatus { sysref_period_max: 8, ..good() },
                LockFaults::SYSREF_JITTER,
            ),
            (
                LinkStatus { pending_err_count: 1, ..good() },
                LockFaults::ERR_COUNT,
            ),
        ];
        for (status, expected) in cases {
            assert_eq!(status.faults(0), expected);
            assert!(!status.locked(0));
        }
    }

    #[test]
    fn err_count_threshold_is_per_board() {
        let status = LinkStatus { pending_err_count: 4, ..good() };
        assert!(!status.locked(0));
        assert!(!status.locked(3));
        assert!(status.locked(4));
    }
}
