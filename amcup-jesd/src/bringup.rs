use std::time::Duration;

use amcup_io::Bus;
use tracing::{debug, info, warn};

use crate::{
    link::Direction,
    status::{LinkStatus, LockFaults},
    topology::Board,
};

/// Total attempt budget: one initial pass plus seven retries. Repeated
/// identical failures past this point indicate a hardware fault that more
/// software retries will not fix.
pub const MAX_ATTEMPTS: u32 = 8;

/// Physically motivated settle times. These are per-board constants, not
/// tuning knobs: shortening them risks a false "locked" reading while a PLL
/// or SerDes is still training.
#[derive(Clone, Copy, Debug)]
pub struct Timings {
    /// After powering the reference distributor chip back up.
    pub reference_settle: Duration,
    /// After enabling SYSREF (and its sync pulse).
    pub sysref_settle: Duration,
    /// After re-enabling outputs, before the first status poll.
    pub output_settle: Duration,
    /// Between VerifyLock polls.
    pub verify_poll: Duration,
    /// VerifyLock poll budget.
    pub verify_polls: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reference_settle: Duration::from_secs(1),
            sysref_settle: Duration::from_millis(250),
            output_settle: Duration::from_millis(100),
            verify_poll: Duration::from_millis(100),
            verify_polls: 10,
        }
    }
}

impl Timings {
    /// Every wait collapsed to zero. Only meaningful against a simulated
    /// bus; real hardware needs the defaults.
    pub fn instant() -> Self {
        Self {
            reference_settle: Duration::ZERO,
            sysref_settle: Duration::ZERO,
            output_settle: Duration::ZERO,
            verify_poll: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct Failure {
    pub component: String,
    pub reason: FailureReason,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.component, self.reason)
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum FailureReason {
    #[error("init hook failed: {0}")]
    InitFailed(String),
    #[error("not locked: {0}")]
    NotLocked(LockFaults),
    #[error("register io failed: {0}")]
    Io(String),
}

/// All attempts exhausted; carries the final attempt's complete failure
/// list. The one error a caller has to handle.
#[derive(Debug, thiserror::Error)]
#[error("bring-up gave up after {attempts} attempts ({} failing components)", .failures.len())]
pub struct BringupExhausted {
    pub attempts: u32,
    pub failures: Vec<Failure>,
}

/// What a successful bring-up looked like, for display; callers that only
/// care about success/failure can drop it.
#[derive(Debug)]
pub struct BringupReport {
    pub attempts: u32,
    pub channels: Vec<(String, LinkStatus)>,
}

/// Administrative enable state at entry, re-applied on every exit path so a
/// bring-up never changes which devices the caller had gated on.
struct EnableSnapshot {
    links: Vec<bool>,
    converters: Vec<bool>,
}

impl EnableSnapshot {
    fn capture<B: Bus>(board: &Board<B>) -> Self {
        Self {
            links: board.links().iter().map(|l| l.enabled()).collect(),
            converters: board.converters().iter().map(|c| c.enabled()).collect(),
        }
    }

    fn restore<B: Bus>(&self, board: &mut Board<B>) {
        for (link, &enabled) in board.links_mut().iter_mut().zip(&self.links) {
            if let Err(e) = link.set_enabled(enabled) {
                warn!(link = %link.label(), error = %e, "enable restore failed");
            }
        }
        for (conv, &enabled) in board.converters_mut().iter_mut().zip(&self.converters) {
            conv.set_enabled(enabled);
        }
    }
}

/// The bring-up sequencer: drives a board's reference clock, converters and
/// SerDes links from whatever state they were left in to verified-locked,
/// or gives up after [`MAX_ATTEMPTS`] full passes.
///
/// The sequence within one attempt is fixed; no step may be skipped or
/// reordered. In particular SYSREF comes up only after every link reset is
/// released, and outputs come back only after SYSREF has settled. A lock
/// failure always restarts the whole sequence; retrying just the
/// verification cannot clear the bad clock condition that caused it.
pub struct Bringup {
    timings: Timings,
}

impl Default for Bringup {
    fn default() -> Self {
        Self::new(Timings::default())
    }
}

impl Bringup {
    pub fn new(timings: Timings) -> Self {
        Self { timings }
    }

    pub fn run<B: Bus>(&self, board: &mut Board<B>) -> Result<BringupReport, BringupExhausted> {
        let requested = EnableSnapshot::capture(board);
        let result = self.run_attempts(board, &requested);
        requested.restore(board);

        if result.is_ok() {
            board.clear_converter_alarms();
            board.reload_sig_gens();
            if let Err(e) = board.reconcile_buffers() {
                warn!(error = %e, "buffer reconciliation failed");
            }
        }
        result
    }

    fn run_attempts<B: Bus>(
        &self,
        board: &mut Board<B>,
        requested: &EnableSnapshot,
    ) -> Result<BringupReport, BringupExhausted> {
        let mut last_failures = Vec::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(board, requested) {
                Ok(channels) => {
                    info!(attempt, "all links locked");
                    return Ok(BringupReport { attempts: attempt, channels });
                }
                Err(failures) => {
                    for failure in &failures {
                        warn!(attempt, %failure, "bring-up fault");
                    }
                    last_failures = failures;
                    if attempt < MAX_ATTEMPTS {
                        info!(attempt, "re-executing bring-up sequence");
                    }
                }
            }
        }
        Err(BringupExhausted {
            attempts: MAX_ATTEMPTS,
            failures: last_failures,
        })
    }

    /// One full pass: disable, reset, init, release, clock, re-enable,
    /// verify. Faults are aggregated across the whole pass so one attempt
    /// yields a complete diagnostic picture.
    fn attempt<B: Bus>(
        &self,
        board: &mut Board<B>,
        requested: &EnableSnapshot,
    ) -> Result<Vec<(String, LinkStatus)>, Vec<Failure>> {
        let threshold = board.topology().err_count_threshold;
        let mut failures = Vec::new();

        // DisableOutputs: nothing glitchy may reach the converters while
        // resets are asserted
        for link in board.links_mut() {
            if link.direction() == Direction::Tx {
                if let Err(e) = link.set_enabled(false) {
                    push_io(&mut failures, link.label(), e);
                }
            }
        }
        for (i, refclk) in board.ref_clocks_mut().iter_mut().enumerate() {
            if let Err(e) = refclk.power_down_sysref() {
                push_io(&mut failures, format!("RefClock[{i}]"), e);
            }
            if let Err(e) = refclk.power_down_chip() {
                push_io(&mut failures, format!("RefClock[{i}]"), e);
            }
        }

        // AssertLinkReset: RX and TX may share one physical reset line, so
        // both are asserted regardless
        for link in board.links_mut() {
            if let Err(e) = link.assert_reset() {
                push_io(&mut failures, link.label(), e);
            }
        }

        // DeviceSpecificInit: every chip runs even if an earlier one failed
        for conv in board.converters_mut() {
            if let Err(e) = conv.run_init_hook() {
                failures.push(Failure {
                    component: conv.id().to_string(),
                    reason: FailureReason::InitFailed(e.to_string()),
                });
            }
        }

        // DeassertLinkReset
        for link in board.links_mut() {
            if let Err(e) = link.deassert_reset() {
                push_io(&mut failures, link.label(), e);
            }
        }

        // PowerUpReference: chip first, settle, then SYSREF, settle again
        let have_ref = !board.ref_clocks_mut().is_empty();
        for (i, refclk) in board.ref_clocks_mut().iter_mut().enumerate() {
            if let Err(e) = refclk.power_up_chip() {
                push_io(&mut failures, format!("RefClock[{i}]"), e);
            }
        }
        if have_ref {
            std::thread::sleep(self.timings.reference_settle);
        }
        for (i, refclk) in board.ref_clocks_mut().iter_mut().enumerate() {
            if let Err(e) = refclk.power_up_sysref() {
                push_io(&mut failures, format!("RefClock[{i}]"), e);
            }
        }
        if have_ref {
            std::thread::sleep(self.timings.sysref_settle);
        }

        // ReenableOutputs: back to what the caller asked for, with fresh
        // error counters
        for (link, &enabled) in board.links_mut().iter_mut().zip(&requested.links) {
            if let Err(e) = link.set_enabled(enabled) {
                push_io(&mut failures, link.label(), e);
            }
            if let Err(e) = link.clear_errors() {
                push_io(&mut failures, link.label(), e);
            }
        }
        std::thread::sleep(self.timings.output_settle);

        // VerifyLock
        let (channels, lock_failures) = self.verify_lock(board, threshold);
        failures.extend(lock_failures);

        if failures.is_empty() {
            Ok(channels)
        } else {
            Err(failures)
        }
    }

    /// Poll every channel until all lock or the poll budget runs out. Each
    /// poll evaluates every channel (no short-circuit) so the final poll's
    /// fault set covers the whole board.
    fn verify_lock<B: Bus>(
        &self,
        board: &mut Board<B>,
        threshold: u32,
    ) -> (Vec<(String, LinkStatus)>, Vec<Failure>) {
        let mut statuses = Vec::new();
        let mut failures = Vec::new();

        // a zero budget must not skip verification outright
        for poll in 0..self.timings.verify_polls.max(1) {
            statuses.clear();
            failures.clear();

            for link in board.links_mut() {
                let label = link.label();
                match link.query_status() {
                    Ok(status) => {
                        let faults = status.faults(threshold);
                        if !faults.is_empty() {
                            failures.push(Failure {
                                component: label.clone(),
                                reason: FailureReason::NotLocked(faults),
                            });
                        }
                        statuses.push((label, status));
                    }
                    Err(e) => push_io(&mut failures, label, e),
                }
            }

            if failures.is_empty() {
                break;
            }
            debug!(poll, pending = failures.len(), "links not locked yet");
            if poll + 1 < self.timings.verify_polls {
                std::thread::sleep(self.timings.verify_poll);
            }
        }

        (statuses, failures)
    }
}

fn push_io(failures: &mut Vec<Failure>, component: String, err: amcup_io::BusError) {
    failures.push(Failure {
        component,
        reason: FailureReason::Io(err.to_string()),
    });
}

#[cfg(test)]
mod tests {
    use amcup_io::{FakeBus, SharedBus};

    use super::*;
    use crate::{
        chips::{dac38j84, lmk04828},
        link::regs as link_regs,
        topology::{BankConfig, BoardTopology, map},
    };

    const RX_BASE: u32 = 0x4000_0000;
    const TX_BASE: u32 = 0x4100_0000;
    const LMK_BASE: u32 = 0x0002_0000;
    const DAC_BASE: u32 = 0x0000_2000;

    /// One bank, RX=4 / TX=2, one DAC, one reference distributor.
    fn small_board() -> BoardTopology {
        BoardTopology {
            banks: [
                BankConfig {
                    rx_lanes: 4,
                    tx_lanes: 2,
                    dacs: 1,
                    adcs: 0,
                    has_ref_clock: true,
                    ..BankConfig::default()
                },
                BankConfig::default(),
            ],
            ..BoardTopology::default()
        }
    }

    fn board(topology: BoardTopology) -> (Board<SharedBus<FakeBus>>, SharedBus<FakeBus>) {
        let bus = SharedBus::new(FakeBus::new());
        let board = Board::with_init_step(topology, bus.clone(), Some(Duration::ZERO));
        (board, bus)
    }

    fn seed_lock(bus: &SharedBus<FakeBus>, topology: &BoardTopology) {
        bus.with(|b| crate::sim::seed_locked(b, topology));
    }

    fn bringup() -> Bringup {
        Bringup::new(Timings::instant())
    }

    #[test]
    fn locks_on_first_pass_with_exactly_one_sequence() {
        let topology = small_board();
        let (mut board, bus) = board(topology);
        seed_lock(&bus, &topology);

        let report = bringup().run(&mut board).unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.channels.len(), 2);

        bus.with(|b| {
            // one SYSREF power-up, one sync pulse
            let sysref_up = b.write_positions(LMK_BASE + lmk04828::regs::SYSREF_PD, 0);
            assert_eq!(sysref_up.len(), 1);
            assert_eq!(
                b.write_positions(LMK_BASE + lmk04828::regs::SYNC_PULSE, 1).len(),
                1
            );
            // the DAC init hook ran exactly once
            assert_eq!(
                b.write_positions(DAC_BASE + dac38j84::regs::INIT_JESD, 1).len(),
                1
            );
            // one reset assertion per link
            assert_eq!(b.write_positions(RX_BASE + link_regs::RESET_GTS, 1).len(), 1);
            assert_eq!(b.write_positions(TX_BASE + link_regs::RESET_GTS, 1).len(), 1);
        });
    }

    #[test]
    fn register_trace_orders_deassert_sysref_reenable() {
        let topology = small_board();
        let (mut board, bus) = board(topology);
        seed_lock(&bus, &topology);

        bringup().run(&mut board).unwrap();

        bus.with(|b| {
            let sysref_up = b.write_positions(LMK_BASE + lmk04828::regs::SYSREF_PD, 0);
            let sysref_up = *sysref_up.first().unwrap();
            for base in [RX_BASE, TX_BASE] {
                let deasserts = b.write_positions(base + link_regs::RESET_GTS, 0);
                assert!(!deasserts.is_empty());
                assert!(deasserts.iter().all(|&p| p < sysref_up));
            }
            // every re-enable (full lane mask) comes after SYSREF is up
            for (base, lanes) in [(RX_BASE, 4u32), (TX_BASE, 2)] {
                let reenables = b.write_positions(base + link_regs::ENABLE, (1 << lanes) - 1);
                assert!(!reenables.is_empty());
                assert!(reenables.iter().all(|&p| p > sysref_up));
            }
        });
    }

    #[test]
    fn enable_state_is_restored_on_success() {
        let topology = small_board();
        let (mut board, bus) = board(topology);
        seed_lock(&bus, &topology);

        // caller had the TX channel and the DAC administratively off
        board.links_mut()[1].set_enabled(false).unwrap();
        board.converters_mut()[0].set_enabled(false);

        bringup().run(&mut board).unwrap();

        assert!(board.links()[0].enabled());
        assert!(!board.links()[1].enabled());
        assert!(!board.converters()[0].enabled());
    }

    #[test]
    fn enable_state_is_restored_on_exhaustion() {
        let (mut board, _bus) = board(small_board());
        board.converters_mut()[0].set_enabled(false);
        board.links_mut()[0].set_enabled(false).unwrap();

        // no lock seeding: DataValid stays 0 and every attempt fails
        let err = bringup().run(&mut board).unwrap_err();
        assert_eq!(err.attempts, MAX_ATTEMPTS);

        assert!(!board.links()[0].enabled());
        assert!(board.links()[1].enabled());
        assert!(!board.converters()[0].enabled());
    }

    #[test]
    fn exhaustion_after_exactly_eight_full_passes() {
        let (mut board, bus) = board(small_board());

        let err = bringup().run(&mut board).unwrap_err();
        assert_eq!(err.attempts, 8);
        assert!(
            err.failures
                .iter()
                .any(|f| matches!(f.reason, FailureReason::NotLocked(_)))
        );

        bus.with(|b| {
            // a full pass asserts reset once per link; eight passes, no more
            assert_eq!(b.write_positions(RX_BASE + link_regs::RESET_GTS, 1).len(), 8);
            assert_eq!(b.write_positions(TX_BASE + link_regs::RESET_GTS, 1).len(), 8);
            // and the DAC init dance ran once per pass
            assert_eq!(b.write_positions(DAC_BASE + dac38j84::regs::INIT_JESD, 1).len(), 8);
        });
    }

    #[test]
    fn verify_reports_the_specific_failing_condition() {
        let topology = small_board();
        let (mut board, bus) = board(topology);
        seed_lock(&bus, &topology);
        // RX SYSREF period jitters; everything else is healthy
        bus.with(|b| b.set(RX_BASE + link_regs::SYSREF_PERIOD_MAX, 8));

        let err = bringup().run(&mut board).unwrap_err();
        let rx_faults = err
            .failures
            .iter()
            .find_map(|f| match &f.reason {
                FailureReason::NotLocked(faults) if f.component.contains("Rx") => Some(*faults),
                _ => None,
            })
            .unwrap();
        assert_eq!(rx_faults, LockFaults::SYSREF_JITTER);
        // the healthy TX channel is not in the failure list
        assert!(!err.failures.iter().any(|f| f.component.contains("Tx")));
    }

    #[test]
    fn init_failures_are_aggregated_across_devices() {
        let mut topology = small_board();
        topology.banks[0].dacs = 2;
        let (mut board, bus) = board(topology);

        // both DACs fail their init hooks
        bus.with(|b| {
            b.fail_at(DAC_BASE + dac38j84::regs::ENABLE_TX);
            b.fail_at(DAC_BASE + map::DAC_STRIDE + dac38j84::regs::ENABLE_TX);
        });

        let err = bringup().run(&mut board).unwrap_err();
        let init_failures: Vec<_> = err
            .failures
            .iter()
            .filter(|f| matches!(f.reason, FailureReason::InitFailed(_)))
            .map(|f| f.component.as_str())
            .collect();
        assert_eq!(init_failures, ["Bay[0].DAC[0]", "Bay[0].DAC[1]"]);
    }

    #[test]
    fn alarm_clear_failure_never_escalates() {
        let topology = small_board();
        let (mut board, bus) = board(topology);
        seed_lock(&bus, &topology);
        // sticky lane alarms refuse to clear
        bus.with(|b| b.set(DAC_BASE + dac38j84::regs::LANE_ALARMS, 0xFF));

        assert!(bringup().run(&mut board).is_ok());
    }

    #[test]
    fn zero_poll_budget_still_verifies() {
        let (mut board, _bus) = board(small_board());

        let timings = Timings { verify_polls: 0, ..Timings::instant() };
        let err = Bringup::new(timings).run(&mut board).unwrap_err();
        assert!(
            err.failures
                .iter()
                .any(|f| matches!(f.reason, FailureReason::NotLocked(_)))
        );
    }

    #[test]
    fn locks_on_a_later_poll_within_one_attempt() {
        let topology = small_board();
        let (mut board, bus) = board(topology);
        seed_lock(&bus, &topology);
        // first two polls see RX still training
        bus.with(|b| {
            b.script_read(RX_BASE + link_regs::DATA_VALID, 0);
            b.script_read(RX_BASE + link_regs::DATA_VALID, 0b0001);
        });

        let report = bringup().run(&mut board).unwrap();
        assert_eq!(report.attempts, 1);
    }
}
