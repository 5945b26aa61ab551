use std::{path::PathBuf, time::Duration};

use amcup_io::{FakeBus, SharedBus};
use amcup_jesd::{Board, BoardTopology, Bringup, Timings, sim};
use clap::Parser;
use color_eyre::Result;

use crate::cli_helpers::LaneSpec;

mod cli_helpers;

#[derive(clap::Parser)]
struct Args {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Args)]
struct GlobalOpts {
    #[arg(long, default_value = "generic-adc-dac", global = true)]
    board: BoardPreset,

    /// Override bank 0 lane counts, as RX:TX
    #[arg(long, global = true)]
    lanes: Option<LaneSpec>,

    /// Collapse every settle wait to zero (simulation only)
    #[arg(long, global = true)]
    instant: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum BoardPreset {
    GenericAdcDac,
    Cryo,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Run the full link bring-up sequence until every channel locks
    BringUp(BringUp),
    /// Snapshot every channel's lock status
    Status,
    /// Fire a software DAQ trigger on every bank
    Trigger,
    /// Equalize DAQ buffer sizes against the waveform-engine windows
    Reconcile,
}

#[derive(clap::Args)]
struct BringUp {
    /// Waveform CSV to load into the signal generators after lock
    #[arg(long)]
    waveform: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging()?;
    let Args { global, command } = Args::parse();

    let topology = topology(global.board, global.lanes);
    // the register image of a healthy carrier stands in for the real
    // board's register transport
    let bus = SharedBus::new(sim::locked_board(&topology));
    let (mut board, timings) = if global.instant {
        (
            Board::with_init_step(topology, bus, Some(Duration::ZERO)),
            Timings::instant(),
        )
    } else {
        (Board::new(topology, bus), Timings::default())
    };

    run(command, &mut board, timings)
}

fn topology(preset: BoardPreset, lanes: Option<LaneSpec>) -> BoardTopology {
    let mut topology = match preset {
        BoardPreset::GenericAdcDac => BoardTopology::generic_adc_dac(),
        BoardPreset::Cryo => BoardTopology::cryo(),
    };
    if let Some(LaneSpec { rx, tx }) = lanes {
        topology.banks[0].rx_lanes = rx;
        topology.banks[0].tx_lanes = tx;
    }
    topology
}

fn run(command: CliCommand, board: &mut Board<SharedBus<FakeBus>>, timings: Timings) -> Result<()> {
    match command {
        CliCommand::BringUp(args) => {
            if let Some(path) = &args.waveform {
                board.set_waveform_csv(path);
            }
            let report = Bringup::new(timings).run(board)?;
            println!("locked after {} attempt(s)", report.attempts);
            print_status(board.topology().err_count_threshold, report.channels);
        }
        CliCommand::Status => {
            let channels = board.link_status()?;
            print_status(board.topology().err_count_threshold, channels);
        }
        CliCommand::Trigger => {
            board.trigger_daq()?;
        }
        CliCommand::Reconcile => {
            for (bank, words) in board.reconcile_buffers()?.iter().enumerate() {
                match words {
                    Some(w) => println!("bank {bank}: {} words", w.0),
                    None => println!("bank {bank}: left alone"),
                }
            }
        }
    }

    Ok(())
}

fn print_status(threshold: u32, channels: Vec<(String, amcup_jesd::LinkStatus)>) {
    for (label, status) in channels {
        let faults = status.faults(threshold);
        if faults.is_empty() {
            println!("{label:>10}: locked");
        } else {
            println!("{label:>10}: {faults}");
        }
    }
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .with(tracing_error::ErrorLayer::default())
        .init();
    color_eyre::install()?;
    Ok(())
}
