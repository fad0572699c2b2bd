//! # Ghostpeer
//!
//! A command-line tool that simulates BitTorrent download and upload
//! activity towards a tracker, without transferring any data. It announces a
//! plausible but synthetic progress curve so that tracker-side statistics
//! reflect participation.
//!
//! ## Usage
//!
//! ```bash
//! ghostpeer -d 5M -u 2M foo.torrent
//! ```
//!
//! The speeds accept the usual unit suffixes (`5M` = 5 MiB/s, `2MB` =
//! 2 MB/s). The session runs until interrupted; on Ctrl-C it sends one final
//! stopped announce and exits.
//!
//! ## Architecture
//!
//! - **Main thread**: Parses arguments, loads the torrent, runs the engine
//! - **Engine loop**: Waits on whichever of {next announce deadline,
//!   interrupt} occurs first; at most one announce is in flight at a time
//! - **Signal handler**: Forwards Ctrl-C into a channel the loop selects on
//!
//! Aside from the transfer speeds being randomized, no attempt is made at
//! avoiding detection; pointing this tool at popular torrents is
//! recommended.

#[macro_use]
extern crate log;

mod engine;
mod session;
mod size;
mod torrent;
mod tracker;

use crate::engine::Engine;
use crate::session::Config;
use crate::size::{format_size, parse_size, Base};
use crate::torrent::Metainfo;
use crate::tracker::HttpTracker;

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use rand::rngs::StdRng;
use rand::SeedableRng;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Simulates BitTorrent download/upload activity towards a tracker, without transferring any data."
)]
struct Args {
    /// Path to the .torrent file
    torrent: PathBuf,

    /// Simulated download speed in bytes/s, e.g. "5M" (MiB) or "5MB" (MB)
    #[arg(short, long, value_parser = parse_speed)]
    down: u64,

    /// Simulated upload speed in bytes/s, e.g. "2M" (MiB) or "2MB" (MB)
    #[arg(short, long, value_parser = parse_speed)]
    up: u64,

    /// Fraction by which instantaneous speeds deviate from nominal
    #[arg(long, default_value_t = 0.3)]
    margin: f64,

    /// Stall the simulation when the tracker reports fewer seeders
    #[arg(long, default_value_t = 1)]
    min_seeders: u32,

    /// Stall the simulation when the tracker reports fewer leechers
    #[arg(long, default_value_t = 1)]
    min_leechers: u32,
}

/// Parse a speed flag, rejecting zero and negative values.
fn parse_speed(s: &str) -> Result<u64, String> {
    match parse_size(s) {
        Ok(n) if n > 0 => Ok(n as u64),
        Ok(_) => Err("speed must be positive".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn run(args: Args) -> Result<()> {
    if !args.margin.is_finite() || args.margin < 0.0 {
        return Err(anyhow!("margin must be a non-negative fraction"));
    }

    // Load the torrent descriptor; a malformed document is fatal here,
    // before any session begins
    let meta = Metainfo::load(&args.torrent)?;

    info!("Torrent name: {}", meta.name);
    info!("Torrent size: {}", format_size(meta.length, Base::Binary));

    // Forward Ctrl-C into a channel the engine loop selects on
    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;

    let config = Config {
        down_speed: args.down,
        up_speed: args.up,
        margin: args.margin,
        min_seeders: args.min_seeders,
        min_leechers: args.min_leechers,
    };

    let client = HttpTracker::new()?;
    let rng = StdRng::from_entropy();

    Engine::new(meta, config, client, rng).run(&shutdown_rx)
}

fn main() {
    // Initialize logger, announces are visible unless RUST_LOG lowers them
    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }

    // Exit success
    std::process::exit(0);
}
