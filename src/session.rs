//! # Announce Session State
//!
//! This module holds the mutable state of one announce session and the rules
//! that evolve it between announces:
//!
//! - **Progress accumulation**: Elapsed wall-clock time times the current
//!   instantaneous rates, with the download capped at the torrent size
//! - **Event sequencing**: Which lifecycle event the next announce carries
//! - **Speed noise**: Instantaneous rates drawn around the nominal speeds
//! - **Peer gating**: Progress freezes while the swarm is too small
//!
//! All mutation goes through the engine's tick sequence; there is exactly one
//! session per process and no state outside this struct.

use crate::tracker::{AnnounceResponse, Event, HASH_SIZE};

use rand::Rng;

use std::time::{Duration, Instant};

/// Runtime configuration for a session, validated at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Nominal download speed in bytes per second, non-zero
    pub down_speed: u64,
    /// Nominal upload speed in bytes per second, non-zero
    pub up_speed: u64,
    /// Fraction by which instantaneous rates may deviate from nominal
    pub margin: f64,
    /// Minimum seeder count before progress stalls
    pub min_seeders: u32,
    /// Minimum leecher count before progress stalls
    pub min_leechers: u32,
}

/// Mutable state of one announce session.
///
/// `downloaded` never exceeds the torrent size and both counters only grow.
/// `started`, `completed` and `stalled` record where the session is in its
/// lifecycle; the rates are the bytes-per-second currently in effect.
#[derive(Debug)]
pub struct Session {
    /// 20-byte identifier generated once at session start
    pub peer_id: [u8; HASH_SIZE],
    /// Bytes reported as downloaded so far
    pub downloaded: u64,
    /// Bytes reported as uploaded so far, unbounded
    pub uploaded: u64,
    /// True after the first successful announce
    pub started: bool,
    /// True once the download has reached the torrent size
    pub completed: bool,
    /// True while the last known peer counts were below the thresholds
    pub stalled: bool,
    /// Current instantaneous download rate in bytes per second
    pub down_rate: f64,
    /// Current instantaneous upload rate in bytes per second
    pub up_rate: f64,
    /// When progress was last accrued, unset before the first announce
    pub last_tick: Option<Instant>,
    /// Delay until the next scheduled announce
    pub next_interval: Duration,
}

impl Session {
    /// Create a fresh session with a random peer identity.
    ///
    /// # Arguments
    ///
    /// * `rng` - The session's random source.
    ///
    pub fn new(rng: &mut impl Rng) -> Session {
        let mut peer_id = [0u8; HASH_SIZE];
        rng.fill(&mut peer_id[..]);

        Session {
            peer_id,
            downloaded: 0,
            uploaded: 0,
            started: false,
            completed: false,
            stalled: false,
            down_rate: 0.0,
            up_rate: 0.0,
            last_tick: None,
            next_interval: Duration::ZERO,
        }
    }

    /// Accrue simulated progress for an elapsed interval.
    ///
    /// The download grows by `elapsed * down_rate` up to `total_size`; the
    /// upload grows by `elapsed * up_rate` without bound. No progress accrues
    /// while the session is stalled.
    ///
    /// # Arguments
    ///
    /// * `elapsed` - Seconds since progress was last accrued.
    /// * `total_size` - Torrent size in bytes, the download cap.
    ///
    pub fn advance(&mut self, elapsed: f64, total_size: u64) {
        if self.stalled || elapsed <= 0.0 {
            return;
        }

        let downloaded = self.downloaded + (elapsed * self.down_rate) as u64;
        self.downloaded = downloaded.min(total_size);
        self.uploaded += (elapsed * self.up_rate) as u64;
    }

    /// Derive the lifecycle event for the next announce.
    ///
    /// Returns `Started` until the first announce has been acknowledged,
    /// `Completed` exactly once on the tick where the download first reaches
    /// `total_size` (and records the completion), `None` otherwise. The
    /// terminal `Stopped` event is issued by the engine's shutdown path, not
    /// derived here.
    pub fn next_event(&mut self, total_size: u64) -> Event {
        if !self.started {
            return Event::Started;
        }
        if self.downloaded == total_size && !self.completed {
            self.completed = true;
            return Event::Completed;
        }
        Event::None
    }

    /// Apply a successful tracker response: peer gating, rate redraw and the
    /// advertised interval.
    ///
    /// The session stalls when either peer count is below its configured
    /// minimum; both rates drop to zero until a later response lifts the
    /// gate. Otherwise the upload rate is redrawn unconditionally and the
    /// download rate is redrawn unless there is nothing left to download.
    pub fn apply_response(
        &mut self,
        response: &AnnounceResponse,
        config: &Config,
        rng: &mut impl Rng,
        total_size: u64,
    ) {
        self.stalled =
            response.seeders < config.min_seeders || response.leechers < config.min_leechers;

        if self.stalled {
            self.down_rate = 0.0;
            self.up_rate = 0.0;
        } else {
            self.down_rate = if self.downloaded == total_size {
                0.0
            } else {
                perturb(config.down_speed as f64, config.margin, rng)
            };
            self.up_rate = perturb(config.up_speed as f64, config.margin, rng);
        }

        self.next_interval = Duration::from_secs(u64::from(response.interval));
    }
}

/// Randomize a nominal rate within a margin.
///
/// Draws uniformly in `[-margin, +margin]` and returns
/// `nominal * (1 + draw)`, so a margin of 0.25 yields rates within ±25% of
/// nominal. A zero margin returns the nominal rate unchanged.
pub fn perturb(nominal: f64, margin: f64, rng: &mut impl Rng) -> f64 {
    nominal * (1.0 + rng.gen_range(-margin..=margin))
}
