//! # Announce Engine
//!
//! This module drives the announce session: it accrues simulated progress
//! between ticks, derives the lifecycle event, sends the announce through the
//! transport and schedules the next tick from the tracker's advertised
//! interval.
//!
//! ## Tick Cycle
//!
//! 1. **Accrue**: Elapsed time since the previous tick times the current
//!    rates, skipped while the session is stalled
//! 2. **Sequence**: Derive the event (started / none / completed)
//! 3. **Announce**: Send the progress report to the tracker
//! 4. **Reschedule**: Adopt the advertised interval on success, or a fixed
//!    retry interval on failure
//!
//! ## Retry Policy
//!
//! - The first announce retries indefinitely on a short fixed delay; the
//!   session cannot begin until the tracker has assigned an interval
//! - A failed periodic announce is logged and rescheduled at a fixed retry
//!   interval; accrued progress is kept
//! - The terminal stopped announce is attempted exactly once; its failure is
//!   logged and shutdown proceeds regardless
//!
//! ## Shutdown
//!
//! The run loop blocks on whichever of {next-tick deadline, cancellation}
//! occurs first. Once cancellation is observed, any pending timer is
//! discarded, one stopped announce is sent with the last known progress and
//! the loop exits. The engine is a cooperative single-threaded loop: at most
//! one announce is in flight and no tick is re-entered concurrently.

use crate::session::{Config, Session};
use crate::size::{format_size, Base};
use crate::torrent::Metainfo;
use crate::tracker::{AnnounceClient, AnnounceRequest, Event};

use anyhow::Result;
use crossbeam_channel::{after, select, Receiver};
use rand::Rng;

use std::time::{Duration, Instant};

// Delay between attempts while the first announce keeps failing
const START_RETRY_INTERVAL: Duration = Duration::from_secs(10);
// Delay before the next attempt after a failed periodic announce
const RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Owns the session and drives the tick/announce/schedule cycle.
pub struct Engine<C: AnnounceClient, R: Rng> {
    meta: Metainfo,
    config: Config,
    client: C,
    rng: R,
    session: Session,
}

impl<C: AnnounceClient, R: Rng> Engine<C, R> {
    /// Create an engine with a fresh session.
    ///
    /// # Arguments
    ///
    /// * `meta` - The torrent descriptor announces refer to.
    /// * `config` - Validated speeds, margin and peer thresholds.
    /// * `client` - The announce transport.
    /// * `rng` - The session's random source, seeded once per session.
    ///
    pub fn new(meta: Metainfo, config: Config, client: C, mut rng: R) -> Engine<C, R> {
        let session = Session::new(&mut rng);
        Engine {
            meta,
            config,
            client,
            rng,
            session,
        }
    }

    /// Run the session until cancellation, then perform the shutdown
    /// sequence.
    ///
    /// The first announce is sent immediately; afterwards the loop waits for
    /// the scheduled timer or a message on `shutdown`, whichever comes first.
    /// A timer pending when cancellation arrives is discarded, never fired.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> Result<()> {
        self.tick(Instant::now());

        loop {
            let timer = after(self.session.next_interval);
            select! {
                recv(timer) -> _ => self.tick(Instant::now()),
                recv(shutdown) -> _ => break,
            }
        }

        info!("Quitting...");
        self.stop();
        Ok(())
    }

    /// Run one tick: accrue progress, announce, reschedule.
    fn tick(&mut self, now: Instant) {
        // Accrue progress since the previous attempt. The clock is stamped
        // per attempt so a failed announce never double-counts an interval.
        if let Some(last) = self.session.last_tick {
            let elapsed = now.duration_since(last).as_secs_f64();
            self.session.advance(elapsed, self.meta.length);
        }
        self.session.last_tick = Some(now);

        let event = self.session.next_event(self.meta.length);
        self.announce(event);
    }

    /// Send one announce and apply the outcome to the session.
    fn announce(&mut self, event: Event) {
        info!(
            "Announce: {} downloaded, {} uploaded",
            format_size(self.session.downloaded, Base::Binary),
            format_size(self.session.uploaded, Base::Binary),
        );

        let request = self.build_request(event);
        match self.client.announce(&self.meta.announce, &request) {
            Ok(response) => {
                if event == Event::Started {
                    self.session.started = true;
                }
                self.session
                    .apply_response(&response, &self.config, &mut self.rng, self.meta.length);
                if self.session.stalled {
                    info!(
                        "Stalling: {} seeders, {} leechers",
                        response.seeders, response.leechers
                    );
                }
                info!("Next announce in {}s", response.interval);
            }
            Err(err) => {
                // A session cannot begin without its first acknowledged
                // announce, so the started phase retries on a shorter delay.
                let retry = if self.session.started {
                    RETRY_INTERVAL
                } else {
                    START_RETRY_INTERVAL
                };
                warn!("Announce error: {:#}, retrying in {:?}", err, retry);
                self.session.next_interval = retry;
            }
        }
    }

    /// Send the terminal stopped announce, once, with the last known
    /// progress. Failure is reported, not fatal; the process is exiting
    /// regardless of the outcome.
    fn stop(&mut self) {
        info!(
            "Announce: {} downloaded, {} uploaded",
            format_size(self.session.downloaded, Base::Binary),
            format_size(self.session.uploaded, Base::Binary),
        );

        let request = self.build_request(Event::Stopped);
        if let Err(err) = self.client.announce(&self.meta.announce, &request) {
            warn!("Announce error: {:#}, stopping regardless", err);
        }
    }

    /// Build the progress report for one announce.
    fn build_request(&self, event: Event) -> AnnounceRequest {
        AnnounceRequest {
            info_hash: self.meta.info_hash,
            peer_id: self.session.peer_id,
            downloaded: self.session.downloaded,
            left: self.meta.length - self.session.downloaded,
            uploaded: self.session.uploaded,
            event,
            num_want: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tracker::{AnnounceResponse, HASH_SIZE};

    use anyhow::anyhow;
    use crossbeam_channel::bounded;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const TOTAL: u64 = 10_000_000_000;

    /// Records every request and replays a script of responses; replays the
    /// last script entry forever once the script runs out.
    struct ScriptedClient {
        requests: Rc<RefCell<Vec<AnnounceRequest>>>,
        script: RefCell<VecDeque<Result<AnnounceResponse>>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<AnnounceResponse>>) -> ScriptedClient {
            ScriptedClient {
                requests: Rc::new(RefCell::new(vec![])),
                script: RefCell::new(script.into()),
            }
        }
    }

    impl AnnounceClient for ScriptedClient {
        fn announce(&self, _url: &str, request: &AnnounceRequest) -> Result<AnnounceResponse> {
            self.requests.borrow_mut().push(request.clone());
            let mut script = self.script.borrow_mut();
            match script.pop_front() {
                Some(outcome) => {
                    if script.is_empty() {
                        if let Ok(response) = &outcome {
                            script.push_back(Ok(response.clone()));
                        }
                    }
                    outcome
                }
                None => Err(anyhow!("connection refused")),
            }
        }
    }

    fn ok(interval: u32) -> Result<AnnounceResponse> {
        Ok(AnnounceResponse {
            interval,
            seeders: 10,
            leechers: 10,
        })
    }

    fn stalled_ok(interval: u32) -> Result<AnnounceResponse> {
        Ok(AnnounceResponse {
            interval,
            seeders: 0,
            leechers: 10,
        })
    }

    fn config() -> Config {
        Config {
            down_speed: 5_000_000,
            up_speed: 2_000_000,
            margin: 0.0,
            min_seeders: 1,
            min_leechers: 1,
        }
    }

    fn meta() -> Metainfo {
        Metainfo {
            name: "big.iso".to_string(),
            length: TOTAL,
            info_hash: [0xCD; HASH_SIZE],
            announce: "http://tracker.example.com/announce".to_string(),
        }
    }

    fn engine(script: Vec<Result<AnnounceResponse>>) -> Engine<ScriptedClient, StdRng> {
        Engine::new(
            meta(),
            config(),
            ScriptedClient::new(script),
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn progress_curve_completes_exactly_once() {
        let mut engine = engine(vec![ok(1800)]);
        let requests = Rc::clone(&engine.client.requests);
        let t0 = Instant::now();

        // First announce reports zero progress and the started event
        engine.tick(t0);
        // 1000s at 5 MB/s nominal with zero margin
        engine.tick(t0 + Duration::from_secs(1000));
        // Another 1000s reaches the cap exactly
        engine.tick(t0 + Duration::from_secs(2000));
        // The cap holds, no second completed event
        engine.tick(t0 + Duration::from_secs(3000));

        let requests = requests.borrow();
        assert_eq!(requests[0].event, Event::Started);
        assert_eq!(requests[0].downloaded, 0);
        assert_eq!(requests[0].left, TOTAL);

        assert_eq!(requests[1].event, Event::None);
        assert_eq!(requests[1].downloaded, 5_000_000_000);
        assert_eq!(requests[1].left, 5_000_000_000);
        assert_eq!(requests[1].uploaded, 2_000_000_000);

        assert_eq!(requests[2].event, Event::Completed);
        assert_eq!(requests[2].downloaded, TOTAL);
        assert_eq!(requests[2].left, 0);

        assert_eq!(requests[3].event, Event::None);
        assert_eq!(requests[3].downloaded, TOTAL);
        // Seeding continues past completion
        assert!(requests[3].uploaded > requests[2].uploaded);
    }

    #[test]
    fn successful_announce_adopts_advertised_interval() {
        let mut engine = engine(vec![ok(900)]);
        engine.tick(Instant::now());

        assert!(engine.session.started);
        assert_eq!(engine.session.next_interval, Duration::from_secs(900));
        assert_eq!(engine.session.down_rate, 5_000_000.0);
        assert_eq!(engine.session.up_rate, 2_000_000.0);
    }

    #[test]
    fn startup_failures_stay_in_started_phase() {
        let mut engine = engine(vec![
            Err(anyhow!("connection refused")),
            Err(anyhow!("connection refused")),
        ]);
        let requests = Rc::clone(&engine.client.requests);
        let t0 = Instant::now();

        engine.tick(t0);
        assert!(!engine.session.started);
        assert_eq!(engine.session.next_interval, START_RETRY_INTERVAL);

        engine.tick(t0 + START_RETRY_INTERVAL);
        assert!(!engine.session.started);

        // Every attempt so far carried the started event and zero progress
        for request in requests.borrow().iter() {
            assert_eq!(request.event, Event::Started);
            assert_eq!(request.downloaded, 0);
        }
    }

    #[test]
    fn periodic_failure_reschedules_at_retry_interval() {
        let mut engine = engine(vec![ok(1800), Err(anyhow!("timed out")), ok(1800)]);
        let t0 = Instant::now();

        engine.tick(t0);
        engine.tick(t0 + Duration::from_secs(100));
        let after_failure = engine.session.downloaded;

        assert_eq!(engine.session.next_interval, RETRY_INTERVAL);
        // Rates survive the failure untouched
        assert_eq!(engine.session.down_rate, 5_000_000.0);

        // The next success resumes from where the failure left off without
        // double-counting the interval before the failed attempt
        engine.tick(t0 + Duration::from_secs(130));
        assert_eq!(
            engine.session.downloaded,
            after_failure + 30 * 5_000_000
        );
        assert_eq!(engine.session.next_interval, Duration::from_secs(1800));
    }

    #[test]
    fn stalled_swarm_freezes_progress_until_lifted() {
        let mut engine = engine(vec![stalled_ok(1800), ok(1800)]);
        let t0 = Instant::now();

        // First response reports too few seeders
        engine.tick(t0);
        assert!(engine.session.stalled);
        assert_eq!(engine.session.down_rate, 0.0);

        // No progress accrues across the stalled interval; this response
        // lifts the gate and redraws the rates
        engine.tick(t0 + Duration::from_secs(1800));
        assert_eq!(engine.session.downloaded, 0);
        assert_eq!(engine.session.uploaded, 0);
        assert!(!engine.session.stalled);
        assert_eq!(engine.session.down_rate, 5_000_000.0);

        // Progress resumes with rates drawn after the stall ended
        engine.tick(t0 + Duration::from_secs(1900));
        assert_eq!(engine.session.downloaded, 100 * 5_000_000);
    }

    #[test]
    fn stop_reports_last_known_progress_without_accrual() {
        let mut engine = engine(vec![ok(1800)]);
        let requests = Rc::clone(&engine.client.requests);
        let t0 = Instant::now();

        engine.tick(t0);
        engine.tick(t0 + Duration::from_secs(1000));
        engine.stop();

        let requests = requests.borrow();
        let last = requests.last().unwrap();
        assert_eq!(last.event, Event::Stopped);
        assert_eq!(last.downloaded, 5_000_000_000);
        assert_eq!(last.left, 5_000_000_000);
        assert_eq!(last.uploaded, 2_000_000_000);
    }

    #[test]
    fn failed_stop_announce_is_not_fatal() {
        let mut engine = engine(vec![ok(1800), Err(anyhow!("connection refused"))]);
        engine.tick(Instant::now());
        engine.stop();

        let requests = engine.client.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].event, Event::Stopped);
    }

    #[test]
    fn cancellation_between_ticks_issues_single_stop() {
        let mut engine = engine(vec![ok(1800)]);
        let requests = Rc::clone(&engine.client.requests);

        // Cancellation is already pending when the loop starts waiting, so
        // the run performs the first announce and then the stop sequence.
        let (tx, rx) = bounded(1);
        tx.send(()).unwrap();
        engine.run(&rx).unwrap();

        let requests = requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].event, Event::Started);
        assert_eq!(requests[1].event, Event::Stopped);
    }
}
