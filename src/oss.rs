//! The simulation driver
//!
//! Launches workers on a simulated schedule, feeds their requests to the
//! dispatcher, drives the paging engine and prints the memory map, until
//! every worker has been launched and has finished or the run is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clock::{SimTime, SimulatedClock};
use crate::config::Config;
use crate::constants::BASE_SEED;
use crate::dispatcher::{Dispatcher, Event};
use crate::error::Result;
use crate::message::{ReplyRouter, RequestReceiver, WorkerEndpoint};
use crate::report;
use crate::stats::Stats;
use crate::worker::{self, WeightTable, WorkerProfile};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every worker was launched and finished
    Completed,
    /// The cancel flag was raised (Ctrl-C)
    Cancelled,
    /// The real-time limit ran out
    TimedOut,
}

/// Final state of a run
#[derive(Debug, Clone)]
pub struct Summary {
    pub outcome: Outcome,
    pub finished_at: SimTime,
    pub stats: Stats,
}

pub struct Simulation {
    config: Config,
    dispatcher: Dispatcher<ReplyRouter>,
    requests: RequestReceiver,
    rng: StdRng,
    seed: u64,
    weights: Option<Arc<WeightTable>>,
    cancel: Arc<AtomicBool>,
    running: usize,
    launched: usize,
    next_fork: SimTime,
    next_map: SimTime,
}

impl Simulation {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or(BASE_SEED);
        let clock = Arc::new(SimulatedClock::new());
        let dispatcher = Dispatcher::new(&config, clock, ReplyRouter::new(config.max_running));
        let weights = config.weighted.then(|| Arc::new(WeightTable::new(config.max_pages)));
        let next_map = config.memory_map_interval();
        Ok(Simulation {
            dispatcher,
            requests: RequestReceiver::new(),
            rng: StdRng::seed_from_u64(seed),
            seed,
            weights,
            cancel: Arc::new(AtomicBool::new(false)),
            running: 0,
            launched: 0,
            next_fork: SimTime::ZERO,
            next_map,
            config,
        })
    }

    /// Flag that stops the run at the next loop pass when set
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn dispatcher(&self) -> &Dispatcher<ReplyRouter> {
        &self.dispatcher
    }

    /// Run to the end and reclaim every worker
    ///
    /// Shutdown happens on every exit path, including errors; the first
    /// error wins.
    pub fn run(mut self) -> Result<Summary> {
        let result = self.main_loop();
        let shutdown = self.dispatcher.shutdown();
        let outcome = result?;
        shutdown?;

        let finished_at = self.dispatcher.clock().now()?;
        let stats = self.dispatcher.stats().clone();
        info!("{}", report::stats_summary(&stats, finished_at));
        Ok(Summary { outcome, finished_at, stats })
    }

    fn main_loop(&mut self) -> Result<Outcome> {
        let started = Instant::now();
        let deadline = self.config.max_real_time();
        let idle = self.config.idle_sleep();

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Master: cancelled, shutting down");
                return Ok(Outcome::Cancelled);
            }
            if started.elapsed() >= deadline {
                warn!("Master: real-time limit of {:?} reached, shutting down", deadline);
                return Ok(Outcome::TimedOut);
            }

            let mut busy = self.try_fork()?;

            let events = self.dispatcher.poll(&mut self.requests)?;
            busy |= !events.is_empty();
            self.track(&events);

            // everyone is blocked on paging I/O: jump ahead one I/O unit
            if self.dispatcher.queue().len() == self.running {
                self.dispatcher.clock().advance(self.config.io_operation())?;
            }

            let events = self.dispatcher.service_queue()?;
            busy |= !events.is_empty();
            self.track(&events);

            let now = self.dispatcher.clock().now()?;
            if now >= self.next_map {
                info!("{}", report::memory_map(self.dispatcher.frames(), now));
                while self.next_map <= now {
                    self.next_map += self.config.memory_map_interval();
                }
            }

            if self.running == 0 && self.launched >= self.config.max_launched {
                return Ok(Outcome::Completed);
            }
            if !busy {
                thread::sleep(idle);
            }
        }
    }

    fn track(&mut self, events: &[Event]) {
        for event in events {
            if let Event::Terminated(_) | Event::Killed(_) = event {
                self.running = self.running.saturating_sub(1);
            }
        }
    }

    /// Launch a worker if one is due and there is room; true if one was
    fn try_fork(&mut self) -> Result<bool> {
        if self.launched >= self.config.max_launched || self.running >= self.config.max_running {
            return Ok(false);
        }
        let now = self.dispatcher.clock().now()?;
        if now < self.next_fork {
            return Ok(false);
        }
        let Some(sim_pid) = self.dispatcher.free_slot() else {
            return Ok(false);
        };

        let pages = self.rng.gen_range(self.config.min_pages..=self.config.max_pages);
        let profile = WorkerProfile::from_config(
            &self.config,
            pages,
            self.weights.clone(),
            self.seed.wrapping_add(self.launched as u64 + 1),
        );
        let reply_rx = self.dispatcher.replies_mut().connect(sim_pid);
        let endpoint = WorkerEndpoint::new(sim_pid, self.requests.sender(), reply_rx);
        let handle = worker::spawn(endpoint, Arc::clone(self.dispatcher.clock()), profile)?;
        self.dispatcher.admit(sim_pid, pages, Some(Box::new(handle)))?;

        self.running += 1;
        self.launched += 1;
        info!(
            "Master: Generating process with PID {} (P{}) and {} pages at time {}",
            self.launched, sim_pid, pages, now
        );

        let (lo, hi) = self.config.fork_range();
        self.next_fork = now + SimTime::random_between(lo, hi, &mut self.rng);
        Ok(true)
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("running", &self.running)
            .field("launched", &self.launched)
            .field("next_fork", &self.next_fork)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
