//! Simulated user processes
//!
//! Each worker is a thread that issues memory references to the manager
//! one at a time and blocks for the answer, advancing the shared clock a
//! little before every reference.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clock::{SimTime, SimulatedClock};
use crate::config::Config;
use crate::constants::*;
use crate::error::{MemsimError, Result};
use crate::message::{Codec, Message, Reply, WorkerEndpoint};
use crate::process::{ExternalProcess, ReferenceKind};

/// Cumulative 1/n page weights: low pages are referenced more often
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    cumulative: Vec<f64>,
}

impl WeightTable {
    pub fn new(max_pages: usize) -> Self {
        let mut cumulative = Vec::with_capacity(max_pages);
        let mut sum = 0.0;
        for i in 0..max_pages {
            sum += 1.0 / (i + 1) as f64;
            cumulative.push(sum);
        }
        WeightTable { cumulative }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.cumulative
    }

    /// Pick a page below `pages` with probability proportional to 1/(page+1)
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R, pages: usize) -> PageNumber {
        let pages = pages.min(self.cumulative.len());
        if pages <= 1 {
            return 0;
        }
        let total = self.cumulative[pages - 1];
        let r = rng.gen_range(0.0..total);
        self.cumulative[..pages]
            .partition_point(|&w| w <= r)
            .min(pages - 1)
    }
}

/// How a worker behaves; fixed at launch
#[derive(Debug, Clone)]
pub struct WorkerProfile {
    pub allocated_pages: usize,
    pub page_size: u32,
    pub min_references: u32,
    pub max_references: u32,
    pub termination_probability: f64,
    pub read_probability: f64,
    pub ref_interval: (SimTime, SimTime),
    pub codec: Codec,
    pub weights: Option<Arc<WeightTable>>,
    pub seed: u64,
}

impl WorkerProfile {
    pub fn from_config(
        config: &Config,
        allocated_pages: usize,
        weights: Option<Arc<WeightTable>>,
        seed: u64,
    ) -> Self {
        WorkerProfile {
            allocated_pages,
            page_size: config.page_size,
            min_references: config.min_references,
            max_references: config.max_references,
            termination_probability: config.termination_probability,
            read_probability: config.read_probability,
            ref_interval: config.ref_interval_range(),
            codec: Codec::new(config.max_pages, config.page_size),
            weights,
            seed,
        }
    }
}

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Sent its termination notice
    Completed { references: u32 },
    /// Told to stop after an illegal reference
    Killed { references: u32 },
    /// Manager went away (shutdown)
    Disconnected { references: u32 },
}

/// Run one worker to completion on the calling thread
pub fn run_worker(
    endpoint: WorkerEndpoint,
    clock: &SimulatedClock,
    profile: &WorkerProfile,
) -> Result<WorkerExit> {
    let mut rng = StdRng::seed_from_u64(profile.seed);
    let quota = rng.gen_range(profile.min_references..=profile.max_references);
    let mut references = 0u32;

    loop {
        if references >= quota && rng.gen_bool(profile.termination_probability) {
            if endpoint.send(profile.codec.encode(Message::Terminate)).is_err() {
                return Ok(WorkerExit::Disconnected { references });
            }
            return Ok(WorkerExit::Completed { references });
        }

        let (lo, hi) = profile.ref_interval;
        clock.advance(SimTime::random_between(lo, hi, &mut rng))?;

        let page = match &profile.weights {
            Some(weights) => weights.pick(&mut rng, profile.allocated_pages),
            None => rng.gen_range(0..profile.allocated_pages),
        };
        let address = page as u32 * profile.page_size + rng.gen_range(0..profile.page_size);
        let kind = if rng.gen_bool(profile.read_probability) {
            ReferenceKind::Read
        } else {
            ReferenceKind::Write
        };

        match endpoint.request(profile.codec.encode(Message::Reference { address, kind })) {
            Ok(Reply::Granted) => references += 1,
            Ok(Reply::Killed) => return Ok(WorkerExit::Killed { references }),
            Err(_) => return Ok(WorkerExit::Disconnected { references }),
        }
    }
}

/// Join handle of a worker thread
#[derive(Debug)]
pub struct WorkerHandle {
    sim_pid: SimPid,
    handle: JoinHandle<Result<WorkerExit>>,
}

impl WorkerHandle {
    pub fn sim_pid(&self) -> SimPid {
        self.sim_pid
    }
}

impl ExternalProcess for WorkerHandle {
    fn wait(self: Box<Self>) -> Result<()> {
        let sim_pid = self.sim_pid;
        let exit = self
            .handle
            .join()
            .map_err(|_| MemsimError::invariant(format!("worker P{} panicked", sim_pid)))??;
        debug!("P{} exited: {:?}", sim_pid, exit);
        Ok(())
    }
}

/// Start a worker thread
pub fn spawn(
    endpoint: WorkerEndpoint,
    clock: Arc<SimulatedClock>,
    profile: WorkerProfile,
) -> Result<WorkerHandle> {
    let sim_pid = endpoint.sim_pid;
    let handle = thread::Builder::new()
        .name(format!("P{}", sim_pid))
        .spawn(move || run_worker(endpoint, &clock, &profile))?;
    Ok(WorkerHandle { sim_pid, handle })
}
