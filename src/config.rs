//! Run configuration
//!
//! Every field has a default from `constants.rs`; a TOML file only needs
//! to name the values it changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::clock::SimTime;
use crate::constants::*;
use crate::error::{MemsimError, Result};

/// What a page fault costs when a free frame is available
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FreeFramePolicy {
    /// Fill the frame and grant in the same pass, no I/O time charged
    #[default]
    Immediate,
    /// Charge one I/O unit even when no eviction is needed
    ChargeIo,
}

/// Response to a reference beyond a process's length register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IllegalAddressPolicy {
    /// Log it, reply `Killed` to that worker and reclaim its frames
    #[default]
    KillWorker,
    /// Treat it as fatal for the whole run
    Abort,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub frames: usize,
    pub page_size: u32,
    pub min_pages: usize,
    pub max_pages: usize,

    pub mem_access_ns: u64,
    pub io_operation_ns: u64,

    pub max_running: usize,
    pub max_launched: usize,
    pub min_fork_ns: u64,
    pub max_fork_ns: u64,

    pub memory_map_interval_ns: u64,
    pub idle_sleep_us: u64,
    pub max_real_seconds: u64,

    pub min_references: u32,
    pub max_references: u32,
    pub termination_probability: f64,
    pub read_probability: f64,
    pub min_ref_interval_ns: u64,
    pub max_ref_interval_ns: u64,
    pub weighted: bool,
    pub seed: Option<u64>,

    pub log_file: PathBuf,
    pub max_log_lines: usize,

    pub free_frame_policy: FreeFramePolicy,
    pub illegal_address_policy: IllegalAddressPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            frames: NUM_FRAMES,
            page_size: PAGE_SIZE,
            min_pages: MIN_ALLOC_PAGES,
            max_pages: MAX_ALLOC_PAGES,
            mem_access_ns: MEM_ACCESS_NS,
            io_operation_ns: IO_OPERATION_NS,
            max_running: MAX_RUNNING,
            max_launched: MAX_LAUNCHED,
            min_fork_ns: MIN_FORK_NS,
            max_fork_ns: MAX_FORK_NS,
            memory_map_interval_ns: MEMORY_MAP_INTERVAL_NS,
            idle_sleep_us: IDLE_SLEEP_US,
            max_real_seconds: MAX_EXEC_SECONDS,
            min_references: MIN_REFERENCES,
            max_references: MAX_REFERENCES,
            termination_probability: TERMINATION_PROBABILITY,
            read_probability: READ_PROBABILITY,
            min_ref_interval_ns: MIN_REF_INTERVAL_NS,
            max_ref_interval_ns: MAX_REF_INTERVAL_NS,
            weighted: false,
            seed: None,
            log_file: PathBuf::from(LOG_FILE_NAME),
            max_log_lines: MAX_LOG_LINES,
            free_frame_policy: FreeFramePolicy::default(),
            illegal_address_policy: IllegalAddressPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MemsimError::Config(msg));

        if self.frames == 0 {
            return fail("frames must be at least 1".into());
        }
        if self.page_size == 0 {
            return fail("page_size must be at least 1".into());
        }
        if self.min_pages == 0 || self.min_pages > self.max_pages {
            return fail(format!(
                "page range {}..={} is empty or starts at zero",
                self.min_pages, self.max_pages
            ));
        }
        // addresses and the terminate sentinel must fit the i32 wire payload
        let span = self.max_pages as u64 * self.page_size as u64;
        if span + 1 > i32::MAX as u64 {
            return fail(format!("address space of {} bytes does not fit a message", span));
        }
        if self.max_running == 0 {
            return fail("max_running must be at least 1".into());
        }
        if self.min_fork_ns > self.max_fork_ns {
            return fail("min_fork_ns is greater than max_fork_ns".into());
        }
        if self.min_ref_interval_ns > self.max_ref_interval_ns {
            return fail("min_ref_interval_ns is greater than max_ref_interval_ns".into());
        }
        if self.min_references > self.max_references {
            return fail("min_references is greater than max_references".into());
        }
        for (name, p) in [
            ("termination_probability", self.termination_probability),
            ("read_probability", self.read_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return fail(format!("{} must be within [0, 1], got {}", name, p));
            }
        }
        if self.memory_map_interval_ns == 0 {
            return fail("memory_map_interval_ns must be positive".into());
        }
        Ok(())
    }

    #[inline]
    pub fn mem_access(&self) -> SimTime {
        SimTime::from_nanos(self.mem_access_ns)
    }

    #[inline]
    pub fn io_operation(&self) -> SimTime {
        SimTime::from_nanos(self.io_operation_ns)
    }

    pub fn fork_range(&self) -> (SimTime, SimTime) {
        (SimTime::from_nanos(self.min_fork_ns), SimTime::from_nanos(self.max_fork_ns))
    }

    pub fn ref_interval_range(&self) -> (SimTime, SimTime) {
        (
            SimTime::from_nanos(self.min_ref_interval_ns),
            SimTime::from_nanos(self.max_ref_interval_ns),
        )
    }

    pub fn memory_map_interval(&self) -> SimTime {
        SimTime::from_nanos(self.memory_map_interval_ns)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_us)
    }

    pub fn max_real_time(&self) -> Duration {
        Duration::from_secs(self.max_real_seconds)
    }
}
