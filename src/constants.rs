// physical memory ~frames of PAGE_SIZE bytes, metadata only
pub const NUM_FRAMES: usize = 256;
pub const PAGE_SIZE: u32 = 1024;

// per-process length register range (pages)
pub const MIN_ALLOC_PAGES: usize = 1;
pub const MAX_ALLOC_PAGES: usize = 32;

pub const MAX_RUNNING: usize = 18;
pub const MAX_LAUNCHED: usize = 100;

pub const BILLION: u32 = 1_000_000_000;
pub const MILLION: u32 = 1_000_000;

// simulated time costs (ns)
pub const MEM_ACCESS_NS: u64 = 10;
pub const IO_OPERATION_NS: u64 = 14 * MILLION as u64;

pub const MIN_FORK_NS: u64 = MILLION as u64;
pub const MAX_FORK_NS: u64 = 500 * MILLION as u64;

pub const MEMORY_MAP_INTERVAL_NS: u64 = BILLION as u64;

// real time
pub const IDLE_SLEEP_US: u64 = 500;
pub const MAX_EXEC_SECONDS: u64 = 2;

// worker behaviour
pub const READ_PROBABILITY: f64 = 0.8;
pub const MIN_REFERENCES: u32 = 90;
pub const MAX_REFERENCES: u32 = 110;
pub const TERMINATION_PROBABILITY: f64 = 0.99;
pub const MIN_REF_INTERVAL_NS: u64 = 1;
pub const MAX_REF_INTERVAL_NS: u64 = 10;

pub const BASE_SEED: u64 = 39_393_984;

pub const LOG_FILE_NAME: &str = "oss_log";
pub const MAX_LOG_LINES: usize = 1_000_000;

/// Index of a simulated process slot
pub type SimPid = usize;
/// Index of a physical frame
pub type FrameNumber = usize;
/// Index of a page within one process
pub type PageNumber = usize;
