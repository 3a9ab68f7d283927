//! Demand-paging memory manager simulator
//!
//! A manager ("oss") owns a frame table, per-process page tables and a
//! paging wait queue. Worker threads issue memory references over
//! channels; the manager grants resident references, queues faults,
//! evicts with second-chance replacement and keeps a simulated clock.

pub mod clock;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod memory;
pub mod message;
pub mod oss;
pub mod process;
pub mod queue;
pub mod report;
pub mod stats;
pub mod worker;

// Re-export commonly used items for convenience
pub use clock::{SimTime, SimulatedClock};
pub use config::{Config, FreeFramePolicy, IllegalAddressPolicy};
pub use constants::*;
pub use dispatcher::{Dispatcher, Event};
pub use error::{MemsimError, Result};
pub use oss::{Outcome, Simulation, Summary};
pub use stats::Stats;
