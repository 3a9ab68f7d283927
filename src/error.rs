//! Error types for the memory manager
//!
//! Anything that reaches the dispatch loop as an `Err` is fatal to the
//! manager. Illegal addresses are contained inside the dispatcher unless
//! the abort policy is configured.

use std::process::ExitCode;

use thiserror::Error;

use crate::constants::{PageNumber, SimPid};

/// Result type alias for manager operations
pub type Result<T> = std::result::Result<T, MemsimError>;

#[derive(Error, Debug)]
pub enum MemsimError {
    /// A process referenced a page beyond its length register
    #[error("P{sim_pid} referenced address {address} (page {page}) but only {allocated} pages are allocated")]
    IllegalAddress {
        sim_pid: SimPid,
        address: u32,
        page: PageNumber,
        allocated: usize,
    },

    /// Enqueue of an already queued record, or removal from a queue it is not in
    #[error("Queue membership violation: {0}")]
    QueueMembership(String),

    /// Request or reply transport failed
    #[error("Channel failure: {0}")]
    ChannelFailure(String),

    /// Frame table / page table bookkeeping is inconsistent
    #[error("Resource invariant violated: {0}")]
    ResourceInvariant(String),

    /// The clock's lock was poisoned by a panicking holder
    #[error("Simulated clock is in an invalid state")]
    ClockInvalid,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MemsimError {
    /// Get exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::IllegalAddress { .. } => ExitCode::from(2),
            Self::QueueMembership(_) => ExitCode::from(3),
            Self::ChannelFailure(_) => ExitCode::from(4),
            Self::ResourceInvariant(_) => ExitCode::from(5),
            Self::ClockInvalid => ExitCode::from(6),
            Self::Config(_) | Self::Toml(_) => ExitCode::from(7),
            Self::Io(_) => ExitCode::from(8),
        }
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::ResourceInvariant(msg.into())
    }

    pub(crate) fn membership(msg: impl Into<String>) -> Self {
        Self::QueueMembership(msg.into())
    }

    pub(crate) fn channel(msg: impl Into<String>) -> Self {
        Self::ChannelFailure(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_address_message() {
        let err = MemsimError::IllegalAddress {
            sim_pid: 3,
            address: 2048,
            page: 2,
            allocated: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("P3"));
        assert!(msg.contains("2048"));
        assert!(msg.contains("page 2"));
    }

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        let codes = [
            MemsimError::membership("x").exit_code(),
            MemsimError::channel("x").exit_code(),
            MemsimError::invariant("x").exit_code(),
            MemsimError::ClockInvalid.exit_code(),
            MemsimError::Config("x".into()).exit_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
