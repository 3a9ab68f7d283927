use std::fmt;
use std::ops::{Add, AddAssign};
use std::sync::{Mutex, MutexGuard};

use rand::Rng;

use crate::constants::BILLION;
use crate::error::{MemsimError, Result};

/// A point in (or span of) simulated time
///
/// Always normalized: `nanoseconds < BILLION`, so the derived ordering
/// (seconds first, then nanoseconds) is chronological.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime {
    pub seconds: u32,
    pub nanoseconds: u32,
}

impl SimTime {
    pub const ZERO: SimTime = SimTime { seconds: 0, nanoseconds: 0 };

    /// Build a time, carrying nanosecond overflow into seconds
    pub const fn new(seconds: u32, nanoseconds: u32) -> Self {
        SimTime {
            seconds: seconds + nanoseconds / BILLION,
            nanoseconds: nanoseconds % BILLION,
        }
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime {
            seconds: (nanos / BILLION as u64) as u32,
            nanoseconds: (nanos % BILLION as u64) as u32,
        }
    }

    #[inline]
    pub fn as_nanos(&self) -> u64 {
        self.seconds as u64 * BILLION as u64 + self.nanoseconds as u64
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanoseconds as f64 / BILLION as f64
    }

    /// `self - other`, or zero if `other` is later
    pub fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime::from_nanos(self.as_nanos().saturating_sub(other.as_nanos()))
    }

    /// Average of `self` over `count` events; zero when there were none
    pub fn div(self, count: u32) -> SimTime {
        if count == 0 {
            return SimTime::ZERO;
        }
        SimTime::from_nanos(self.as_nanos() / count as u64)
    }

    /// Uniformly random time in `[min, max]`
    pub fn random_between<R: Rng + ?Sized>(min: SimTime, max: SimTime, rng: &mut R) -> SimTime {
        let (lo, hi) = (min.as_nanos(), max.as_nanos());
        if lo >= hi {
            return min;
        }
        SimTime::from_nanos(rng.gen_range(lo..=hi))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        let nanoseconds = self.nanoseconds + rhs.nanoseconds;
        SimTime {
            seconds: self.seconds + rhs.seconds + nanoseconds / BILLION,
            nanoseconds: nanoseconds % BILLION,
        }
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        *self = *self + rhs;
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} : {:09}", self.seconds, self.nanoseconds)
    }
}

/// The system clock shared by the manager and every worker
///
/// Reads and advances go through one lock so no caller can observe a
/// half-carried value. A poisoned lock means a holder panicked mid-update;
/// that is reported as `ClockInvalid` rather than trusted.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    time: Mutex<SimTime>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        SimulatedClock { time: Mutex::new(SimTime::ZERO) }
    }

    /// Consistent snapshot of the current time
    pub fn now(&self) -> Result<SimTime> {
        Ok(*self.lock()?)
    }

    /// Add `delta` and return the new time
    pub fn advance(&self, delta: SimTime) -> Result<SimTime> {
        let mut time = self.lock()?;
        *time += delta;
        Ok(*time)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimTime>> {
        self.time.lock().map_err(|_| MemsimError::ClockInvalid)
    }
}
