use crate::clock::SimTime;

/// Run-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub memory_accesses: u64,
    pub page_faults: u64,
    pub swaps: u64,
    pub write_backs: u64,
    pub total_access_time: SimTime,
    pub workers_launched: u64,
    pub workers_completed: u64,
    pub workers_killed: u64,
}

impl Stats {
    pub fn record_access(&mut self, elapsed: SimTime) {
        self.memory_accesses += 1;
        self.total_access_time += elapsed;
    }

    pub fn record_page_fault(&mut self) {
        self.page_faults += 1;
    }

    pub fn record_swap(&mut self, dirty: bool) {
        self.swaps += 1;
        if dirty {
            self.write_backs += 1;
        }
    }

    /// Memory accesses per simulated second up to `now`
    pub fn accesses_per_second(&self, now: SimTime) -> f64 {
        let secs = now.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.memory_accesses as f64 / secs
    }

    pub fn page_faults_per_access(&self) -> f64 {
        if self.memory_accesses == 0 {
            return 0.0;
        }
        self.page_faults as f64 / self.memory_accesses as f64
    }

    pub fn average_access_time(&self) -> SimTime {
        let n = u32::try_from(self.memory_accesses).unwrap_or(u32::MAX);
        self.total_access_time.div(n)
    }
}
