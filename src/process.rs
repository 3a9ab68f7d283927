use std::fmt;

use crate::clock::SimTime;
use crate::constants::*;
use crate::error::{MemsimError, Result};
use crate::queue::QueueId;

/// Whether a reference reads or writes its address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Read,
    Write,
}

impl ReferenceKind {
    #[inline]
    pub fn is_write(self) -> bool {
        self == ReferenceKind::Write
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Read => f.write_str("read"),
            ReferenceKind::Write => f.write_str("write"),
        }
    }
}

/// The reference a process is currently waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReference {
    pub address: u32,
    pub kind: ReferenceKind,
    pub start_time: SimTime,
    /// When the paging I/O for this reference finishes, if one is in flight
    pub completion_time: Option<SimTime>,
}

impl MemoryReference {
    #[inline]
    pub fn page(&self, page_size: u32) -> PageNumber {
        (self.address / page_size) as PageNumber
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTableEntry {
    pub valid: bool,
    pub dirty: bool,
    pub frame: Option<FrameNumber>,
}

/// Handle to the thing running a simulated process
///
/// `wait` blocks until it has exited.
pub trait ExternalProcess: Send + fmt::Debug {
    fn wait(self: Box<Self>) -> Result<()>;
}

/// Process control block for one slot of the process table
#[derive(Debug)]
pub struct ProcessRecord {
    pub sim_pid: SimPid,
    assigned: bool,
    external: Option<Box<dyn ExternalProcess>>,
    pub page_table: Vec<PageTableEntry>,
    /// Length register: number of pages this process may touch
    pub allocated_pages: usize,
    pub last_reference: Option<MemoryReference>,
    pub(crate) queue: Option<QueueId>,
    pub total_access_time: SimTime,
    pub total_references: u32,
}

impl ProcessRecord {
    pub fn new(sim_pid: SimPid, max_pages: usize) -> Self {
        ProcessRecord {
            sim_pid,
            assigned: false,
            external: None,
            page_table: vec![PageTableEntry::default(); max_pages],
            allocated_pages: 0,
            last_reference: None,
            queue: None,
            total_access_time: SimTime::ZERO,
            total_references: 0,
        }
    }

    #[inline]
    pub fn is_assigned(&self) -> bool {
        self.assigned
    }

    /// The wait queue this record currently sits in
    #[inline]
    pub fn queue(&self) -> Option<QueueId> {
        self.queue
    }

    /// Record a newly received reference
    pub fn set_last_reference(&mut self, address: u32, kind: ReferenceKind, start_time: SimTime) {
        self.last_reference = Some(MemoryReference {
            address,
            kind,
            start_time,
            completion_time: None,
        });
    }

    /// Mark the paging I/O for the current reference as in flight until `at`
    pub fn set_completion_time(&mut self, at: SimTime) -> Result<()> {
        let reference = self.last_reference.as_mut().ok_or_else(|| {
            MemsimError::invariant(format!("P{} has no reference to complete", self.sim_pid))
        })?;
        reference.completion_time = Some(at);
        Ok(())
    }

    /// Pending I/O completion time of the current reference
    pub fn completion_time(&self) -> Option<SimTime> {
        self.last_reference.and_then(|r| r.completion_time)
    }

    /// Finish the current reference at `end`, returning its elapsed time
    pub fn complete_reference(&mut self, end: SimTime) -> Result<SimTime> {
        let reference = self.last_reference.take().ok_or_else(|| {
            MemsimError::invariant(format!("P{} has no reference to complete", self.sim_pid))
        })?;
        let elapsed = end.saturating_sub(reference.start_time);
        self.total_access_time += elapsed;
        self.total_references += 1;
        Ok(elapsed)
    }

    /// Effective memory access time over the life of the process
    pub fn effective_access_time(&self) -> SimTime {
        self.total_access_time.div(self.total_references)
    }

    pub fn valid_pages(&self) -> impl Iterator<Item = (PageNumber, &PageTableEntry)> {
        self.page_table[..self.allocated_pages]
            .iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
    }

    pub(crate) fn take_external(&mut self) -> Option<Box<dyn ExternalProcess>> {
        self.external.take()
    }

    /// Return the record to the unassigned pool
    ///
    /// Must already be out of any wait queue.
    fn reset(&mut self) {
        self.assigned = false;
        self.external = None;
        self.page_table.fill(PageTableEntry::default());
        self.allocated_pages = 0;
        self.last_reference = None;
        self.total_access_time = SimTime::ZERO;
        self.total_references = 0;
    }
}

/// Fixed pool of process records addressed by `SimPid`
#[derive(Debug)]
pub struct ProcessTable {
    records: Vec<ProcessRecord>,
    max_pages: usize,
}

impl ProcessTable {
    pub fn new(slots: usize, max_pages: usize) -> Self {
        ProcessTable {
            records: (0..slots).map(|pid| ProcessRecord::new(pid, max_pages)).collect(),
            max_pages,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, sim_pid: SimPid) -> Result<&ProcessRecord> {
        self.records
            .get(sim_pid)
            .ok_or_else(|| MemsimError::invariant(format!("no process slot P{}", sim_pid)))
    }

    pub fn get_mut(&mut self, sim_pid: SimPid) -> Result<&mut ProcessRecord> {
        self.records
            .get_mut(sim_pid)
            .ok_or_else(|| MemsimError::invariant(format!("no process slot P{}", sim_pid)))
    }

    /// Lowest slot not assigned to a running process
    pub fn free_slot(&self) -> Option<SimPid> {
        self.records.iter().position(|r| !r.assigned)
    }

    /// Hand a free slot to a newly launched process
    pub fn assign(
        &mut self,
        sim_pid: SimPid,
        allocated_pages: usize,
        external: Option<Box<dyn ExternalProcess>>,
    ) -> Result<()> {
        let max_pages = self.max_pages;
        let record = self.get_mut(sim_pid)?;
        if record.assigned {
            return Err(MemsimError::invariant(format!("P{} is already assigned", sim_pid)));
        }
        if allocated_pages == 0 || allocated_pages > max_pages {
            return Err(MemsimError::invariant(format!(
                "P{} given {} pages, limit is {}",
                sim_pid, allocated_pages, max_pages
            )));
        }
        record.assigned = true;
        record.allocated_pages = allocated_pages;
        record.external = external;
        Ok(())
    }

    /// Reset a slot for reuse; it must not be in a wait queue
    pub fn reset(&mut self, sim_pid: SimPid) -> Result<()> {
        let record = self.get_mut(sim_pid)?;
        if let Some(q) = record.queue {
            return Err(MemsimError::membership(format!(
                "reset of P{} while it is in queue {}",
                sim_pid, q
            )));
        }
        record.reset();
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.iter()
    }

    pub fn assigned(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.iter().filter(|r| r.assigned)
    }

    /// Valid page table entries across every process
    pub fn valid_page_count(&self) -> usize {
        self.records.iter().map(|r| r.valid_pages().count()).sum()
    }
}
