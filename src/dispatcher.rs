//! The manager's reference state machine and paging engine
//!
//! A reference is either granted on arrival (page resident) or faulted into
//! the wait queue. The queue head is the only record with paging I/O in
//! flight; `service_queue` completes it once the clock passes its
//! completion time and then starts the next one.

use std::sync::Arc;

use log::{debug, error, info};

use crate::clock::{SimTime, SimulatedClock};
use crate::config::{Config, FreeFramePolicy, IllegalAddressPolicy};
use crate::constants::*;
use crate::error::{MemsimError, Result};
use crate::memory::FrameTable;
use crate::message::{Codec, Message, Reply, ReplySink, Request, RequestSource};
use crate::process::{ExternalProcess, MemoryReference, PageTableEntry, ProcessTable, ReferenceKind};
use crate::queue::WaitQueue;
use crate::stats::Stats;

/// What handling a request or a queue pass did to a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Granted(SimPid),
    Faulted(SimPid),
    Terminated(SimPid),
    Killed(SimPid),
}

pub struct Dispatcher<S: ReplySink> {
    page_size: u32,
    mem_access: SimTime,
    io_operation: SimTime,
    free_frame_policy: FreeFramePolicy,
    illegal_address_policy: IllegalAddressPolicy,
    codec: Codec,
    clock: Arc<SimulatedClock>,
    frames: FrameTable,
    processes: ProcessTable,
    queue: WaitQueue,
    stats: Stats,
    replies: S,
}

impl<S: ReplySink> Dispatcher<S> {
    pub fn new(config: &Config, clock: Arc<SimulatedClock>, replies: S) -> Self {
        Dispatcher {
            page_size: config.page_size,
            mem_access: config.mem_access(),
            io_operation: config.io_operation(),
            free_frame_policy: config.free_frame_policy,
            illegal_address_policy: config.illegal_address_policy,
            codec: Codec::new(config.max_pages, config.page_size),
            clock,
            frames: FrameTable::new(config.frames),
            processes: ProcessTable::new(config.max_running, config.max_pages),
            queue: WaitQueue::new(),
            stats: Stats::default(),
            replies,
        }
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn clock(&self) -> &Arc<SimulatedClock> {
        &self.clock
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn replies_mut(&mut self) -> &mut S {
        &mut self.replies
    }

    /// Number of slots held by running processes
    pub fn running(&self) -> usize {
        self.processes.assigned().count()
    }

    pub fn free_slot(&self) -> Option<SimPid> {
        self.processes.free_slot()
    }

    /// Give a newly launched process the slot `sim_pid`
    pub fn admit(
        &mut self,
        sim_pid: SimPid,
        allocated_pages: usize,
        external: Option<Box<dyn ExternalProcess>>,
    ) -> Result<()> {
        self.processes.assign(sim_pid, allocated_pages, external)?;
        self.stats.workers_launched += 1;
        debug!("Master: P{} admitted with {} pages", sim_pid, allocated_pages);
        Ok(())
    }

    /// Drain every pending request
    pub fn poll<R: RequestSource>(&mut self, requests: &mut R) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(request) = requests.try_recv()? {
            events.push(self.handle_request(request)?);
        }
        Ok(events)
    }

    pub fn handle_request(&mut self, request: Request) -> Result<Event> {
        let sender = request.sender;
        if !self.processes.get(sender)?.is_assigned() {
            return Err(MemsimError::invariant(format!(
                "request from P{} which is not running",
                sender
            )));
        }

        match self.codec.decode(request.payload) {
            Message::Terminate => {
                self.terminate(sender)?;
                self.stats.workers_completed += 1;
                Ok(Event::Terminated(sender))
            }
            Message::Reference { address, kind } => self.process_reference(sender, address, kind),
        }
    }

    fn process_reference(&mut self, sim_pid: SimPid, address: u32, kind: ReferenceKind) -> Result<Event> {
        let now = self.clock.now()?;
        let record = self.processes.get_mut(sim_pid)?;
        if let Some(q) = record.queue() {
            return Err(MemsimError::membership(format!(
                "P{} sent a reference while waiting in {}",
                sim_pid, q
            )));
        }
        record.set_last_reference(address, kind, now);
        info!("Master: P{} requesting {} of address {} at time {}", sim_pid, kind, address, now);

        let page = (address / self.page_size) as PageNumber;
        if page >= record.allocated_pages {
            let allocated = record.allocated_pages;
            return self.illegal_address(MemsimError::IllegalAddress {
                sim_pid,
                address,
                page,
                allocated,
            });
        }

        if record.page_table[page].valid {
            let (reference, frame, at) = self.grant(sim_pid)?;
            match reference.kind {
                ReferenceKind::Read => info!(
                    "Master: Address {} in frame {}, giving data to P{} at time {}",
                    reference.address, frame, sim_pid, at
                ),
                ReferenceKind::Write => info!(
                    "Master: Address {} in frame {}, writing data from P{} to frame at time {}",
                    reference.address, frame, sim_pid, at
                ),
            }
            return Ok(Event::Granted(sim_pid));
        }

        info!("Master: Address {} is not in a frame, pagefault", address);
        self.stats.record_page_fault();
        self.queue.enqueue(&mut self.processes, sim_pid)?;
        debug!("Master: paging queue {}", self.queue);
        Ok(Event::Faulted(sim_pid))
    }

    fn illegal_address(&mut self, err: MemsimError) -> Result<Event> {
        let MemsimError::IllegalAddress { sim_pid, .. } = err else {
            return Err(err);
        };
        match self.illegal_address_policy {
            IllegalAddressPolicy::Abort => Err(err),
            IllegalAddressPolicy::KillWorker => {
                error!("Master: {}, terminating P{}", err, sim_pid);
                self.stats.workers_killed += 1;
                self.replies.send(sim_pid, Reply::Killed)?;
                self.terminate(sim_pid)?;
                Ok(Event::Killed(sim_pid))
            }
        }
    }

    /// One pass of the paging engine
    ///
    /// First finishes the in-flight swap of the queue head if its time has
    /// come, then starts paging for whoever is at the head now.
    pub fn service_queue(&mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();

        if let Some(head) = self.queue.front() {
            if let Some(done_at) = self.processes.get(head)?.completion_time() {
                if self.clock.now()? < done_at {
                    return Ok(events);
                }
                self.grant_queued(head)?;
                events.push(Event::Granted(head));
            }
        }

        if let Some(head) = self.queue.front() {
            if let Some(event) = self.start_paging(head)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn start_paging(&mut self, head: SimPid) -> Result<Option<Event>> {
        let reference = self.current_reference(head)?;
        let page = reference.page(self.page_size);

        if let Some(frame) = self.frames.try_reserve() {
            self.allocate_frame(frame, head)?;
            debug!("Master: Loading P{} page {} into free frame {}", head, page, frame);
            return match self.free_frame_policy {
                FreeFramePolicy::Immediate => {
                    self.grant_queued(head)?;
                    Ok(Some(Event::Granted(head)))
                }
                FreeFramePolicy::ChargeIo => {
                    let done_at = self.clock.now()? + self.io_operation;
                    self.processes.get_mut(head)?.set_completion_time(done_at)?;
                    Ok(None)
                }
            };
        }

        let victim = self.frames.select_victim()?;
        info!("Master: Clearing frame {} and swapping in P{} page {}", victim, head, page);

        let dirty = self.frames.get(victim).is_some_and(|f| f.dirty);
        let mut done_at = self.clock.now()? + self.io_operation;
        if dirty {
            info!(
                "Master: Dirty bit of frame {} was set, adding additional time to the clock",
                victim
            );
            done_at += self.io_operation;
        }
        self.stats.record_swap(dirty);

        self.processes.get_mut(head)?.set_completion_time(done_at)?;
        self.release_frame(victim)?;
        self.frames.reserve(victim)?;
        self.allocate_frame(victim, head)?;
        Ok(None)
    }

    /// Grant the head of the queue and take it off
    fn grant_queued(&mut self, head: SimPid) -> Result<()> {
        let (reference, _, _) = self.grant(head)?;
        self.queue.dequeue(&mut self.processes)?;
        match reference.kind {
            ReferenceKind::Read => info!(
                "Master: Indicating to P{} that data can be read from address {}",
                head, reference.address
            ),
            ReferenceKind::Write => info!(
                "Master: Indicating to P{} that write has happened to address {}",
                head, reference.address
            ),
        }
        Ok(())
    }

    /// Complete a resident reference: set the frame bits, charge the access
    /// time and reply to the process
    fn grant(&mut self, sim_pid: SimPid) -> Result<(MemoryReference, FrameNumber, SimTime)> {
        let reference = self.current_reference(sim_pid)?;
        let page = reference.page(self.page_size);
        let write = reference.kind.is_write();

        let record = self.processes.get_mut(sim_pid)?;
        let entry = record.page_table.get_mut(page).ok_or_else(|| {
            MemsimError::invariant(format!("P{} page {} outside its page table", sim_pid, page))
        })?;
        let frame = match (entry.valid, entry.frame) {
            (true, Some(frame)) => frame,
            _ => {
                return Err(MemsimError::invariant(format!(
                    "grant of P{} page {} which is not resident",
                    sim_pid, page
                )));
            }
        };
        if write {
            entry.dirty = true;
        }
        self.frames.touch(frame, write)?;

        let now = self.clock.advance(self.mem_access)?;
        let elapsed = record.complete_reference(now)?;
        self.stats.record_access(elapsed);
        self.replies.send(sim_pid, Reply::Granted)?;
        Ok((reference, frame, now))
    }

    fn current_reference(&self, sim_pid: SimPid) -> Result<MemoryReference> {
        self.processes
            .get(sim_pid)?
            .last_reference
            .ok_or_else(|| MemsimError::invariant(format!("P{} has no pending reference", sim_pid)))
    }

    /// Map a reserved frame to the page `sim_pid` is waiting on
    fn allocate_frame(&mut self, frame: FrameNumber, sim_pid: SimPid) -> Result<()> {
        let page = self.current_reference(sim_pid)?.page(self.page_size);
        self.frames.assign(frame, sim_pid, page)?;
        let entry = self
            .processes
            .get_mut(sim_pid)?
            .page_table
            .get_mut(page)
            .ok_or_else(|| MemsimError::invariant(format!("P{} page {} out of range", sim_pid, page)))?;
        *entry = PageTableEntry { valid: true, dirty: false, frame: Some(frame) };
        Ok(())
    }

    /// Free a frame and invalidate its former owner's page table entry
    fn release_frame(&mut self, frame: FrameNumber) -> Result<()> {
        let Some((owner, page)) = self.frames.release(frame)? else {
            return Ok(());
        };
        let entry = self
            .processes
            .get_mut(owner)?
            .page_table
            .get_mut(page)
            .ok_or_else(|| MemsimError::invariant(format!("P{} page {} out of range", owner, page)))?;
        if !entry.valid || entry.frame != Some(frame) {
            return Err(MemsimError::invariant(format!(
                "frame {} owned by P{} page {} but the page table disagrees",
                frame, owner, page
            )));
        }
        *entry = PageTableEntry::default();
        Ok(())
    }

    /// Reclaim everything a finished process held and free its slot
    ///
    /// Waits for the external process, releases its frames, unlinks it from
    /// the wait queue if it is still in it, then resets the record. A failed
    /// wait does not stop the rest.
    pub fn terminate(&mut self, sim_pid: SimPid) -> Result<()> {
        let now = self.clock.now()?;
        let record = self.processes.get_mut(sim_pid)?;
        if !record.is_assigned() {
            return Err(MemsimError::invariant(format!("terminate of idle slot P{}", sim_pid)));
        }
        info!(
            "Master: P{} has terminated at time {}\n\t\t Effective memory access time: {}",
            sim_pid,
            now,
            record.effective_access_time()
        );

        let external = record.take_external();
        let owned: Vec<FrameNumber> = record.valid_pages().filter_map(|(_, e)| e.frame).collect();

        // reclaim everything even if the wait fails; report the first error
        let mut first_err = external.and_then(|e| e.wait().err());
        for frame in owned {
            if let Err(e) = self.release_frame(frame) {
                first_err.get_or_insert(e);
            }
        }
        if self.processes.get(sim_pid)?.queue().is_some() {
            if let Err(e) = self.queue.remove(&mut self.processes, sim_pid) {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.processes.reset(sim_pid) {
            first_err.get_or_insert(e);
        }
        self.replies.disconnect(sim_pid);
        first_err.map_or(Ok(()), Err)
    }

    /// Stop every running process and reclaim its resources
    ///
    /// Every slot is reclaimed even when one fails; the first error wins.
    pub fn shutdown(&mut self) -> Result<()> {
        self.replies.disconnect_all();
        let running: Vec<SimPid> = self.processes.assigned().map(|r| r.sim_pid).collect();
        let mut first_err = None;
        for sim_pid in running {
            if let Err(e) = self.terminate(sim_pid) {
                error!("Master: cleanup of P{} failed: {}", sim_pid, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Cross-check the frame table, page tables and wait queue
    pub fn check_invariants(&self) -> Result<()> {
        for (frame, desc) in self.frames.iter().enumerate() {
            if desc.is_free() != self.frames.free_set().is_free(frame) {
                return Err(MemsimError::invariant(format!(
                    "frame {} owner and free set disagree",
                    frame
                )));
            }
            if let (Some(owner), Some(page)) = (desc.owner, desc.page) {
                let entry = self.processes.get(owner)?.page_table.get(page);
                if !matches!(entry, Some(e) if e.valid && e.frame == Some(frame)) {
                    return Err(MemsimError::invariant(format!(
                        "frame {} owned by P{} page {} but the page table disagrees",
                        frame, owner, page
                    )));
                }
            }
        }

        for record in self.processes.iter() {
            for (page, entry) in record.valid_pages() {
                let owner = entry
                    .frame
                    .and_then(|f| self.frames.get(f))
                    .and_then(|d| d.owner.zip(d.page));
                if owner != Some((record.sim_pid, page)) {
                    return Err(MemsimError::invariant(format!(
                        "P{} page {} valid but its frame is not owned by it",
                        record.sim_pid, page
                    )));
                }
            }
        }

        if self.frames.owned_count() != self.processes.valid_page_count() {
            return Err(MemsimError::invariant("owned frames and valid pages differ in number"));
        }

        let members = self.processes.iter().filter(|r| r.queue().is_some()).count();
        if members != self.queue.len() {
            return Err(MemsimError::membership("queue length and membership marks differ"));
        }
        for (pos, pid) in self.queue.iter().enumerate() {
            let record = self.processes.get(pid)?;
            if !self.queue.contains(record) {
                return Err(MemsimError::membership(format!("P{} linked but not marked", pid)));
            }
            if pos > 0 && record.completion_time().is_some() {
                return Err(MemsimError::invariant(format!(
                    "P{} has paging I/O in flight behind the queue head",
                    pid
                )));
            }
        }
        Ok(())
    }
}

impl<S: ReplySink> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("frames_in_use", &self.frames.owned_count())
            .field("running", &self.running())
            .field("queue", &self.queue.len())
            .finish()
    }
}
