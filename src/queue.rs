//! FIFO wait queue of processes blocked on paging I/O
//!
//! Links are stored by slot index instead of pointers inside the records;
//! each record only remembers which queue (if any) it belongs to.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::SimPid;
use crate::error::{MemsimError, Result};
use crate::process::{ProcessRecord, ProcessTable};

static NEXT_QUEUE_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a wait queue, stored in the records it holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u32);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    ahead: Option<SimPid>,
    behind: Option<SimPid>,
}

#[derive(Debug)]
pub struct WaitQueue {
    id: QueueId,
    links: Vec<Link>,
    front: Option<SimPid>,
    back: Option<SimPid>,
    len: usize,
}

impl WaitQueue {
    pub fn new() -> Self {
        WaitQueue {
            id: QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)),
            links: Vec::new(),
            front: None,
            back: None,
            len: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> QueueId {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn front(&self) -> Option<SimPid> {
        self.front
    }

    #[inline]
    pub fn back(&self) -> Option<SimPid> {
        self.back
    }

    pub fn contains(&self, record: &ProcessRecord) -> bool {
        record.queue == Some(self.id)
    }

    /// Add a process at the back; it must not be in any queue
    pub fn enqueue(&mut self, processes: &mut ProcessTable, sim_pid: SimPid) -> Result<()> {
        let record = processes.get_mut(sim_pid)?;
        if let Some(q) = record.queue {
            return Err(MemsimError::membership(format!(
                "enqueue of P{} which is already in {}",
                sim_pid, q
            )));
        }
        record.queue = Some(self.id);

        if self.links.len() <= sim_pid {
            self.links.resize(sim_pid + 1, Link::default());
        }
        self.links[sim_pid] = Link { ahead: self.back, behind: None };
        match self.back {
            Some(back) => self.links[back].behind = Some(sim_pid),
            None => self.front = Some(sim_pid),
        }
        self.back = Some(sim_pid);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the front process
    pub fn dequeue(&mut self, processes: &mut ProcessTable) -> Result<SimPid> {
        let front = self
            .front
            .ok_or_else(|| MemsimError::membership(format!("dequeue on empty {}", self.id)))?;
        self.remove(processes, front)?;
        Ok(front)
    }

    /// Unlink a process from any position in this queue
    pub fn remove(&mut self, processes: &mut ProcessTable, sim_pid: SimPid) -> Result<()> {
        let record = processes.get_mut(sim_pid)?;
        if record.queue != Some(self.id) {
            return Err(MemsimError::membership(format!(
                "remove of P{} which is not in {}",
                sim_pid, self.id
            )));
        }
        record.queue = None;

        let Link { ahead, behind } = std::mem::take(&mut self.links[sim_pid]);
        match ahead {
            Some(a) => self.links[a].behind = behind,
            None => self.front = behind,
        }
        match behind {
            Some(b) => self.links[b].ahead = ahead,
            None => self.back = ahead,
        }
        self.len -= 1;
        Ok(())
    }

    /// Iterate from front to back
    pub fn iter(&self) -> Iter<'_> {
        Iter { queue: self, next: self.front }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a> {
    queue: &'a WaitQueue,
    next: Option<SimPid>,
}

impl Iterator for Iter<'_> {
    type Item = SimPid;

    fn next(&mut self) -> Option<SimPid> {
        let cur = self.next?;
        self.next = self.queue.links[cur].behind;
        Some(cur)
    }
}

impl fmt::Display for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.id)?;
        for pid in self.iter() {
            write!(f, " {:02}", pid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(n: usize) -> (WaitQueue, ProcessTable) {
        (WaitQueue::new(), ProcessTable::new(n, 4))
    }

    fn order(q: &WaitQueue) -> Vec<SimPid> {
        q.iter().collect()
    }

    #[test]
    fn test_fifo_order() {
        let (mut q, mut pt) = setup(5);
        for pid in [3, 0, 4] {
            q.enqueue(&mut pt, pid).unwrap();
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.front(), Some(3));
        assert_eq!(q.back(), Some(4));
        assert_eq!(order(&q), vec![3, 0, 4]);

        assert_eq!(q.dequeue(&mut pt).unwrap(), 3);
        assert_eq!(q.dequeue(&mut pt).unwrap(), 0);
        assert_eq!(q.dequeue(&mut pt).unwrap(), 4);
        assert!(q.is_empty());
        assert_eq!(q.front(), None);
        assert_eq!(q.back(), None);
    }

    #[test]
    fn test_membership_is_recorded() {
        let (mut q, mut pt) = setup(2);
        q.enqueue(&mut pt, 1).unwrap();
        assert!(q.contains(pt.get(1).unwrap()));
        assert_eq!(pt.get(1).unwrap().queue(), Some(q.id()));
        q.dequeue(&mut pt).unwrap();
        assert_eq!(pt.get(1).unwrap().queue(), None);
    }

    #[test]
    fn test_double_enqueue_is_violation() {
        let (mut q, mut pt) = setup(2);
        q.enqueue(&mut pt, 0).unwrap();
        let err = q.enqueue(&mut pt, 0).unwrap_err();
        assert!(matches!(err, MemsimError::QueueMembership(_)));

        // also across different queues
        let mut other = WaitQueue::new();
        assert!(other.enqueue(&mut pt, 0).is_err());
        assert_eq!(q.len(), 1);
        assert!(other.is_empty());
    }

    #[test]
    fn test_dequeue_empty_is_violation() {
        let (mut q, mut pt) = setup(1);
        assert!(matches!(q.dequeue(&mut pt), Err(MemsimError::QueueMembership(_))));
    }

    #[test]
    fn test_remove_from_middle() {
        let (mut q, mut pt) = setup(4);
        for pid in 0..4 {
            q.enqueue(&mut pt, pid).unwrap();
        }
        q.remove(&mut pt, 2).unwrap();
        assert_eq!(order(&q), vec![0, 1, 3]);
        q.remove(&mut pt, 0).unwrap();
        assert_eq!(order(&q), vec![1, 3]);
        assert_eq!(q.front(), Some(1));
        q.remove(&mut pt, 3).unwrap();
        assert_eq!(q.back(), Some(1));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_remove_not_member_is_violation() {
        let (mut q, mut pt) = setup(3);
        q.enqueue(&mut pt, 0).unwrap();
        assert!(q.remove(&mut pt, 1).is_err());

        let mut other = WaitQueue::new();
        assert!(other.remove(&mut pt, 0).is_err());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_requeue_after_removal() {
        let (mut q, mut pt) = setup(3);
        q.enqueue(&mut pt, 0).unwrap();
        q.enqueue(&mut pt, 1).unwrap();
        q.remove(&mut pt, 0).unwrap();
        q.enqueue(&mut pt, 0).unwrap();
        assert_eq!(order(&q), vec![1, 0]);
    }

    #[test]
    fn test_display() {
        let (mut q, mut pt) = setup(12);
        q.enqueue(&mut pt, 11).unwrap();
        q.enqueue(&mut pt, 2).unwrap();
        assert!(q.to_string().ends_with(": 11 02"));
    }
}
