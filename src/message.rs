//! Request/reply messages between workers and the manager
//!
//! A request carries one signed integer: a non-negative value is a read of
//! that address, a negative value is the bitwise complement of a write
//! address, and one sentinel past the largest address means "terminating".

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::constants::SimPid;
use crate::error::{MemsimError, Result};
use crate::process::ReferenceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Reference { address: u32, kind: ReferenceKind },
    Terminate,
}

/// Payload encoding shared by both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    terminate: i32,
}

impl Codec {
    /// The sentinel sits one past the largest address a process can own
    pub fn new(max_pages: usize, page_size: u32) -> Self {
        Codec { terminate: (max_pages as u64 * page_size as u64 + 1) as i32 }
    }

    #[inline]
    pub fn terminate_sentinel(&self) -> i32 {
        self.terminate
    }

    pub fn encode(&self, message: Message) -> i32 {
        match message {
            Message::Terminate => self.terminate,
            Message::Reference { address, kind: ReferenceKind::Read } => address as i32,
            Message::Reference { address, kind: ReferenceKind::Write } => !(address as i32),
        }
    }

    pub fn decode(&self, payload: i32) -> Message {
        if payload == self.terminate {
            Message::Terminate
        } else if payload < 0 {
            Message::Reference { address: (!payload) as u32, kind: ReferenceKind::Write }
        } else {
            Message::Reference { address: payload as u32, kind: ReferenceKind::Read }
        }
    }
}

/// One message on the request channel, tagged with its sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub sender: SimPid,
    pub payload: i32,
}

/// Manager's answer to a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Granted,
    /// The worker made an illegal reference and must exit
    Killed,
}

/// Where the manager reads requests from
pub trait RequestSource {
    /// Next pending request, without blocking
    fn try_recv(&mut self) -> Result<Option<Request>>;
}

/// Where the manager sends replies to
pub trait ReplySink {
    fn send(&mut self, recipient: SimPid, reply: Reply) -> Result<()>;

    /// Close a recipient's channel so a blocked receiver wakes up
    fn disconnect(&mut self, recipient: SimPid);

    fn disconnect_all(&mut self);
}

/// Manager side of the shared request channel
///
/// Keeps its own sender so the channel never disconnects while workers
/// come and go.
#[derive(Debug)]
pub struct RequestReceiver {
    rx: Receiver<Request>,
    tx: Sender<Request>,
}

impl RequestReceiver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        RequestReceiver { rx, tx }
    }

    /// A sender for a new worker
    pub fn sender(&self) -> Sender<Request> {
        self.tx.clone()
    }
}

impl Default for RequestReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestSource for RequestReceiver {
    fn try_recv(&mut self) -> Result<Option<Request>> {
        match self.rx.try_recv() {
            Ok(request) => Ok(Some(request)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(MemsimError::channel("request channel disconnected")),
        }
    }
}

/// Per-slot reply channels
#[derive(Debug, Default)]
pub struct ReplyRouter {
    slots: Vec<Option<Sender<Reply>>>,
}

impl ReplyRouter {
    pub fn new(slots: usize) -> Self {
        ReplyRouter { slots: vec![None; slots] }
    }

    /// Open a fresh reply channel for a slot, returning the worker's end
    pub fn connect(&mut self, sim_pid: SimPid) -> Receiver<Reply> {
        if self.slots.len() <= sim_pid {
            self.slots.resize(sim_pid + 1, None);
        }
        let (tx, rx) = mpsc::channel();
        self.slots[sim_pid] = Some(tx);
        rx
    }

    pub fn is_connected(&self, sim_pid: SimPid) -> bool {
        matches!(self.slots.get(sim_pid), Some(Some(_)))
    }
}

impl ReplySink for ReplyRouter {
    fn send(&mut self, recipient: SimPid, reply: Reply) -> Result<()> {
        let tx = self
            .slots
            .get(recipient)
            .and_then(Option::as_ref)
            .ok_or_else(|| MemsimError::channel(format!("no reply channel for P{}", recipient)))?;
        tx.send(reply)
            .map_err(|_| MemsimError::channel(format!("P{} is no longer listening", recipient)))
    }

    fn disconnect(&mut self, recipient: SimPid) {
        if let Some(slot) = self.slots.get_mut(recipient) {
            *slot = None;
        }
    }

    fn disconnect_all(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}

/// Worker side of both channels
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub sim_pid: SimPid,
    requests: Sender<Request>,
    replies: Receiver<Reply>,
}

impl WorkerEndpoint {
    pub fn new(sim_pid: SimPid, requests: Sender<Request>, replies: Receiver<Reply>) -> Self {
        WorkerEndpoint { sim_pid, requests, replies }
    }

    /// Send a payload without waiting for an answer
    pub fn send(&self, payload: i32) -> Result<()> {
        self.requests
            .send(Request { sender: self.sim_pid, payload })
            .map_err(|_| MemsimError::channel("manager stopped receiving requests"))
    }

    /// Block until the manager replies
    pub fn wait_reply(&self) -> Result<Reply> {
        self.replies
            .recv()
            .map_err(|_| MemsimError::channel(format!("reply channel for P{} closed", self.sim_pid)))
    }

    pub fn try_reply(&self) -> Result<Option<Reply>> {
        match self.replies.try_recv() {
            Ok(reply) => Ok(Some(reply)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(MemsimError::channel(format!(
                "reply channel for P{} closed",
                self.sim_pid
            ))),
        }
    }

    /// Send a reference and wait for the manager's answer
    pub fn request(&self, payload: i32) -> Result<Reply> {
        self.send(payload)?;
        self.wait_reply()
    }
}
