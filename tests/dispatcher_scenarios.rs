//! Dispatcher behaviour driven through real channels, one pass at a time

use std::sync::Arc;

use memsim::config::{Config, FreeFramePolicy, IllegalAddressPolicy};
use memsim::dispatcher::{Dispatcher, Event};
use memsim::message::{Codec, Message, Reply, ReplyRouter, RequestReceiver, WorkerEndpoint};
use memsim::process::{ExternalProcess, ReferenceKind};
use memsim::{MemsimError, SimTime, SimulatedClock};

/// A process handle whose exit cannot be collected
#[derive(Debug)]
struct CrashedWorker;

impl ExternalProcess for CrashedWorker {
    fn wait(self: Box<Self>) -> memsim::Result<()> {
        Err(MemsimError::ResourceInvariant("worker crashed".into()))
    }
}

struct Harness {
    dispatcher: Dispatcher<ReplyRouter>,
    requests: RequestReceiver,
    endpoints: Vec<WorkerEndpoint>,
    codec: Codec,
    io: SimTime,
}

impl Harness {
    fn new(config: Config, pages: &[usize]) -> Self {
        let clock = Arc::new(SimulatedClock::new());
        let mut dispatcher = Dispatcher::new(&config, clock, ReplyRouter::new(config.max_running));
        let requests = RequestReceiver::new();
        let mut endpoints = Vec::new();
        for (pid, &n) in pages.iter().enumerate() {
            let rx = dispatcher.replies_mut().connect(pid);
            endpoints.push(WorkerEndpoint::new(pid, requests.sender(), rx));
            dispatcher.admit(pid, n, None).unwrap();
        }
        Harness {
            codec: dispatcher.codec(),
            io: config.io_operation(),
            dispatcher,
            requests,
            endpoints,
        }
    }

    fn read(&self, pid: usize, address: u32) {
        let payload = self.codec.encode(Message::Reference { address, kind: ReferenceKind::Read });
        self.endpoints[pid].send(payload).unwrap();
    }

    fn write(&self, pid: usize, address: u32) {
        let payload = self.codec.encode(Message::Reference { address, kind: ReferenceKind::Write });
        self.endpoints[pid].send(payload).unwrap();
    }

    fn terminate(&self, pid: usize) {
        self.endpoints[pid].send(self.codec.encode(Message::Terminate)).unwrap();
    }

    fn poll(&mut self) -> Vec<Event> {
        let events = self.dispatcher.poll(&mut self.requests).unwrap();
        self.dispatcher.check_invariants().unwrap();
        events
    }

    fn service(&mut self) -> Vec<Event> {
        let events = self.dispatcher.service_queue().unwrap();
        self.dispatcher.check_invariants().unwrap();
        events
    }

    fn reply(&self, pid: usize) -> Option<Reply> {
        self.endpoints[pid].try_reply().unwrap()
    }

    fn now(&self) -> SimTime {
        self.dispatcher.clock().now().unwrap()
    }

    /// Fault a page in and grant it through the free-frame path
    fn load(&mut self, pid: usize, address: u32, write: bool) {
        if write {
            self.write(pid, address);
        } else {
            self.read(pid, address);
        }
        assert_eq!(self.poll(), vec![Event::Faulted(pid)]);
        assert_eq!(self.service(), vec![Event::Granted(pid)]);
        assert_eq!(self.reply(pid), Some(Reply::Granted));
    }
}

fn config(frames: usize) -> Config {
    Config { frames, max_running: 4, ..Config::default() }
}

#[test]
fn test_reference_past_length_register_kills_worker() {
    let mut h = Harness::new(config(4), &[2]);
    h.read(0, 2048);

    assert_eq!(h.poll(), vec![Event::Killed(0)]);
    assert_eq!(h.reply(0), Some(Reply::Killed));
    assert_eq!(h.dispatcher.stats().workers_killed, 1);
    assert!(!h.dispatcher.processes().get(0).unwrap().is_assigned());
    assert_eq!(h.dispatcher.running(), 0);
}

#[test]
fn test_reference_past_length_register_aborts_under_abort_policy() {
    let cfg = Config { illegal_address_policy: IllegalAddressPolicy::Abort, ..config(4) };
    let mut h = Harness::new(cfg, &[2]);
    h.read(0, 2048);

    let err = h.dispatcher.poll(&mut h.requests).unwrap_err();
    match err {
        MemsimError::IllegalAddress { sim_pid, address, page, allocated } => {
            assert_eq!((sim_pid, address, page, allocated), (0, 2048, 2, 2));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_fault_with_free_frame_granted_same_pass() {
    let mut h = Harness::new(config(4), &[4]);
    h.read(0, 1500);

    assert_eq!(h.poll(), vec![Event::Faulted(0)]);
    assert_eq!(h.dispatcher.queue().len(), 1);
    assert_eq!(h.reply(0), None);

    assert_eq!(h.service(), vec![Event::Granted(0)]);
    assert_eq!(h.reply(0), Some(Reply::Granted));
    assert!(h.dispatcher.queue().is_empty());

    let entry = h.dispatcher.processes().get(0).unwrap().page_table[1];
    assert!(entry.valid);
    let frame = entry.frame.unwrap();
    let desc = h.dispatcher.frames().get(frame).unwrap();
    assert_eq!((desc.owner, desc.page), (Some(0), Some(1)));

    // only the memory access itself was charged
    assert_eq!(h.now(), SimTime::from_nanos(10));
    assert_eq!(h.dispatcher.stats().page_faults, 1);
    assert_eq!(h.dispatcher.stats().memory_accesses, 1);
}

#[test]
fn test_resident_page_granted_on_arrival() {
    let mut h = Harness::new(config(4), &[4]);
    h.load(0, 1500, false);

    h.write(0, 1024);
    assert_eq!(h.poll(), vec![Event::Granted(0)]);
    assert_eq!(h.reply(0), Some(Reply::Granted));

    let entry = h.dispatcher.processes().get(0).unwrap().page_table[1];
    assert!(entry.dirty);
    assert!(h.dispatcher.frames().get(entry.frame.unwrap()).unwrap().dirty);
    assert_eq!(h.dispatcher.stats().page_faults, 1);
}

#[test]
fn test_charge_io_policy_delays_free_frame_fill() {
    let cfg = Config { free_frame_policy: FreeFramePolicy::ChargeIo, ..config(4) };
    let mut h = Harness::new(cfg, &[4]);
    h.read(0, 0);
    h.poll();

    let start = h.now();
    assert!(h.service().is_empty());
    assert_eq!(
        h.dispatcher.processes().get(0).unwrap().completion_time(),
        Some(start + h.io)
    );

    h.dispatcher.clock().advance(h.io).unwrap();
    assert_eq!(h.service(), vec![Event::Granted(0)]);
    assert_eq!(h.reply(0), Some(Reply::Granted));
}

#[test]
fn test_clean_victim_costs_one_io_unit() {
    let mut h = Harness::new(config(1), &[2]);
    h.load(0, 0, false);

    h.read(0, 1024);
    assert_eq!(h.poll(), vec![Event::Faulted(0)]);
    let start = h.now();
    assert!(h.service().is_empty());
    let done_at = h.dispatcher.processes().get(0).unwrap().completion_time();
    assert_eq!(done_at, Some(start + h.io));

    // the old page lost its frame to the new one
    let record = h.dispatcher.processes().get(0).unwrap();
    assert!(!record.page_table[0].valid);
    assert!(record.page_table[1].valid);

    // nothing happens until the clock reaches the completion time
    assert!(h.service().is_empty());
    assert_eq!(h.reply(0), None);

    h.dispatcher.clock().advance(h.io).unwrap();
    assert_eq!(h.service(), vec![Event::Granted(0)]);
    assert_eq!(h.reply(0), Some(Reply::Granted));
    assert!(h.dispatcher.queue().is_empty());

    let stats = h.dispatcher.stats();
    assert_eq!((stats.swaps, stats.write_backs), (1, 0));
}

#[test]
fn test_dirty_victim_costs_two_io_units() {
    let mut h = Harness::new(config(1), &[2]);
    h.load(0, 0, true);

    h.read(0, 1024);
    h.poll();
    let start = h.now();
    assert!(h.service().is_empty());
    assert_eq!(
        h.dispatcher.processes().get(0).unwrap().completion_time(),
        Some(start + h.io + h.io)
    );

    h.dispatcher.clock().advance(h.io).unwrap();
    assert!(h.service().is_empty());
    h.dispatcher.clock().advance(h.io).unwrap();
    assert_eq!(h.service(), vec![Event::Granted(0)]);

    let stats = h.dispatcher.stats();
    assert_eq!((stats.swaps, stats.write_backs), (1, 1));
}

#[test]
fn test_victim_taken_from_another_process() {
    let mut h = Harness::new(config(1), &[1, 1]);
    h.load(0, 100, true);

    h.read(1, 200);
    h.poll();
    h.service();
    assert!(!h.dispatcher.processes().get(0).unwrap().page_table[0].valid);
    let desc = h.dispatcher.frames().get(0).unwrap();
    assert_eq!(desc.owner, Some(1));
    assert!(!desc.dirty);
}

#[test]
fn test_requests_handled_in_arrival_order() {
    let mut h = Harness::new(config(4), &[2, 2]);
    h.read(1, 0);
    h.read(0, 0);

    assert_eq!(h.poll(), vec![Event::Faulted(1), Event::Faulted(0)]);
    assert_eq!(h.dispatcher.queue().iter().collect::<Vec<_>>(), vec![1, 0]);

    assert_eq!(h.service(), vec![Event::Granted(1)]);
    assert_eq!(h.reply(0), None);
    assert_eq!(h.service(), vec![Event::Granted(0)]);
    assert_eq!(h.reply(0), Some(Reply::Granted));

    // both resident now: granted on arrival, in order
    h.write(0, 10);
    h.read(1, 10);
    assert_eq!(h.poll(), vec![Event::Granted(0), Event::Granted(1)]);
}

#[test]
fn test_reference_while_queued_is_membership_violation() {
    let mut h = Harness::new(config(4), &[2]);
    h.read(0, 0);
    h.read(0, 1024);

    let err = h.dispatcher.poll(&mut h.requests).unwrap_err();
    assert!(matches!(err, MemsimError::QueueMembership(_)));
}

#[test]
fn test_terminate_releases_frames_and_slot() {
    let mut h = Harness::new(config(4), &[3, 1]);
    h.load(0, 0, true);
    h.load(0, 2048, false);
    h.load(1, 0, false);
    assert_eq!(h.dispatcher.frames().owned_count(), 3);

    h.terminate(0);
    assert_eq!(h.poll(), vec![Event::Terminated(0)]);
    assert_eq!(h.dispatcher.frames().owned_count(), 1);
    assert_eq!(h.dispatcher.frames().free_count(), 3);
    assert_eq!(h.dispatcher.running(), 1);
    assert_eq!(h.dispatcher.free_slot(), Some(0));
    assert_eq!(h.dispatcher.stats().workers_completed, 1);
}

#[test]
fn test_killed_while_others_wait() {
    let mut h = Harness::new(config(1), &[1, 1]);
    h.load(0, 0, false);

    h.read(1, 0);
    h.poll();
    h.service();
    // P1 has a swap in flight; P0 makes an illegal reference meanwhile
    h.read(0, 4096);
    assert_eq!(h.poll(), vec![Event::Killed(0)]);
    assert_eq!(h.dispatcher.queue().iter().collect::<Vec<_>>(), vec![1]);

    h.dispatcher.clock().advance(h.io).unwrap();
    assert_eq!(h.service(), vec![Event::Granted(1)]);
}

#[test]
fn test_shutdown_wakes_blocked_workers() {
    let mut h = Harness::new(config(1), &[2, 2]);
    h.load(0, 0, false);
    h.read(1, 1024);
    h.poll();

    h.dispatcher.shutdown().unwrap();
    assert_eq!(h.dispatcher.running(), 0);
    assert_eq!(h.dispatcher.frames().owned_count(), 0);
    assert!(h.dispatcher.queue().is_empty());
    assert!(h.endpoints[1].wait_reply().is_err());
}

#[test]
fn test_shutdown_reclaims_every_slot_when_a_wait_fails() {
    let clock = Arc::new(SimulatedClock::new());
    let cfg = config(4);
    let mut dispatcher = Dispatcher::new(&cfg, clock, ReplyRouter::new(cfg.max_running));
    let mut requests = RequestReceiver::new();
    let codec = dispatcher.codec();
    let mut endpoints = Vec::new();
    for pid in 0..2 {
        let rx = dispatcher.replies_mut().connect(pid);
        endpoints.push(WorkerEndpoint::new(pid, requests.sender(), rx));
    }
    dispatcher.admit(0, 1, Some(Box::new(CrashedWorker))).unwrap();
    dispatcher.admit(1, 1, None).unwrap();

    for ep in &endpoints {
        let payload = codec.encode(Message::Reference { address: 0, kind: ReferenceKind::Read });
        ep.send(payload).unwrap();
    }
    dispatcher.poll(&mut requests).unwrap();
    dispatcher.service_queue().unwrap();
    dispatcher.service_queue().unwrap();
    assert_eq!(dispatcher.frames().owned_count(), 2);

    let err = dispatcher.shutdown().unwrap_err();
    assert!(matches!(err, MemsimError::ResourceInvariant(_)));
    assert_eq!(dispatcher.running(), 0);
    assert_eq!(dispatcher.frames().owned_count(), 0);
    assert!(dispatcher.queue().is_empty());
    dispatcher.check_invariants().unwrap();
}

#[test]
fn test_terminate_releases_frames_when_wait_fails() {
    let clock = Arc::new(SimulatedClock::new());
    let cfg = config(2);
    let mut dispatcher = Dispatcher::new(&cfg, clock, ReplyRouter::new(cfg.max_running));
    let mut requests = RequestReceiver::new();
    let codec = dispatcher.codec();
    let endpoint = WorkerEndpoint::new(0, requests.sender(), dispatcher.replies_mut().connect(0));
    dispatcher.admit(0, 2, Some(Box::new(CrashedWorker))).unwrap();

    endpoint
        .send(codec.encode(Message::Reference { address: 1024, kind: ReferenceKind::Write }))
        .unwrap();
    dispatcher.poll(&mut requests).unwrap();
    dispatcher.service_queue().unwrap();
    assert_eq!(dispatcher.frames().owned_count(), 1);

    assert!(dispatcher.terminate(0).is_err());
    assert_eq!(dispatcher.running(), 0);
    assert_eq!(dispatcher.frames().free_count(), 2);
    assert_eq!(dispatcher.free_slot(), Some(0));
    dispatcher.check_invariants().unwrap();
}
