use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mainline_kad::{KBucketEntry, Key, Message, RoutingTable, RpcCall, RpcServer, Scheduler};

/// Executor running submitted jobs on the calling thread, so tests stay
/// deterministic.
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        job()
    }
}

/// RpcServer double: records submitted calls for manual delivery and keeps
/// registered declog wake-ups until the test fires them.
pub struct ScriptedServer {
    scheduler: Arc<dyn Scheduler>,
    pending: Mutex<Vec<Arc<RpcCall>>>,
    declog: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ScriptedServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scheduler: Arc::new(InlineScheduler),
            pending: Mutex::new(Vec::new()),
            declog: Mutex::new(Vec::new()),
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Snapshot of the pending calls, leaving them pending.
    pub fn pending(&self) -> Vec<Arc<RpcCall>> {
        self.pending.lock().unwrap().clone()
    }

    /// Drain the pending calls for delivery.
    pub fn take_pending(&self) -> Vec<Arc<RpcCall>> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    /// Deliver a response for one pending call, removing it first.
    pub fn respond(&self, call: &Arc<RpcCall>, response: &Message) {
        self.forget(call);
        call.deliver_response(response);
    }

    /// Respond to every currently pending call with `respond_with`.
    pub fn respond_all(&self, respond_with: impl Fn(&RpcCall) -> Message) -> usize {
        let calls = self.take_pending();
        for call in &calls {
            call.deliver_response(&respond_with(call));
        }
        calls.len()
    }

    /// Time out every currently pending call.
    pub fn timeout_all(&self) -> usize {
        let calls = self.take_pending();
        for call in &calls {
            call.deliver_timeout();
        }
        calls.len()
    }

    /// Stall every currently pending call; they stay pending for a later
    /// terminal delivery.
    pub fn stall_all(&self) -> usize {
        let calls = self.pending();
        for call in &calls {
            call.deliver_stall();
        }
        calls.len()
    }

    pub fn declog_count(&self) -> usize {
        self.declog.lock().unwrap().len()
    }

    /// Fire and drop every registered declog wake-up.
    pub fn fire_declog(&self) {
        let wakeups = std::mem::take(&mut *self.declog.lock().unwrap());
        for wakeup in wakeups {
            wakeup();
        }
    }

    fn forget(&self, call: &Arc<RpcCall>) {
        self.pending
            .lock()
            .unwrap()
            .retain(|pending| !Arc::ptr_eq(pending, call));
    }
}

impl RpcServer for ScriptedServer {
    fn do_call(&self, call: Arc<RpcCall>) {
        self.pending.lock().unwrap().push(call);
    }

    fn on_declog(&self, wakeup: Box<dyn FnOnce() + Send>) {
        self.declog.lock().unwrap().push(wakeup);
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }
}

/// Routing sink recording every entry a lookup reports.
#[derive(Default)]
pub struct RecordingTable {
    entries: Mutex<Vec<KBucketEntry>>,
}

impl RecordingTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<KBucketEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl RoutingTable for RecordingTable {
    fn insert_entry(&self, entry: KBucketEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

/// Key with the given first (most significant) byte.
pub fn make_key(first: u8) -> Key {
    let mut bytes = [0u8; 20];
    bytes[0] = first;
    Key::from_bytes(bytes)
}

pub fn make_addr(host: u8, port: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, host], port))
}

pub fn make_entry(first: u8, host: u8) -> KBucketEntry {
    KBucketEntry::new(make_key(first), make_addr(host, 6881))
}

/// A contact-less lookup response from `id`.
pub fn empty_nodes(id: Key) -> Message {
    Message::NodesResponse {
        id,
        nodes: Vec::new(),
    }
}
