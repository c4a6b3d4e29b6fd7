//! The lookup task state machine.
//!
//! A [`Task`] drives a flood of concurrent probes toward the nodes closest
//! to a target key. It owns the candidate partitions and visited index,
//! accounts for RPC slots, and moves through a three-state lifecycle:
//! queued → running → finished. The traversal strategy itself is supplied
//! by a [`TaskPolicy`]; the engine calls back into it from the scheduling
//! tick and from the RPC listener events.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, trace};

use crate::candidates::{CandidateSet, VisitedSet};
use crate::key::Key;
use crate::protocol::Message;
use crate::routing::{KBucketEntry, RoutingTable};
use crate::rpc::{CallListener, RpcCall, RpcServer};

// ============================================================================
// Engine Constants
// ============================================================================

/// Per-task cap on non-stalled in-flight probes.
pub const MAX_CONCURRENT_REQUESTS: usize = 10;

/// Replication factor: the number of closest responded nodes a lookup must
/// converge on, and the width of its termination window.
pub const K: usize = 8;

/// Exploration margin: probes kept going past the termination window while
/// the task is nearly idle, to guard against a stale window edge.
pub const ALPHA: usize = 3;

/// Cap on concurrently running tasks per RPC server.
pub const MAX_ACTIVE_TASKS: usize = 7;

/// Sentinel finish timestamp distinguishing a killed task from a naturally
/// completed one. External consumers rely on this exact encoding.
pub const KILLED_AT: i64 = -1;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Policy Hooks
// ============================================================================

/// Traversal strategy plugged into a [`Task`].
///
/// The engine owns lifecycle, slot accounting, and callback plumbing; the
/// policy decides which probes to emit, how to digest payloads, and when
/// the task is done. Hooks may be entered concurrently from listener
/// callbacks on different server threads.
pub trait TaskPolicy: Send + Sync {
    /// Emit probes while the task has request budget. Called from the
    /// scheduling tick whenever a slot might be available.
    fn update(&self, task: &Task);

    /// Digest a correlated response. An `Err` means the payload carried no
    /// usable information; the engine logs it and the tick resumes.
    fn call_finished(&self, task: &Task, call: &RpcCall, response: &Message) -> anyhow::Result<()>;

    /// A probe reached its hard deadline.
    fn call_timeout(&self, task: &Task, call: &RpcCall);

    /// Completion predicate, evaluated at every tick.
    fn is_done(&self, task: &Task) -> bool;
}

// ============================================================================
// Task
// ============================================================================

/// Identifier handed out by [`Task::add_listener`] for later removal.
pub type ListenerId = u64;

type TaskListenerFn = dyn Fn(&Task) + Send + Sync;

/// A single lookup task.
///
/// Construct with [`Task::new`], seed the todo set, and either hand the
/// task to a [`TaskManager`](crate::manager::TaskManager) or call
/// [`start`](Task::start) directly. All further activity is driven by the
/// RPC server's listener callbacks; the task itself never blocks and never
/// starts a timer.
pub struct Task {
    target: Key,
    rpc: Arc<dyn RpcServer>,
    routing: Arc<dyn RoutingTable>,
    policy: Arc<dyn TaskPolicy>,
    candidates: CandidateSet,
    visited: VisitedSet,

    info: Mutex<String>,
    task_id: AtomicU32,
    queued: AtomicBool,
    finished: AtomicBool,

    sent: AtomicU32,
    recv: AtomicU32,
    failed: AtomicU32,
    outstanding: AtomicI32,
    outstanding_excluding_stalled: AtomicI32,

    start_time: AtomicI64,
    first_result_time: AtomicI64,
    finish_time: AtomicI64,

    listeners: Mutex<Vec<(ListenerId, Arc<TaskListenerFn>)>>,
    next_listener: AtomicU64,
    self_ref: Weak<Task>,
}

impl Task {
    /// Create a task in the queued state. The policy is shared so callers
    /// can keep a handle for reading results after completion.
    pub fn new(
        target: Key,
        rpc: Arc<dyn RpcServer>,
        routing: Arc<dyn RoutingTable>,
        policy: Arc<dyn TaskPolicy>,
    ) -> Arc<Task> {
        Arc::new_cyclic(|self_ref| Task {
            target,
            rpc,
            routing,
            policy,
            candidates: CandidateSet::new(target),
            visited: VisitedSet::new(),
            info: Mutex::new(String::new()),
            task_id: AtomicU32::new(0),
            queued: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            sent: AtomicU32::new(0),
            recv: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            outstanding: AtomicI32::new(0),
            outstanding_excluding_stalled: AtomicI32::new(0),
            start_time: AtomicI64::new(0),
            first_result_time: AtomicI64::new(0),
            finish_time: AtomicI64::new(0),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Move the task from queued to running and run the first scheduling
    /// tick. Repeated calls are no-ops.
    pub fn start(&self) {
        if self.queued.swap(false, Ordering::SeqCst) {
            self.start_time.store(now_millis(), Ordering::SeqCst);
            debug!(task = self.task_id(), key = %self.target, "starting task");
            self.run_tick();
        }
    }

    /// Terminate the task from any state. Outstanding calls are not
    /// cancelled at the server; their callbacks still drain the gauges but
    /// no longer reach the policy.
    pub fn kill(&self) {
        self.finish_time.store(KILLED_AT, Ordering::SeqCst);
        self.finished();
    }

    /// Single-shot finish: flip the flag, stamp the timestamp, notify every
    /// registered listener exactly once.
    fn finished(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        // kill() pins the sentinel before getting here; only stamp a
        // natural completion
        if self.finish_time.load(Ordering::SeqCst) != KILLED_AT {
            self.finish_time.store(now_millis(), Ordering::SeqCst);
        }

        debug!(task = self.task_id(), "task finished: {}", self);

        let notify: Vec<Arc<TaskListenerFn>> = {
            let mut listeners = self.listeners.lock().expect("listener lock");
            listeners.drain(..).map(|(_, listener)| listener).collect()
        };
        for listener in notify {
            listener(self);
        }
    }

    /// One scheduling pass: finish if done, otherwise let the policy emit
    /// probes and re-check (update may drain todo without issuing anything).
    fn run_tick(&self) {
        if self.policy.is_done(self) {
            self.finished();
        }

        if self.can_do_request() && !self.is_finished() {
            self.policy.update(self);

            if self.policy.is_done(self) {
                self.finished();
            }
        }
    }

    // ------------------------------------------------------------------
    // Probe emission
    // ------------------------------------------------------------------

    /// Whether another non-stalled probe fits the per-task budget.
    pub fn can_do_request(&self) -> bool {
        (self.outstanding_excluding_stalled.load(Ordering::SeqCst) as usize)
            < MAX_CONCURRENT_REQUESTS
    }

    /// Whether any call has not yet reached its terminal event.
    pub fn has_unfinished_requests(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) > 0
    }

    /// Issue a probe toward `expected_id` at `destination`.
    ///
    /// Returns `false` when the task is out of request budget; in that case
    /// a one-shot declog wake-up is registered with the server so the tick
    /// re-runs once a slot frees. On success the call is accounted as
    /// in-flight and submitted through the shared scheduler, never inline:
    /// the server may re-enter listeners from `do_call`.
    pub fn rpc_call(
        &self,
        request: Message,
        destination: SocketAddr,
        expected_id: Key,
        modifier: Option<&dyn Fn(&mut RpcCall)>,
    ) -> bool {
        if !self.can_do_request() {
            let wake = self.self_ref.clone();
            self.rpc.on_declog(Box::new(move || {
                if let Some(task) = wake.upgrade() {
                    task.run_tick();
                }
            }));
            return false;
        }

        let listener: Arc<dyn CallListener> = match self.self_ref.upgrade() {
            Some(task) => task,
            None => return false,
        };

        let mut call = RpcCall::new(request, destination, expected_id, listener);
        if let Some(modify) = modifier {
            modify(&mut call);
        }
        let call = Arc::new(call);

        self.candidates.promote_in_flight(&expected_id);
        self.outstanding_excluding_stalled
            .fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.sent.fetch_add(1, Ordering::SeqCst);

        trace!(task = self.task_id(), to = %destination, expected = %expected_id, "probe");

        let rpc = Arc::clone(&self.rpc);
        self.rpc
            .scheduler()
            .execute(Box::new(move || rpc.do_call(call)));

        true
    }

    // ------------------------------------------------------------------
    // Candidate admission
    // ------------------------------------------------------------------

    /// Add an entry straight to the todo set, bypassing the visited filter.
    pub fn add_to_todo(&self, entry: KBucketEntry) {
        self.candidates.add_todo(entry);
    }

    /// Add a discovered entry, dropping it when its id or IP was already
    /// visited.
    pub fn add_candidate(&self, entry: KBucketEntry) {
        self.candidates.add_candidate(entry, &self.visited);
    }

    /// Seed the todo set with a bootstrap-style address hint. The expected
    /// id is random; the real id is learned from the node's response.
    pub fn add_dht_node(&self, ip: IpAddr, port: u16) {
        self.add_to_todo(KBucketEntry::new(Key::random(), SocketAddr::new(ip, port)));
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    pub fn routing(&self) -> &Arc<dyn RoutingTable> {
        &self.routing
    }

    // ------------------------------------------------------------------
    // Observable properties
    // ------------------------------------------------------------------

    pub fn target(&self) -> Key {
        self.target
    }

    pub fn task_id(&self) -> u32 {
        self.task_id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_task_id(&self, id: u32) {
        self.task_id.store(id, Ordering::SeqCst);
    }

    pub fn info(&self) -> String {
        self.info.lock().expect("info lock").clone()
    }

    /// Set the display label, e.g. a download name.
    pub fn set_info(&self, info: impl Into<String>) {
        *self.info.lock().expect("info lock") = info.into();
    }

    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self) -> u32 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn recv_count(&self) -> u32 {
        self.recv.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> u32 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Calls that have not reached their terminal event, stalled included.
    pub fn outstanding(&self) -> i32 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Calls the task is actively waiting for.
    pub fn outstanding_excluding_stalled(&self) -> i32 {
        self.outstanding_excluding_stalled.load(Ordering::SeqCst)
    }

    pub fn todo_count(&self) -> usize {
        self.candidates.todo_count()
    }

    /// Epoch millis when the task left the queued state, 0 before that.
    pub fn start_time(&self) -> i64 {
        self.start_time.load(Ordering::SeqCst)
    }

    /// Epoch millis of the first useful response, 0 if none arrived.
    pub fn first_result_time(&self) -> i64 {
        self.first_result_time.load(Ordering::SeqCst)
    }

    /// Epoch millis of natural completion, [`KILLED_AT`] when killed, 0
    /// while not finished.
    pub fn finish_time(&self) -> i64 {
        self.finish_time.load(Ordering::SeqCst)
    }

    /// Stamp the first-useful-response timestamp; later calls are no-ops.
    pub fn mark_first_result(&self) {
        let _ = self.first_result_time.compare_exchange(
            0,
            now_millis(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn age(&self) -> Duration {
        let started = self.start_time();
        if started == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis((now_millis() - started).max(0) as u64)
    }

    // ------------------------------------------------------------------
    // Completion listeners
    // ------------------------------------------------------------------

    /// Register a completion listener. A listener added after termination
    /// is invoked synchronously on the adding thread, preserving the
    /// once-per-listener observation contract for late subscribers.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let listener: Arc<TaskListenerFn> = Arc::new(listener);

        let fire_now = {
            let mut listeners = self.listeners.lock().expect("listener lock");
            if self.is_finished() {
                true
            } else {
                listeners.push((id, Arc::clone(&listener)));
                false
            }
        };
        if fire_now {
            listener(self);
        }
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("listener lock")
            .retain(|(listener_id, _)| *listener_id != id);
    }
}

// ============================================================================
// RPC listener plumbing
// ============================================================================

impl CallListener for Task {
    fn on_response(&self, call: &RpcCall, response: &Message) {
        if !self.is_finished() {
            if let Err(err) = self.policy.call_finished(self, call, response) {
                error!(task = self.task_id(), "discarding response payload: {err:#}");
            }
        }

        self.candidates.release(&call.expected_id());

        // payload digested above; only now surrender the slot
        if !call.was_stalled() {
            self.outstanding_excluding_stalled
                .fetch_sub(1, Ordering::SeqCst);
        }
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.recv.fetch_add(1, Ordering::SeqCst);

        self.run_tick();
    }

    fn on_stall(&self, call: &RpcCall) {
        self.candidates.demote_stalled(&call.expected_id());
        self.outstanding_excluding_stalled
            .fetch_sub(1, Ordering::SeqCst);

        self.run_tick();
    }

    fn on_timeout(&self, call: &RpcCall) {
        self.candidates.release(&call.expected_id());

        if !call.was_stalled() {
            self.outstanding_excluding_stalled
                .fetch_sub(1, Ordering::SeqCst);
        }
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);

        if !self.is_finished() {
            self.policy.call_timeout(self, call);
        }

        self.run_tick();
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} target:{} todo:{}",
            self.task_id(),
            self.target,
            self.todo_count()
        )?;
        if !self.is_queued() {
            write!(
                f,
                " sent:{} recv:{} failed:{}",
                self.sent_count(),
                self.recv_count(),
                self.failed_count()
            )?;
        }
        if self.finish_time() == KILLED_AT {
            write!(f, " killed")?;
        } else if self.is_finished() {
            write!(f, " finished")?;
        }
        let info = self.info();
        if !info.is_empty() {
            write!(f, " name:{info}")?;
        }
        Ok(())
    }
}
