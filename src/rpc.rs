//! RPC call correlation and the server capability consumed by tasks.
//!
//! A [`Task`](crate::task::Task) never touches a socket. It hands
//! [`RpcCall`] records to an [`RpcServer`] and is driven entirely by the
//! listener callbacks the server delivers on its own threads: at most one
//! [`CallListener::on_stall`], followed by exactly one of
//! [`CallListener::on_response`] or [`CallListener::on_timeout`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::key::Key;
use crate::protocol::Message;

/// Listener side of a correlated call.
///
/// Implementations must be safe under concurrent invocation: the server may
/// deliver events for different calls from different threads at once.
pub trait CallListener: Send + Sync {
    /// A response matching the call's correlation arrived.
    fn on_response(&self, call: &RpcCall, response: &Message);

    /// The call passed its soft deadline without completing. It no longer
    /// counts against concurrency budgets but may still resolve either way.
    fn on_stall(&self, call: &RpcCall);

    /// The call passed its hard deadline and will never resolve.
    fn on_timeout(&self, call: &RpcCall);
}

/// An outbound request correlated with its expected responder.
///
/// Created when a probe is emitted and co-owned by the server (as pending
/// correlation) and the call's listener until one terminal event fires.
pub struct RpcCall {
    request: Message,
    destination: SocketAddr,
    expected_id: Key,
    low_priority: bool,
    stalled: AtomicBool,
    listener: Arc<dyn CallListener>,
}

impl RpcCall {
    pub fn new(
        request: Message,
        destination: SocketAddr,
        expected_id: Key,
        listener: Arc<dyn CallListener>,
    ) -> Self {
        Self {
            request,
            destination,
            expected_id,
            low_priority: false,
            stalled: AtomicBool::new(false),
            listener,
        }
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Node id the response is expected to come from.
    pub fn expected_id(&self) -> Key {
        self.expected_id
    }

    /// Mark the call as eligible for aggressive queueing at the server.
    /// Only meaningful before submission.
    pub fn set_low_priority(&mut self, low_priority: bool) {
        self.low_priority = low_priority;
    }

    pub fn is_low_priority(&self) -> bool {
        self.low_priority
    }

    /// Whether the call ever passed its soft deadline. Monotonic.
    pub fn was_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    /// Deliver a correlated response to the listener. Terminal.
    pub fn deliver_response(&self, response: &Message) {
        self.listener.on_response(self, response);
    }

    /// Record the soft-deadline expiry and notify the listener. The stalled
    /// flag is set before the callback so a later terminal event observes it.
    pub fn deliver_stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
        self.listener.on_stall(self);
    }

    /// Deliver the hard-deadline expiry to the listener. Terminal.
    pub fn deliver_timeout(&self) {
        self.listener.on_timeout(self);
    }
}

/// Fire-and-forget executor decoupling listener context from I/O submission.
pub trait Scheduler: Send + Sync {
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

/// [`Scheduler`] backed by the tokio runtime. Must be used from within a
/// runtime context.
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        tokio::spawn(async move { job() });
    }
}

/// The RPC server capability a task consumes.
///
/// The server owns transmission, correlation, and both call deadlines. For
/// every submitted call it invokes exactly one of `on_response` /
/// `on_timeout` on the call's listener, possibly preceded by at most one
/// `on_stall`. A call whose transmission fails after submission must still
/// resolve through `on_timeout` so the submitter's accounting converges.
pub trait RpcServer: Send + Sync {
    /// Submit a correlated request for asynchronous single-shot transmission.
    fn do_call(&self, call: Arc<RpcCall>);

    /// Register a one-shot callback invoked when at least one global RPC
    /// slot has been freed. Used by tasks refused a slot to re-enter their
    /// scheduling tick.
    fn on_declog(&self, wakeup: Box<dyn FnOnce() + Send>);

    /// Executor for fire-and-forget submission, shared by every task on
    /// this server.
    fn scheduler(&self) -> Arc<dyn Scheduler>;
}
