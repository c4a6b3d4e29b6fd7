//! # mainline-kad
//!
//! The iterative lookup task engine of a Kademlia-style client for the
//! BitTorrent Mainline DHT. A lookup task floods concurrent RPC probes
//! toward the K closest nodes to a 160-bit target key, honours per-call
//! flow control (in-flight / stalled / timed out), admits candidates
//! discovered from responses, and terminates on a well-defined completion
//! predicate.
//!
//! The crate is split into a handful of modules that can be reused
//! independently:
//!
//! - [`key`]: 160-bit identifiers and the XOR distance metric.
//! - [`protocol`]: serialisable payloads for the KRPC methods the engine
//!   drives.
//! - [`rpc`]: the call-correlation record and the server, listener, and
//!   scheduler capabilities the engine consumes.
//! - [`routing`]: contact records and the routing-table capability lookups
//!   report observations to.
//! - [`candidates`]: the todo / in-flight / stalled partitions and the
//!   id-and-IP visited index.
//! - [`task`]: the task state machine, RPC slot accounting, and the
//!   [`TaskPolicy`](task::TaskPolicy) hook seam.
//! - [`lookup`]: the find_node and get_peers traversal policies.
//! - [`manager`]: admission control over concurrently running tasks.
//!
//! ## Getting started
//!
//! Implement [`RpcServer`] over your transport, then build a task around a
//! lookup policy and seed it with the closest contacts you know:
//!
//! ```ignore
//! let policy = Arc::new(NodeLookup::new(local_id, target));
//! let task = Task::new(target, server.clone(), table.clone(), policy.clone());
//! for entry in bootstrap_contacts {
//!     task.add_to_todo(entry);
//! }
//! task.add_listener(|done| println!("lookup finished: {done}"));
//! manager.add_task(task);
//! ```
//!
//! The task never blocks and owns no timers; every activation after
//! `start()` is driven by the server's listener callbacks or its declog
//! wake-up.

pub mod candidates;
pub mod key;
pub mod lookup;
pub mod manager;
pub mod protocol;
pub mod routing;
pub mod rpc;
pub mod task;

pub use candidates::{CandidateSet, VisitedSet};
pub use key::Key;
pub use lookup::{NodeLookup, PeerLookup};
pub use manager::TaskManager;
pub use protocol::{Message, NodeInfo};
pub use routing::{KBucketEntry, RoutingTable};
pub use rpc::{CallListener, RpcCall, RpcServer, Scheduler, TokioScheduler};
pub use task::{Task, TaskPolicy, ALPHA, K, KILLED_AT, MAX_ACTIVE_TASKS, MAX_CONCURRENT_REQUESTS};
