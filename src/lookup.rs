//! Iterative lookup policies plugged into the task engine.
//!
//! Both policies walk the candidate space the same way: repeatedly probe
//! the closest unvisited candidate, admit the contacts a response returns,
//! and stop once the K closest responded nodes cannot be improved upon.
//! [`NodeLookup`] converges on contacts for a target id; [`PeerLookup`]
//! additionally collects peer endpoints for a torrent infohash.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Mutex;

use anyhow::{bail, Result};
use tracing::trace;

use crate::key::Key;
use crate::protocol::Message;
use crate::routing::KBucketEntry;
use crate::rpc::RpcCall;
use crate::task::{Task, TaskPolicy, ALPHA, K};

/// Peer endpoints a get_peers lookup collects before finishing early.
const PEER_RESULT_QUOTA: usize = 50;

// ============================================================================
// Closest-responded window
// ============================================================================

/// Distance-ordered window of the closest nodes that answered so far.
///
/// Caps itself at [`K`] entries; its tail distance is the lookup's
/// termination boundary.
struct ClosestSet {
    target: Key,
    entries: Mutex<BTreeMap<Key, KBucketEntry>>,
}

impl ClosestSet {
    fn new(target: Key) -> Self {
        Self {
            target,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn insert(&self, entry: KBucketEntry) {
        let distance = self.target.distance(&entry.id());
        let mut entries = self.entries.lock().expect("closest lock");
        entries.entry(distance).or_insert(entry);
        while entries.len() > K {
            entries.pop_last();
        }
    }

    /// Distance of the K-th closest responded node, or [`Key::MAX`] while
    /// the window is not yet full.
    fn kth_distance(&self) -> Key {
        let entries = self.entries.lock().expect("closest lock");
        if entries.len() < K {
            return Key::MAX;
        }
        entries.keys().next_back().copied().unwrap_or(Key::MAX)
    }

    fn entries(&self) -> Vec<KBucketEntry> {
        self.entries
            .lock()
            .expect("closest lock")
            .values()
            .cloned()
            .collect()
    }
}

// ============================================================================
// Shared traversal
// ============================================================================

/// Drain todo into probes while the task has budget.
///
/// Candidates past the termination window are discarded rather than probed,
/// except for a small exploration margin: while fewer than [`ALPHA`] calls
/// are outstanding the traversal still chases them, so a stale window edge
/// cannot strand the lookup. A candidate refused by the slot accounting is
/// pushed back for the declog wake-up to retry.
fn drive_probes(task: &Task, closest: &ClosestSet, request: &Message) {
    while task.can_do_request() {
        let Some(entry) = task.candidates().pop_closest() else {
            break;
        };
        if task.visited().has(&entry) {
            continue;
        }

        let distance = task.target().distance(&entry.id());
        let within_window = distance < closest.kth_distance();
        let exploring = (task.outstanding().max(0) as usize) < ALPHA;
        if !within_window && !exploring {
            trace!(task = task.task_id(), candidate = %entry.id(), "past window, dropping");
            continue;
        }

        if task.rpc_call(request.clone(), entry.addr(), entry.id(), None) {
            task.visited().mark(&entry);
        } else {
            task.add_to_todo(entry);
            break;
        }
    }
}

/// Shared completion predicate: nothing outstanding and nothing left in
/// todo that could still land inside the window.
fn lookup_done(task: &Task, closest: &ClosestSet) -> bool {
    if task.has_unfinished_requests() {
        return false;
    }
    match task.candidates().closest_todo_distance() {
        None => true,
        Some(distance) => distance >= closest.kth_distance(),
    }
}

/// Digest the responder of a correlated reply: stamp it, report it to the
/// routing table, and widen the window with it.
fn admit_responder(task: &Task, closest: &ClosestSet, call: &RpcCall) {
    let mut responder = KBucketEntry::new(call.expected_id(), call.destination());
    responder.mark_responded();
    task.routing().insert_entry(responder.clone());
    closest.insert(responder);
}

// ============================================================================
// find_node
// ============================================================================

/// Iterative lookup converging on the K closest contacts to a target id.
pub struct NodeLookup {
    local_id: Key,
    closest: ClosestSet,
}

impl NodeLookup {
    pub fn new(local_id: Key, target: Key) -> Self {
        Self {
            local_id,
            closest: ClosestSet::new(target),
        }
    }

    /// The closest responded contacts, nearest first.
    pub fn closest_nodes(&self) -> Vec<KBucketEntry> {
        self.closest.entries()
    }
}

impl TaskPolicy for NodeLookup {
    fn update(&self, task: &Task) {
        let request = Message::FindNode {
            id: self.local_id,
            target: task.target(),
        };
        drive_probes(task, &self.closest, &request);
    }

    fn call_finished(&self, task: &Task, call: &RpcCall, response: &Message) -> Result<()> {
        let nodes = match response {
            Message::NodesResponse { nodes, .. } => nodes,
            Message::Error { code, message } => {
                bail!("remote error {code}: {message}")
            }
            other => bail!("unexpected find_node payload: {other:?}"),
        };

        task.mark_first_result();
        admit_responder(task, &self.closest, call);
        for node in nodes {
            task.add_candidate(KBucketEntry::new(node.id, node.addr));
        }
        Ok(())
    }

    fn call_timeout(&self, task: &Task, call: &RpcCall) {
        trace!(task = task.task_id(), to = %call.destination(), "probe timed out");
    }

    fn is_done(&self, task: &Task) -> bool {
        lookup_done(task, &self.closest)
    }
}

// ============================================================================
// get_peers
// ============================================================================

/// Iterative lookup collecting peer endpoints for a torrent infohash.
///
/// Walks the key space exactly like [`NodeLookup`] but also harvests the
/// `values` of [`Message::PeersResponse`] payloads, and finishes early once
/// its peer quota is met.
pub struct PeerLookup {
    local_id: Key,
    closest: ClosestSet,
    peers: Mutex<HashSet<SocketAddr>>,
    quota: usize,
}

impl PeerLookup {
    pub fn new(local_id: Key, info_hash: Key) -> Self {
        Self::with_quota(local_id, info_hash, PEER_RESULT_QUOTA)
    }

    /// Lookup that stops after collecting `quota` peer endpoints.
    pub fn with_quota(local_id: Key, info_hash: Key, quota: usize) -> Self {
        Self {
            local_id,
            closest: ClosestSet::new(info_hash),
            peers: Mutex::new(HashSet::new()),
            quota,
        }
    }

    /// Peer endpoints collected so far.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.peers
            .lock()
            .expect("peer lock")
            .iter()
            .copied()
            .collect()
    }

    fn peer_count(&self) -> usize {
        self.peers.lock().expect("peer lock").len()
    }
}

impl TaskPolicy for PeerLookup {
    fn update(&self, task: &Task) {
        let request = Message::GetPeers {
            id: self.local_id,
            info_hash: task.target(),
        };
        drive_probes(task, &self.closest, &request);
    }

    fn call_finished(&self, task: &Task, call: &RpcCall, response: &Message) -> Result<()> {
        let no_values: Vec<SocketAddr> = Vec::new();
        let (nodes, values) = match response {
            Message::PeersResponse { nodes, values, .. } => (nodes, values),
            Message::NodesResponse { nodes, .. } => (nodes, &no_values),
            Message::Error { code, message } => {
                bail!("remote error {code}: {message}")
            }
            other => bail!("unexpected get_peers payload: {other:?}"),
        };

        task.mark_first_result();
        if !values.is_empty() {
            let mut peers = self.peers.lock().expect("peer lock");
            peers.extend(values.iter().copied());
        }

        admit_responder(task, &self.closest, call);
        for node in nodes {
            task.add_candidate(KBucketEntry::new(node.id, node.addr));
        }
        Ok(())
    }

    fn call_timeout(&self, task: &Task, call: &RpcCall) {
        trace!(task = task.task_id(), to = %call.destination(), "probe timed out");
    }

    fn is_done(&self, task: &Task) -> bool {
        if self.peer_count() >= self.quota {
            return true;
        }
        lookup_done(task, &self.closest)
    }
}
