//! Candidate bookkeeping for iterative lookups.
//!
//! A lookup partitions the contacts it knows about into three disjoint
//! distance-ordered sets: `todo` (discovered, unprobed), `in_flight` (a
//! probe is outstanding), and `stalled` (outstanding past the soft
//! deadline). A separate visited index deduplicates by node id *and* by IP
//! so adversarial peers cannot force the traversal to revisit.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

use crate::key::Key;
use crate::routing::KBucketEntry;

/// The three candidate partitions of a single lookup, all ordered by XOR
/// distance to the lookup target.
///
/// `todo` holds full entries; `in_flight` and `stalled` hold the expected
/// responder ids of outstanding probes. An id moves `todo → in_flight`,
/// optionally `in_flight → stalled`, and leaves on the call's terminal
/// event. Every operation takes one partition lock at a time, so response
/// and timeout callbacks may mutate concurrently.
pub struct CandidateSet {
    target: Key,
    todo: Mutex<BTreeMap<Key, KBucketEntry>>,
    in_flight: Mutex<BTreeSet<Key>>,
    stalled: Mutex<BTreeSet<Key>>,
}

impl CandidateSet {
    pub fn new(target: Key) -> Self {
        Self {
            target,
            todo: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(BTreeSet::new()),
            stalled: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn target(&self) -> Key {
        self.target
    }

    /// Raw admission into `todo`, used for bulk seeding. Duplicate ids are
    /// no-ops.
    pub fn add_todo(&self, entry: KBucketEntry) {
        let distance = self.target.distance(&entry.id());
        self.todo
            .lock()
            .expect("todo lock")
            .entry(distance)
            .or_insert(entry);
    }

    /// Admission filtered against the visited index: entries whose id or IP
    /// was already visited are dropped.
    pub fn add_candidate(&self, entry: KBucketEntry, visited: &VisitedSet) {
        if visited.has(&entry) {
            return;
        }
        self.add_todo(entry);
    }

    /// Remove and return the todo entry closest to the target.
    pub fn pop_closest(&self) -> Option<KBucketEntry> {
        self.todo
            .lock()
            .expect("todo lock")
            .pop_first()
            .map(|(_, entry)| entry)
    }

    /// Distance of the closest unprobed candidate, if any.
    pub fn closest_todo_distance(&self) -> Option<Key> {
        self.todo
            .lock()
            .expect("todo lock")
            .keys()
            .next()
            .copied()
    }

    pub fn todo_count(&self) -> usize {
        self.todo.lock().expect("todo lock").len()
    }

    /// Record an outstanding probe toward `id`.
    pub fn promote_in_flight(&self, id: &Key) {
        let distance = self.target.distance(id);
        self.in_flight.lock().expect("in_flight lock").insert(distance);
    }

    /// Move `id` from the in-flight partition to the stalled one.
    pub fn demote_stalled(&self, id: &Key) {
        let distance = self.target.distance(id);
        self.in_flight.lock().expect("in_flight lock").remove(&distance);
        self.stalled.lock().expect("stalled lock").insert(distance);
    }

    /// Drop `id` from both outstanding partitions after a terminal event.
    pub fn release(&self, id: &Key) {
        let distance = self.target.distance(id);
        self.in_flight.lock().expect("in_flight lock").remove(&distance);
        self.stalled.lock().expect("stalled lock").remove(&distance);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in_flight lock").len()
    }

    pub fn stalled_count(&self) -> usize {
        self.stalled.lock().expect("stalled lock").len()
    }
}

/// Deduplication index of everything a lookup has already probed.
///
/// Holds node ids and IP addresses in two sets behind one lock; a contact
/// counts as visited when either matches. Grows monotonically for the
/// lifetime of its task. Indexing by IP as well as id is an
/// anti-amplification measure against peers answering under many ids.
#[derive(Default)]
pub struct VisitedSet {
    inner: Mutex<VisitedInner>,
}

#[derive(Default)]
struct VisitedInner {
    ids: HashSet<Key>,
    ips: HashSet<IpAddr>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record both the id and the IP of a probed contact.
    pub fn mark(&self, entry: &KBucketEntry) {
        let mut inner = self.inner.lock().expect("visited lock");
        inner.ids.insert(entry.id());
        inner.ips.insert(entry.ip());
    }

    /// True when the entry's id or IP has been visited.
    pub fn has(&self, entry: &KBucketEntry) -> bool {
        let inner = self.inner.lock().expect("visited lock");
        inner.ids.contains(&entry.id()) || inner.ips.contains(&entry.ip())
    }

    pub fn has_id(&self, id: &Key) -> bool {
        self.inner.lock().expect("visited lock").ids.contains(id)
    }

    pub fn has_ip(&self, ip: &IpAddr) -> bool {
        self.inner.lock().expect("visited lock").ips.contains(ip)
    }
}
