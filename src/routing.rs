//! Contact records and the routing-table capability consumed by lookups.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use crate::key::Key;

/// A known contact: node id, reachable address, and liveness timestamps.
///
/// Identity for deduplication is the (`id`, IP) pair; ordered containers
/// compare entries by the XOR distance of `id` to a lookup target.
#[derive(Clone, Debug)]
pub struct KBucketEntry {
    id: Key,
    addr: SocketAddr,
    first_seen: Instant,
    last_responded: Option<Instant>,
}

impl KBucketEntry {
    /// Create an entry for a freshly discovered contact.
    pub fn new(id: Key, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            first_seen: Instant::now(),
            last_responded: None,
        }
    }

    pub fn id(&self) -> Key {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    pub fn last_responded(&self) -> Option<Instant> {
        self.last_responded
    }

    /// Stamp the entry as having answered a query just now.
    pub fn mark_responded(&mut self) {
        self.last_responded = Some(Instant::now());
    }
}

/// Capability a lookup uses to report contacts that answered a query.
///
/// The table owns bucket maintenance; the engine only feeds it observations.
pub trait RoutingTable: Send + Sync {
    /// Insert or refresh a contact observed during a lookup.
    fn insert_entry(&self, entry: KBucketEntry);
}
