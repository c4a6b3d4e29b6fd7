//! Wire message types for the KRPC methods the lookup engine drives.
//!
//! The engine never touches the wire encoding itself; the RPC server owns
//! the codec and socket I/O. These types are the payloads it exchanges with
//! the engine: queries the engine emits and the responses it correlates back
//! to a pending call.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// Compact contact information returned in lookup responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: Key,
    pub addr: SocketAddr,
}

/// A KRPC message payload.
///
/// `id` is always the sender's node id. Queries carry their method
/// arguments; responses carry the queried node's results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Liveness probe.
    Ping { id: Key },
    /// Ask for the contacts closest to `target`.
    FindNode { id: Key, target: Key },
    /// Ask for peers on a torrent, or failing that the closest contacts.
    GetPeers { id: Key, info_hash: Key },
    /// Closest-contact answer to `FindNode` (and `GetPeers` misses).
    NodesResponse { id: Key, nodes: Vec<NodeInfo> },
    /// `GetPeers` answer carrying peer endpoints and closer contacts.
    PeersResponse {
        id: Key,
        nodes: Vec<NodeInfo>,
        values: Vec<SocketAddr>,
    },
    /// KRPC error tuple.
    Error { code: u16, message: String },
}
