//! Lookup quality over a simulated network: starting from a handful of
//! bootstrap contacts in a randomly wired overlay, an iterative lookup must
//! hop its way to the globally closest nodes.

#[path = "common/mod.rs"]
mod common;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use common::{make_key, RecordingTable, ScriptedServer};
use mainline_kad::{KBucketEntry, Key, Message, NodeInfo, NodeLookup, Task, K};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

const NODE_COUNT: usize = 256;
const DEGREE: usize = 16;

#[derive(Serialize)]
struct ConvergenceReport {
    node_count: usize,
    degree: usize,
    probes_sent: u32,
    responses: u32,
    overlap: usize,
    window: usize,
}

struct SimNode {
    id: Key,
    known: Vec<NodeInfo>,
}

fn sim_addr(index: usize) -> SocketAddr {
    SocketAddr::from(([10, 1, (index / 250) as u8, (index % 250) as u8 + 1], 6881))
}

fn random_key(rng: &mut StdRng) -> Key {
    Key::from_bytes(rng.gen())
}

/// Wire up a random overlay: every node knows DEGREE random peers.
fn build_network(rng: &mut StdRng) -> (Vec<Key>, HashMap<SocketAddr, SimNode>) {
    let ids: Vec<Key> = (0..NODE_COUNT).map(|_| random_key(rng)).collect();
    let mut network = HashMap::new();
    for (index, id) in ids.iter().enumerate() {
        let mut peer_indices = HashSet::new();
        while peer_indices.len() < DEGREE {
            let peer = rng.gen_range(0..NODE_COUNT);
            if peer != index {
                peer_indices.insert(peer);
            }
        }
        let known = peer_indices
            .into_iter()
            .map(|peer| NodeInfo {
                id: ids[peer],
                addr: sim_addr(peer),
            })
            .collect();
        network.insert(sim_addr(index), SimNode { id: *id, known });
    }
    (ids, network)
}

/// What a simulated node answers to a find_node query: the K closest
/// contacts it knows to the requested target.
fn answer(node: &SimNode, target: &Key) -> Message {
    let mut nodes = node.known.clone();
    nodes.sort_by(|a, b| target.cmp_by_distance(&a.id, &b.id));
    nodes.truncate(K);
    Message::NodesResponse {
        id: node.id,
        nodes,
    }
}

#[test]
fn lookup_converges_on_the_closest_nodes() {
    let mut rng = StdRng::seed_from_u64(7);
    let (ids, network) = build_network(&mut rng);
    let target = random_key(&mut rng);

    let server = ScriptedServer::new();
    let table = RecordingTable::new();
    let policy = Arc::new(NodeLookup::new(make_key(0xEE), target));
    let task = Task::new(target, server.clone(), table.clone(), policy.clone());

    // bootstrap from node 0's view of the overlay
    for contact in &network[&sim_addr(0)].known {
        task.add_to_todo(KBucketEntry::new(contact.id, contact.addr));
    }
    task.start();

    loop {
        let calls = server.take_pending();
        if calls.is_empty() {
            break;
        }
        for call in calls {
            let node = network
                .get(&call.destination())
                .expect("probe targets a simulated node");
            let Message::FindNode { target, .. } = call.request() else {
                panic!("unexpected query: {:?}", call.request());
            };
            call.deliver_response(&answer(node, target));
        }
    }

    assert!(task.is_finished(), "lookup did not terminate");
    assert_eq!(task.outstanding(), 0);
    assert!(task.first_result_time() > 0);

    let mut truth = ids.clone();
    truth.sort_by(|a, b| target.cmp_by_distance(a, b));
    truth.truncate(K);
    let truth: HashSet<Key> = truth.into_iter().collect();

    let window = policy.closest_nodes();
    let overlap = window
        .iter()
        .filter(|entry| truth.contains(&entry.id()))
        .count();

    let report = ConvergenceReport {
        node_count: NODE_COUNT,
        degree: DEGREE,
        probes_sent: task.sent_count(),
        responses: task.recv_count(),
        overlap,
        window: window.len(),
    };
    println!("{}", serde_json::to_string_pretty(&report).unwrap());

    assert_eq!(window.len(), K);
    assert!(
        overlap >= K / 2,
        "found only {overlap} of the {K} closest nodes"
    );
}
