//! Test fixtures and data generators.

use edgeplane::content_id::cid_from_data;
use edgeplane::types::{Node, NodeOnlineRequest, NodeRole};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SHENZHEN: &str = "asia-china-guangdong-shenzhen";
pub const GUANGZHOU: &str = "asia-china-guangdong-guangzhou";
pub const BEIJING: &str = "asia-china-beijing-beijing";

/// A deterministic CID for test block `n`.
pub fn cid(n: u32) -> String {
    cid_from_data(format!("test block {}", n).as_bytes()).expect("valid cid")
}

/// Seeded RNG so property tests are reproducible.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn online_request(id: &str, role: NodeRole, geo: &str, bandwidth: u64) -> NodeOnlineRequest {
    NodeOnlineRequest {
        device_id: id.to_string(),
        role,
        geo: geo.to_string(),
        bandwidth,
        ip: "10.0.0.1".to_string(),
        port: 3456,
    }
}

pub fn edge_node(id: &str, geo: &str, bandwidth: u64) -> Node {
    Node::new(id, NodeRole::Edge, geo, bandwidth, format!("http://{}.test:3456", id))
}

/// Random edge bandwidths in `1..=max`.
pub fn random_bandwidths(rng: &mut StdRng, count: usize, max: u64) -> Vec<u64> {
    (0..count).map(|_| rng.gen_range(1..=max)).collect()
}
