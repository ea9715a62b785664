//! Shared rig for the behavioral specs.

use std::collections::HashMap;
use whirr_core::Platform;
use whirr_sim::Simulation;

/// One 10-core host with a disk, the workhorse platform of the specs.
pub const ONE_HOST: &str = r#"
[[hosts]]
name = "node1"
cores = 10
core_speed = 1e9
memory = 1_000_000_000

[[hosts.disks]]
name = "d0"
mountpoint = "/data"
capacity = 1_000_000_000
read_bandwidth = 100_000_000
write_bandwidth = 100_000_000
"#;

/// An edge host with a small cache disk plus an origin host with a large
/// store, for the proxy specs.
pub const EDGE_AND_ORIGIN: &str = r#"
[[hosts]]
name = "edge"
cores = 4
core_speed = 1e9
memory = 1_000_000_000

[[hosts.disks]]
name = "cache"
mountpoint = "/cache"
capacity = 24_000_000
read_bandwidth = 200_000_000
write_bandwidth = 200_000_000

[[hosts]]
name = "origin"
cores = 4
core_speed = 1e9
memory = 1_000_000_000

[[hosts.disks]]
name = "store"
mountpoint = "/data"
capacity = 1_000_000_000
read_bandwidth = 50_000_000
write_bandwidth = 50_000_000
"#;

pub fn sim(platform_toml: &str) -> Simulation {
    Simulation::new(Platform::from_toml(platform_toml).unwrap()).unwrap()
}

/// `-N/-c/-t` argument map.
pub fn batch_args(nodes: u64, cores: u64, minutes: u64) -> HashMap<String, String> {
    let mut args = HashMap::new();
    args.insert("-N".to_string(), nodes.to_string());
    args.insert("-c".to_string(), cores.to_string());
    args.insert("-t".to_string(), minutes.to_string());
    args
}

pub fn no_overrides() -> HashMap<String, String> {
    HashMap::new()
}
