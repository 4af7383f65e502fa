//! Partitioning of pending pods into shards of pods which would land on node groups of the same
//! shape. One shard is scaled up for per iteration, chosen least-recently-used.

pub mod descriptor;
pub mod filter;
pub mod selector;
pub mod sharder;
