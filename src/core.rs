pub mod cluster_snapshot;
pub mod common;
pub mod csi;
pub mod errors;
pub mod node;
pub mod node_info;
pub mod pod;
pub mod resource_slice;
pub mod scheduler;
