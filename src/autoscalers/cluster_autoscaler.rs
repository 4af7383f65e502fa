//! Cluster autoscaler: keeps enough nodes for every pending pod and removes nodes which
//! stay unneeded for long enough.

pub mod cluster_autoscaler;
pub mod context;
pub mod customresources;
pub mod in_memory;
pub mod interface;
pub mod node_group_manager;
pub mod nodeinfos;
pub mod podlistprocessor;
pub mod podsharding;
pub mod quota;
pub mod scaledown;
pub mod scaleup;
pub mod status;
