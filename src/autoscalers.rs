pub mod cluster_autoscaler;
