use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::scaledown::unremovable::{
    UnremovableNode, UnremovableReason,
};
use kubernetriks_autoscaler::core::node::{ConditionStatus, Node, NodeConditionType};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn names(nodes: &[Node]) -> Vec<&str> {
    nodes.iter().map(|node| node.name()).collect()
}

pub fn is_ready_in(nodes: &[Node], name: &str) -> bool {
    let node = nodes
        .iter()
        .find(|node| node.name() == name)
        .unwrap_or_else(|| panic!("node {} is missing", name));
    node.get_condition(NodeConditionType::Ready)
        .map_or(false, |condition| condition.status == ConditionStatus::True)
}

pub fn reasons_of<'a>(
    unremovable: &'a [UnremovableNode],
    reason: UnremovableReason,
) -> Vec<&'a str> {
    let mut nodes: Vec<&str> = unremovable
        .iter()
        .filter(|node| node.reason == reason)
        .map(|node| node.node_name.as_str())
        .collect();
    nodes.sort();
    nodes
}
