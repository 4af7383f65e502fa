use serde::Serialize;

/// Why a node is kept by scale-down. These are decisions, not failures.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnremovableReason {
    NotAutoscaled,
    NodeGroupMinSizeReached,
    ScaleDownDisabledAnnotation,
    UpcomingNode,
    NotUnderutilized,
    NotInSnapshot,
    BlockedByPod,
    NoPlaceToMovePods,
    NotUnneededLongEnough,
    AtomicScaleDownFailed,
    InCooldown,
    MinimalResourceLimitExceeded,
    ScaleDownBudgetExceeded,
    UnexpectedError,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct UnremovableNode {
    pub node_name: String,
    pub node_group_id: Option<String>,
    pub reason: UnremovableReason,
}

impl UnremovableNode {
    pub fn new(node_name: &str, node_group_id: Option<&str>, reason: UnremovableReason) -> Self {
        Self {
            node_name: node_name.to_string(),
            node_group_id: node_group_id.map(|id| id.to_string()),
            reason,
        }
    }
}
