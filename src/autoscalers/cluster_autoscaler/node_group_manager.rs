//! Creation and removal of autoprovisioned node groups.

use log::{debug, info, warn};

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::interface::{EventType, NodeGroup};
use crate::core::errors::{AutoscalerError, AutoscalerResult};

pub struct CreateNodeGroupResult {
    pub main_created_node_group: Box<dyn NodeGroup>,
    /// Groups the provider created along with the main one, e.g. in other zones.
    pub extra_created_node_groups: Vec<Box<dyn NodeGroup>>,
}

impl CreateNodeGroupResult {
    pub fn all_created_ids(&self) -> Vec<String> {
        let mut ids = vec![self.main_created_node_group.id()];
        ids.extend(self.extra_created_node_groups.iter().map(|group| group.id()));
        ids
    }
}

struct PendingCreation {
    node_group: Box<dyn NodeGroup>,
    delta: usize,
}

/// Outcome of a deferred creation finished at the end of an iteration.
pub struct AsyncCreationResult {
    pub node_group_id: String,
    pub delta: usize,
    pub result: AutoscalerResult<CreateNodeGroupResult>,
}

#[derive(Default)]
pub struct NodeGroupManager {
    pending: Vec<PendingCreation>,
}

impl NodeGroupManager {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn create_node_group(
        &mut self,
        ctx: &mut AutoscalingContext,
        node_group: &dyn NodeGroup,
    ) -> AutoscalerResult<CreateNodeGroupResult> {
        let id = node_group.id();
        let before: Vec<String> = ctx
            .cloud_provider
            .node_groups()
            .iter()
            .map(|group| group.id())
            .collect();

        let created = match node_group.create() {
            Ok(created) => created,
            Err(err) => {
                ctx.event_recorder.event(
                    &id,
                    EventType::Warning,
                    "FailedToCreateNodeGroup",
                    format!(
                        "NodeAutoprovisioning: attempt to create node group {} failed: {}",
                        id, err
                    ),
                );
                return Err(match err {
                    AutoscalerError::CloudProvider(_) => err,
                    other => AutoscalerError::CloudProvider(other.to_string()),
                });
            }
        };

        let main_id = created.id();
        let extra_created_node_groups: Vec<Box<dyn NodeGroup>> = ctx
            .cloud_provider
            .node_groups()
            .into_iter()
            .filter(|group| group.id() != main_id && !before.contains(&group.id()))
            .collect();

        let result = CreateNodeGroupResult {
            main_created_node_group: created,
            extra_created_node_groups,
        };
        let created_ids = result.all_created_ids();
        info!("Created node groups {:?}", created_ids);
        ctx.metrics_collector.borrow_mut().node_groups_created += created_ids.len() as u64;
        for created_id in created_ids.iter() {
            ctx.event_recorder.event(
                created_id,
                EventType::Normal,
                "CreatedNodeGroup",
                format!("NodeAutoprovisioning: created new node group {}", created_id),
            );
        }
        Ok(result)
    }

    /// Defers creation and the first size increase to the end of the iteration. The returned
    /// group does not exist yet but may be used in simulations meanwhile.
    pub fn create_node_group_async(
        &mut self,
        node_group: &dyn NodeGroup,
        delta: usize,
    ) -> Box<dyn NodeGroup> {
        let upcoming = dyn_clone::clone_box(node_group);
        debug!(
            "Scheduled asynchronous creation of node group {} with {} nodes",
            upcoming.id(),
            delta
        );
        self.pending.push(PendingCreation {
            node_group: upcoming.clone(),
            delta,
        });
        upcoming
    }

    pub fn upcoming_node_groups(&self) -> Vec<Box<dyn NodeGroup>> {
        self.pending
            .iter()
            .map(|creation| creation.node_group.clone())
            .collect()
    }

    /// Creates the deferred groups and grows them to the requested size.
    pub fn complete_async_creations(
        &mut self,
        ctx: &mut AutoscalingContext,
    ) -> Vec<AsyncCreationResult> {
        let pending = std::mem::take(&mut self.pending);
        let mut results = vec![];
        for creation in pending.into_iter() {
            let node_group_id = creation.node_group.id();
            let result = self
                .create_node_group(ctx, creation.node_group.as_ref())
                .and_then(|created| {
                    created
                        .main_created_node_group
                        .increase_size(creation.delta)
                        .map_err(|err| {
                            err.prefixed(&format!("failed to increase {}: ", node_group_id))
                        })?;
                    Ok(created)
                });
            results.push(AsyncCreationResult {
                node_group_id,
                delta: creation.delta,
                result,
            });
        }
        results
    }

    /// Deletes autoprovisioned groups which were scaled to zero. Returns ids of deleted groups.
    pub fn remove_unneeded_node_groups(
        &mut self,
        ctx: &mut AutoscalingContext,
    ) -> AutoscalerResult<Vec<String>> {
        let mut removed = vec![];
        for node_group in ctx.cloud_provider.node_groups().iter() {
            if !node_group.autoprovisioned() || !node_group.exist() {
                continue;
            }
            if node_group.target_size()? != 0 || !node_group.nodes()?.is_empty() {
                continue;
            }
            let id = node_group.id();
            if let Err(err) = node_group.delete() {
                warn!("Failed to remove node group {}: {}", id, err);
                ctx.event_recorder.event(
                    &id,
                    EventType::Warning,
                    "FailedToDeleteNodeGroup",
                    format!(
                        "NodeAutoprovisioning: attempt to delete node group {} failed: {}",
                        id, err
                    ),
                );
                return Err(match err {
                    AutoscalerError::CloudProvider(_) => err,
                    other => AutoscalerError::CloudProvider(other.to_string()),
                });
            }
            info!("Removed autoprovisioned node group {}", id);
            ctx.metrics_collector.borrow_mut().node_groups_deleted += 1;
            ctx.event_recorder.event(
                &id,
                EventType::Normal,
                "DeletedNodeGroup",
                format!("NodeAutoprovisioning: removed node group {}", id),
            );
            removed.push(id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::node_group_manager::NodeGroupManager;
    use crate::test_util::helpers::TestAutoscalerBuilder;

    #[test]
    fn test_create_with_extra_zones_and_remove_empty() {
        let mut env = TestAutoscalerBuilder::new()
            .with_machine_type_in_zones("n1-standard-4", 4000, 16000, &["zone-b"])
            .build();
        let mut manager = NodeGroupManager::new();
        let ctx = env.autoscaler.context_mut();

        let candidate = ctx
            .cloud_provider
            .new_node_group(
                "n1-standard-4",
                &Default::default(),
                &Default::default(),
                &[],
                &Default::default(),
            )
            .unwrap();
        assert!(!candidate.exist());

        let result = manager.create_node_group(ctx, candidate.as_ref()).unwrap();
        assert_eq!(
            vec!["nap-n1-standard-4".to_string(), "nap-n1-standard-4-zone-b".to_string()],
            result.all_created_ids()
        );
        assert_eq!(2, ctx.metrics_collector.borrow().node_groups_created);

        let removed = manager.remove_unneeded_node_groups(ctx).unwrap();
        assert_eq!(2, removed.len());
        assert!(ctx.cloud_provider.node_groups().is_empty());
        assert_eq!(2, ctx.metrics_collector.borrow().node_groups_deleted);
    }

    #[test]
    fn test_async_creation_is_deferred() {
        let mut env = TestAutoscalerBuilder::new()
            .with_machine_type("small", 1000, 1000)
            .build();
        let mut manager = NodeGroupManager::new();
        let ctx = env.autoscaler.context_mut();
        let candidate = ctx
            .cloud_provider
            .new_node_group(
                "small",
                &Default::default(),
                &Default::default(),
                &[],
                &Default::default(),
            )
            .unwrap();

        let upcoming = manager.create_node_group_async(candidate.as_ref(), 2);
        assert!(!upcoming.exist());
        assert_eq!(1, manager.upcoming_node_groups().len());
        assert!(ctx.cloud_provider.node_groups().is_empty());

        let results = manager.complete_async_creations(ctx);
        assert_eq!(1, results.len());
        assert!(results[0].result.is_ok());
        let groups = ctx.cloud_provider.node_groups();
        assert_eq!(1, groups.len());
        assert_eq!(2, groups[0].target_size().unwrap());
        assert!(manager.upcoming_node_groups().is_empty());
    }
}
