//! Per node group timestamps of recent scale events.

use std::collections::BTreeMap;

use crate::config::AutoscalerConfig;

#[derive(Default, Debug, Clone)]
pub struct CooldownRegistry {
    last_scale_up: BTreeMap<String, f64>,
    last_scale_down: BTreeMap<String, f64>,
    last_failed_scale_down: BTreeMap<String, f64>,
    last_failed_scale_up: BTreeMap<String, f64>,
}

fn recent(stamps: &BTreeMap<String, f64>, node_group_id: &str, delay: f64, now: f64) -> bool {
    stamps
        .get(node_group_id)
        .map_or(false, |stamp| now < stamp + delay)
}

fn register(stamps: &mut BTreeMap<String, f64>, node_group_id: &str, now: f64) {
    let stamp = stamps.entry(node_group_id.to_string()).or_insert(now);
    *stamp = f64::max(*stamp, now);
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register_scale_up(&mut self, node_group_id: &str, now: f64) {
        register(&mut self.last_scale_up, node_group_id, now);
    }

    pub fn register_scale_down(&mut self, node_group_id: &str, now: f64) {
        register(&mut self.last_scale_down, node_group_id, now);
    }

    pub fn register_failed_scale_down(&mut self, node_group_id: &str, now: f64) {
        register(&mut self.last_failed_scale_down, node_group_id, now);
    }

    pub fn register_failed_scale_up(&mut self, node_group_id: &str, now: f64) {
        register(&mut self.last_failed_scale_up, node_group_id, now);
    }

    /// True if the group was scaled up, scaled down or failed to scale down within the
    /// configured delays.
    pub fn in_scale_down_cooldown(
        &self,
        node_group_id: &str,
        options: &AutoscalerConfig,
        now: f64,
    ) -> bool {
        recent(
            &self.last_scale_up,
            node_group_id,
            options.scale_down_delay_after_add,
            now,
        ) || recent(
            &self.last_scale_down,
            node_group_id,
            options.scale_down_delay_after_delete,
            now,
        ) || recent(
            &self.last_failed_scale_down,
            node_group_id,
            options.scale_down_delay_after_failure,
            now,
        )
    }

    /// True if scale-up of the group failed within `backoff_duration`.
    pub fn is_backed_off(&self, node_group_id: &str, backoff_duration: f64, now: f64) -> bool {
        recent(&self.last_failed_scale_up, node_group_id, backoff_duration, now)
    }

    pub fn last_scale_up(&self, node_group_id: &str) -> Option<f64> {
        self.last_scale_up.get(node_group_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::scaledown::cooldown::CooldownRegistry;
    use crate::config::AutoscalerConfig;

    #[test]
    fn test_each_event_has_own_delay() {
        let options = AutoscalerConfig {
            scale_down_delay_after_add: 600.0,
            scale_down_delay_after_delete: 60.0,
            scale_down_delay_after_failure: 180.0,
            ..Default::default()
        };
        let mut registry = CooldownRegistry::new();

        registry.register_scale_up("up", 1000.0);
        assert!(registry.in_scale_down_cooldown("up", &options, 1599.0));
        assert!(!registry.in_scale_down_cooldown("up", &options, 1600.0));

        registry.register_scale_down("down", 1000.0);
        assert!(registry.in_scale_down_cooldown("down", &options, 1059.0));
        assert!(!registry.in_scale_down_cooldown("down", &options, 1060.0));

        registry.register_failed_scale_down("failed", 1000.0);
        assert!(registry.in_scale_down_cooldown("failed", &options, 1179.0));
        assert!(!registry.in_scale_down_cooldown("other", &options, 1000.0));

        registry.register_failed_scale_up("up", 1000.0);
        assert!(registry.is_backed_off("up", 300.0, 1200.0));
        assert!(!registry.is_backed_off("up", 300.0, 1300.0));
    }
}
