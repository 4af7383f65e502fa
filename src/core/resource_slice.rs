//! Dynamic Resource Allocation slices published by nodes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Device {
    pub name: String,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ResourceSlice {
    pub name: String,
    #[serde(default)]
    pub node_name: String,
    pub driver: String,
    pub pool: String,
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl ResourceSlice {
    pub fn new(node_name: &str, driver: &str, pool: &str, devices: &[&str]) -> Self {
        Self {
            name: format!("{}-{}-{}", node_name, driver, pool),
            node_name: node_name.to_string(),
            driver: driver.to_string(),
            pool: pool.to_string(),
            devices: devices
                .iter()
                .map(|name| Device {
                    name: name.to_string(),
                })
                .collect(),
        }
    }
}

/// `(driver, pool)` key of a device bucket.
pub type PoolKey = (String, String);

/// Merges slices into `(driver, pool) -> {device name}` buckets. Slices of the same pool
/// are unioned.
pub fn group_devices_by_pool(slices: &[ResourceSlice]) -> BTreeMap<PoolKey, BTreeSet<String>> {
    let mut pools: BTreeMap<PoolKey, BTreeSet<String>> = Default::default();
    for slice in slices.iter() {
        let bucket = pools
            .entry((slice.driver.clone(), slice.pool.clone()))
            .or_default();
        for device in slice.devices.iter() {
            bucket.insert(device.name.clone());
        }
    }
    pools
}

#[cfg(test)]
mod tests {
    use super::{group_devices_by_pool, ResourceSlice};

    #[test]
    fn test_slices_of_one_pool_are_merged() {
        let slices = vec![
            ResourceSlice::new("n", "gpu.example.com", "p1", &["a"]),
            ResourceSlice::new("n", "gpu.example.com", "p1", &["b"]),
            ResourceSlice::new("n", "gpu.example.com", "p2", &["a"]),
        ];
        let pools = group_devices_by_pool(&slices);
        assert_eq!(2, pools.len());
        let p1 = &pools[&("gpu.example.com".to_string(), "p1".to_string())];
        assert_eq!(vec!["a", "b"], p1.iter().collect::<Vec<_>>());
    }
}
