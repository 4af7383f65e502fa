//! CSINode objects: the list of CSI drivers a node has registered.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CsiDriver {
    pub name: String,
    #[serde(default)]
    pub node_id: String,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CsiNode {
    /// Same as the name of the node it describes.
    pub name: String,
    #[serde(default)]
    pub drivers: Vec<CsiDriver>,
}

impl CsiNode {
    pub fn new(name: &str, drivers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            drivers: drivers
                .iter()
                .map(|driver| CsiDriver {
                    name: driver.to_string(),
                    node_id: name.to_string(),
                })
                .collect(),
        }
    }

    pub fn driver_names(&self) -> BTreeSet<&str> {
        self.drivers.iter().map(|d| d.name.as_str()).collect()
    }
}
