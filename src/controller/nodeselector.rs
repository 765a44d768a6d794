//! Node selector conflict validation
//!
//! Two DeviceConfigs whose selectors claim the same node would fight over its
//! driver. Reconciliation refuses to proceed until the overlap is resolved.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;

use crate::crd::DeviceConfig;
use crate::error::{Error, Result};

/// Detects DeviceConfigs whose node selectors claim overlapping nodes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeSelectorValidator: Send + Sync {
    /// Fail with `Error::ConflictingNodeSelectors` when any node is matched
    /// by more than one DeviceConfig
    async fn check_conflicting_node_selector(&self, candidate: &DeviceConfig) -> Result<()>;
}

/// Validator backed by the cluster API
pub struct KubeNodeSelectorValidator {
    client: Client,
}

impl KubeNodeSelectorValidator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeSelectorValidator for KubeNodeSelectorValidator {
    async fn check_conflicting_node_selector(&self, candidate: &DeviceConfig) -> Result<()> {
        let device_configs: Api<DeviceConfig> = Api::all(self.client.clone());
        let nodes: Api<Node> = Api::all(self.client.clone());

        let mut names = Vec::new();
        for dc in device_configs.list(&ListParams::default()).await?.items {
            let selector = selector_string(&dc.node_selector());
            let matched = nodes
                .list(&ListParams::default().labels(&selector))
                .await?;
            names.extend(matched.items.iter().map(|node| node.name_any()));
        }

        if contains_duplicates(&names) {
            return Err(Error::ConflictingNodeSelectors(candidate.name_any()));
        }
        Ok(())
    }
}

fn contains_duplicates(names: &[String]) -> bool {
    let mut visited = HashSet::new();
    names.iter().any(|name| !visited.insert(name))
}

/// Render a label selector map as a list-request selector string
fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{contains_duplicates, selector_string};

    #[test]
    fn a_node_claimed_twice_is_a_conflict() {
        let names = vec![
            "node-a".to_string(),
            "node-b".to_string(),
            "node-b".to_string(),
        ];
        assert!(contains_duplicates(&names));
    }

    #[test]
    fn disjoint_node_sets_do_not_conflict() {
        let names = vec!["node-a".to_string(), "node-b".to_string()];
        assert!(!contains_duplicates(&names));
        assert!(!contains_duplicates(&[]));
    }

    #[test]
    fn single_label_renders_as_an_equality_requirement() {
        let selector = BTreeMap::from([("label".to_string(), "test".to_string())]);
        assert_eq!(selector_string(&selector), "label=test");
    }

    #[test]
    fn labels_are_joined_in_key_order() {
        let selector = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(selector_string(&selector), "a=1,b=2");
    }

    #[test]
    fn empty_selector_renders_empty() {
        assert_eq!(selector_string(&BTreeMap::new()), "");
    }
}
