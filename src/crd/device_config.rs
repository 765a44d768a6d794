//! DeviceConfig Custom Resource Definition
//!
//! The DeviceConfig CRD describes the desired driver configuration for the
//! Gaudi accelerator nodes of a cluster: which driver image and version to
//! load, and which nodes to target.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, CONDITION_READY};

/// Node-feature-discovery label present on nodes carrying a Gaudi device
pub const DEVICE_PRESENT_LABEL: &str = "feature.node.kubernetes.io/pci-1da3.present";

/// The DeviceConfig CRD describes desired accelerator-device configuration.
///
/// # Example
///
/// ```yaml
/// apiVersion: gaudi.ai/v1alpha1
/// kind: DeviceConfig
/// metadata:
///   name: gaudi
///   namespace: gaudi-system
/// spec:
///   driverImage: "registry.example.com/gaudi-driver"
///   driverVersion: "1.11.0"
///   nodeSelector:
///     feature.node.kubernetes.io/pci-1da3.present: "true"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gaudi.ai",
    version = "v1alpha1",
    kind = "DeviceConfig",
    namespaced,
    status = "DeviceConfigStatus",
    shortname = "dc",
    printcolumn = r#"{"name":"DriverVersion","type":"string","jsonPath":".spec.driverVersion"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigSpec {
    /// Base image reference for the kernel-driver loader
    /// The kernel release is appended by the kernel-mapping mechanism
    pub driver_image: String,

    /// Driver version tag (e.g., "1.11.0")
    pub driver_version: String,

    /// Labels a node must carry to be targeted by this DeviceConfig
    /// Defaults to the device-presence label discovered by NFD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

impl DeviceConfig {
    /// Effective node selector for this DeviceConfig.
    ///
    /// Returns the explicit selector when one is set; otherwise substitutes
    /// the default device-presence selector. The spec itself is never
    /// mutated by this defaulting.
    pub fn node_selector(&self) -> BTreeMap<String, String> {
        match &self.spec.node_selector {
            Some(selector) if !selector.is_empty() => selector.clone(),
            _ => BTreeMap::from([(DEVICE_PRESENT_LABEL.to_string(), "true".to_string())]),
        }
    }
}

/// Status subresource for DeviceConfig
///
/// Reports reconciliation health through the Ready/Errored condition pair.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigStatus {
    /// Conditions following Kubernetes conventions
    /// Exactly one of Ready/Errored is "True" once reconciled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl DeviceConfigStatus {
    /// Upsert a condition keyed by type.
    ///
    /// Updates in place when the type already exists, otherwise appends.
    /// The last-transition time is preserved when the status value did not
    /// change.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time.clone();
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Check if the DeviceConfig reconciled successfully
    pub fn is_ready(&self) -> bool {
        self.condition(CONDITION_READY)
            .map(|c| c.status == "True")
            .unwrap_or(false)
    }
}
