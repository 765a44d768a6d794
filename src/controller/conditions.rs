//! Ready/Errored condition pair for DeviceConfig status
//!
//! The two conditions always flip together in one status write; a reconciled
//! DeviceConfig is either Ready or Errored, never both.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;

use crate::crd::{Condition, DeviceConfig, DeviceConfigStatus, CONDITION_ERRORED, CONDITION_READY};
use crate::error::{Error, Result};

/// Condition reason recorded when the driver Module reconcile fails
pub const REASON_MODULE_FAILED: &str = "ModuleFailed";
/// Condition reason recorded when the node-metrics reconcile fails
pub const REASON_NODE_METRICS_FAILED: &str = "NodeMetricsFailed";
/// Condition reason recorded when the node-labeler reconcile fails
pub const REASON_NODE_LABELER_FAILED: &str = "NodeLabelerFailed";
/// Event reason used when sibling DeviceConfigs target overlapping nodes
pub const REASON_CONFLICTING_NODE_SELECTOR: &str = "ConflictingNodeSelector";

/// Writes the Ready/Errored condition pair onto DeviceConfig status
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConditionsUpdater: Send + Sync {
    /// Mark the DeviceConfig reconciled: Ready=True, Errored=False
    async fn set_ready(&self, dc: &DeviceConfig, reason: &str, message: &str) -> Result<()>;

    /// Mark the DeviceConfig failed: Ready=False, Errored=True
    async fn set_errored(&self, dc: &DeviceConfig, reason: &str, message: &str) -> Result<()>;
}

/// Write the Ready pair into a status
pub(crate) fn apply_ready(status: &mut DeviceConfigStatus, reason: &str, message: &str) {
    status.set_condition(Condition::ready(true, reason, message));
    status.set_condition(Condition::errored(false, CONDITION_READY, ""));
}

/// Write the Errored pair into a status
pub(crate) fn apply_errored(status: &mut DeviceConfigStatus, reason: &str, message: &str) {
    status.set_condition(Condition::ready(false, CONDITION_ERRORED, ""));
    status.set_condition(Condition::errored(true, reason, message));
}

/// Condition updater backed by the cluster API
pub struct KubeConditionsUpdater {
    client: Client,
}

impl KubeConditionsUpdater {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_status(&self, dc: &DeviceConfig, status: &DeviceConfigStatus) -> Result<()> {
        let namespace = dc.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<DeviceConfig> = Api::namespaced(self.client.clone(), &namespace);

        let patch = json!({ "status": status });
        api.patch_status(
            &dc.name_any(),
            &PatchParams::apply("gaudi-operator"),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::KubeError)?;
        Ok(())
    }
}

#[async_trait]
impl ConditionsUpdater for KubeConditionsUpdater {
    async fn set_ready(&self, dc: &DeviceConfig, reason: &str, message: &str) -> Result<()> {
        let mut status = dc.status.clone().unwrap_or_default();
        apply_ready(&mut status, reason, message);
        self.patch_status(dc, &status).await
    }

    async fn set_errored(&self, dc: &DeviceConfig, reason: &str, message: &str) -> Result<()> {
        let mut status = dc.status.clone().unwrap_or_default();
        apply_errored(&mut status, reason, message);
        self.patch_status(dc, &status).await
    }
}
