//! Finalizer guard for DeviceConfig teardown
//!
//! The finalizer blocks garbage collection of a DeviceConfig until the
//! deletion branch of the reconciler has torn down its children.

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;

use crate::crd::DeviceConfig;
use crate::error::Result;

/// Marker blocking DeviceConfig deletion until children are torn down
pub const DEVICE_CONFIG_FINALIZER: &str = "gaudi.ai/deviceconfig-finalizer";

/// Check whether the deletion finalizer is present on a DeviceConfig
pub(crate) fn has_deletion_finalizer(dc: &DeviceConfig) -> bool {
    dc.finalizers().iter().any(|f| f == DEVICE_CONFIG_FINALIZER)
}

/// Maintains the deletion finalizer on DeviceConfig resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FinalizerUpdater: Send + Sync {
    /// Check whether the deletion finalizer is present
    fn contains(&self, dc: &DeviceConfig) -> bool;

    /// Add the deletion finalizer; no-op when already present
    async fn add(&self, dc: &DeviceConfig) -> Result<()>;

    /// Remove the deletion finalizer; no-op when already absent
    async fn remove(&self, dc: &DeviceConfig) -> Result<()>;
}

/// Finalizer updater backed by the cluster API
///
/// Writes go through a full replace carrying the stored resource version, so
/// concurrent updates surface as conflicts and retrigger the reconcile.
pub struct KubeFinalizerUpdater {
    client: Client,
}

impl KubeFinalizerUpdater {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, dc: &DeviceConfig) -> Api<DeviceConfig> {
        let namespace = dc.namespace().unwrap_or_else(|| "default".to_string());
        Api::namespaced(self.client.clone(), &namespace)
    }
}

#[async_trait]
impl FinalizerUpdater for KubeFinalizerUpdater {
    fn contains(&self, dc: &DeviceConfig) -> bool {
        has_deletion_finalizer(dc)
    }

    async fn add(&self, dc: &DeviceConfig) -> Result<()> {
        if has_deletion_finalizer(dc) {
            return Ok(());
        }

        let mut updated = dc.clone();
        updated
            .finalizers_mut()
            .push(DEVICE_CONFIG_FINALIZER.to_string());
        self.api_for(dc)
            .replace(&dc.name_any(), &PostParams::default(), &updated)
            .await?;
        Ok(())
    }

    async fn remove(&self, dc: &DeviceConfig) -> Result<()> {
        if !has_deletion_finalizer(dc) {
            return Ok(());
        }

        let mut updated = dc.clone();
        updated
            .finalizers_mut()
            .retain(|f| f != DEVICE_CONFIG_FINALIZER);
        self.api_for(dc)
            .replace(&dc.name_any(), &PostParams::default(), &updated)
            .await?;
        Ok(())
    }
}
