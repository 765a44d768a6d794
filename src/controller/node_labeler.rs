//! Node labeler reconciler
//!
//! Manages a DaemonSet that drops feature files into the node-feature-discovery
//! hooks directory on every selected node, surfacing device details as labels.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::crd::DeviceConfig;
use crate::error::{Error, Result};
use crate::settings::ControllerSettings;

use super::resources::{
    component_labels, container_resources, create_or_patch, owner_reference, resource_name,
};

const NODE_LABELER_SUFFIX: &str = "node-labeler";
const NODE_LABELER_SERVICE_ACCOUNT: &str = "node-labeler";

const FEATURES_PATH: &str = "/etc/kubernetes/node-feature-discovery/features.d";

/// Reconciles the node labeler DaemonSet of a DeviceConfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeLabelerReconciler: Send + Sync {
    /// Create or patch the DaemonSet to its desired shape
    async fn reconcile(&self, dc: &DeviceConfig) -> Result<()>;

    /// Mutate a DaemonSet into the desired labeler shape for its owner
    fn set_desired(&self, ds: &mut DaemonSet, dc: &DeviceConfig) -> Result<()>;

    /// Delete the DaemonSet; already absent is success
    async fn delete(&self, dc: &DeviceConfig) -> Result<()>;
}

/// Node labeler reconciler backed by the cluster API
pub struct KubeNodeLabelerReconciler {
    client: Client,
    settings: ControllerSettings,
}

impl KubeNodeLabelerReconciler {
    pub fn new(client: Client, settings: ControllerSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl NodeLabelerReconciler for KubeNodeLabelerReconciler {
    async fn reconcile(&self, dc: &DeviceConfig) -> Result<()> {
        let namespace = dc.namespace().unwrap_or_else(|| "default".to_string());
        let daemon_sets: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);

        let mut bare = DaemonSet::default();
        bare.metadata.name = Some(resource_name(dc, NODE_LABELER_SUFFIX));
        bare.metadata.namespace = Some(namespace);
        create_or_patch(&daemon_sets, bare, |ds| self.set_desired(ds, dc)).await
    }

    fn set_desired(&self, ds: &mut DaemonSet, dc: &DeviceConfig) -> Result<()> {
        set_desired_daemon_set(ds, dc, &self.settings)
    }

    async fn delete(&self, dc: &DeviceConfig) -> Result<()> {
        let name = resource_name(dc, NODE_LABELER_SUFFIX);
        let namespace = dc.namespace().unwrap_or_else(|| "default".to_string());
        let daemon_sets: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);

        match daemon_sets.delete(&name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted DaemonSet {}", name),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!("DaemonSet {} not found, already deleted", name);
            }
            Err(e) => return Err(Error::KubeError(e)),
        }
        Ok(())
    }
}

/// Compute the desired labeler DaemonSet shape for a DeviceConfig
fn set_desired_daemon_set(
    ds: &mut DaemonSet,
    dc: &DeviceConfig,
    settings: &ControllerSettings,
) -> Result<()> {
    let labels = component_labels(NODE_LABELER_SUFFIX);

    ds.metadata.labels = Some(labels.clone());
    ds.metadata.owner_references = Some(vec![owner_reference(dc)]);

    let spec = ds.spec.get_or_insert_with(Default::default);
    spec.selector.match_labels = Some(labels.clone());
    spec.template.metadata = Some(ObjectMeta {
        labels: Some(labels),
        ..Default::default()
    });

    let pod_spec = spec.template.spec.get_or_insert_with(Default::default);
    pod_spec.host_pid = Some(true);
    pod_spec.priority_class_name = Some("system-node-critical".to_string());
    pod_spec.service_account_name = Some(NODE_LABELER_SERVICE_ACCOUNT.to_string());
    pod_spec.node_selector = Some(dc.node_selector());
    pod_spec.containers = vec![labeler_container(dc, settings)];
    pod_spec.volumes = Some(vec![features_volume()]);
    Ok(())
}

fn labeler_container(dc: &DeviceConfig, settings: &ControllerSettings) -> Container {
    Container {
        name: resource_name(dc, NODE_LABELER_SUFFIX),
        image: Some(settings.node_labeler_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        resources: Some(container_resources("1", "200Mi", "100m", "200Mi")),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            run_as_user: Some(0),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "features".to_string(),
            mount_path: FEATURES_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

// node-feature-discovery picks feature files up from its hooks directory.
// The mount stays writable so the labeler can rewrite them.
fn features_volume() -> Volume {
    Volume {
        name: "features".to_string(),
        host_path: Some(HostPathVolumeSource {
            path: FEATURES_PATH.to_string(),
            type_: Some("Directory".to_string()),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::DaemonSet;

    use crate::crd::{DeviceConfig, DeviceConfigSpec, DEVICE_PRESENT_LABEL};
    use crate::settings::ControllerSettings;

    use super::set_desired_daemon_set;

    fn device_config(selector: Option<BTreeMap<String, String>>) -> DeviceConfig {
        let mut dc = DeviceConfig::new(
            "test",
            DeviceConfigSpec {
                driver_image: "img".to_string(),
                driver_version: "v1".to_string(),
                node_selector: selector,
            },
        );
        dc.metadata.namespace = Some("default".to_string());
        dc
    }

    fn settings() -> ControllerSettings {
        ControllerSettings {
            device_plugin_image: "device-plugin:latest".to_string(),
            driver_image_basename: "driver-base".to_string(),
            node_metrics_image: "node-metrics:latest".to_string(),
            node_labeler_image: "node-labeler:latest".to_string(),
        }
    }

    fn desired_daemon_set(dc: &DeviceConfig) -> DaemonSet {
        let mut ds = DaemonSet::default();
        ds.metadata.name = Some("test-node-labeler".to_string());
        set_desired_daemon_set(&mut ds, dc, &settings()).unwrap();
        ds
    }

    #[test]
    fn daemon_set_runs_the_labeler_on_selected_nodes() {
        let ds = desired_daemon_set(&device_config(None));

        let pod_spec = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod_spec.host_pid, Some(true));
        assert_eq!(
            pod_spec.priority_class_name.as_deref(),
            Some("system-node-critical")
        );
        assert_eq!(pod_spec.service_account_name.as_deref(), Some("node-labeler"));
        assert!(pod_spec
            .node_selector
            .as_ref()
            .unwrap()
            .contains_key(DEVICE_PRESENT_LABEL));

        let container = &pod_spec.containers[0];
        assert_eq!(container.name, "test-node-labeler");
        assert_eq!(container.image.as_deref(), Some("node-labeler:latest"));
        assert!(container.ports.is_none());
    }

    #[test]
    fn explicit_node_selector_is_used_verbatim() {
        let selector = BTreeMap::from([("label".to_string(), "test".to_string())]);
        let ds = desired_daemon_set(&device_config(Some(selector.clone())));

        let pod_spec = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod_spec.node_selector.as_ref(), Some(&selector));
        assert!(!pod_spec
            .node_selector
            .as_ref()
            .unwrap()
            .contains_key(DEVICE_PRESENT_LABEL));
    }

    #[test]
    fn features_directory_is_mounted_writable() {
        let ds = desired_daemon_set(&device_config(None));

        let pod_spec = ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let volume = &pod_spec.volumes.as_ref().unwrap()[0];
        let host_path = volume.host_path.as_ref().unwrap();
        assert_eq!(
            host_path.path,
            "/etc/kubernetes/node-feature-discovery/features.d"
        );
        assert_eq!(host_path.type_.as_deref(), Some("Directory"));

        let mount = &pod_spec.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, volume.name);
        assert_eq!(mount.read_only, None);
    }

    #[test]
    fn daemon_set_desired_state_is_idempotent() {
        let dc = device_config(None);
        let mut ds = desired_daemon_set(&dc);
        let first = serde_json::to_value(&ds).unwrap();

        set_desired_daemon_set(&mut ds, &dc, &settings()).unwrap();
        assert_eq!(serde_json::to_value(&ds).unwrap(), first);
    }
}
