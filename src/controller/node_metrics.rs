//! Node metrics reconciler
//!
//! Manages the per-node metrics exporter: a DaemonSet on every selected node
//! plus a Service that lets Prometheus scrape the exporters.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HostPathVolumeSource, SecurityContext, Service, ServicePort, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
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

const NODE_METRICS_SUFFIX: &str = "node-metrics";
const NODE_METRICS_SERVICE_ACCOUNT: &str = "node-metrics";

/// Port the exporter serves on, both in the pod and on the host
pub const NODE_METRICS_PORT: i32 = 41611;

const POD_RESOURCES_PATH: &str = "/var/lib/kubelet/pod-resources";

/// Reconciles the node metrics DaemonSet and Service of a DeviceConfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeMetricsReconciler: Send + Sync {
    /// Create or patch the DaemonSet and Service to their desired shape
    async fn reconcile(&self, dc: &DeviceConfig) -> Result<()>;

    /// Mutate a DaemonSet into the desired exporter shape for its owner
    fn set_desired_daemon_set(&self, ds: &mut DaemonSet, dc: &DeviceConfig) -> Result<()>;

    /// Mutate a Service into the desired scrape shape for its owner
    fn set_desired_service(&self, svc: &mut Service, dc: &DeviceConfig) -> Result<()>;

    /// Delete the DaemonSet and Service; already absent is success
    async fn delete(&self, dc: &DeviceConfig) -> Result<()>;
}

/// Node metrics reconciler backed by the cluster API
pub struct KubeNodeMetricsReconciler {
    client: Client,
    settings: ControllerSettings,
}

impl KubeNodeMetricsReconciler {
    pub fn new(client: Client, settings: ControllerSettings) -> Self {
        Self { client, settings }
    }

    fn namespace(&self, dc: &DeviceConfig) -> String {
        dc.namespace().unwrap_or_else(|| "default".to_string())
    }
}

#[async_trait]
impl NodeMetricsReconciler for KubeNodeMetricsReconciler {
    async fn reconcile(&self, dc: &DeviceConfig) -> Result<()> {
        let name = resource_name(dc, NODE_METRICS_SUFFIX);
        let namespace = self.namespace(dc);

        let daemon_sets: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
        let mut bare = DaemonSet::default();
        bare.metadata.name = Some(name.clone());
        bare.metadata.namespace = Some(namespace.clone());
        create_or_patch(&daemon_sets, bare, |ds| self.set_desired_daemon_set(ds, dc)).await?;

        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let mut bare = Service::default();
        bare.metadata.name = Some(name);
        bare.metadata.namespace = Some(namespace);
        create_or_patch(&services, bare, |svc| self.set_desired_service(svc, dc)).await
    }

    fn set_desired_daemon_set(&self, ds: &mut DaemonSet, dc: &DeviceConfig) -> Result<()> {
        set_desired_daemon_set(ds, dc, &self.settings)
    }

    fn set_desired_service(&self, svc: &mut Service, dc: &DeviceConfig) -> Result<()> {
        set_desired_service(svc, dc)
    }

    async fn delete(&self, dc: &DeviceConfig) -> Result<()> {
        let name = resource_name(dc, NODE_METRICS_SUFFIX);
        let namespace = self.namespace(dc);

        let daemon_sets: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
        match daemon_sets.delete(&name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted DaemonSet {}", name),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!("DaemonSet {} not found, already deleted", name);
            }
            Err(e) => return Err(Error::KubeError(e)),
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        match services.delete(&name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted Service {}", name),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!("Service {} not found, already deleted", name);
            }
            Err(e) => return Err(Error::KubeError(e)),
        }
        Ok(())
    }
}

/// Compute the desired exporter DaemonSet shape for a DeviceConfig
fn set_desired_daemon_set(
    ds: &mut DaemonSet,
    dc: &DeviceConfig,
    settings: &ControllerSettings,
) -> Result<()> {
    let labels = component_labels(NODE_METRICS_SUFFIX);

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
    pod_spec.service_account_name = Some(NODE_METRICS_SERVICE_ACCOUNT.to_string());
    pod_spec.node_selector = Some(dc.node_selector());
    pod_spec.containers = vec![exporter_container(dc, settings)];
    pod_spec.volumes = Some(vec![pod_resources_volume()]);
    Ok(())
}

/// Compute the desired scrape Service shape for a DeviceConfig
fn set_desired_service(svc: &mut Service, dc: &DeviceConfig) -> Result<()> {
    svc.metadata.labels = Some(component_labels(NODE_METRICS_SUFFIX));
    svc.metadata.annotations = Some(
        [(
            "prometheus.io/scrape".to_string(),
            "true".to_string(),
        )]
        .into(),
    );
    svc.metadata.owner_references = Some(vec![owner_reference(dc)]);

    let spec = svc.spec.get_or_insert_with(Default::default);
    spec.selector = Some(component_labels(NODE_METRICS_SUFFIX));
    spec.ports = Some(vec![ServicePort {
        port: NODE_METRICS_PORT,
        target_port: Some(IntOrString::Int(NODE_METRICS_PORT)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }]);
    Ok(())
}

fn exporter_container(dc: &DeviceConfig, settings: &ControllerSettings) -> Container {
    Container {
        name: resource_name(dc, NODE_METRICS_SUFFIX),
        image: Some(settings.node_metrics_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        ports: Some(vec![ContainerPort {
            container_port: NODE_METRICS_PORT,
            host_port: Some(NODE_METRICS_PORT),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(container_resources("1", "200Mi", "100m", "200Mi")),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            run_as_user: Some(0),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "pod-resources".to_string(),
            mount_path: POD_RESOURCES_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

// The kubelet pod-resources socket maps device allocations to pods.
fn pod_resources_volume() -> Volume {
    Volume {
        name: "pod-resources".to_string(),
        host_path: Some(HostPathVolumeSource {
            path: POD_RESOURCES_PATH.to_string(),
            type_: Some("Directory".to_string()),
        }),
        ..Default::default()
    }
}
