//! Driver/workload reconciler
//!
//! Manages the Module child of a DeviceConfig: the kernel-driver loader and
//! the device-plugin rolled out to every selected node.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, ExecAction, HostPathVolumeSource, Lifecycle, LifecycleHandler, Probe,
    SELinuxOptions, SecurityContext, Volume, VolumeMount,
};
use kube::api::{Api, DeleteParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::crd::{DeviceConfig, KernelMapping, Module, ModuleSpec};
use crate::error::{Error, Result};
use crate::settings::ControllerSettings;

use super::resources::{container_resources, create_or_patch, owner_reference, resource_name};

const MODULE_SUFFIX: &str = "module";
const DRIVER_SUFFIX: &str = "driver-gaudi";
const DEVICE_PLUGIN_SUFFIX: &str = "device-plugin";
const DRIVER_SERVICE_ACCOUNT: &str = "driver-gaudi";

/// Kernel releases with prebuilt driver images (enterprise-Linux suffixes)
const KERNEL_RELEASE_REGEXP: &str = r"^.*\.el\d_?\d?\..*$";

/// Reconciles the Module child of a DeviceConfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModuleReconciler: Send + Sync {
    /// Create or patch the Module to its desired shape
    async fn reconcile(&self, dc: &DeviceConfig) -> Result<()>;

    /// Mutate a Module into the desired shape for its owner
    fn set_desired(&self, module: &mut Module, dc: &DeviceConfig) -> Result<()>;

    /// Delete the Module; already absent is success
    async fn delete(&self, dc: &DeviceConfig) -> Result<()>;
}

/// Module reconciler backed by the cluster API
pub struct KubeModuleReconciler {
    client: Client,
    settings: ControllerSettings,
}

impl KubeModuleReconciler {
    pub fn new(client: Client, settings: ControllerSettings) -> Self {
        Self { client, settings }
    }

    fn api_for(&self, dc: &DeviceConfig) -> Api<Module> {
        let namespace = dc.namespace().unwrap_or_else(|| "default".to_string());
        Api::namespaced(self.client.clone(), &namespace)
    }
}

#[async_trait]
impl ModuleReconciler for KubeModuleReconciler {
    async fn reconcile(&self, dc: &DeviceConfig) -> Result<()> {
        let mut bare = Module::new(&resource_name(dc, MODULE_SUFFIX), ModuleSpec::default());
        bare.metadata.namespace = dc.namespace();

        create_or_patch(&self.api_for(dc), bare, |module| self.set_desired(module, dc)).await
    }

    fn set_desired(&self, module: &mut Module, dc: &DeviceConfig) -> Result<()> {
        set_desired_module(module, dc, &self.settings)
    }

    async fn delete(&self, dc: &DeviceConfig) -> Result<()> {
        let name = resource_name(dc, MODULE_SUFFIX);
        match self
            .api_for(dc)
            .delete(&name, &DeleteParams::default())
            .await
        {
            Ok(_) => info!("Deleted Module {}", name),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!("Module {} not found, already deleted", name);
            }
            Err(e) => return Err(Error::KubeError(e)),
        }
        Ok(())
    }
}

/// Compute the desired Module shape for a DeviceConfig
fn set_desired_module(
    module: &mut Module,
    dc: &DeviceConfig,
    settings: &ControllerSettings,
) -> Result<()> {
    let base_image = if dc.spec.driver_image.is_empty() {
        settings.driver_image_basename.clone()
    } else {
        dc.spec.driver_image.clone()
    };

    module.metadata.owner_references = Some(vec![owner_reference(dc)]);
    module.spec = ModuleSpec {
        kernel_mappings: vec![KernelMapping {
            container_image: format!(
                "{}:{}-${{KERNEL_FULL_VERSION}}",
                base_image, dc.spec.driver_version
            ),
            regexp: KERNEL_RELEASE_REGEXP.to_string(),
        }],
        driver_container: driver_container(dc),
        device_plugin: Some(device_plugin_container(dc, settings)),
        additional_volumes: vec![firmware_volume()],
        selector: dc.node_selector(),
        service_account_name: DRIVER_SERVICE_ACCOUNT.to_string(),
    };
    Ok(())
}

fn driver_container(dc: &DeviceConfig) -> Container {
    Container {
        name: resource_name(dc, DRIVER_SUFFIX),
        env: Some(vec![EnvVar {
            name: "DRIVER_VERSION".to_string(),
            value: Some(dc.spec.driver_version.clone()),
            ..Default::default()
        }]),
        image_pull_policy: Some("Always".to_string()),
        resources: Some(container_resources("100m", "100Mi", "100m", "50Mi")),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            run_as_user: Some(0),
            se_linux_options: Some(SELinuxOptions {
                level: Some("s0".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec!["/usr/bin/exitpoint".to_string()]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        readiness_probe: Some(module_loaded_probe()),
        liveness_probe: Some(module_loaded_probe()),
        volume_mounts: Some(vec![VolumeMount {
            name: "host-firmware".to_string(),
            mount_path: "/var/lib/firmware".to_string(),
            mount_propagation: Some("Bidirectional".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn device_plugin_container(dc: &DeviceConfig, settings: &ControllerSettings) -> Container {
    Container {
        name: resource_name(dc, DEVICE_PLUGIN_SUFFIX),
        image: Some(settings.device_plugin_image.clone()),
        env: Some(vec![EnvVar {
            name: "LD_LIBRARY_PATH".to_string(),
            value: Some("/usr/lib/habanalabs".to_string()),
            ..Default::default()
        }]),
        image_pull_policy: Some("Always".to_string()),
        resources: Some(container_resources("200m", "100Mi", "100m", "50Mi")),
        ..Default::default()
    }
}

/// Probe verifying the habanalabs module is loaded on the node
fn module_loaded_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "lsmod | grep habanalabs".to_string(),
            ]),
        }),
        ..Default::default()
    }
}

// /usr/lib/firmware is read-only on most hosts; firmware is staged under
// /var/lib/firmware, an alternative kernel search path.
fn firmware_volume() -> Volume {
    Volume {
        name: "host-firmware".to_string(),
        host_path: Some(HostPathVolumeSource {
            path: "/var/lib/firmware".to_string(),
            type_: Some("DirectoryOrCreate".to_string()),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::crd::{DeviceConfig, DeviceConfigSpec, Module, ModuleSpec, DEVICE_PRESENT_LABEL};
    use crate::settings::ControllerSettings;

    use super::{set_desired_module, KERNEL_RELEASE_REGEXP};

    fn device_config() -> DeviceConfig {
        let mut dc = DeviceConfig::new(
            "test",
            DeviceConfigSpec {
                driver_image: "img".to_string(),
                driver_version: "v1".to_string(),
                node_selector: None,
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

    fn desired_module() -> Module {
        let mut module = Module::new("test-module", ModuleSpec::default());
        set_desired_module(&mut module, &device_config(), &settings()).unwrap();
        module
    }

    #[test]
    fn kernel_mapping_appends_version_and_kernel_placeholder() {
        let module = desired_module();

        let mapping = &module.spec.kernel_mappings[0];
        assert_eq!(mapping.container_image, "img:v1-${KERNEL_FULL_VERSION}");
        assert_eq!(mapping.regexp, KERNEL_RELEASE_REGEXP);
    }

    #[test]
    fn basename_from_settings_backs_an_empty_driver_image() {
        let mut dc = device_config();
        dc.spec.driver_image = String::new();

        let mut module = Module::new("test-module", ModuleSpec::default());
        set_desired_module(&mut module, &dc, &settings()).unwrap();

        assert_eq!(
            module.spec.kernel_mappings[0].container_image,
            "driver-base:v1-${KERNEL_FULL_VERSION}"
        );
    }

    #[test]
    fn owner_reference_points_back_to_the_device_config() {
        let module = desired_module();

        let owner = &module.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.name, "test");
        assert_eq!(owner.kind, "DeviceConfig");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn driver_container_loads_the_module_privileged() {
        let module = desired_module();

        let driver = &module.spec.driver_container;
        assert_eq!(driver.name, "test-driver-gaudi");
        assert_eq!(driver.image_pull_policy.as_deref(), Some("Always"));

        let env = driver.env.as_ref().unwrap();
        assert_eq!(env[0].name, "DRIVER_VERSION");
        assert_eq!(env[0].value.as_deref(), Some("v1"));

        let security = driver.security_context.as_ref().unwrap();
        assert_eq!(security.privileged, Some(true));
        assert_eq!(security.run_as_user, Some(0));
        assert_eq!(
            security
                .se_linux_options
                .as_ref()
                .unwrap()
                .level
                .as_deref(),
            Some("s0")
        );
    }

    #[test]
    fn driver_probes_check_for_the_loaded_module() {
        let module = desired_module();

        let probe = module.spec.driver_container.readiness_probe.as_ref();
        let command = probe.unwrap().exec.as_ref().unwrap().command.as_ref();
        assert_eq!(command.unwrap()[2], "lsmod | grep habanalabs");
        assert_eq!(
            module.spec.driver_container.liveness_probe,
            module.spec.driver_container.readiness_probe
        );
    }

    #[test]
    fn driver_pre_stop_unloads_through_the_exitpoint() {
        let module = desired_module();

        let pre_stop = module
            .spec
            .driver_container
            .lifecycle
            .as_ref()
            .unwrap()
            .pre_stop
            .as_ref()
            .unwrap();
        assert_eq!(
            pre_stop.exec.as_ref().unwrap().command.as_ref().unwrap(),
            &vec!["/usr/bin/exitpoint".to_string()]
        );
    }

    #[test]
    fn firmware_volume_is_mounted_bidirectionally() {
        let module = desired_module();

        let volume = &module.spec.additional_volumes[0];
        assert_eq!(volume.name, "host-firmware");
        let host_path = volume.host_path.as_ref().unwrap();
        assert_eq!(host_path.path, "/var/lib/firmware");
        assert_eq!(host_path.type_.as_deref(), Some("DirectoryOrCreate"));

        let mount = &module.spec.driver_container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, "host-firmware");
        assert_eq!(mount.mount_path, "/var/lib/firmware");
        assert_eq!(mount.mount_propagation.as_deref(), Some("Bidirectional"));
    }

    #[test]
    fn device_plugin_finds_the_runtime_libraries() {
        let module = desired_module();

        let plugin = module.spec.device_plugin.as_ref().unwrap();
        assert_eq!(plugin.name, "test-device-plugin");
        assert_eq!(plugin.image.as_deref(), Some("device-plugin:latest"));

        let env = plugin.env.as_ref().unwrap();
        assert_eq!(env[0].name, "LD_LIBRARY_PATH");
        assert_eq!(env[0].value.as_deref(), Some("/usr/lib/habanalabs"));
    }

    #[test]
    fn selector_and_service_account_target_the_nodes() {
        let module = desired_module();

        assert!(module.spec.selector.contains_key(DEVICE_PRESENT_LABEL));
        assert_eq!(module.spec.service_account_name, "driver-gaudi");
    }

    #[test]
    fn explicit_selector_replaces_the_default() {
        let mut dc = device_config();
        dc.spec.node_selector = Some(BTreeMap::from([(
            "label".to_string(),
            "test".to_string(),
        )]));

        let mut module = Module::new("test-module", ModuleSpec::default());
        set_desired_module(&mut module, &dc, &settings()).unwrap();

        assert_eq!(
            module.spec.selector.get("label").map(String::as_str),
            Some("test")
        );
        assert!(!module.spec.selector.contains_key(DEVICE_PRESENT_LABEL));
    }

    #[test]
    fn desired_state_is_idempotent() {
        let mut module = desired_module();
        let first = serde_json::to_value(&module).unwrap();

        set_desired_module(&mut module, &device_config(), &settings()).unwrap();
        assert_eq!(serde_json::to_value(&module).unwrap(), first);
    }
}
