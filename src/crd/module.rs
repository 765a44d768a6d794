//! Module kind of the kernel-module-management API
//!
//! The Module CRD is owned and served by the kernel-module-management
//! operator; this operator only populates instances of it. The mirror below
//! carries exactly the fields this operator sets.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Volume};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a kernel module deployment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kmm.sigs.x-k8s.io",
    version = "v1beta1",
    kind = "Module",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    /// Kernel releases the module builds target, with their images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_mappings: Vec<KernelMapping>,

    /// Container loading the kernel module on each selected node
    #[serde(default)]
    #[schemars(with = "serde_json::Value")]
    pub driver_container: Container,

    /// Optional device-plugin container advertising the device to kubelet
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "serde_json::Value")]
    pub device_plugin: Option<Container>,

    /// Extra volumes mounted into the driver container's pods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(with = "serde_json::Value")]
    pub additional_volumes: Vec<Volume>,

    /// Labels a node must carry to receive the module
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Service account the module pods run under
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,
}

/// Maps a kernel release pattern to the module image built for it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KernelMapping {
    /// Module image reference; may carry kernel-version placeholders
    pub container_image: String,

    /// Regular expression matched against node kernel release strings
    pub regexp: String,
}
