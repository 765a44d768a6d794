//! Shared helpers for DeviceConfig child resources
//!
//! Children are named deterministically from their owner and carry an owner
//! reference, so cascade deletion backs up the explicit teardown path.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::crd::DeviceConfig;
use crate::error::{Error, Result};

/// Name the operator stamps onto every managed resource
pub const OPERATOR_NAME: &str = "gaudi-device-operator";

/// Standard labels for a child component
pub(crate) fn component_labels(component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        OPERATOR_NAME.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels
}

/// Create an OwnerReference for garbage collection
pub(crate) fn owner_reference(dc: &DeviceConfig) -> OwnerReference {
    OwnerReference {
        api_version: DeviceConfig::api_version(&()).to_string(),
        kind: DeviceConfig::kind(&()).to_string(),
        name: dc.name_any(),
        uid: dc.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Build the resource name for a given component
pub(crate) fn resource_name(dc: &DeviceConfig, suffix: &str) -> String {
    format!("{}-{}", dc.name_any(), suffix)
}

/// Build container resource limits and requests from quantity strings
pub(crate) fn container_resources(
    limit_cpu: &str,
    limit_memory: &str,
    request_cpu: &str,
    request_memory: &str,
) -> ResourceRequirements {
    let quantities = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };

    ResourceRequirements {
        limits: Some(quantities(limit_cpu, limit_memory)),
        requests: Some(quantities(request_cpu, request_memory)),
        ..Default::default()
    }
}

/// Apply the create-or-patch protocol for one owned resource.
///
/// Reads the stored object named by `bare` (404 selects the create branch),
/// applies the desired-state mutation on top of whatever exists, and writes
/// only when the result differs from what is stored. The merge patch carries
/// the stored resource version, so a stale read fails the pass and the
/// framework retries it.
pub(crate) async fn create_or_patch<K, F>(api: &Api<K>, bare: K, set_desired: F) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
    F: FnOnce(&mut K) -> Result<()>,
{
    let name = bare.name_any();
    let kind = K::kind(&());

    let existing = match api.get(&name).await {
        Ok(obj) => Some(obj),
        Err(kube::Error::Api(e)) if e.code == 404 => None,
        Err(e) => return Err(Error::KubeError(e)),
    };

    let mut desired = existing.clone().unwrap_or(bare);
    set_desired(&mut desired)?;

    match existing {
        None => {
            info!("Creating {} {}", kind, name);
            api.create(&PostParams::default(), &desired).await?;
        }
        Some(before) => {
            if serde_json::to_value(&before)? == serde_json::to_value(&desired)? {
                debug!("{} {} unchanged", kind, name);
            } else {
                info!("Patching {} {}", kind, name);
                api.patch(&name, &PatchParams::default(), &Patch::Merge(&desired))
                    .await?;
            }
        }
    }

    Ok(())
}
