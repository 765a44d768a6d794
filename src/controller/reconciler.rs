//! DeviceConfig reconciliation orchestrator
//!
//! Drives one DeviceConfig per pass through validation, finalizer upkeep, the
//! child reconcilers, and the final status update. The framework serializes
//! passes per resource, so each step here can assume it runs alone.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::crd::{DeviceConfig, Module};
use crate::error::{Error, Result};
use crate::settings::ControllerSettings;

use super::conditions::{
    ConditionsUpdater, KubeConditionsUpdater, REASON_CONFLICTING_NODE_SELECTOR,
    REASON_MODULE_FAILED, REASON_NODE_LABELER_FAILED, REASON_NODE_METRICS_FAILED,
};
use super::events::{EventPublisher, KubeEventPublisher, EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING};
use super::finalizers::{FinalizerUpdater, KubeFinalizerUpdater};
use super::metrics;
use super::module::{KubeModuleReconciler, ModuleReconciler};
use super::node_labeler::{KubeNodeLabelerReconciler, NodeLabelerReconciler};
use super::node_metrics::{KubeNodeMetricsReconciler, NodeMetricsReconciler};
use super::nodeselector::{KubeNodeSelectorValidator, NodeSelectorValidator};

const REASON_RECONCILED: &str = "Reconciled";

const READY_MESSAGE: &str = "All resources have been successfully reconciled";

const CONFLICT_MESSAGE: &str = "Conflicting DeviceConfig NodeSelectors found. \
     Please add or update this DeviceConfig's NodeSelector accordingly.";

/// Shared state for the controller
pub struct ControllerState {
    pub module: Arc<dyn ModuleReconciler>,
    pub node_metrics: Arc<dyn NodeMetricsReconciler>,
    pub node_labeler: Arc<dyn NodeLabelerReconciler>,
    pub finalizers: Arc<dyn FinalizerUpdater>,
    pub conditions: Arc<dyn ConditionsUpdater>,
    pub node_selectors: Arc<dyn NodeSelectorValidator>,
    pub events: Arc<dyn EventPublisher>,
}

impl ControllerState {
    /// Wire the cluster-backed collaborators for a live controller
    pub fn from_client(client: &Client, settings: &ControllerSettings) -> Self {
        Self {
            module: Arc::new(KubeModuleReconciler::new(client.clone(), settings.clone())),
            node_metrics: Arc::new(KubeNodeMetricsReconciler::new(
                client.clone(),
                settings.clone(),
            )),
            node_labeler: Arc::new(KubeNodeLabelerReconciler::new(
                client.clone(),
                settings.clone(),
            )),
            finalizers: Arc::new(KubeFinalizerUpdater::new(client.clone())),
            conditions: Arc::new(KubeConditionsUpdater::new(client.clone())),
            node_selectors: Arc::new(KubeNodeSelectorValidator::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client.clone())),
        }
    }
}

fn scoped_api<K>(client: &Client, namespace: Option<&String>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Main entry point to start the controller
pub async fn run_controller(
    client: Client,
    state: Arc<ControllerState>,
    watch_namespace: Option<String>,
) -> Result<()> {
    let device_configs: Api<DeviceConfig> = scoped_api(&client, watch_namespace.as_ref());

    info!("Starting DeviceConfig controller");

    // Verify CRD exists
    match device_configs.list(&Default::default()).await {
        Ok(_) => info!("DeviceConfig CRD is available"),
        Err(e) => {
            error!(
                "DeviceConfig CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "DeviceConfig CRD not installed".to_string(),
            ));
        }
    }

    Controller::new(device_configs, Config::default())
        // Watch owned resources for changes
        .owns::<Module>(
            scoped_api(&client, watch_namespace.as_ref()),
            Config::default(),
        )
        .owns::<DaemonSet>(
            scoped_api(&client, watch_namespace.as_ref()),
            Config::default(),
        )
        .owns::<Service>(
            scoped_api(&client, watch_namespace.as_ref()),
            Config::default(),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// Reconcile a single DeviceConfig
///
/// Called whenever:
/// - A DeviceConfig is created, updated, or deleted
/// - An owned resource (Module, DaemonSet, Service) changes
#[instrument(skip_all, fields(name = %dc.name_any(), namespace = dc.namespace()))]
async fn reconcile(dc: Arc<DeviceConfig>, ctx: Arc<ControllerState>) -> Result<Action> {
    let name = dc.name_any();
    let namespace = dc.namespace().unwrap_or_else(|| "default".to_string());

    if dc.metadata.deletion_timestamp.is_some() {
        return teardown(&dc, &ctx).await;
    }

    info!("Reconciling DeviceConfig {}/{}", namespace, name);

    if let Err(error) = ctx.node_selectors.check_conflicting_node_selector(&dc).await {
        if !matches!(error, Error::ConflictingNodeSelectors(_)) {
            return Err(error);
        }
        warn!("{}", error);
        ctx.events
            .publish(
                &dc,
                EVENT_TYPE_WARNING,
                REASON_CONFLICTING_NODE_SELECTOR,
                CONFLICT_MESSAGE,
            )
            .await;
        metrics::set_reconciliation_failed(&name, true);
        return Ok(Action::await_change());
    }

    ctx.finalizers.add(&dc).await?;

    if let Err(error) = ctx.module.reconcile(&dc).await {
        return child_failed(&dc, &ctx, REASON_MODULE_FAILED, error).await;
    }
    if let Err(error) = ctx.node_metrics.reconcile(&dc).await {
        return child_failed(&dc, &ctx, REASON_NODE_METRICS_FAILED, error).await;
    }
    if let Err(error) = ctx.node_labeler.reconcile(&dc).await {
        return child_failed(&dc, &ctx, REASON_NODE_LABELER_FAILED, error).await;
    }

    metrics::set_reconciliation_failed(&name, false);
    info!("Successfully reconciled DeviceConfig {}/{}", namespace, name);
    ctx.events
        .publish(
            &dc,
            EVENT_TYPE_NORMAL,
            REASON_RECONCILED,
            &format!(
                "Successfully reconciled DeviceConfig {}/{}",
                namespace, name
            ),
        )
        .await;
    ctx.conditions
        .set_ready(&dc, REASON_RECONCILED, READY_MESSAGE)
        .await?;

    Ok(Action::await_change())
}

/// Tear down the children of a DeviceConfig marked for deletion
///
/// The Module is deleted explicitly before the finalizer is released so the
/// driver unloads before garbage collection sweeps the remaining children.
async fn teardown(dc: &DeviceConfig, ctx: &ControllerState) -> Result<Action> {
    let name = dc.name_any();
    info!("DeviceConfig {} is marked for deletion", name);
    metrics::set_reconciliation_failed(&name, false);

    if ctx.finalizers.contains(dc) {
        ctx.module.delete(dc).await?;
        ctx.finalizers.remove(dc).await?;
        info!("Released finalizer on DeviceConfig {}", name);
    }

    Ok(Action::await_change())
}

/// Record a failed child reconcile on the status and surface the error
async fn child_failed(
    dc: &DeviceConfig,
    ctx: &ControllerState,
    reason: &str,
    error: Error,
) -> Result<Action> {
    error!("{} for DeviceConfig {}: {}", reason, dc.name_any(), error);
    metrics::set_reconciliation_failed(&dc.name_any(), true);

    if let Err(status_error) = ctx
        .conditions
        .set_errored(dc, reason, &error.to_string())
        .await
    {
        warn!(
            "Failed to update status conditions for {}: {}",
            dc.name_any(),
            status_error
        );
    }

    Err(error)
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(dc: Arc<DeviceConfig>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", dc.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
