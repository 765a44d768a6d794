//! Controller module for DeviceConfig reconciliation
//!
//! This module contains the main controller loop, reconciliation logic,
//! and resource management for Gaudi device configuration.

mod conditions;
mod events;
mod finalizers;
pub mod metrics;
mod module;
mod node_labeler;
mod node_metrics;
mod nodeselector;
mod reconciler;
mod resources;

pub use conditions::{
    ConditionsUpdater, KubeConditionsUpdater, REASON_CONFLICTING_NODE_SELECTOR,
    REASON_MODULE_FAILED, REASON_NODE_LABELER_FAILED, REASON_NODE_METRICS_FAILED,
};
pub use events::{EventPublisher, KubeEventPublisher, EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING};
pub use finalizers::{FinalizerUpdater, KubeFinalizerUpdater, DEVICE_CONFIG_FINALIZER};
pub use module::{KubeModuleReconciler, ModuleReconciler};
pub use node_labeler::{KubeNodeLabelerReconciler, NodeLabelerReconciler};
pub use node_metrics::{KubeNodeMetricsReconciler, NodeMetricsReconciler, NODE_METRICS_PORT};
pub use nodeselector::{KubeNodeSelectorValidator, NodeSelectorValidator};
pub use reconciler::{run_controller, ControllerState};
