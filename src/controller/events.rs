//! Kubernetes Event publishing for DeviceConfig lifecycle
//!
//! Events are fire-and-forget: a failed write is logged and never fails the
//! reconcile pass that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::warn;

use crate::crd::DeviceConfig;

/// Event type for normal operational events
pub const EVENT_TYPE_NORMAL: &str = "Normal";
/// Event type for warnings
pub const EVENT_TYPE_WARNING: &str = "Warning";

/// Records operational events against a DeviceConfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event; failures are logged, never propagated
    async fn publish(&self, dc: &DeviceConfig, event_type: &str, reason: &str, message: &str);
}

/// Event publisher backed by the cluster API
pub struct KubeEventPublisher {
    client: Client,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, dc: &DeviceConfig, event_type: &str, reason: &str, message: &str) {
        let namespace = dc.namespace().unwrap_or_else(|| "default".to_string());
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-event-", dc.name_any())),
                ..Default::default()
            },
            type_: Some(event_type.to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: dc.object_ref(&()),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            ..Default::default()
        };

        if let Err(e) = events.create(&PostParams::default(), &event).await {
            warn!(
                "Failed to record {} event for {}: {}",
                reason,
                dc.name_any(),
                e
            );
        }
    }
}
