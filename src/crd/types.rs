//! Shared types for DeviceConfig status reporting
//!
//! These types are used across the CRD definitions and controller logic.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported when all children are reconciled
pub const CONDITION_READY: &str = "Ready";
/// Condition type reported when a child reconcile failed
pub const CONDITION_ERRORED: &str = "Errored";

/// Condition for status reporting (Kubernetes convention)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition ("Ready" or "Errored")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl Condition {
    /// Create a new Ready condition
    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self::new(CONDITION_READY, status, reason, message)
    }

    /// Create a new Errored condition
    pub fn errored(status: bool, reason: &str, message: &str) -> Self {
        Self::new(CONDITION_ERRORED, status, reason, message)
    }

    fn new(type_: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }
}
