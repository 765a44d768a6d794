//! Operator image settings
//!
//! The images deployed into child resources are not part of the DeviceConfig
//! spec; they are fixed per operator deployment and resolved from the
//! environment once at startup. The loaded value is passed into every
//! reconciler constructor rather than held in global state.

use std::env;

use crate::error::{Error, Result};

/// Image references resolved from the environment at startup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Device-plugin container image
    pub device_plugin_image: String,
    /// Base name of the driver image; version and kernel release are appended
    pub driver_image_basename: String,
    /// Node-metrics daemon image
    pub node_metrics_image: String,
    /// Node-labeler daemon image
    pub node_labeler_image: String,
}

impl ControllerSettings {
    /// Load settings from the process environment.
    ///
    /// Missing variables are aggregated into one error so a misconfigured
    /// deployment reports everything wrong at once.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut get = |name: &str| match lookup(name) {
            Some(value) => value,
            None => {
                missing.push(format!("{}: environment variable is not set", name));
                String::new()
            }
        };

        let settings = Self {
            device_plugin_image: get("DEVICE_PLUGIN_IMAGE"),
            driver_image_basename: get("DRIVER_IMAGE_BASENAME"),
            node_metrics_image: get("NODE_METRICS_IMAGE"),
            node_labeler_image: get("NODE_LABELER_IMAGE"),
        };

        if !missing.is_empty() {
            return Err(Error::ConfigError(format!(
                "the following errors were detected: {}",
                missing.join(", ")
            )));
        }
        Ok(settings)
    }
}
