//! Custom Resource Definitions for Gaudi-K8s
//!
//! This module defines the DeviceConfig CRD managed by this operator and the
//! mirror of the externally-owned Module kind it populates.

mod device_config;
mod module;
#[cfg(test)]
mod tests;
mod types;

pub use device_config::{DeviceConfig, DeviceConfigSpec, DeviceConfigStatus, DEVICE_PRESENT_LABEL};
pub use module::{KernelMapping, Module, ModuleSpec};
pub use types::*;
