//! Gaudi device operator library
//!
//! A Kubernetes operator managing Habana Gaudi accelerator configuration:
//! the DeviceConfig CRD, its kernel-driver Module child, and the per-node
//! telemetry and labeling daemons.

pub mod controller;
pub mod crd;
pub mod error;
pub mod rest_api;
pub mod settings;
