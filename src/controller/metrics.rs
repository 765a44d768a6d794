//! Prometheus metrics for the Gaudi device operator

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicI64;

/// Labels for the reconciliation failure metric
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeviceConfigLabels {
    pub deviceconfig: String,
}

/// Gauge flagging DeviceConfigs whose last reconciliation failed
pub static RECONCILIATION_FAILED: Lazy<Family<DeviceConfigLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "gaudi_deviceconfig_reconciliation_failed",
        "Whether the last reconciliation of the DeviceConfig failed",
        RECONCILIATION_FAILED.clone(),
    );
    registry
});

/// Flag or clear the reconciliation failure metric for a DeviceConfig
pub fn set_reconciliation_failed(deviceconfig: &str, failed: bool) {
    let labels = DeviceConfigLabels {
        deviceconfig: deviceconfig.to_string(),
    };
    RECONCILIATION_FAILED
        .get_or_create(&labels)
        .set(i64::from(failed));
}
