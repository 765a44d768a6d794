//! Unit tests for the DeviceConfig CRD
//!
//! Covers effective node-selector resolution, condition bookkeeping on the
//! status subresource, and the wire format of the spec and status types.

#[cfg(test)]
mod device_config_crd {
    use std::collections::BTreeMap;

    use kube::Resource;

    use crate::crd::{
        Condition, DeviceConfig, DeviceConfigSpec, DeviceConfigStatus, KernelMapping, ModuleSpec,
        DEVICE_PRESENT_LABEL,
    };

    /// Helper to create a DeviceConfig with the given node selector
    fn device_config(selector: Option<BTreeMap<String, String>>) -> DeviceConfig {
        DeviceConfig::new(
            "test",
            DeviceConfigSpec {
                driver_image: "img".to_string(),
                driver_version: "v1".to_string(),
                node_selector: selector,
            },
        )
    }

    // ==================== Effective node selector ====================

    #[test]
    fn default_selector_is_substituted_when_unset() {
        let dc = device_config(None);

        let selector = dc.node_selector();
        assert_eq!(
            selector.get(DEVICE_PRESENT_LABEL).map(String::as_str),
            Some("true")
        );
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn default_selector_is_substituted_when_empty() {
        let dc = device_config(Some(BTreeMap::new()));

        let selector = dc.node_selector();
        assert!(selector.contains_key(DEVICE_PRESENT_LABEL));
    }

    #[test]
    fn explicit_selector_is_used_verbatim() {
        let dc = device_config(Some(BTreeMap::from([(
            "label".to_string(),
            "test".to_string(),
        )])));

        let selector = dc.node_selector();
        assert_eq!(selector.get("label").map(String::as_str), Some("test"));
        assert!(!selector.contains_key(DEVICE_PRESENT_LABEL));
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn defaulting_does_not_mutate_the_spec() {
        let dc = device_config(None);

        dc.node_selector();
        assert!(dc.spec.node_selector.is_none());
    }

    // ==================== Wire format ====================

    #[test]
    fn spec_serializes_camel_case() {
        let dc = device_config(None);

        let value = serde_json::to_value(&dc.spec).unwrap();
        assert_eq!(value["driverImage"], "img");
        assert_eq!(value["driverVersion"], "v1");
        assert!(value.get("nodeSelector").is_none());
    }

    #[test]
    fn device_config_api_metadata() {
        assert_eq!(DeviceConfig::api_version(&()), "gaudi.ai/v1alpha1");
        assert_eq!(DeviceConfig::kind(&()), "DeviceConfig");
    }

    #[test]
    fn module_spec_serializes_camel_case() {
        let spec = ModuleSpec {
            kernel_mappings: vec![KernelMapping {
                container_image: "img:v1".to_string(),
                regexp: "^.*$".to_string(),
            }],
            service_account_name: "driver-gaudi".to_string(),
            ..Default::default()
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["kernelMappings"][0]["containerImage"], "img:v1");
        assert_eq!(value["serviceAccountName"], "driver-gaudi");
    }

    // ==================== Status conditions ====================

    #[test]
    fn set_condition_appends_when_type_absent() {
        let mut status = DeviceConfigStatus::default();

        status.set_condition(Condition::ready(true, "Reconciled", "ok"));
        status.set_condition(Condition::errored(false, "Ready", ""));

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.condition("Ready").unwrap().status, "True");
        assert_eq!(status.condition("Errored").unwrap().status, "False");
    }

    #[test]
    fn set_condition_updates_in_place_when_type_exists() {
        let mut status = DeviceConfigStatus::default();
        status.set_condition(Condition::ready(true, "Reconciled", "ok"));

        status.set_condition(Condition::ready(false, "Errored", ""));

        assert_eq!(status.conditions.len(), 1);
        let ready = status.condition("Ready").unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason, "Errored");
    }

    #[test]
    fn transition_time_is_kept_while_status_is_unchanged() {
        let mut status = DeviceConfigStatus::default();
        status.set_condition(Condition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            last_transition_time: "2024-01-01T00:00:00+00:00".to_string(),
            reason: "Reconciled".to_string(),
            message: "ok".to_string(),
        });

        status.set_condition(Condition::ready(true, "Reconciled", "still ok"));
        assert_eq!(
            status.condition("Ready").unwrap().last_transition_time,
            "2024-01-01T00:00:00+00:00"
        );

        status.set_condition(Condition::ready(false, "Errored", ""));
        assert_ne!(
            status.condition("Ready").unwrap().last_transition_time,
            "2024-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn is_ready_reflects_the_ready_condition() {
        let mut status = DeviceConfigStatus::default();
        assert!(!status.is_ready());

        status.set_condition(Condition::ready(true, "Reconciled", "ok"));
        assert!(status.is_ready());

        status.set_condition(Condition::ready(false, "Errored", ""));
        assert!(!status.is_ready());
    }
}
