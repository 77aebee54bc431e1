//! The top-level reconciliation entry point.
//!
//! `configure` never touches a database: it walks the desired tree against
//! the current tree, recording every mutation into a [`CallRecorder`], and
//! returns the resulting call list. Running the list against a real client
//! (or a snapshot) is the caller's business; running `configure` again
//! after a full apply yields an empty list.

use anyhow::Result;

use crate::database::CallRecorder;
use crate::server::{update_class, update_server};
use crate::tree::{ClassConfig, ConfigTree, InstanceClasses, server_id};

/// Options steering the reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Update mode: only add and change, never remove.
    pub update: bool,
    /// Match server, device, attribute and property names caselessly.
    pub case_insensitive: bool,
    /// Reject attribute property names outside the standard set.
    pub strict_attribute_properties: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self { update: false, case_insensitive: true, strict_attribute_properties: true }
    }
}

/// Compute the database calls that bring the current state to the desired
/// state. Servers and instances are visited in desired-tree order, then
/// the class-level bags; the call order within one device is delete before
/// put, with `add_device` ahead of everything touching the new device.
pub fn configure(
    desired: &ConfigTree,
    current: &ConfigTree,
    options: &ReconcileOptions,
) -> Result<Vec<crate::calls::DbCall>> {
    let mut recorder = CallRecorder::new();
    let no_classes = InstanceClasses::new();

    for (server_name, instances) in desired.servers.iter() {
        for (instance_name, desired_classes) in instances.iter() {
            let current_classes = current
                .servers
                .lookup(server_name, options.case_insensitive)
                .and_then(|instances| instances.lookup(instance_name, options.case_insensitive))
                .unwrap_or(&no_classes);
            update_server(
                &mut recorder,
                &server_id(server_name, instance_name),
                desired_classes,
                current_classes,
                options,
            )?;
        }
    }

    let blank_class = ClassConfig::default();
    for (class_name, desired_class) in desired.classes.iter() {
        let current_class =
            current.classes.lookup(class_name, options.case_insensitive).unwrap_or(&blank_class);
        update_class(&mut recorder, class_name, current_class, desired_class, options)?;
    }

    let calls = recorder.into_calls();
    log::debug!("configure: {} calls", calls.len());
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{DbCall, DeviceInfo};
    use crate::tree::Properties;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tree(value: serde_json::Value) -> ConfigTree {
        serde_json::from_value(value).unwrap()
    }

    fn test_data() -> ConfigTree {
        tree(json!({
            "servers": {
                "TangoTest": {
                    "test": {
                        "TangoTest": {
                            "sys/tg_test/2": {
                                "properties": {"bepa": ["45"]},
                                "attribute_properties": {
                                    "ampliz": {
                                        "min_value": ["100"],
                                        "unit": ["hejsan"]
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "classes": {
                "TangoTest": {
                    "properties": {"cepa": ["1"]}
                }
            }
        }))
    }

    #[test]
    fn test_identical_trees_need_no_calls() {
        let data = test_data();
        assert_eq!(configure(&data, &data.clone(), &ReconcileOptions::default()).unwrap(), vec![]);
    }

    #[test]
    fn test_changed_property_yields_single_put() {
        let current = test_data();
        let mut desired = test_data();
        desired
            .ensure_device("TangoTest", "test", "TangoTest", "sys/tg_test/2")
            .properties_mut()
            .insert("bepa", vec!["73".to_string()]);

        let calls = configure(&desired, &current, &ReconcileOptions::default()).unwrap();
        let mut expected = Properties::new();
        expected.insert("bepa", vec!["73".to_string()]);
        assert_eq!(
            calls,
            vec![DbCall::PutDeviceProperty {
                device: "sys/tg_test/2".into(),
                properties: expected,
            }]
        );
    }

    #[test]
    fn test_removed_device_deleted_in_replace_mode_only() {
        let current = test_data();
        let mut desired = test_data();
        desired
            .servers
            .get_mut("TangoTest")
            .unwrap()
            .get_mut("test")
            .unwrap()
            .get_mut("TangoTest")
            .unwrap()
            .remove("sys/tg_test/2");

        let calls = configure(&desired, &current, &ReconcileOptions::default()).unwrap();
        assert_eq!(calls, vec![DbCall::DeleteDevice { device: "sys/tg_test/2".into() }]);

        let update = ReconcileOptions { update: true, ..Default::default() };
        assert_eq!(configure(&desired, &current, &update).unwrap(), vec![]);
    }

    #[test]
    fn test_new_device_add_precedes_properties() {
        let current = test_data();
        let mut desired = test_data();
        desired
            .ensure_device("TangoTest", "test", "TangoTest", "a/new/dev")
            .properties_mut()
            .insert("test", vec!["hello".to_string()]);

        let calls = configure(&desired, &current, &ReconcileOptions::default()).unwrap();
        let mut props = Properties::new();
        props.insert("test", vec!["hello".to_string()]);
        assert_eq!(
            calls,
            vec![
                DbCall::AddDevice {
                    info: DeviceInfo {
                        server: "TangoTest/test".into(),
                        class: "TangoTest".into(),
                        name: "a/new/dev".into(),
                    }
                },
                DbCall::PutDeviceProperty { device: "a/new/dev".into(), properties: props },
            ]
        );
    }

    #[test]
    fn test_class_properties_reconcile_without_device_calls() {
        let current = test_data();
        let mut desired = test_data();
        desired.ensure_class("TangoTest").properties_mut().insert("cepa", vec!["2".to_string()]);

        let calls = configure(&desired, &current, &ReconcileOptions::default()).unwrap();
        let mut props = Properties::new();
        props.insert("cepa", vec!["2".to_string()]);
        assert_eq!(
            calls,
            vec![DbCall::PutClassProperty { class: "TangoTest".into(), properties: props }]
        );
    }

    #[test]
    fn test_class_omitted_from_desired_is_untouched() {
        let current = test_data();
        let mut desired = test_data();
        desired.classes = Default::default();
        assert_eq!(configure(&desired, &current, &ReconcileOptions::default()).unwrap(), vec![]);
    }

    #[test]
    fn test_caseless_trees_are_equivalent() {
        let current = test_data();
        let desired = tree(json!({
            "servers": {
                "TANGOTEST": {
                    "TEST": {
                        "tangotest": {
                            "SYS/TG_TEST/2": {
                                "properties": {"BEPA": ["45"]},
                                "attribute_properties": {
                                    "AMPLIZ": {
                                        "MIN_VALUE": ["100"],
                                        "UNIT": ["hejsan"]
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "classes": {
                "TANGOTEST": {"properties": {"CEPA": ["1"]}}
            }
        }));
        assert_eq!(configure(&desired, &current, &ReconcileOptions::default()).unwrap(), vec![]);

        let sensitive = ReconcileOptions { case_insensitive: false, ..Default::default() };
        assert!(!configure(&desired, &current, &sensitive).unwrap().is_empty());
    }

    #[test]
    fn test_strict_attribute_property_error_propagates() {
        let current = ConfigTree::new();
        let desired = tree(json!({
            "servers": {
                "S": {"i": {"C": {"a/b/c": {
                    "attribute_properties": {"ampliz": {"flipperspel": ["fiskotek"]}}
                }}}}
            }
        }));
        assert!(configure(&desired, &current, &ReconcileOptions::default()).is_err());
        let lax = ReconcileOptions { strict_attribute_properties: false, ..Default::default() };
        assert!(configure(&desired, &current, &lax).is_ok());
    }
}
