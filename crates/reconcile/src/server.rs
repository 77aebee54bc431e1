//! Device and server reconciliation.
//!
//! Walks the desired class → device structure of one server instance
//! against the database's view of the same instance, creating and removing
//! devices and delegating property bags to the property differ. Devices
//! must exist before their properties can be set, so `add_device` always
//! precedes the property calls for a new device.

use anyhow::Result;

use crate::calls::DeviceInfo;
use crate::configure::ReconcileOptions;
use crate::database::DatabaseClient;
use crate::property::{diff_attribute_properties, diff_properties};
use crate::tree::{
    AttributeProperties, ClassConfig, ConfigTree, DeviceConfig, InstanceClasses, Properties,
    server_id,
};

/// A device claimed by a server while registered under a different one.
/// Not an error: the registration moves, and the old server is left for
/// the empty-server cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    /// Device name
    pub device: String,
    /// Class the device is currently registered with
    pub class: String,
    /// `Server/Instance` currently holding the device
    pub old_server: String,
    /// `Server/Instance` that claims it in the desired state
    pub new_server: String,
}

/// Create and remove devices for one server instance, then reconcile every
/// desired device's configuration. `server` is the full `Server/Instance`
/// identifier. In update mode nothing is removed.
pub fn update_server(
    db: &mut dyn DatabaseClient,
    server: &str,
    desired: &InstanceClasses,
    current: &InstanceClasses,
    options: &ReconcileOptions,
) -> Result<()> {
    let no_devices = crate::tree::ClassDevices::new();
    for (class_name, desired_devices) in desired.iter() {
        let current_devices =
            current.lookup(class_name, options.case_insensitive).unwrap_or(&no_devices);

        // the DServer device is the server's own bookkeeping device and is
        // never removed
        if !options.update && !class_name.eq_ignore_ascii_case("dserver") {
            for (device_name, _) in current_devices.iter() {
                if desired_devices.lookup(device_name, options.case_insensitive).is_none() {
                    db.delete_device(device_name)?;
                }
            }
        }

        for (device_name, device) in desired_devices.iter() {
            let existing = current_devices.lookup(device_name, options.case_insensitive);
            if existing.is_none() {
                db.add_device(&DeviceInfo {
                    server: server.to_string(),
                    class: class_name.to_string(),
                    name: device_name.to_string(),
                })?;
            }
            let blank = DeviceConfig::default();
            update_device(db, device_name, existing.unwrap_or(&blank), device, options)?;
        }
    }
    Ok(())
}

/// Reconcile one device's properties, attribute properties and alias.
pub fn update_device(
    db: &mut dyn DatabaseClient,
    name: &str,
    current: &DeviceConfig,
    desired: &DeviceConfig,
    options: &ReconcileOptions,
) -> Result<()> {
    // a missing bag in the desired state leaves the database untouched;
    // an empty one removes everything removable
    if let Some(new_props) = &desired.properties {
        let no_props = Properties::new();
        let db_props = current.properties.as_ref().unwrap_or(&no_props);
        let (added, removed) = diff_properties(db_props, new_props, options.case_insensitive);
        if !options.update && !removed.is_empty() {
            db.delete_device_property(name, &removed)?;
        }
        if !added.is_empty() {
            db.put_device_property(name, &added)?;
        }
    }

    if let Some(new_props) = &desired.attribute_properties {
        let no_props = AttributeProperties::new();
        let db_props = current.attribute_properties.as_ref().unwrap_or(&no_props);
        let (added, removed) = diff_attribute_properties(
            db_props,
            new_props,
            options.case_insensitive,
            options.strict_attribute_properties,
        )?;
        if !options.update && !removed.is_empty() {
            db.delete_device_attribute_property(name, &removed)?;
        }
        if !added.is_empty() {
            db.put_device_attribute_property(name, &added)?;
        }
    }

    if let Some(alias) = &desired.alias {
        if current.alias.as_ref() != Some(alias) {
            db.put_device_alias(name, alias)?;
        }
    } else if !options.update
        && let Some(old_alias) = &current.alias
    {
        db.delete_device_alias(old_alias)?;
    }

    Ok(())
}

/// Reconcile one class's properties and attribute properties. Classes are
/// never created or deleted, only their property bags converge.
pub fn update_class(
    db: &mut dyn DatabaseClient,
    name: &str,
    current: &ClassConfig,
    desired: &ClassConfig,
    options: &ReconcileOptions,
) -> Result<()> {
    if let Some(new_props) = &desired.properties {
        let no_props = Properties::new();
        let db_props = current.properties.as_ref().unwrap_or(&no_props);
        let (added, removed) = diff_properties(db_props, new_props, options.case_insensitive);
        if !options.update && !removed.is_empty() {
            db.delete_class_property(name, &removed)?;
        }
        if !added.is_empty() {
            db.put_class_property(name, &added)?;
        }
    }

    if let Some(new_props) = &desired.attribute_properties {
        let no_props = AttributeProperties::new();
        let db_props = current.attribute_properties.as_ref().unwrap_or(&no_props);
        let (added, removed) = diff_attribute_properties(
            db_props,
            new_props,
            options.case_insensitive,
            options.strict_attribute_properties,
        )?;
        if !options.update && !removed.is_empty() {
            db.delete_class_attribute_property(name, &removed)?;
        }
        if !added.is_empty() {
            db.put_class_attribute_property(name, &added)?;
        }
    }

    Ok(())
}

/// Cross-reference every desired device against the device-name index of
/// the full current tree. A device registered under a different server
/// instance is a collision: reported, never fatal.
pub fn find_collisions(desired: &ConfigTree, current: &ConfigTree) -> Vec<Collision> {
    let mut collisions = Vec::new();
    for (server, instance, _, device, _) in desired.devices() {
        if let Some((old_server, old_instance, old_class, _)) = current.find_device(device) {
            let new_server = server_id(server, instance);
            let old_server = server_id(old_server, old_instance);
            if !old_server.eq_ignore_ascii_case(&new_server) {
                collisions.push(Collision {
                    device: device.to_string(),
                    class: old_class.to_string(),
                    old_server,
                    new_server,
                });
            }
        }
    }
    collisions
}

/// Server instances that a set of moves would leave without real devices:
/// everything left (if anything) is their own `dserver` bookkeeping device.
pub fn find_empty_servers(tree: &ConfigTree, moved_from: &[Collision]) -> Vec<String> {
    let mut empty = Vec::new();
    for collision in moved_from {
        let Some((server, instance)) = collision.old_server.split_once('/') else {
            continue;
        };
        let Some(classes) = tree.servers.get(server).and_then(|i| i.get(instance)) else {
            continue;
        };
        let only_dserver = classes.iter().all(|(class, _)| class.eq_ignore_ascii_case("dserver"));
        if only_dserver && !empty.contains(&collision.old_server) {
            empty.push(collision.old_server.clone());
        }
    }
    empty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::DbCall;
    use crate::database::CallRecorder;
    use pretty_assertions::assert_eq;

    fn options() -> ReconcileOptions {
        ReconcileOptions::default()
    }

    fn device_with_property(name: &str, value: &[&str]) -> DeviceConfig {
        let mut config = DeviceConfig::default();
        config
            .properties_mut()
            .insert(name, value.iter().map(ToString::to_string).collect::<Vec<_>>());
        config
    }

    fn classes(entries: &[(&str, &[(&str, DeviceConfig)])]) -> InstanceClasses {
        entries
            .iter()
            .map(|(class, devices)| {
                (
                    class.to_string(),
                    devices
                        .iter()
                        .map(|(name, config)| (name.to_string(), config.clone()))
                        .collect::<crate::tree::ClassDevices>(),
                )
            })
            .collect()
    }

    #[test]
    fn test_no_changes_records_nothing() {
        let state =
            classes(&[("TangoTest", &[("sys/tg_test/2", device_with_property("bepa", &["45"]))])]);
        let mut db = CallRecorder::new();
        update_server(&mut db, "TangoTest/test", &state, &state, &options()).unwrap();
        assert_eq!(db.into_calls(), vec![]);
    }

    #[test]
    fn test_new_device_added_before_properties() {
        let desired =
            classes(&[("TangoTest", &[("a/new/dev", device_with_property("test", &["hello"]))])]);
        let current = InstanceClasses::new();
        let mut db = CallRecorder::new();
        update_server(&mut db, "TangoTest/1", &desired, &current, &options()).unwrap();
        let calls = db.into_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            DbCall::AddDevice {
                info: DeviceInfo {
                    server: "TangoTest/1".into(),
                    class: "TangoTest".into(),
                    name: "a/new/dev".into(),
                }
            }
        );
        assert_eq!(calls[1].method(), "put_device_property");
    }

    #[test]
    fn test_missing_device_deleted_in_replace_mode() {
        let desired = classes(&[("TangoTest", &[])]);
        let current =
            classes(&[("TangoTest", &[("sys/tg_test/2", device_with_property("bepa", &["45"]))])]);
        let mut db = CallRecorder::new();
        update_server(&mut db, "TangoTest/test", &desired, &current, &options()).unwrap();
        assert_eq!(db.into_calls(), vec![DbCall::DeleteDevice { device: "sys/tg_test/2".into() }]);
    }

    #[test]
    fn test_missing_device_kept_in_update_mode() {
        let desired = classes(&[("TangoTest", &[])]);
        let current =
            classes(&[("TangoTest", &[("sys/tg_test/2", device_with_property("bepa", &["45"]))])]);
        let mut db = CallRecorder::new();
        let opts = ReconcileOptions { update: true, ..options() };
        update_server(&mut db, "TangoTest/test", &desired, &current, &opts).unwrap();
        assert_eq!(db.into_calls(), vec![]);
    }

    #[test]
    fn test_dserver_devices_never_deleted() {
        let desired = classes(&[("DServer", &[])]);
        let current =
            classes(&[("DServer", &[("dserver/tangotest/test", DeviceConfig::default())])]);
        let mut db = CallRecorder::new();
        update_server(&mut db, "TangoTest/test", &desired, &current, &options()).unwrap();
        assert_eq!(db.into_calls(), vec![]);
    }

    #[test]
    fn test_update_device_removes_missing_property() {
        let current = device_with_property("bepa", &["45"]);
        let mut desired = DeviceConfig::default();
        desired.properties_mut();
        let mut db = CallRecorder::new();
        update_device(&mut db, "sys/tg_test/2", &current, &desired, &options()).unwrap();
        let calls = db.into_calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            DbCall::DeleteDeviceProperty { device, properties } => {
                assert_eq!(device, "sys/tg_test/2");
                assert_eq!(properties.get("bepa"), Some(&vec!["45".to_string()]));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn test_update_device_ignores_db_when_bag_missing() {
        let current = device_with_property("bepa", &["45"]);
        let desired = DeviceConfig::default();
        let mut db = CallRecorder::new();
        update_device(&mut db, "sys/tg_test/2", &current, &desired, &options()).unwrap();
        assert_eq!(db.into_calls(), vec![]);
    }

    #[test]
    fn test_alias_changes() {
        let mut current = DeviceConfig::default();
        current.alias = Some("old".into());
        let mut desired = DeviceConfig::default();
        desired.alias = Some("new".into());

        let mut db = CallRecorder::new();
        update_device(&mut db, "a/b/c", &current, &desired, &options()).unwrap();
        assert_eq!(
            db.into_calls(),
            vec![DbCall::PutDeviceAlias { device: "a/b/c".into(), alias: "new".into() }]
        );

        // dropping the alias deletes it in replace mode only
        let dropped = DeviceConfig::default();
        let mut db = CallRecorder::new();
        update_device(&mut db, "a/b/c", &current, &dropped, &options()).unwrap();
        assert_eq!(db.into_calls(), vec![DbCall::DeleteDeviceAlias { alias: "old".into() }]);

        let mut db = CallRecorder::new();
        let opts = ReconcileOptions { update: true, ..options() };
        update_device(&mut db, "a/b/c", &current, &dropped, &opts).unwrap();
        assert_eq!(db.into_calls(), vec![]);
    }

    #[test]
    fn test_find_collisions_reports_moves() {
        let mut desired = ConfigTree::new();
        desired.ensure_device("NewServer", "1", "TangoTest", "sys/tg_test/1");
        let mut current = ConfigTree::new();
        current.ensure_device("OldServer", "2", "TangoTest", "SYS/TG_TEST/1");

        let collisions = find_collisions(&desired, &current);
        assert_eq!(
            collisions,
            vec![Collision {
                device: "sys/tg_test/1".into(),
                class: "TangoTest".into(),
                old_server: "OldServer/2".into(),
                new_server: "NewServer/1".into(),
            }]
        );

        // same server, different casing: not a collision
        let mut same = ConfigTree::new();
        same.ensure_device("oldserver", "2", "TangoTest", "sys/tg_test/1");
        assert_eq!(find_collisions(&same, &current), vec![]);
    }

    #[test]
    fn test_find_empty_servers() {
        let mut tree = ConfigTree::new();
        tree.ensure_device("Lonely", "1", "DServer", "dserver/lonely/1");
        tree.ensure_device("Busy", "1", "DServer", "dserver/busy/1");
        tree.ensure_device("Busy", "1", "TangoTest", "sys/tg_test/1");
        let moves = vec![
            Collision {
                device: "a/b/c".into(),
                class: "X".into(),
                old_server: "Lonely/1".into(),
                new_server: "Other/1".into(),
            },
            Collision {
                device: "d/e/f".into(),
                class: "X".into(),
                old_server: "Busy/1".into(),
                new_server: "Other/1".into(),
            },
        ];
        assert_eq!(find_empty_servers(&tree, &moves), vec!["Lonely/1".to_string()]);
    }
}
