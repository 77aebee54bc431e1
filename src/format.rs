//! The configuration JSON file format.
//!
//! Input files may use the combined `Server/Instance` key form and scalar
//! property values; normalization brings them to the canonical nested
//! shape before anything else looks at them. Validation is the typed
//! deserialization into [`ConfigTree`] plus the device-name and strict
//! attribute-property checks.

use anyhow::{Context as _, Result, bail};
use reconcile::{
    ConfigTree, check_attribute_property, merge_values, string_list, validate_device_name,
};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;

/// Load the raw config JSON from a file, or stdin when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Value> {
    let text = match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => io::read_to_string(io::stdin()).context("reading config from stdin")?,
    };
    serde_json::from_str(&text).context("config is not valid JSON")
}

/// Strip the ignored top-level metadata keys (`_title`, `_source`, ...).
pub fn clean_metadata(data: &mut Value) {
    if let Value::Object(map) = data {
        map.retain(|key, _| !key.starts_with('_'));
    }
}

/// Bring raw input into canonical shape: combined `Server/Instance` keys
/// are split into nested form and property values are coerced to lists
/// of strings.
pub fn normalize_config(data: &Value) -> Result<Value> {
    let Value::Object(map) = data else {
        bail!("config must be a JSON object");
    };
    let mut out = Map::new();
    for (key, value) in map {
        match key.as_str() {
            "servers" => {
                out.insert("servers".into(), normalize_servers(value)?);
            }
            "classes" => {
                out.insert("classes".into(), normalize_classes(value)?);
            }
            other => bail!("unknown top-level key '{other}'"),
        }
    }
    Ok(Value::Object(out))
}

fn normalize_servers(value: &Value) -> Result<Value> {
    let Value::Object(map) = value else {
        bail!("'servers' must be an object");
    };
    let mut servers = Value::Object(Map::new());
    let mut add = |server: &str, instance: &str, classes: Value| {
        let mut instances = Map::new();
        instances.insert(instance.to_string(), classes);
        let mut wrapper = Map::new();
        wrapper.insert(server.to_string(), Value::Object(instances));
        merge_values(&mut servers, &Value::Object(wrapper));
    };
    for (server, below) in map {
        if let Some((name, instance)) = server.split_once('/') {
            // combined Server/Instance key: the next level is the classes
            if name.is_empty() || instance.is_empty() || instance.contains('/') {
                bail!("malformed server key '{server}': expected Server or Server/Instance");
            }
            add(name, instance, normalize_instance(server, below)?);
        } else {
            let Value::Object(instances) = below else {
                bail!("server '{server}' must hold an object of instances");
            };
            for (instance, classes) in instances {
                add(server, instance, normalize_instance(server, classes)?);
            }
        }
    }
    Ok(servers)
}

fn normalize_instance(server: &str, value: &Value) -> Result<Value> {
    let Value::Object(classes) = value else {
        bail!("instance under '{server}' must hold an object of classes");
    };
    let mut out = Map::new();
    for (class, devices) in classes {
        let Value::Object(device_map) = devices else {
            bail!("class '{class}' under '{server}' must hold an object of devices");
        };
        let mut devices_out = Map::new();
        for (device, config) in device_map {
            devices_out.insert(device.clone(), normalize_device(device, config)?);
        }
        out.insert(class.clone(), Value::Object(devices_out));
    }
    Ok(Value::Object(out))
}

fn normalize_device(device: &str, value: &Value) -> Result<Value> {
    let Value::Object(config) = value else {
        bail!("device '{device}' must hold an object");
    };
    let mut out = Map::new();
    for (key, value) in config {
        match key.as_str() {
            "properties" => {
                out.insert(key.clone(), normalize_bag(value)?);
            }
            "attribute_properties" => {
                out.insert(key.clone(), normalize_attribute_bag(value)?);
            }
            // anything else (alias included) passes through to validation
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(Value::Object(out))
}

fn normalize_classes(value: &Value) -> Result<Value> {
    let Value::Object(classes) = value else {
        bail!("'classes' must be an object");
    };
    let mut out = Map::new();
    for (class, config) in classes {
        let Value::Object(config_map) = config else {
            bail!("class '{class}' must hold an object");
        };
        let mut class_out = Map::new();
        for (key, value) in config_map {
            match key.as_str() {
                "properties" => {
                    class_out.insert(key.clone(), normalize_bag(value)?);
                }
                "attribute_properties" => {
                    class_out.insert(key.clone(), normalize_attribute_bag(value)?);
                }
                _ => {
                    class_out.insert(key.clone(), value.clone());
                }
            }
        }
        out.insert(class.clone(), Value::Object(class_out));
    }
    Ok(Value::Object(out))
}

fn normalize_bag(value: &Value) -> Result<Value> {
    let Value::Object(bag) = value else {
        bail!("a property bag must be an object");
    };
    let mut out = Map::new();
    for (name, value) in bag {
        let lines = string_list(value)?;
        out.insert(name.clone(), Value::Array(lines.into_iter().map(Value::String).collect()));
    }
    Ok(Value::Object(out))
}

fn normalize_attribute_bag(value: &Value) -> Result<Value> {
    let Value::Object(attributes) = value else {
        bail!("'attribute_properties' must be an object");
    };
    let mut out = Map::new();
    for (attribute, bag) in attributes {
        out.insert(attribute.clone(), normalize_bag(bag)?);
    }
    Ok(Value::Object(out))
}

/// Turn normalized raw data into a typed tree, optionally checking device
/// name shapes and strict attribute property names. Failures here abort
/// the run before any database access.
pub fn validate_config(data: &Value, check_names: bool, strict_attrs: bool) -> Result<ConfigTree> {
    let tree: ConfigTree = serde_json::from_value(data.clone())
        .context("config does not match the expected structure")?;

    if check_names {
        for (_, _, _, device, _) in tree.devices() {
            validate_device_name(device)?;
        }
    }
    if strict_attrs {
        for (_, _, _, _, config) in tree.devices() {
            check_attribute_names(config.attribute_properties.as_ref())?;
        }
        for (_, config) in tree.classes.iter() {
            check_attribute_names(config.attribute_properties.as_ref())?;
        }
    }
    Ok(tree)
}

fn check_attribute_names(attributes: Option<&reconcile::AttributeProperties>) -> Result<()> {
    if let Some(attributes) = attributes {
        for (attribute, bag) in attributes.iter() {
            for (name, _) in bag.iter() {
                check_attribute_property(attribute, name)?;
            }
        }
    }
    Ok(())
}

/// Load a database snapshot file as a typed tree.
pub fn load_snapshot(path: &Path) -> Result<ConfigTree> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let mut data: Value =
        serde_json::from_str(&text).context("snapshot is not valid JSON")?;
    clean_metadata(&mut data);
    let data = normalize_config(&data)?;
    serde_json::from_value(data).context("snapshot does not match the expected structure")
}
