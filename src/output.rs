//! Colorized reporting of computed database calls.
//!
//! The call list is grouped per device and per class before printing, so
//! related changes read together. Changed multi-line property values are
//! rendered as line diffs.

use colored::Colorize;
use reconcile::{AttributeProperties, ConfigTree, DbCall, Properties};
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, HashMap, HashSet};

const MAX_VALUE_LINES: usize = 10;

#[derive(Default)]
struct ValueChange {
    old: Option<Vec<String>>,
    new: Option<Vec<String>>,
}

#[derive(Default)]
struct EntityChanges {
    /// `(Server/Instance, class)` when known
    location: Option<(String, String)>,
    added: bool,
    deleted: bool,
    alias_added: Option<String>,
    alias_removed: Option<String>,
    properties: BTreeMap<String, ValueChange>,
    attribute_properties: BTreeMap<String, BTreeMap<String, ValueChange>>,
}

fn device_properties<'a>(tree: &'a ConfigTree, device: &str) -> Option<&'a Properties> {
    tree.find_device(device).and_then(|(_, _, _, config)| config.properties.as_ref())
}

fn device_attributes<'a>(tree: &'a ConfigTree, device: &str) -> Option<&'a AttributeProperties> {
    tree.find_device(device).and_then(|(_, _, _, config)| config.attribute_properties.as_ref())
}

fn record_puts(
    changes: &mut BTreeMap<String, ValueChange>,
    old_bag: Option<&Properties>,
    properties: &Properties,
) {
    for (name, value) in properties.iter() {
        let slot = changes.entry(name.to_string()).or_default();
        slot.new = Some(value.clone());
        if slot.old.is_none() {
            slot.old = old_bag.and_then(|bag| bag.get(name)).cloned();
        }
    }
}

fn record_deletes(changes: &mut BTreeMap<String, ValueChange>, properties: &Properties) {
    for (name, value) in properties.iter() {
        changes.entry(name.to_string()).or_default().old = Some(value.clone());
    }
}

/// Print a human readable list of the changes a call list would make,
/// grouped per device and per class.
pub fn show_actions(current: &ConfigTree, calls: &[DbCall]) {
    let mut devices: BTreeMap<String, EntityChanges> = BTreeMap::new();
    let mut classes: BTreeMap<String, EntityChanges> = BTreeMap::new();
    let mut removed_servers: Vec<String> = Vec::new();

    for call in calls {
        match call {
            DbCall::AddDevice { info } => {
                let entry = devices.entry(info.name.clone()).or_default();
                entry.added = true;
                entry.location = Some((info.server.clone(), info.class.clone()));
            }
            DbCall::DeleteDevice { device } => {
                devices.entry(device.clone()).or_default().deleted = true;
            }
            DbCall::PutDeviceProperty { device, properties } => {
                let old = device_properties(current, device);
                record_puts(&mut devices.entry(device.clone()).or_default().properties, old, properties);
            }
            DbCall::DeleteDeviceProperty { device, properties } => {
                record_deletes(&mut devices.entry(device.clone()).or_default().properties, properties);
            }
            DbCall::PutDeviceAttributeProperty { device, attributes } => {
                let old = device_attributes(current, device);
                let entry = devices.entry(device.clone()).or_default();
                for (attribute, bag) in attributes.iter() {
                    record_puts(
                        entry.attribute_properties.entry(attribute.to_string()).or_default(),
                        old.and_then(|attrs| attrs.get(attribute)),
                        bag,
                    );
                }
            }
            DbCall::DeleteDeviceAttributeProperty { device, attributes } => {
                let entry = devices.entry(device.clone()).or_default();
                for (attribute, bag) in attributes.iter() {
                    record_deletes(
                        entry.attribute_properties.entry(attribute.to_string()).or_default(),
                        bag,
                    );
                }
            }
            DbCall::PutClassProperty { class, properties } => {
                let old = current.classes.get(class).and_then(|c| c.properties.as_ref());
                record_puts(&mut classes.entry(class.clone()).or_default().properties, old, properties);
            }
            DbCall::DeleteClassProperty { class, properties } => {
                record_deletes(&mut classes.entry(class.clone()).or_default().properties, properties);
            }
            DbCall::PutClassAttributeProperty { class, attributes } => {
                let old = current.classes.get(class).and_then(|c| c.attribute_properties.as_ref());
                let entry = classes.entry(class.clone()).or_default();
                for (attribute, bag) in attributes.iter() {
                    record_puts(
                        entry.attribute_properties.entry(attribute.to_string()).or_default(),
                        old.and_then(|attrs| attrs.get(attribute)),
                        bag,
                    );
                }
            }
            DbCall::DeleteClassAttributeProperty { class, attributes } => {
                let entry = classes.entry(class.clone()).or_default();
                for (attribute, bag) in attributes.iter() {
                    record_deletes(
                        entry.attribute_properties.entry(attribute.to_string()).or_default(),
                        bag,
                    );
                }
            }
            DbCall::PutDeviceAlias { device, alias } => {
                devices.entry(device.clone()).or_default().alias_added = Some(alias.clone());
            }
            DbCall::DeleteDeviceAlias { alias } => {
                // the alias belongs to whichever device currently holds it
                let owner = current
                    .devices()
                    .find(|(_, _, _, _, config)| config.alias.as_deref() == Some(alias))
                    .map(|(_, _, _, device, _)| device.to_string())
                    .unwrap_or_else(|| alias.clone());
                devices.entry(owner).or_default().alias_removed = Some(alias.clone());
            }
            DbCall::DeleteServer { server } => removed_servers.push(server.clone()),
        }
    }

    for (name, changes) in &mut devices {
        if changes.location.is_none() {
            changes.location = current
                .find_device(name)
                .map(|(server, instance, class, _)| (format!("{server}/{instance}"), class.to_string()));
        }
        print_entity("Device", name, changes);
    }
    for (name, changes) in &classes {
        print_entity("Class", name, changes);
    }
    for server in &removed_servers {
        println!("{}", format!("Remove server: {server}").red());
    }
}

fn print_entity(kind: &str, name: &str, changes: &EntityChanges) {
    println!();
    let header = format!("{kind}: {name}");
    if changes.added {
        println!("{} {}", header.bold(), "(new)".green());
    } else if changes.deleted {
        println!("{} {}", header.bold(), "(removed)".red());
    } else {
        println!("{}", header.bold());
    }
    if let Some((server, class)) = &changes.location {
        println!("  Server: {server}  Class: {class}");
    }
    if let Some(alias) = &changes.alias_added {
        println!("  {} {}", "+ alias".green(), alias.green());
    }
    if let Some(alias) = &changes.alias_removed {
        println!("  {} {}", "- alias".red(), alias.red());
    }
    if !changes.properties.is_empty() {
        println!("  Properties:");
        print_changes(&changes.properties, "    ");
    }
    if !changes.attribute_properties.is_empty() {
        println!("  Attribute properties:");
        for (attribute, bag) in &changes.attribute_properties {
            println!("    {attribute}");
            print_changes(bag, "      ");
        }
    }
}

fn print_changes(changes: &BTreeMap<String, ValueChange>, indentation: &str) {
    for (name, change) in changes {
        match (&change.old, &change.new) {
            (None, Some(new)) => {
                println!("{}{}", indentation, format!("+ {name}").green());
                print_value(new, indentation, |line| line.green().to_string());
            }
            (Some(old), None) => {
                println!("{}{}", indentation, format!("- {name}").red());
                print_value(old, indentation, |line| line.red().to_string());
            }
            (Some(old), Some(new)) => {
                println!("{}{}", indentation, format!("~ {name}").yellow());
                print_value_diff(old, new, indentation);
            }
            (None, None) => {}
        }
    }
}

fn print_value(value: &[String], indentation: &str, paint: impl Fn(&str) -> String) {
    for line in value.iter().take(MAX_VALUE_LINES) {
        println!("{indentation}    {}", paint(line));
    }
    if value.len() > MAX_VALUE_LINES {
        println!("{indentation}    ... [{} lines]", value.len() - MAX_VALUE_LINES);
    }
}

fn print_value_diff(old: &[String], new: &[String], indentation: &str) {
    let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
    let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();
    let diff = TextDiff::from_slices(&old_refs, &new_refs);
    for change in diff.iter_all_changes() {
        let line = change.value();
        match change.tag() {
            ChangeTag::Delete => println!("{indentation}    {}", format!("-{line}").red()),
            ChangeTag::Insert => println!("{indentation}    {}", format!("+{line}").green()),
            ChangeTag::Equal => println!("{indentation}     {}", line.dimmed()),
        }
    }
}

/// A brief colored summary of the operations performed by a call list.
pub fn summarise_calls(calls: &[DbCall], current: &ConfigTree) -> Vec<String> {
    let current_servers: HashSet<String> = current
        .servers
        .iter()
        .flat_map(|(server, instances)| {
            instances.iter().map(move |(instance, _)| format!("{server}/{instance}").to_lowercase())
        })
        .collect();

    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let mut devices: HashMap<&'static str, HashSet<String>> = HashMap::new();
    let mut add_servers: HashSet<String> = HashSet::new();
    let mut new_servers: HashSet<String> = HashSet::new();

    for call in calls {
        let n = match call {
            DbCall::AddDevice { info } => {
                add_servers.insert(info.server.clone());
                if !current_servers.contains(&info.server.to_lowercase()) {
                    new_servers.insert(info.server.clone());
                }
                1
            }
            DbCall::PutDeviceProperty { device, properties }
            | DbCall::DeleteDeviceProperty { device, properties } => {
                devices.entry(call.method()).or_default().insert(device.to_uppercase());
                properties.len()
            }
            DbCall::PutDeviceAttributeProperty { device, attributes }
            | DbCall::DeleteDeviceAttributeProperty { device, attributes } => {
                devices.entry(call.method()).or_default().insert(device.to_uppercase());
                attributes.values().map(reconcile::Properties::len).sum()
            }
            DbCall::PutClassProperty { properties, .. }
            | DbCall::DeleteClassProperty { properties, .. } => properties.len(),
            DbCall::PutClassAttributeProperty { attributes, .. }
            | DbCall::DeleteClassAttributeProperty { attributes, .. } => {
                attributes.values().map(reconcile::Properties::len).sum()
            }
            _ => 1,
        };
        *counts.entry(call.method()).or_default() += n;
    }

    const METHOD_ORDER: &[&str] = &[
        "add_device",
        "delete_device",
        "put_device_property",
        "delete_device_property",
        "put_device_attribute_property",
        "delete_device_attribute_property",
        "put_class_property",
        "delete_class_property",
        "put_class_attribute_property",
        "delete_class_attribute_property",
        "put_device_alias",
        "delete_device_alias",
        "delete_server",
    ];

    let device_count = |method: &str| devices.get(method).map_or(0, HashSet::len);

    let mut summary = Vec::new();
    if !new_servers.is_empty() {
        summary.push(format!("Add {} servers.", new_servers.len()).green().to_string());
    }
    for method in METHOD_ORDER {
        let Some(&n) = counts.get(method) else { continue };
        let line = match *method {
            "add_device" => {
                format!("Add {n} devices to {} servers.", add_servers.len()).green().to_string()
            }
            "delete_device" => format!("Delete {n} devices.").red().to_string(),
            "put_device_property" => {
                format!("Add/change {n} device properties in {} devices.", device_count(method))
                    .yellow()
                    .to_string()
            }
            "delete_device_property" => {
                format!("Delete {n} device properties from {} devices.", device_count(method))
                    .red()
                    .to_string()
            }
            "put_device_attribute_property" => format!(
                "Add/change {n} device attribute properties in {} devices.",
                device_count(method)
            )
            .yellow()
            .to_string(),
            "delete_device_attribute_property" => format!(
                "Delete {n} device attribute properties from {} devices.",
                device_count(method)
            )
            .red()
            .to_string(),
            "put_class_property" => {
                format!("Add/change {n} class properties.").yellow().to_string()
            }
            "delete_class_property" => format!("Delete {n} class properties.").red().to_string(),
            "put_class_attribute_property" => {
                format!("Add/change {n} class attribute properties.").yellow().to_string()
            }
            "delete_class_attribute_property" => {
                format!("Delete {n} class attribute properties.").red().to_string()
            }
            "put_device_alias" => format!("Add/change {n} device aliases.").green().to_string(),
            "delete_device_alias" => format!("Delete {n} device aliases.").red().to_string(),
            "delete_server" => format!("Remove {n} empty servers.").red().to_string(),
            _ => continue,
        };
        summary.push(line);
    }
    summary
}
