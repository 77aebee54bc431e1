//! Property diffing.
//!
//! Computes the added/changed and removed sets for one parent's property
//! bag. The same algorithm covers device properties, class properties and
//! (one level deeper) device/class attribute properties; the caller turns
//! the two sets into at most one put call and at most one delete call.

use crate::error::{Error, Result};
use crate::tree::{AttributeProperties, Properties};

/// Properties the database framework manages for devices. These are never
/// deleted by absence from the desired state, only by an explicit `[]`.
pub const PROTECTED_PROPERTIES: &[&str] = &["polled_attr", "logging_level", "logging_target"];

/// The standard attribute configuration properties. In strict mode these
/// (plus `_`-prefixed names) are the only attribute property names accepted.
pub const SPECIAL_ATTRIBUTE_PROPERTIES: &[&str] = &[
    "label",
    "format",
    "unit",
    "standard_unit",
    "display_unit",
    "min_value",
    "min_alarm",
    "min_warning",
    "max_value",
    "max_alarm",
    "max_warning",
    "delta_t",
    "delta_val",
    "abs_change",
    "rel_change",
    "event_period",
    "archive_abs_change",
    "archive_rel_change",
    "archive_period",
    "description",
    "mode",
    // memorized attribute values go here
    "__value",
    "__value_ts",
];

/// Whether a property needs special treatment. Protected properties are
/// not removed when missing from the desired state, but may be overwritten.
pub fn is_protected(name: &str, attribute: bool) -> bool {
    if attribute {
        name.starts_with('_') || SPECIAL_ATTRIBUTE_PROPERTIES.contains(&name)
    } else {
        name.starts_with('_') || PROTECTED_PROPERTIES.contains(&name)
    }
}

/// Validate an attribute property name against the standard set.
pub fn check_attribute_property(attribute: &str, property: &str) -> Result<()> {
    if property.starts_with('_') || SPECIAL_ATTRIBUTE_PROPERTIES.contains(&property) {
        Ok(())
    } else {
        Err(Error::UnknownAttributeProperty {
            attribute: attribute.to_string(),
            property: property.to_string(),
        })
    }
}

/// Compute `(added, removed)` for a plain property bag.
///
/// A property is added when its desired value is non-empty and differs from
/// the database value (order-sensitive line comparison). It is removed when
/// the database has it and the desired state either omits it (unless
/// protected) or explicitly sets it to `[]`. Removed entries carry the
/// database value they had.
pub fn diff_properties(
    db_props: &Properties,
    new_props: &Properties,
    case_insensitive: bool,
) -> (Properties, Properties) {
    let mut added = Properties::new();
    for (name, value) in new_props.iter() {
        let old = db_props.lookup(name, case_insensitive);
        if !value.is_empty() && old != Some(value) {
            added.insert(name, value.clone());
        }
    }

    let mut removed = Properties::new();
    for (name, old_value) in db_props.iter() {
        match new_props.lookup(name, case_insensitive) {
            None if !is_protected(name, false) => {
                removed.insert(name, old_value.clone());
            }
            // an explicit empty list forces removal of protected properties
            Some(value) if value.is_empty() => {
                removed.insert(name, old_value.clone());
            }
            _ => {}
        }
    }

    (added, removed)
}

/// Compute `(added, removed)` for an attribute property bag, going one
/// level deeper than [`diff_properties`]: each attribute holds its own bag.
///
/// In strict mode every desired property name is validated against the
/// standard set up front; an unknown name fails the whole computation.
/// Removed entries carry the database value keyed by both attribute and
/// property name.
pub fn diff_attribute_properties(
    db_props: &AttributeProperties,
    new_props: &AttributeProperties,
    case_insensitive: bool,
    strict: bool,
) -> Result<(AttributeProperties, AttributeProperties)> {
    if strict {
        for (attribute, props) in new_props.iter() {
            for (property, _) in props.iter() {
                check_attribute_property(attribute, property)?;
            }
        }
    }

    let mut added = AttributeProperties::new();
    for (attribute, props) in new_props.iter() {
        for (property, value) in props.iter() {
            let old = db_props
                .lookup(attribute, case_insensitive)
                .and_then(|bag| bag.lookup(property, case_insensitive));
            if !value.is_empty() && old != Some(value) {
                added.ensure(attribute).insert(property, value.clone());
            }
        }
    }

    let mut removed = AttributeProperties::new();
    for (attribute, props) in db_props.iter() {
        for (property, old_value) in props.iter() {
            let new = new_props
                .lookup(attribute, case_insensitive)
                .and_then(|bag| bag.lookup(property, case_insensitive));
            match new {
                None if !is_protected(property, true) => {
                    removed.ensure(attribute).insert(property, old_value.clone());
                }
                Some(value) if value.is_empty() => {
                    removed.ensure(attribute).insert(property, old_value.clone());
                }
                _ => {}
            }
        }
    }

    Ok((added, removed))
}
