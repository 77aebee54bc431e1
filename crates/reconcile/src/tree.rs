//! The configuration tree model.
//!
//! A configuration tree holds the desired or current state of a TANGO
//! database slice: servers → instances → classes → devices, plus a parallel
//! `classes` root for class-level properties. All names are matched
//! caselessly but keep the casing they were first written with, which is
//! what [`CaselessMap`] provides.
//!
//! Construction goes through the explicit `ensure_*` methods; plain reads
//! never create nodes, so an inspected-but-never-written path cannot leak
//! into serialized output as a phantom empty branch.

use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

use crate::error::{Error, Result};

/// A property value: always a list of lines, never a scalar.
pub type PropertyValue = Vec<String>;

/// Property name → value lines.
pub type Properties = CaselessMap<PropertyValue>;

/// Attribute name → property name → value lines.
pub type AttributeProperties = CaselessMap<Properties>;

/// Device name → device configuration.
pub type ClassDevices = CaselessMap<DeviceConfig>;

/// Class name → devices of that class.
pub type InstanceClasses = CaselessMap<ClassDevices>;

/// Instance name → classes of that instance.
pub type ServerInstances = CaselessMap<InstanceClasses>;

/// An ordered map with case-insensitive string keys.
///
/// Lookup, containment and removal ignore ASCII case. Iteration and
/// serialization yield keys in insertion order with the casing of the
/// *first* insertion; overwriting a value through a differently-cased key
/// keeps the original casing. Equality ignores key casing and order.
#[derive(Debug, Clone)]
pub struct CaselessMap<V> {
    entries: IndexMap<String, Slot<V>>,
}

#[derive(Debug, Clone)]
struct Slot<V> {
    key: String,
    value: V,
}

impl<V> CaselessMap<V> {
    pub fn new() -> Self {
        Self { entries: IndexMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a value, returning the previous one if the key (caselessly)
    /// already existed. The stored casing of an existing key is kept.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        match self.entries.entry(key.to_ascii_lowercase()) {
            indexmap::map::Entry::Occupied(mut slot) => {
                Some(std::mem::replace(&mut slot.get_mut().value, value))
            }
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(Slot { key, value });
                None
            }
        }
    }

    /// Caseless lookup.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(&key.to_ascii_lowercase()).map(|s| &s.value)
    }

    /// Lookup that also requires the stored casing to match exactly.
    pub fn get_exact(&self, key: &str) -> Option<&V> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .filter(|s| s.key == key)
            .map(|s| &s.value)
    }

    /// Caseless or exact lookup, selected by flag. This is how the
    /// case-sensitivity option is expressed over a single storage.
    pub fn lookup(&self, key: &str, case_insensitive: bool) -> Option<&V> {
        if case_insensitive { self.get(key) } else { self.get_exact(key) }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(&key.to_ascii_lowercase()).map(|s| &mut s.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// The casing the key was first inserted with.
    pub fn original_key(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_ascii_lowercase()).map(|s| s.key.as_str())
    }

    /// Caseless removal, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.shift_remove(&key.to_ascii_lowercase()).map(|s| s.value)
    }

    /// Get the value for a key, inserting a default first if missing.
    pub fn ensure(&mut self, key: &str) -> &mut V
    where
        V: Default,
    {
        &mut self
            .entries
            .entry(key.to_ascii_lowercase())
            .or_insert_with(|| Slot { key: key.to_string(), value: V::default() })
            .value
    }

    /// Iterate `(original_key, value)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.values().map(|s| (s.key.as_str(), &s.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|s| s.key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|s| &s.value)
    }
}

impl<V> Default for CaselessMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: PartialEq> PartialEq for CaselessMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, s)| other.entries.get(k).is_some_and(|o| o.value == s.value))
    }
}

impl<V: Eq> Eq for CaselessMap<V> {}

impl<S: Into<String>, V> FromIterator<(S, V)> for CaselessMap<V> {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<V: Serialize> Serialize for CaselessMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for CaselessMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CaselessVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for CaselessVisitor<V> {
            type Value = CaselessMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map with string keys")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut map = CaselessMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(CaselessVisitor(PhantomData))
    }
}

/// Configuration of one device: optional alias, properties and attribute
/// properties. An absent bag means "leave the database untouched"; a
/// present-but-empty bag means "remove everything removable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_properties: Option<AttributeProperties>,
}

impl DeviceConfig {
    pub fn properties_mut(&mut self) -> &mut Properties {
        self.properties.get_or_insert_with(Properties::new)
    }

    pub fn attribute_properties_mut(&mut self) -> &mut AttributeProperties {
        self.attribute_properties.get_or_insert_with(AttributeProperties::new)
    }
}

/// Class-level configuration: properties and attribute properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_properties: Option<AttributeProperties>,
}

impl ClassConfig {
    pub fn properties_mut(&mut self) -> &mut Properties {
        self.properties.get_or_insert_with(Properties::new)
    }

    pub fn attribute_properties_mut(&mut self) -> &mut AttributeProperties {
        self.attribute_properties.get_or_insert_with(AttributeProperties::new)
    }
}

/// A full configuration tree: the `servers` hierarchy plus the parallel
/// `classes` root. The two roots reconcile independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigTree {
    #[serde(default, skip_serializing_if = "CaselessMap::is_empty")]
    pub servers: CaselessMap<ServerInstances>,
    #[serde(default, skip_serializing_if = "CaselessMap::is_empty")]
    pub classes: CaselessMap<ClassConfig>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the device node at the given path.
    pub fn ensure_device(
        &mut self,
        server: &str,
        instance: &str,
        class: &str,
        device: &str,
    ) -> &mut DeviceConfig {
        self.servers.ensure(server).ensure(instance).ensure(class).ensure(device)
    }

    /// Get or create the class node with the given name.
    pub fn ensure_class(&mut self, class: &str) -> &mut ClassConfig {
        self.classes.ensure(class)
    }

    /// Iterate every device as `(server, instance, class, device, config)`.
    pub fn devices(&self) -> impl Iterator<Item = (&str, &str, &str, &str, &DeviceConfig)> {
        self.servers.iter().flat_map(|(server, instances)| {
            instances.iter().flat_map(move |(instance, classes)| {
                classes.iter().flat_map(move |(class, devices)| {
                    devices
                        .iter()
                        .map(move |(device, config)| (server, instance, class, device, config))
                })
            })
        })
    }

    /// Find a device by name anywhere in the tree (caseless).
    pub fn find_device(&self, name: &str) -> Option<(&str, &str, &str, &DeviceConfig)> {
        self.devices()
            .find(|(_, _, _, device, _)| device.eq_ignore_ascii_case(name))
            .map(|(server, instance, class, _, config)| (server, instance, class, config))
    }

    /// Remove a device by name from wherever it lives, pruning branches
    /// that become empty. Returns the old location and configuration.
    pub fn remove_device(&mut self, name: &str) -> Option<(String, String, String, DeviceConfig)> {
        let (server, instance, class) = self
            .devices()
            .find(|(_, _, _, device, _)| device.eq_ignore_ascii_case(name))
            .map(|(server, instance, class, _, _)| {
                (server.to_string(), instance.to_string(), class.to_string())
            })?;

        let instances = self.servers.get_mut(&server)?;
        let classes = instances.get_mut(&instance)?;
        let devices = classes.get_mut(&class)?;
        let config = devices.remove(name)?;
        if devices.is_empty() {
            classes.remove(&class);
        }
        if classes.is_empty() {
            instances.remove(&instance);
        }
        if self.servers.get(&server).is_some_and(CaselessMap::is_empty) {
            self.servers.remove(&server);
        }
        Some((server, instance, class, config))
    }
}

/// Join a server and instance name into the `Server/Instance` identifier
/// used by the database API.
pub fn server_id(server: &str, instance: &str) -> String {
    format!("{server}/{instance}")
}

/// Check that a device name has the `domain/family/member` shape.
pub fn validate_device_name(name: &str) -> Result<()> {
    let mut parts = name.split('/');
    let ok = parts.next().is_some_and(|p| !p.is_empty())
        && parts.next().is_some_and(|p| !p.is_empty())
        && parts.next().is_some_and(|p| !p.is_empty())
        && parts.next().is_none();
    if ok { Ok(()) } else { Err(Error::InvalidDeviceName(name.to_string())) }
}

/// Recursively merge one raw JSON object into another. Nested objects merge
/// key by key; anything else is overwritten by the incoming value.
pub fn merge_values(base: &mut Value, incoming: &Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, value) => {
            *base_slot = value.clone();
        }
    }
}

/// Coerce a raw JSON value into a list of strings, the only value shape a
/// property may have. Scalars become single-element lists.
pub fn string_list(value: &Value) -> Result<Vec<String>> {
    fn scalar(value: &Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(Error::InvalidConfig(format!(
                "property values must be strings or lists of strings, got: {other}"
            ))),
        }
    }
    match value {
        Value::Array(items) => items.iter().map(scalar).collect(),
        other => Ok(vec![scalar(other)?]),
    }
}

/// Merge with appending semantics: incoming values extend existing lists
/// (scalars are coerced to string lists first), incoming objects merge
/// recursively, and replacing an existing subtree with a scalar is an
/// [`Error::InvalidAssignment`].
pub fn merge_appending(base: &mut Value, incoming: &Value) -> Result<()> {
    let (Value::Object(base_map), Value::Object(incoming_map)) = (&mut *base, incoming) else {
        return Err(Error::InvalidConfig("appending merge requires objects at the top level".into()));
    };
    for (key, value) in incoming_map {
        match base_map.get_mut(key) {
            Some(existing @ Value::Object(_)) => {
                if value.is_object() {
                    merge_appending(existing, value)?;
                } else {
                    return Err(Error::InvalidAssignment { key: key.clone() });
                }
            }
            Some(Value::Array(items)) => {
                if value.is_object() {
                    return Err(Error::InvalidAssignment { key: key.clone() });
                }
                items.extend(string_list(value)?.into_iter().map(Value::String));
            }
            Some(other) => {
                return Err(Error::InvalidConfig(format!(
                    "unexpected scalar at '{key}': {other}"
                )));
            }
            None => {
                base_map.insert(key.clone(), appending_shape(value)?);
            }
        }
    }
    Ok(())
}

fn appending_shape(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                out.insert(key.clone(), appending_shape(value)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(Value::Array(string_list(other)?.into_iter().map(Value::String).collect())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_caseless_lookup() {
        let mut map = CaselessMap::new();
        map.insert("MyKey", 1);
        assert_eq!(map.get("mykey"), Some(&1));
        assert_eq!(map.get("MYKEY"), Some(&1));
        assert!(map.contains_key("myKEY"));
        assert_eq!(map.get("other"), None);
    }

    #[test]
    fn test_first_insertion_casing_wins() {
        let mut map = CaselessMap::new();
        map.insert("MyKey", 1);
        map.insert("MYKEY", 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("mykey"), Some(&2));
        assert_eq!(map.original_key("mykey"), Some("MyKey"));
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["MyKey"]);
    }

    #[test]
    fn test_exact_lookup() {
        let mut map = CaselessMap::new();
        map.insert("MyKey", 1);
        assert_eq!(map.get_exact("MyKey"), Some(&1));
        assert_eq!(map.get_exact("mykey"), None);
        assert_eq!(map.lookup("mykey", true), Some(&1));
        assert_eq!(map.lookup("mykey", false), None);
    }

    #[test]
    fn test_equality_ignores_casing_and_order() {
        let a: CaselessMap<i32> = [("Alpha", 1), ("Beta", 2)].into_iter().collect();
        let b: CaselessMap<i32> = [("beta", 2), ("ALPHA", 1)].into_iter().collect();
        assert_eq!(a, b);
        let c: CaselessMap<i32> = [("alpha", 3), ("beta", 2)].into_iter().collect();
        assert_ne!(a, c);
    }

    #[test]
    fn test_serialization_preserves_original_casing() {
        let mut map = CaselessMap::new();
        map.insert("MyKey", vec!["1".to_string()]);
        map.insert("MYKEY", vec!["2".to_string()]);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, json!({"MyKey": ["2"]}));
    }

    #[test]
    fn test_ensure_creates_path() {
        let mut tree = ConfigTree::new();
        tree.ensure_device("TangoTest", "test", "TangoTest", "sys/tg_test/1")
            .properties_mut()
            .insert("apa", vec!["1".to_string()]);
        let (server, instance, class, config) = tree.find_device("SYS/TG_TEST/1").unwrap();
        assert_eq!((server, instance, class), ("TangoTest", "test", "TangoTest"));
        assert_eq!(
            config.properties.as_ref().unwrap().get("apa"),
            Some(&vec!["1".to_string()])
        );
    }

    #[test]
    fn test_reads_do_not_create_branches() {
        let tree = ConfigTree::new();
        assert!(tree.find_device("a/b/c").is_none());
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json, json!({}));
    }

    #[test]
    fn test_remove_device_prunes_empty_branches() {
        let mut tree = ConfigTree::new();
        tree.ensure_device("TangoTest", "test", "TangoTest", "sys/tg_test/1");
        tree.ensure_device("TangoTest", "test", "TangoTest", "sys/tg_test/2");
        assert!(tree.remove_device("sys/tg_test/1").is_some());
        assert!(tree.find_device("sys/tg_test/2").is_some());
        assert!(tree.remove_device("sys/tg_test/2").is_some());
        assert!(tree.servers.is_empty());
        assert!(tree.remove_device("sys/tg_test/2").is_none());
    }

    #[test]
    fn test_validate_device_name() {
        assert!(validate_device_name("sys/tg_test/1").is_ok());
        assert!(validate_device_name("sys/tg_test").is_err());
        assert!(validate_device_name("a/b/c/d").is_err());
        assert!(validate_device_name("a//c").is_err());
    }

    #[test]
    fn test_merge_values_unions_subtrees() {
        let mut base = json!({"a": {"x": 1}, "b": 2});
        merge_values(&mut base, &json!({"a": {"y": 3}, "b": 4}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}, "b": 4}));
    }

    #[test]
    fn test_merge_appending_extends_lists() {
        let mut base = json!({"b": {"c": {"d": ["3"]}}});
        merge_appending(&mut base, &json!({"b": {"c": {"d": "4"}}})).unwrap();
        assert_eq!(base, json!({"b": {"c": {"d": ["3", "4"]}}}));
    }

    #[test]
    fn test_merge_appending_coerces_scalars() {
        let mut base = json!({});
        merge_appending(&mut base, &json!({"a": {"b": 1}})).unwrap();
        assert_eq!(base, json!({"a": {"b": ["1"]}}));
    }

    #[test]
    fn test_merge_appending_rejects_scalar_over_subtree() {
        let mut base = json!({"a": {"b": ["1"]}});
        let err = merge_appending(&mut base, &json!({"a": "scalar"})).unwrap_err();
        assert!(matches!(err, Error::InvalidAssignment { .. }));
    }

    #[test]
    fn test_config_tree_roundtrip() {
        let raw = json!({
            "servers": {
                "TangoTest": {
                    "test": {
                        "TangoTest": {
                            "sys/tg_test/1": {
                                "alias": "my_test",
                                "properties": {"bepa": ["45"]},
                                "attribute_properties": {
                                    "ampliz": {"min_value": ["100"]}
                                }
                            }
                        }
                    }
                }
            },
            "classes": {"TangoTest": {"properties": {"cepa": ["1", "2"]}}}
        });
        let tree: ConfigTree = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&tree).unwrap(), raw);
        let (_, _, _, config) = tree.find_device("sys/tg_test/1").unwrap();
        assert_eq!(config.alias.as_deref(), Some("my_test"));
    }
}
