//! Regex filtering of raw configuration trees.
//!
//! Filters run on the raw JSON value, before it is turned into a typed
//! tree, and select whole subtrees by matching keys at a named depth.
//! Inclusive filters union their results; exclusive filters narrow the
//! result of the previous one. Reconciliation must only ever see the
//! filtered tree, so a bad filter aborts before anything else happens.

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::tree::merge_values;

/// Filter terms for the `servers` tree (nested server → instance form).
pub const SERVERS_LEVELS: &[(&str, usize)] =
    &[("server", 0), ("instance", 1), ("class", 2), ("device", 3), ("property", 5)];

/// Filter terms for the `classes` tree.
pub const CLASSES_LEVELS: &[(&str, usize)] = &[("class", 0), ("property", 2)];

/// Apply a list of `term:regex` filters to a raw tree.
///
/// With `invert` false, the result is the union of all matching subtrees;
/// with `invert` true, each filter strips its matches from the result of
/// the previous one. Regexes are case-insensitive and anchored at the
/// start of the key.
pub fn filter_config(
    data: &Value,
    filters: &[String],
    levels: &[(&str, usize)],
    invert: bool,
) -> Result<Value> {
    let mut filtered = if invert { data.clone() } else { Value::Object(Map::new()) };

    for filter in filters {
        let Some((term, pattern)) = filter.split_once(':') else {
            return Err(Error::InvalidFilter {
                filter: filter.clone(),
                reason: "should be '<term>:<regex>'".into(),
            });
        };

        // "server:name/instance" selects specific instances of a server
        if term == "server" && pattern.contains('/') {
            let (server_pattern, instance_pattern) = pattern.split_once('/').unwrap_or_default();
            let server_re = compile(filter, server_pattern)?;
            let instance_re = compile(filter, instance_pattern)?;
            filter_server_instance(&mut filtered, data, &server_re, &instance_re, invert);
            continue;
        }

        let Some(depth) = levels.iter().find(|(t, _)| *t == term).map(|(_, d)| *d) else {
            let known =
                levels.iter().map(|(t, _)| *t).collect::<Vec<_>>().join(", ");
            return Err(Error::InvalidFilter {
                filter: filter.clone(),
                reason: format!("term should be one of: {known}"),
            });
        };
        let pattern = compile(filter, pattern)?;

        if invert {
            filtered = filter_nested(&filtered, &pattern, depth, true)
                .unwrap_or_else(|| Value::Object(Map::new()));
        } else if let Some(matched) = filter_nested(data, &pattern, depth, false) {
            merge_values(&mut filtered, &matched);
        }
    }

    Ok(filtered)
}

fn compile(filter: &str, pattern: &str) -> Result<Regex> {
    // anchored, like a match from the start of the key
    RegexBuilder::new(&format!("^(?:{pattern})"))
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::InvalidFilter {
            filter: filter.to_string(),
            reason: format!("bad regular expression: {e}"),
        })
}

/// Keep (or drop) the subtrees whose key matches the pattern at `depth`
/// levels below `node`. Returns `None` when nothing is left.
fn filter_nested(node: &Value, pattern: &Regex, depth: usize, invert: bool) -> Option<Value> {
    let Value::Object(map) = node else {
        // a leaf above the target depth has nothing to match against;
        // excluding keeps it, including drops it
        return invert.then(|| node.clone());
    };
    let mut kept = Map::new();
    if depth == 0 {
        for (key, value) in map {
            if pattern.is_match(key) != invert {
                kept.insert(key.clone(), value.clone());
            }
        }
    } else {
        for (key, value) in map {
            if let Some(child) = filter_nested(value, pattern, depth - 1, invert) {
                kept.insert(key.clone(), child);
            }
        }
    }
    (!kept.is_empty()).then(|| Value::Object(kept))
}

fn filter_server_instance(
    filtered: &mut Value,
    data: &Value,
    server_re: &Regex,
    instance_re: &Regex,
    invert: bool,
) {
    if invert {
        let Value::Object(map) = filtered else { return };
        let mut emptied = Vec::new();
        for (server, instances) in map.iter_mut() {
            if !server_re.is_match(server) {
                continue;
            }
            if let Value::Object(instance_map) = instances {
                instance_map.retain(|instance, _| !instance_re.is_match(instance));
                if instance_map.is_empty() {
                    emptied.push(server.clone());
                }
            }
        }
        let Value::Object(map) = filtered else { return };
        for server in emptied {
            map.remove(&server);
        }
    } else {
        let Value::Object(source) = data else { return };
        let mut matched = Map::new();
        for (server, instances) in source {
            if !server_re.is_match(server) {
                continue;
            }
            if let Some(kept) = filter_nested(instances, instance_re, 0, false) {
                matched.insert(server.clone(), kept);
            }
        }
        if !matched.is_empty() {
            merge_values(filtered, &Value::Object(matched));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn servers() -> Value {
        json!({
            "TangoTest": {
                "test": {
                    "TangoTest": {
                        "sys/tg_test/1": {"properties": {"apa": ["1"]}},
                        "sys/tg_test/2": {"properties": {"bepa": ["2"]}}
                    }
                },
                "other": {
                    "TangoTest": {
                        "sys/tg_test/3": {}
                    }
                }
            },
            "Maggie": {
                "1": {
                    "Magnet": {"r3/mag/1": {}}
                }
            }
        })
    }

    fn strings(filters: &[&str]) -> Vec<String> {
        filters.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_include_server() {
        let result =
            filter_config(&servers(), &strings(&["server:Maggie"]), SERVERS_LEVELS, false)
                .unwrap();
        assert_eq!(result, json!({"Maggie": {"1": {"Magnet": {"r3/mag/1": {}}}}}));
    }

    #[test]
    fn test_include_matches_from_key_start() {
        let result =
            filter_config(&servers(), &strings(&["server:Tango"]), SERVERS_LEVELS, false).unwrap();
        assert!(result.get("TangoTest").is_some());
        let none =
            filter_config(&servers(), &strings(&["server:angoTest"]), SERVERS_LEVELS, false)
                .unwrap();
        assert_eq!(none, json!({}));
    }

    #[test]
    fn test_include_device_keeps_enclosing_structure() {
        let result =
            filter_config(&servers(), &strings(&["device:sys/tg_test/2"]), SERVERS_LEVELS, false)
                .unwrap();
        assert_eq!(
            result,
            json!({"TangoTest": {"test": {"TangoTest": {"sys/tg_test/2": {"properties": {"bepa": ["2"]}}}}}})
        );
    }

    #[test]
    fn test_inclusive_filters_union() {
        let result = filter_config(
            &servers(),
            &strings(&["device:sys/tg_test/1", "device:sys/tg_test/3"]),
            SERVERS_LEVELS,
            false,
        )
        .unwrap();
        assert!(result["TangoTest"]["test"]["TangoTest"].get("sys/tg_test/1").is_some());
        assert!(result["TangoTest"]["other"]["TangoTest"].get("sys/tg_test/3").is_some());
        assert!(result["TangoTest"]["test"]["TangoTest"].get("sys/tg_test/2").is_none());
    }

    #[test]
    fn test_exclusive_filters_narrow() {
        let result = filter_config(
            &servers(),
            &strings(&["server:Maggie", "device:sys/tg_test/1"]),
            SERVERS_LEVELS,
            true,
        )
        .unwrap();
        assert!(result.get("Maggie").is_none());
        assert!(result["TangoTest"]["test"]["TangoTest"].get("sys/tg_test/1").is_none());
        assert!(result["TangoTest"]["test"]["TangoTest"].get("sys/tg_test/2").is_some());
    }

    #[test]
    fn test_server_instance_form() {
        let result =
            filter_config(&servers(), &strings(&["server:TangoTest/test"]), SERVERS_LEVELS, false)
                .unwrap();
        assert!(result["TangoTest"].get("test").is_some());
        assert!(result["TangoTest"].get("other").is_none());

        let excluded =
            filter_config(&servers(), &strings(&["server:TangoTest/test"]), SERVERS_LEVELS, true)
                .unwrap();
        assert!(excluded["TangoTest"].get("test").is_none());
        assert!(excluded["TangoTest"].get("other").is_some());
    }

    #[test]
    fn test_filters_are_case_insensitive() {
        let result =
            filter_config(&servers(), &strings(&["server:maggie"]), SERVERS_LEVELS, false)
                .unwrap();
        assert!(result.get("Maggie").is_some());
    }

    #[test]
    fn test_class_levels() {
        let classes = json!({
            "TangoTest": {"properties": {"cepa": ["1"], "depa": ["2"]}},
            "Magnet": {"properties": {"cepa": ["3"]}}
        });
        let result =
            filter_config(&classes, &strings(&["class:Magnet"]), CLASSES_LEVELS, false).unwrap();
        assert_eq!(result, json!({"Magnet": {"properties": {"cepa": ["3"]}}}));

        let props =
            filter_config(&classes, &strings(&["property:depa"]), CLASSES_LEVELS, false).unwrap();
        assert_eq!(props, json!({"TangoTest": {"properties": {"depa": ["2"]}}}));
    }

    #[test]
    fn test_bad_filters_are_rejected() {
        let missing_colon =
            filter_config(&servers(), &strings(&["serverTango"]), SERVERS_LEVELS, false);
        assert!(matches!(missing_colon, Err(Error::InvalidFilter { .. })));

        let unknown_term =
            filter_config(&servers(), &strings(&["frobnicate:x"]), SERVERS_LEVELS, false);
        assert!(matches!(unknown_term, Err(Error::InvalidFilter { .. })));

        let bad_regex = filter_config(&servers(), &strings(&["server:["]), SERVERS_LEVELS, false);
        assert!(matches!(bad_regex, Err(Error::InvalidFilter { .. })));
    }
}
