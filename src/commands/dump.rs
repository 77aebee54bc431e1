//! Dump a database snapshot in config JSON format.
//!
//! Useful for putting the current state under version control, or as the
//! starting point for a desired-state file. Filters use the same
//! `term:regex` syntax as apply.

use anyhow::Result;
use reconcile::{SERVERS_LEVELS, filter_config};
use serde_json::Value;

use crate::Context;
use crate::cli::DumpArgs;
use crate::exit_codes;
use crate::format;

pub fn run(_ctx: &Context, args: DumpArgs) -> Result<u8> {
    let tree = format::load_snapshot(&args.db_snapshot)?;

    // going through Value sorts object keys, which keeps dumps diffable
    let mut data = serde_json::to_value(&tree)?;
    if let Value::Object(map) = &mut data {
        if !args.class_properties {
            map.remove("classes");
        }
        if !args.patterns.is_empty()
            && let Some(servers) = map.get("servers")
        {
            let filtered = filter_config(servers, &args.patterns, SERVERS_LEVELS, false)?;
            map.insert("servers".to_string(), filtered);
        }
    }

    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(exit_codes::SUCCESS)
}
