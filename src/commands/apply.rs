//! The apply/diff flow.
//!
//! Load and normalize the config, filter it, compare it against the
//! database snapshot, report the computed calls, and in write mode replay
//! them into the snapshot. The call list is computed entirely up front;
//! if applying fails halfway the snapshot is simply not written and a
//! re-run recomputes a fresh list.

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use indicatif::ProgressBar;
use reconcile::{
    CLASSES_LEVELS, Collision, ConfigTree, DatabaseClient, InMemoryDatabase, ReconcileOptions,
    SERVERS_LEVELS, configure, dispatch, filter_config, find_collisions, find_empty_servers,
};
use serde_json::Value;
use std::collections::HashSet;
use std::io::Write as _;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use std::fs;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::exit_codes;
use crate::format;
use crate::output;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<u8> {
    let mut data = format::load_config(args.config.as_deref())?;
    format::clean_metadata(&mut data);
    if data.get("servers").is_none() && data.get("classes").is_none() {
        bail!("config has neither 'servers' nor 'classes'");
    }
    let mut data = format::normalize_config(&data)?;

    // filtering must happen before anything looks at the database
    apply_filters(&mut data, &args)?;

    if args.show_input {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(exit_codes::SUCCESS);
    }

    let desired = format::validate_config(
        &data,
        !args.no_validation,
        !args.no_strict_check && !args.no_validation,
    )?;
    let current = format::load_snapshot(&args.db_snapshot)?;

    let collisions = find_collisions(&desired, &current);

    let options = ReconcileOptions {
        update: args.update,
        case_insensitive: !args.case_sensitive,
        strict_attribute_properties: !args.no_strict_check,
    };
    let calls = configure(&desired, &current, &options)?;
    log::info!("computed {} database calls", calls.len());

    if !ctx.quiet {
        output::show_actions(&current, &calls);
    }
    if args.show_db {
        println!("{}", serde_json::to_string_pretty(&current)?);
    }
    if args.show_calls || ctx.verbose >= 2 {
        eprintln!("Tango database calls:");
        for call in &calls {
            eprintln!("{}", serde_json::to_string(call)?);
        }
    }
    report_collisions(&collisions);

    if calls.is_empty() {
        if !ctx.quiet {
            eprintln!();
            eprintln!("{}", "*** No changes needed in the Tango database ***".green());
        }
        return Ok(exit_codes::SUCCESS);
    }

    let mut emptied = Vec::new();
    let mut backup = None;
    if args.write {
        // keep the previous state around for a manual rollback
        backup = Some(save_backup(&current)?);
        let mut db = InMemoryDatabase::new(current.clone());
        let progress = if ctx.quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(calls.len() as u64)
        };
        for call in &calls {
            if args.sleep > 0.0 {
                thread::sleep(Duration::from_secs_f64(args.sleep));
            }
            dispatch(&mut db, call).with_context(|| format!("applying {}", call.method()))?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        // server instances holding nothing but their dserver device after
        // the moves above are dropped
        emptied = find_empty_servers(db.tree(), &collisions);
        for server in &emptied {
            db.delete_server(server)?;
        }

        let converged = db.into_tree();
        fs::write(&args.db_snapshot, serde_json::to_string_pretty(&converged)?)
            .with_context(|| format!("writing snapshot {}", args.db_snapshot.display()))?;
    }

    if !ctx.quiet {
        eprintln!();
        eprintln!("Summary:");
        for line in output::summarise_calls(&calls, &current) {
            eprintln!("{line}");
        }
        if !collisions.is_empty() {
            let servers: HashSet<&str> =
                collisions.iter().map(|c| c.old_server.as_str()).collect();
            eprintln!(
                "{}",
                format!("Move {} devices from {} servers.", collisions.len(), servers.len()).red()
            );
        }
        if !emptied.is_empty() {
            eprintln!("{}", format!("Removed {} empty servers.", emptied.len()).red());
        }
    }

    if args.write {
        eprintln!();
        eprintln!("{}", "*** Data was written to the Tango database snapshot ***".red());
        if let Some(path) = backup {
            eprintln!("The previous state was saved to {}", path.display());
        }
        Ok(exit_codes::CONFIG_APPLIED)
    } else {
        eprintln!();
        eprintln!(
            "{}",
            "*** Nothing was written to the Tango database (use --write) ***".yellow()
        );
        Ok(exit_codes::CONFIG_NOT_APPLIED)
    }
}

fn apply_filters(data: &mut Value, args: &ApplyArgs) -> Result<()> {
    let filters: &[(&Vec<String>, &str, &[(&str, usize)], bool)] = &[
        (&args.include, "servers", SERVERS_LEVELS, false),
        (&args.exclude, "servers", SERVERS_LEVELS, true),
        (&args.include_classes, "classes", CLASSES_LEVELS, false),
        (&args.exclude_classes, "classes", CLASSES_LEVELS, true),
    ];
    for &(patterns, key, levels, invert) in filters {
        if patterns.is_empty() {
            continue;
        }
        if let Some(subtree) = data.get(key) {
            let filtered = filter_config(subtree, patterns, levels, invert)?;
            if let Value::Object(map) = data {
                map.insert(key.to_string(), filtered);
            }
        }
    }
    Ok(())
}

fn report_collisions(collisions: &[Collision]) {
    for collision in collisions {
        eprintln!("{} {}", "MOVED (because of collision):".red(), collision.device);
        eprintln!("    Server: {} -> {}", collision.old_server, collision.new_server);
        eprintln!("    Class: {}", collision.class);
    }
}

fn save_backup(current: &ConfigTree) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("tangosync-")
        .suffix(".json")
        .tempfile()
        .context("creating backup file")?;
    file.write_all(serde_json::to_string_pretty(current)?.as_bytes())?;
    let (_, path) = file.keep().context("keeping backup file")?;
    Ok(path)
}
