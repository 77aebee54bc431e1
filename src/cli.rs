use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tangosync")]
#[command(version)]
#[command(about = "Reconcile TANGO database state from declarative JSON", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compute the DB calls for a config file and optionally apply them
    Apply(ApplyArgs),

    /// Preview what apply would change, never writing anything
    Diff(DiffArgs),

    /// Print the database snapshot as config JSON
    Dump(DumpArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Config file to reconcile (reads stdin when omitted)
    pub config: Option<PathBuf>,

    /// Snapshot file holding the current database state
    #[arg(short = 'D', long, env = "TANGOSYNC_DB_SNAPSHOT")]
    pub db_snapshot: PathBuf,

    /// Write the converged state back to the snapshot
    #[arg(short, long)]
    pub write: bool,

    /// Don't remove anything, only add and update
    #[arg(short, long)]
    pub update: bool,

    /// Match server, device, attribute and property names case-sensitively
    #[arg(short, long)]
    pub case_sensitive: bool,

    /// Accept attribute properties outside the standard set
    #[arg(short = 'a', long)]
    pub no_strict_check: bool,

    /// Inclusive filter on the servers tree (term:regex)
    #[arg(short, long)]
    pub include: Vec<String>,

    /// Exclusive filter on the servers tree (term:regex)
    #[arg(short = 'x', long)]
    pub exclude: Vec<String>,

    /// Inclusive filter on the classes tree (term:regex)
    #[arg(short = 'I', long)]
    pub include_classes: Vec<String>,

    /// Exclusive filter on the classes tree (term:regex)
    #[arg(short = 'X', long)]
    pub exclude_classes: Vec<String>,

    /// Seconds to sleep between applied calls
    #[arg(short, long, default_value_t = 0.01)]
    pub sleep: f64,

    /// Print the input config (after filtering) and exit
    #[arg(short = 'p', long)]
    pub show_input: bool,

    /// Print the relevant DB state as JSON
    #[arg(short = 'o', long)]
    pub show_db: bool,

    /// Print every computed DB call
    #[arg(short = 'd', long)]
    pub show_calls: bool,

    /// Skip structural validation of the input
    #[arg(long)]
    pub no_validation: bool,
}

#[derive(Parser)]
pub struct DiffArgs {
    /// Config file to compare (reads stdin when omitted)
    pub config: Option<PathBuf>,

    /// Snapshot file holding the current database state
    #[arg(short = 'D', long, env = "TANGOSYNC_DB_SNAPSHOT")]
    pub db_snapshot: PathBuf,

    /// Compare in update mode (removals are not considered)
    #[arg(short, long)]
    pub update: bool,

    /// Match server, device, attribute and property names case-sensitively
    #[arg(short, long)]
    pub case_sensitive: bool,

    /// Accept attribute properties outside the standard set
    #[arg(short = 'a', long)]
    pub no_strict_check: bool,

    /// Inclusive filter on the servers tree (term:regex)
    #[arg(short, long)]
    pub include: Vec<String>,

    /// Exclusive filter on the servers tree (term:regex)
    #[arg(short = 'x', long)]
    pub exclude: Vec<String>,

    /// Inclusive filter on the classes tree (term:regex)
    #[arg(short = 'I', long)]
    pub include_classes: Vec<String>,

    /// Exclusive filter on the classes tree (term:regex)
    #[arg(short = 'X', long)]
    pub exclude_classes: Vec<String>,

    /// Print every computed DB call
    #[arg(short = 'd', long)]
    pub show_calls: bool,
}

impl DiffArgs {
    /// A diff is an apply that never writes.
    pub fn into_apply(self) -> ApplyArgs {
        ApplyArgs {
            config: self.config,
            db_snapshot: self.db_snapshot,
            write: false,
            update: self.update,
            case_sensitive: self.case_sensitive,
            no_strict_check: self.no_strict_check,
            include: self.include,
            exclude: self.exclude,
            include_classes: self.include_classes,
            exclude_classes: self.exclude_classes,
            sleep: 0.0,
            show_input: false,
            show_db: false,
            show_calls: self.show_calls,
            no_validation: false,
        }
    }
}

#[derive(Parser)]
pub struct DumpArgs {
    /// Snapshot file holding the current database state
    #[arg(short = 'D', long, env = "TANGOSYNC_DB_SNAPSHOT")]
    pub db_snapshot: PathBuf,

    /// Filters selecting what to dump (term:regex)
    pub patterns: Vec<String>,

    /// Include class properties in the dump
    #[arg(short, long)]
    pub class_properties: bool,
}
