use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use netconfig::Operation;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fabricctl")]
#[command(author = "Fabricctl Contributors")]
#[command(version)]
#[command(about = "Provision and audit network fabric configuration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to fabricctl.toml in the config directory)
    #[arg(short, long, global = true, env = "FABRICCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Answer yes to every confirmation
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the directives a change would send, without touching the device
    Compile(CompileArgs),

    /// Apply a change in one transaction
    Update(ChangeArgs),

    /// Remove what a change describes
    Delete(FileArgs),

    /// Apply a change with a confirmed commit (rolled back unless enabled)
    Reserve(ChangeArgs),

    /// Confirm a reservation and persist it
    Enable {
        /// Device name
        device: String,
    },

    /// Apply several change files, one worker per device
    Apply(ApplyArgs),

    /// Print the running configuration of a device
    Get {
        /// Device name
        device: String,
    },

    /// Check the running configuration against persisted state
    Compare(CompareArgs),

    /// Rebuild changes from persisted state (device replacement)
    #[command(subcommand)]
    Recover(RecoverCommand),

    /// Dump the persisted state of a device as JSON
    State {
        /// Device name
        device: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Change Commands
// ============================================================================

/// Request operation as given on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    Merge,
    Replace,
    Delete,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Merge => Operation::Merge,
            OperationArg::Replace => Operation::Replace,
            OperationArg::Delete => Operation::Delete,
        }
    }
}

#[derive(Args)]
pub struct FileArgs {
    /// Change file (JSON)
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ChangeArgs {
    /// Change file (JSON)
    pub file: PathBuf,

    /// Request operation; overrides the one in the file
    #[arg(short, long, value_enum)]
    pub operation: Option<OperationArg>,
}

#[derive(Args)]
pub struct CompileArgs {
    #[command(flatten)]
    pub change: ChangeArgs,

    /// Also print the group verdicts
    #[arg(short, long)]
    pub groups: bool,

    /// Render in the device dialect instead of as directives
    #[arg(short, long)]
    pub encoded: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Change files (JSON)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Request operation; overrides the one in each file
    #[arg(short, long, value_enum)]
    pub operation: Option<OperationArg>,

    /// Devices driven concurrently (defaults to settings.jobs)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

// ============================================================================
// Audit Commands
// ============================================================================

#[derive(Args)]
pub struct CompareArgs {
    /// Device name
    pub device: String,

    /// Restrict the check to one slice
    #[arg(short, long)]
    pub slice: Option<String>,

    /// Print expected against live, line by line
    #[arg(short, long)]
    pub diff: bool,
}

// ============================================================================
// Recovery Commands
// ============================================================================

#[derive(Subcommand)]
pub enum RecoverCommand {
    /// Rebuild the base service: equipment, links, LAGs and filters
    Node(RecoverArgs),

    /// Rebuild tenant slices, one change per slice
    Slices(RecoverArgs),
}

#[derive(Args)]
pub struct RecoverArgs {
    /// Device name
    pub device: String,

    /// Recovery request file (JSON): rename map, QoS overrides, slices
    #[arg(short, long)]
    pub request: Option<PathBuf>,

    /// Interface rename, OLD=NEW (repeatable)
    #[arg(long = "rename", value_name = "OLD=NEW")]
    pub renames: Vec<String>,

    /// Only these slices (repeatable)
    #[arg(long = "slice")]
    pub slices: Vec<String>,

    /// Write the recovered state and run the changes
    #[arg(long)]
    pub apply: bool,
}
