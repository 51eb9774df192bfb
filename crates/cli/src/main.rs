// jwlmerge CLI - merge JW Library backup archives

mod exit_codes;
mod inspect;
mod merge;
mod rules;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use exit_codes::{EXIT_ARCHIVE, EXIT_ERROR, EXIT_INVALID_RULES, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "jwlmerge")]
#[command(about = "Merge JW Library backup archives into one")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Log debug detail (per conflict, per key map)
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge two or more backup archives into a new archive
    #[command(after_help = "\
Examples:
  jwlmerge merge phone.jwlibrary tablet.jwlibrary
  jwlmerge merge a.jwlibrary b.jwlibrary c.jwlibrary -o ~/Backups
  jwlmerge merge a.jwlibrary b.jwlibrary --report report.json
  jwlmerge merge a.jwlibrary b.jwlibrary --rules my-rules.toml --debug-dir debug/
  jwlmerge merge a.jwlibrary b.jwlibrary --json | jq .report.totals")]
    Merge(merge::MergeArgs),

    /// Show an archive's manifest, table row counts and merge order
    #[command(after_help = "\
Examples:
  jwlmerge inspect phone.jwlibrary
  jwlmerge inspect phone.jwlibrary --json")]
    Inspect {
        /// Archive to inspect
        archive: PathBuf,

        /// Output JSON to stdout instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the built-in merge rules, or validate a rules file
    #[command(after_help = "\
Examples:
  jwlmerge rules > my-rules.toml
  jwlmerge rules --check my-rules.toml
  jwlmerge rules --check my-rules.toml --against phone.jwlibrary")]
    Rules {
        /// Rules file to validate instead of printing the built-in rules
        #[arg(long, value_name = "FILE")]
        check: Option<PathBuf>,

        /// Also validate the rules against this archive's schema
        #[arg(long, value_name = "ARCHIVE", requires = "check")]
        against: Option<PathBuf>,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  jwlmerge-engine ", env!("CARGO_PKG_VERSION"),
    )
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    // RUST_LOG wins over -v / -q
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Merge(args) => merge::cmd_merge(args, cli.quiet),
        Commands::Inspect { archive, json } => inspect::cmd_inspect(archive, json),
        Commands::Rules { check, against } => rules::cmd_rules(check, against),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("error: {}", e.message);
            if let Some(hint) = &e.hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(e.code)
        }
    }
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ARCHIVE, message: msg.into(), hint: None }
    }

    pub fn rules(msg: impl Into<String>) -> Self {
        Self { code: EXIT_INVALID_RULES, message: msg.into(), hint: None }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<jwlmerge_engine::MergeError> for CliError {
    fn from(err: jwlmerge_engine::MergeError) -> Self {
        let code = exit_codes::merge_exit_code(&err);
        let hint = match &err {
            jwlmerge_engine::MergeError::SchemaMismatch { .. } => {
                Some("update JW Library on every device, back up again, then retry".to_string())
            }
            jwlmerge_engine::MergeError::ConstraintViolation { .. } => {
                Some("rerun with --debug-dir to inspect the merged rows".to_string())
            }
            jwlmerge_engine::MergeError::ConfigValidation(_) => {
                Some("`jwlmerge rules` prints the built-in rules for reference".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }
}

impl From<jwlmerge_io::IoError> for CliError {
    fn from(err: jwlmerge_io::IoError) -> Self {
        match err {
            jwlmerge_io::IoError::Merge(e) => e.into(),
            other => Self {
                code: exit_codes::io_exit_code(&other),
                message: other.to_string(),
                hint: None,
            },
        }
    }
}
