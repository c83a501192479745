//! Command-line interface for geoload's bulk-load and spatial-join tooling.
#![forbid(unsafe_code)]

use camino::Utf8Path;
use clap::{Parser, Subcommand};
use geoload_sqlite::SqliteWorkspace;

mod append;
mod error;
mod join;

pub use error::CliError;

use append::{AppendArgs, run_append};
use join::{JoinArgs, run_join, write_records};

pub(crate) const ARG_WORKSPACE: &str = "workspace";
pub(crate) const ARG_SOURCE: &str = "source";
pub(crate) const ARG_SOURCE_SQL: &str = "source-sql";
pub(crate) const ARG_TARGET: &str = "target";
pub(crate) const ARG_WHERE: &str = "where";
pub(crate) const ARG_MAP: &str = "map";
pub(crate) const ARG_SKIP_FIELD: &str = "skip-field";
pub(crate) const ARG_FLUSH_EVERY: &str = "flush-every";
pub(crate) const ARG_PROGRESS_STEP: &str = "progress-step";
pub(crate) const ARG_OPEN_ATTEMPTS: &str = "open-attempts";
pub(crate) const ARG_INPUT: &str = "input";
pub(crate) const ARG_REFERENCE: &str = "reference";
pub(crate) const ARG_REFERENCE_WORKSPACE: &str = "reference-workspace";
pub(crate) const ARG_RELATION: &str = "relation";
pub(crate) const ARG_SUB_FIELDS: &str = "sub-fields";
pub(crate) const ARG_WITH_FIELD: &str = "with-field";
pub(crate) const ARG_OUTPUT: &str = "output";

pub(crate) const ENV_APPEND_WORKSPACE: &str = "GEOLOAD_CMDS_APPEND_WORKSPACE";
pub(crate) const ENV_APPEND_SOURCE: &str = "GEOLOAD_CMDS_APPEND_SOURCE";
pub(crate) const ENV_APPEND_TARGET: &str = "GEOLOAD_CMDS_APPEND_TARGET";
pub(crate) const ENV_JOIN_WORKSPACE: &str = "GEOLOAD_CMDS_JOIN_WORKSPACE";
pub(crate) const ENV_JOIN_INPUT: &str = "GEOLOAD_CMDS_JOIN_INPUT";
pub(crate) const ENV_JOIN_REFERENCE: &str = "GEOLOAD_CMDS_JOIN_REFERENCE";

/// Run the geoload CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns a [`CliError`] when arguments or configuration are invalid, or
/// when the requested append or join fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    execute(cli)
}

fn execute(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Append(args) => {
            let config = args.into_config()?;
            let written = run_append(&config)?;
            log::info!("appended {written} rows to {}", config.target);
        }
        Command::Join(args) => {
            let config = args.into_config()?;
            let records = run_join(&config)?;
            write_records(&records, config.output.as_deref())?;
        }
    }
    Ok(())
}

/// Open `path`, retrying transient failures up to `attempts` times.
pub(crate) fn open_workspace(path: &Utf8Path, attempts: u32) -> Result<SqliteWorkspace, CliError> {
    SqliteWorkspace::open_with_retry(path.as_std_path(), attempts).map_err(|source| {
        CliError::OpenWorkspace {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[derive(Debug, Parser)]
#[command(
    name = "geoload",
    about = "Bulk-load and spatially join datasets stored in SQLite workspaces",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Append the rows of a dataset or SQL query to another dataset.
    Append(AppendArgs),
    /// Relate each input feature to the reference features it touches.
    Join(JoinArgs),
}

#[cfg(test)]
mod tests;
