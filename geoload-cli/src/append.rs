//! `append` command: bulk-load a dataset or query result into a dataset.

use camino::Utf8PathBuf;
use clap::Parser;
use geoload_core::{
    Appender, DEFAULT_FLUSH_EVERY, DEFAULT_PROGRESS_STEP, Predicate, ReaderSource, StoreError,
    convert::copy_from, retry::DEFAULT_MAX_ATTEMPTS,
};
use geoload_sqlite::{SqliteRowReader, SqliteWorkspace};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_FLUSH_EVERY, ARG_MAP, ARG_OPEN_ATTEMPTS, ARG_PROGRESS_STEP, ARG_SKIP_FIELD, ARG_SOURCE,
    ARG_SOURCE_SQL, ARG_TARGET, ARG_WHERE, ARG_WORKSPACE, CliError, ENV_APPEND_SOURCE,
    ENV_APPEND_TARGET, ENV_APPEND_WORKSPACE, open_workspace,
};

/// CLI arguments for the `append` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "append",
    long_about = "Append every row of a source dataset, or of a SQL query run \
                 against the workspace, to an existing target dataset. Target \
                 fields are filled from same-named source fields unless a \
                 --map or --skip-field says otherwise.",
    about = "Bulk-load rows into a dataset"
)]
#[ortho_config(prefix = "GEOLOAD")]
pub(crate) struct AppendArgs {
    /// SQLite workspace holding the source and target datasets.
    #[arg(long = ARG_WORKSPACE, value_name = "path")]
    #[serde(default)]
    pub(crate) workspace: Option<Utf8PathBuf>,
    /// Dataset to read rows from.
    #[arg(long = ARG_SOURCE, value_name = "dataset")]
    #[serde(default)]
    pub(crate) source: Option<String>,
    /// SQL query whose rows are appended instead of a source dataset.
    #[arg(long = ARG_SOURCE_SQL, value_name = "sql")]
    #[serde(default)]
    pub(crate) source_sql: Option<String>,
    /// Dataset receiving the rows.
    #[arg(long = ARG_TARGET, value_name = "dataset")]
    #[serde(default)]
    pub(crate) target: Option<String>,
    /// SQL condition selecting the source rows to append.
    #[arg(long = ARG_WHERE, value_name = "condition")]
    #[serde(default)]
    pub(crate) where_clause: Option<String>,
    /// Fill a target field from a differently named source field.
    #[arg(long = ARG_MAP, value_name = "TARGET=SOURCE")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) map: Vec<String>,
    /// Leave a target field at its default.
    #[arg(long = ARG_SKIP_FIELD, value_name = "field")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) skip_field: Vec<String>,
    /// Rows inserted between commits.
    #[arg(long = ARG_FLUSH_EVERY, value_name = "rows")]
    #[serde(default)]
    pub(crate) flush_every: Option<u64>,
    /// Percentage step between progress reports.
    #[arg(long = ARG_PROGRESS_STEP, value_name = "percent")]
    #[serde(default)]
    pub(crate) progress_step: Option<u32>,
    /// Fail when a target field has neither a mapping nor a same-named source field.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) strict: bool,
    /// Attempts made to open the workspace before giving up.
    #[arg(long = ARG_OPEN_ATTEMPTS, value_name = "count")]
    #[serde(default)]
    pub(crate) open_attempts: Option<u32>,
}

impl AppendArgs {
    pub(crate) fn into_config(self) -> Result<AppendConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        AppendConfig::try_from(merged)
    }
}

/// Where appended rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AppendSource {
    /// Rows of a dataset, optionally filtered by a SQL condition.
    Dataset {
        name: String,
        where_clause: Option<String>,
    },
    /// Rows produced by a SQL query.
    Query(String),
}

/// A target field filled from a named source field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldMapping {
    pub(crate) target: String,
    pub(crate) source: String,
}

impl FieldMapping {
    fn parse(mapping: &str) -> Result<Self, CliError> {
        mapping
            .split_once('=')
            .map(|(target, source)| (target.trim(), source.trim()))
            .filter(|(target, source)| !target.is_empty() && !source.is_empty())
            .map(|(target, source)| Self {
                target: target.to_owned(),
                source: source.to_owned(),
            })
            .ok_or_else(|| CliError::InvalidFieldMapping {
                mapping: mapping.to_owned(),
            })
    }
}

/// Resolved `append` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AppendConfig {
    pub(crate) workspace: Utf8PathBuf,
    pub(crate) source: AppendSource,
    pub(crate) target: String,
    pub(crate) mappings: Vec<FieldMapping>,
    pub(crate) skip_fields: Vec<String>,
    pub(crate) flush_every: u64,
    pub(crate) progress_step: u32,
    pub(crate) strict: bool,
    pub(crate) open_attempts: u32,
}

impl AppendConfig {
    /// Appender configured from the command options, logging progress.
    fn appender(&self) -> Appender<'static> {
        let target = self.target.clone();
        let mut appender = Appender::new()
            .flush_every(self.flush_every)
            .progress_every_percent(self.progress_step)
            .strict(self.strict)
            .on_progress(move |percent| log::info!("{target}: {percent}% appended"));
        for mapping in &self.mappings {
            appender = appender.converter(&mapping.target, copy_from(&mapping.source));
        }
        for field in &self.skip_fields {
            appender = appender.skip_field(field);
        }
        appender
    }
}

impl TryFrom<AppendArgs> for AppendConfig {
    type Error = CliError;

    fn try_from(args: AppendArgs) -> Result<Self, Self::Error> {
        let workspace = args.workspace.ok_or(CliError::MissingArgument {
            field: ARG_WORKSPACE,
            env: ENV_APPEND_WORKSPACE,
        })?;
        let target = args.target.ok_or(CliError::MissingArgument {
            field: ARG_TARGET,
            env: ENV_APPEND_TARGET,
        })?;
        let source = match (args.source, args.source_sql) {
            (Some(_), Some(_)) => {
                return Err(CliError::ConflictingArguments {
                    first: ARG_SOURCE,
                    second: ARG_SOURCE_SQL,
                });
            }
            (None, None) => {
                return Err(CliError::MissingArgument {
                    field: ARG_SOURCE,
                    env: ENV_APPEND_SOURCE,
                });
            }
            (Some(name), None) => AppendSource::Dataset {
                name,
                where_clause: args.where_clause,
            },
            (None, Some(sql)) => {
                if args.where_clause.is_some() {
                    return Err(CliError::ConflictingArguments {
                        first: ARG_WHERE,
                        second: ARG_SOURCE_SQL,
                    });
                }
                AppendSource::Query(sql)
            }
        };
        let mappings = args
            .map
            .iter()
            .map(String::as_str)
            .map(FieldMapping::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            workspace,
            source,
            target,
            mappings,
            skip_fields: args.skip_field,
            flush_every: args.flush_every.unwrap_or(DEFAULT_FLUSH_EVERY.get()),
            progress_step: args.progress_step.unwrap_or(DEFAULT_PROGRESS_STEP.get()),
            strict: args.strict,
            open_attempts: args.open_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        })
    }
}

/// Run the append described by `config`, returning the rows written.
pub(crate) fn run_append(config: &AppendConfig) -> Result<u64, CliError> {
    let workspace = open_workspace(&config.workspace, config.open_attempts)?;
    let target = workspace
        .dataset(&config.target)
        .map_err(|source| CliError::OpenDataset {
            dataset: config.target.clone(),
            source,
        })?;
    let mut appender = config.appender();
    let outcome = match &config.source {
        AppendSource::Dataset { name, where_clause } => {
            let source = workspace
                .dataset(name)
                .map_err(|err| CliError::OpenDataset {
                    dataset: name.clone(),
                    source: err,
                })?;
            let predicate = where_clause.clone().map(Predicate::Where);
            appender.append_dataset(&source, predicate.as_ref(), Some(&target))
        }
        AppendSource::Query(sql) => {
            let total = count_query_rows(&workspace, sql)?;
            let mut statement = workspace
                .tabular(sql)
                .map_err(|err| CliError::Query {
                    source: err.into_store_error(QUERY_SOURCE),
                })?;
            let reader = SqliteRowReader::new(&mut statement)
                .map_err(|err| CliError::Query { source: err })?;
            let mut rows = ReaderSource::new(reader);
            appender.append(Some(&mut rows), Some(&target), total)
        }
    };
    outcome.map_err(|source| CliError::Append {
        target: config.target.clone(),
        source,
    })
}

const QUERY_SOURCE: &str = "query";

/// Number of rows `sql` yields, used to scale progress reports.
fn count_query_rows(workspace: &SqliteWorkspace, sql: &str) -> Result<u64, CliError> {
    let counted = format!(
        "SELECT COUNT(*) FROM ({})",
        sql.trim().trim_end_matches(';')
    );
    let total: i64 = workspace
        .connection()
        .query_row(&counted, [], |row| row.get(0))
        .map_err(|err| CliError::Query {
            source: StoreError::backend(QUERY_SOURCE, err),
        })?;
    Ok(u64::try_from(total).unwrap_or_default())
}
