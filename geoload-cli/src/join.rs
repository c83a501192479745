//! `join` command: relate input features to reference features.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
};

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, ValueEnum};
use geoload_core::{
    DEFAULT_PROGRESS_STEP, Predicate, Record, Row, SpatialFilterStrategy, SpatialJoiner,
    SpatialRelation, SubFields, Value, braced_upper, retry::DEFAULT_MAX_ATTEMPTS,
};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::{
    ARG_INPUT, ARG_OPEN_ATTEMPTS, ARG_OUTPUT, ARG_PROGRESS_STEP, ARG_REFERENCE,
    ARG_REFERENCE_WORKSPACE, ARG_RELATION, ARG_SUB_FIELDS, ARG_WHERE, ARG_WITH_FIELD,
    ARG_WORKSPACE, CliError, ENV_JOIN_INPUT, ENV_JOIN_REFERENCE, ENV_JOIN_WORKSPACE,
    open_workspace,
};

/// Spatial relation accepted on the command line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum RelationArg {
    /// Geometries share at least one point.
    #[default]
    Intersects,
    /// The input feature contains the reference feature.
    Contains,
    /// The input feature lies within the reference feature.
    Within,
    /// Boundaries meet but interiors do not.
    Touches,
    /// Geometries cross.
    Crosses,
    /// Geometries of equal dimension overlap.
    Overlaps,
    /// Geometries share no point.
    Disjoint,
}

impl From<RelationArg> for SpatialRelation {
    fn from(relation: RelationArg) -> Self {
        match relation {
            RelationArg::Intersects => Self::Intersects,
            RelationArg::Contains => Self::Contains,
            RelationArg::Within => Self::Within,
            RelationArg::Touches => Self::Touches,
            RelationArg::Crosses => Self::Crosses,
            RelationArg::Overlaps => Self::Overlaps,
            RelationArg::Disjoint => Self::Disjoint,
        }
    }
}

/// CLI arguments for the `join` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "join",
    long_about = "For every feature of the input dataset, find the reference \
                 features satisfying the chosen spatial relation and emit one \
                 relation record per match as JSON. Records carry \
                 INPUT_OBJECTID, REF_DSPATH and REF_OBJECTID plus any \
                 reference fields requested with --with-field.",
    about = "Spatially join two datasets"
)]
#[ortho_config(prefix = "GEOLOAD")]
pub(crate) struct JoinArgs {
    /// SQLite workspace holding the input dataset.
    #[arg(long = ARG_WORKSPACE, value_name = "path")]
    #[serde(default)]
    pub(crate) workspace: Option<Utf8PathBuf>,
    /// Dataset whose features are related.
    #[arg(long = ARG_INPUT, value_name = "dataset")]
    #[serde(default)]
    pub(crate) input: Option<String>,
    /// Dataset searched for related features.
    #[arg(long = ARG_REFERENCE, value_name = "dataset")]
    #[serde(default)]
    pub(crate) reference: Option<String>,
    /// Workspace holding the reference dataset, when it differs.
    #[arg(long = ARG_REFERENCE_WORKSPACE, value_name = "path")]
    #[serde(default)]
    pub(crate) reference_workspace: Option<Utf8PathBuf>,
    /// Relation a reference feature must satisfy.
    #[arg(long = ARG_RELATION, value_enum)]
    #[serde(default)]
    pub(crate) relation: Option<RelationArg>,
    /// SQL condition restricting the reference features.
    #[arg(long = ARG_WHERE, value_name = "condition")]
    #[serde(default)]
    pub(crate) where_clause: Option<String>,
    /// Comma-separated reference fields to read ("*" for all).
    #[arg(long = ARG_SUB_FIELDS, value_name = "fields")]
    #[serde(default)]
    pub(crate) sub_fields: Option<String>,
    /// Reference field copied onto each relation record.
    #[arg(long = ARG_WITH_FIELD, value_name = "field")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) with_field: Vec<String>,
    /// File receiving the JSON records; standard output when omitted.
    #[arg(long = ARG_OUTPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Percentage step between progress reports.
    #[arg(long = ARG_PROGRESS_STEP, value_name = "percent")]
    #[serde(default)]
    pub(crate) progress_step: Option<u32>,
    /// Attempts made to open each workspace before giving up.
    #[arg(long = ARG_OPEN_ATTEMPTS, value_name = "count")]
    #[serde(default)]
    pub(crate) open_attempts: Option<u32>,
}

impl JoinArgs {
    pub(crate) fn into_config(self) -> Result<JoinConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        JoinConfig::try_from(merged)
    }
}

/// Resolved `join` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinConfig {
    pub(crate) workspace: Utf8PathBuf,
    pub(crate) reference_workspace: Option<Utf8PathBuf>,
    pub(crate) input: String,
    pub(crate) reference: String,
    pub(crate) relation: SpatialRelation,
    pub(crate) reference_where: Option<String>,
    pub(crate) sub_fields: SubFields,
    pub(crate) with_fields: Vec<String>,
    pub(crate) output: Option<Utf8PathBuf>,
    pub(crate) progress_step: u32,
    pub(crate) open_attempts: u32,
}

impl TryFrom<JoinArgs> for JoinConfig {
    type Error = CliError;

    fn try_from(args: JoinArgs) -> Result<Self, Self::Error> {
        let workspace = args.workspace.ok_or(CliError::MissingArgument {
            field: ARG_WORKSPACE,
            env: ENV_JOIN_WORKSPACE,
        })?;
        let input = args.input.ok_or(CliError::MissingArgument {
            field: ARG_INPUT,
            env: ENV_JOIN_INPUT,
        })?;
        let reference = args.reference.ok_or(CliError::MissingArgument {
            field: ARG_REFERENCE,
            env: ENV_JOIN_REFERENCE,
        })?;
        Ok(Self {
            workspace,
            reference_workspace: args.reference_workspace,
            input,
            reference,
            relation: args.relation.unwrap_or_default().into(),
            reference_where: args.where_clause,
            sub_fields: args
                .sub_fields
                .as_deref()
                .map(SubFields::parse)
                .unwrap_or_default(),
            with_fields: args.with_field,
            output: args.output,
            progress_step: args.progress_step.unwrap_or(DEFAULT_PROGRESS_STEP.get()),
            open_attempts: args.open_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        })
    }
}

/// Run the join described by `config` and return its relation records.
pub(crate) fn run_join(config: &JoinConfig) -> Result<Vec<Record>, CliError> {
    let workspace = open_workspace(&config.workspace, config.open_attempts)?;
    let separate_reference = config
        .reference_workspace
        .as_deref()
        .map(|path| open_workspace(path, config.open_attempts))
        .transpose()?;
    let reference_home = separate_reference.as_ref().unwrap_or(&workspace);

    let input = workspace
        .dataset(&config.input)
        .map_err(|source| CliError::OpenDataset {
            dataset: config.input.clone(),
            source,
        })?;
    let reference = reference_home
        .dataset(&config.reference)
        .map_err(|source| CliError::OpenDataset {
            dataset: config.reference.clone(),
            source,
        })?;

    let mut strategy =
        SpatialFilterStrategy::new(config.relation).sub_fields(config.sub_fields.clone());
    if let Some(clause) = &config.reference_where {
        strategy = strategy.predicate(Predicate::Where(clause.clone()));
    }
    let input_name = config.input.clone();
    let mut joiner = SpatialJoiner::new()
        .strategy(strategy)
        .progress_every_percent(config.progress_step)
        .on_progress(move |percent| log::info!("{input_name}: {percent}% joined"));
    if !config.with_fields.is_empty() {
        let fields = config.with_fields.clone();
        joiner = joiner.composer(move |_: &Row, related: &[Row]| -> Vec<Record> {
            related
                .iter()
                .map(|candidate| reference_fields(candidate, &fields))
                .collect()
        });
    }
    joiner
        .join(Some(&input), Some(&reference))
        .map_err(CliError::Join)
}

/// Record holding the named fields of a reference row; absent fields are null.
fn reference_fields(candidate: &Row, fields: &[String]) -> Record {
    let mut record = Record::new();
    for field in fields {
        record.set(field, candidate.get(field).cloned().unwrap_or(Value::Null));
    }
    record
}

/// Write `records` as a JSON array to `output`, or to standard output.
pub(crate) fn write_records(records: &[Record], output: Option<&Utf8Path>) -> Result<(), CliError> {
    let document = Json::Array(records.iter().map(record_json).collect::<Result<_, _>>()?);
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path).map_err(CliError::WriteOutput)?),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = BufWriter::new(sink);
    serde_json::to_writer_pretty(&mut writer, &document).map_err(CliError::SerializeRecords)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    writer.flush().map_err(CliError::WriteOutput)?;
    log::debug!("wrote {} join records", records.len());
    Ok(())
}

/// JSON object for one record, with plain JSON values per field.
pub(crate) fn record_json(record: &Record) -> Result<Json, CliError> {
    let mut object = Map::with_capacity(record.len());
    for (name, value) in record.iter() {
        object.insert(name.to_owned(), value_json(value)?);
    }
    Ok(Json::Object(object))
}

fn value_json(value: &Value) -> Result<Json, CliError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::SmallInt(v) => Json::from(*v),
        Value::Int(v) => Json::from(*v),
        Value::Float(v) => Json::from(f64::from(*v)),
        Value::Double(v) => Json::from(*v),
        Value::String(v) => Json::from(v.as_str()),
        Value::Date(v) => Json::from(v.to_string()),
        Value::Guid(v) => Json::from(braced_upper(*v)),
        Value::Geometry(v) => serde_json::to_value(v).map_err(CliError::SerializeRecords)?,
        Value::Blob(v) => Json::from(v.clone()),
    })
}
