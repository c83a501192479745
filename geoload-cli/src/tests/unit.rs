//! Unit tests for argument resolution and join output encoding.

use super::helpers::{WorkspaceFiles, column};
use super::*;
use camino::Utf8PathBuf;
use crate::append::{AppendArgs, AppendConfig, AppendSource, FieldMapping, run_append};
use crate::join::{JoinArgs, JoinConfig, record_json};
use geoload_core::{Record, SpatialRelation, SubFields, Value, retry::DEFAULT_MAX_ATTEMPTS};
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn append_args() -> AppendArgs {
    AppendArgs {
        workspace: Some(Utf8PathBuf::from("sites.sqlite")),
        source: Some("sites_raw".to_owned()),
        target: Some("sites".to_owned()),
        ..AppendArgs::default()
    }
}

#[fixture]
fn join_args() -> JoinArgs {
    JoinArgs {
        workspace: Some(Utf8PathBuf::from("sites.sqlite")),
        input: Some("sites_raw".to_owned()),
        reference: Some("zones".to_owned()),
        ..JoinArgs::default()
    }
}

fn expect_missing(result: Result<impl std::fmt::Debug, CliError>, expected: &str) {
    match result.expect_err("argument should be required") {
        CliError::MissingArgument { field, .. } => assert_eq!(field, expected),
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
fn append_defaults_fill_unset_options(append_args: AppendArgs) {
    let config = AppendConfig::try_from(append_args).expect("config");
    assert_eq!(
        config.source,
        AppendSource::Dataset {
            name: "sites_raw".to_owned(),
            where_clause: None,
        }
    );
    assert_eq!(config.flush_every, 10_000);
    assert_eq!(config.progress_step, 10);
    assert_eq!(config.open_attempts, DEFAULT_MAX_ATTEMPTS);
    assert!(!config.strict);
    assert!(config.mappings.is_empty());
}

#[rstest]
fn append_requires_workspace(mut append_args: AppendArgs) {
    append_args.workspace = None;
    expect_missing(AppendConfig::try_from(append_args), ARG_WORKSPACE);
}

#[rstest]
fn append_requires_target(mut append_args: AppendArgs) {
    append_args.target = None;
    expect_missing(AppendConfig::try_from(append_args), ARG_TARGET);
}

#[rstest]
fn append_requires_a_source(mut append_args: AppendArgs) {
    append_args.source = None;
    expect_missing(AppendConfig::try_from(append_args), ARG_SOURCE);
}

#[rstest]
#[case(Some("sites_raw"), None, (ARG_SOURCE, ARG_SOURCE_SQL))]
#[case(None, Some("visits"), (ARG_WHERE, ARG_SOURCE_SQL))]
fn append_rejects_conflicting_sources(
    mut append_args: AppendArgs,
    #[case] source: Option<&str>,
    #[case] where_clause: Option<&str>,
    #[case] expected: (&str, &str),
) {
    append_args.source = source.map(str::to_owned);
    append_args.source_sql = Some("SELECT site FROM visits".to_owned());
    append_args.where_clause = where_clause.map(str::to_owned);
    match AppendConfig::try_from(append_args).expect_err("conflict") {
        CliError::ConflictingArguments { first, second } => {
            assert_eq!((first, second), expected);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
fn append_accepts_a_query_source(mut append_args: AppendArgs) {
    append_args.source = None;
    append_args.source_sql = Some("SELECT site FROM visits".to_owned());
    let config = AppendConfig::try_from(append_args).expect("config");
    assert_eq!(
        config.source,
        AppendSource::Query("SELECT site FROM visits".to_owned())
    );
}

#[rstest]
fn append_parses_field_mappings(mut append_args: AppendArgs) {
    append_args.map = vec!["LABEL=NAME".to_owned(), " CODE = ID ".to_owned()];
    let config = AppendConfig::try_from(append_args).expect("config");
    assert_eq!(
        config.mappings,
        vec![
            FieldMapping {
                target: "LABEL".to_owned(),
                source: "NAME".to_owned(),
            },
            FieldMapping {
                target: "CODE".to_owned(),
                source: "ID".to_owned(),
            },
        ]
    );
}

#[rstest]
#[case("LABEL")]
#[case("=NAME")]
#[case("LABEL=")]
fn append_rejects_malformed_mappings(mut append_args: AppendArgs, #[case] mapping: &str) {
    append_args.map = vec![mapping.to_owned()];
    match AppendConfig::try_from(append_args).expect_err("malformed mapping") {
        CliError::InvalidFieldMapping { mapping: rejected } => assert_eq!(rejected, mapping),
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
fn join_defaults_to_intersects_over_all_fields(join_args: JoinArgs) {
    let config = JoinConfig::try_from(join_args).expect("config");
    assert_eq!(config.relation, SpatialRelation::Intersects);
    assert_eq!(config.sub_fields, SubFields::All);
    assert_eq!(config.progress_step, 10);
    assert!(config.reference_workspace.is_none());
    assert!(config.output.is_none());
}

#[rstest]
#[case::workspace(ARG_WORKSPACE)]
#[case::input(ARG_INPUT)]
#[case::reference(ARG_REFERENCE)]
fn join_requires_core_options(mut join_args: JoinArgs, #[case] missing: &str) {
    match missing {
        ARG_WORKSPACE => join_args.workspace = None,
        ARG_INPUT => join_args.input = None,
        _ => join_args.reference = None,
    }
    expect_missing(JoinConfig::try_from(join_args), missing);
}

#[rstest]
fn join_relation_is_parsed_from_the_command_line() {
    let cli = Cli::try_parse_from([
        "geoload",
        "join",
        "--workspace",
        "sites.sqlite",
        "--input",
        "sites_raw",
        "--reference",
        "zones",
        "--relation",
        "within",
        "--sub-fields",
        "ZONE, SHAPE",
    ])
    .expect("parse join");
    let Command::Join(args) = cli.command else {
        panic!("expected the join command");
    };
    let config = JoinConfig::try_from(args).expect("config");
    assert_eq!(config.relation, SpatialRelation::Within);
    assert_eq!(config.sub_fields, SubFields::parse("ZONE, SHAPE"));
}

#[rstest]
fn unknown_relation_is_rejected() {
    let err = Cli::try_parse_from(["geoload", "join", "--relation", "near"])
        .expect_err("unknown relation");
    assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
}

#[rstest]
fn record_json_uses_plain_values() {
    let mut record = Record::new();
    record.set("INPUT_OBJECTID", Value::Int(2));
    record.set("ZONE", Value::from("a"));
    record.set("AREA", Value::Double(4.5));
    record.set("NOTE", Value::Null);
    let encoded = record_json(&record).expect("encode record");
    assert_eq!(
        encoded,
        json!({ "INPUT_OBJECTID": 2, "ZONE": "a", "AREA": 4.5, "NOTE": null })
    );
}

#[rstest]
fn append_runs_a_query_source() {
    let files = WorkspaceFiles::seeded();
    let config = AppendConfig {
        workspace: files.workspace().to_path_buf(),
        source: AppendSource::Query(
            "SELECT name AS label FROM sites_raw ORDER BY rowid".to_owned(),
        ),
        target: "sites".to_owned(),
        mappings: Vec::new(),
        skip_fields: Vec::new(),
        flush_every: 2,
        progress_step: 50,
        strict: false,
        open_attempts: 1,
    };
    assert_eq!(run_append(&config).expect("append query rows"), 3);
    assert_eq!(
        column(files.workspace(), "sites", "LABEL"),
        vec![Value::from("west"), Value::from("middle"), Value::from("east")]
    );
}

#[rstest]
fn append_reports_an_unknown_target() {
    let files = WorkspaceFiles::seeded();
    let config = AppendConfig {
        workspace: files.workspace().to_path_buf(),
        source: AppendSource::Dataset {
            name: "sites_raw".to_owned(),
            where_clause: None,
        },
        target: "parks".to_owned(),
        mappings: Vec::new(),
        skip_fields: Vec::new(),
        flush_every: 2,
        progress_step: 50,
        strict: false,
        open_attempts: 1,
    };
    match run_append(&config).expect_err("unknown target") {
        CliError::OpenDataset { dataset, .. } => assert_eq!(dataset, "parks"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
fn open_workspace_reports_every_attempt() {
    let files = WorkspaceFiles::seeded();
    let missing = files.missing_workspace();
    match open_workspace(&missing, 3).expect_err("unreachable workspace") {
        CliError::OpenWorkspace { path, source } => {
            assert_eq!(path, missing);
            assert_eq!(source.attempts(), 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
}
