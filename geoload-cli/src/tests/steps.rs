//! Behaviour-driven step definitions driving the append and join commands.

use super::helpers::{WorkspaceFiles, column};
use super::*;
use geoload_core::Value;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;

/// Aggregates CLI scenario state so each step only needs a single world
/// argument.
struct CommandWorld {
    files: WorkspaceFiles,
    cli_args: RefCell<Vec<String>>,
    outcome: RefCell<Option<Result<(), CliError>>>,
}

impl CommandWorld {
    fn new() -> Self {
        Self {
            files: WorkspaceFiles::seeded(),
            cli_args: RefCell::new(Vec::new()),
            outcome: RefCell::new(None),
        }
    }

    fn set_args<const N: usize>(&self, args: [&str; N]) {
        let mut guard = self.cli_args.borrow_mut();
        guard.clear();
        guard.extend(args.iter().map(|arg| (*arg).to_owned()));
    }

    fn error(&self) -> std::cell::Ref<'_, CliError> {
        std::cell::Ref::map(self.outcome.borrow(), |outcome| {
            match outcome.as_ref().expect("outcome recorded") {
                Ok(()) => panic!("expected the command to fail"),
                Err(err) => err,
            }
        })
    }
}

#[fixture]
fn world() -> CommandWorld {
    CommandWorld::new()
}

#[given("a seeded workspace")]
fn seeded_workspace(#[from(world)] world: &CommandWorld) {
    assert!(world.files.workspace().exists(), "workspace should exist");
}

#[given("I append the raw sites to the sites dataset mapping LABEL from NAME")]
fn append_with_mapping(#[from(world)] world: &CommandWorld) {
    world.set_args([
        "append",
        "--workspace",
        world.files.workspace().as_str(),
        "--source",
        "sites_raw",
        "--target",
        "sites",
        "--map",
        "LABEL=NAME",
        "--flush-every",
        "2",
    ]);
}

#[given("I append a query selecting the raw site names as labels")]
fn append_query(#[from(world)] world: &CommandWorld) {
    world.set_args([
        "append",
        "--workspace",
        world.files.workspace().as_str(),
        "--source-sql",
        "SELECT name AS label FROM sites_raw ORDER BY rowid",
        "--target",
        "sites",
    ]);
}

#[given("I append the raw sites without naming a target")]
fn append_without_target(#[from(world)] world: &CommandWorld) {
    world.set_args([
        "append",
        "--workspace",
        world.files.workspace().as_str(),
        "--source",
        "sites_raw",
    ]);
}

#[given("I join the sites to the zones carrying the zone name")]
fn join_with_zone_names(#[from(world)] world: &CommandWorld) {
    world.set_args([
        "join",
        "--workspace",
        world.files.workspace().as_str(),
        "--input",
        "sites_raw",
        "--reference",
        "zones",
        "--with-field",
        "ZONE",
        "--output",
        world.files.output().as_str(),
    ]);
}

#[given("I join sites in a workspace that cannot be opened")]
fn join_unreachable(#[from(world)] world: &CommandWorld) {
    let missing = world.files.missing_workspace();
    world.set_args([
        "join",
        "--workspace",
        missing.as_str(),
        "--input",
        "sites_raw",
        "--reference",
        "zones",
        "--open-attempts",
        "2",
    ]);
}

#[when("I run the geoload command")]
fn run_command(#[from(world)] world: &CommandWorld) {
    let mut invocation = vec!["geoload".to_owned()];
    invocation.extend(world.cli_args.borrow().iter().cloned());
    let outcome = Cli::try_parse_from(invocation)
        .map_err(CliError::ArgumentParsing)
        .and_then(execute);
    world.outcome.replace(Some(outcome));
}

#[then("the command succeeds")]
fn command_succeeds(#[from(world)] world: &CommandWorld) {
    let borrowed = world.outcome.borrow();
    match borrowed.as_ref().expect("outcome recorded") {
        Ok(()) => {}
        Err(err) => panic!("command failed: {err}"),
    }
}

#[then("the sites dataset is labelled west, middle and east")]
fn sites_labelled(#[from(world)] world: &CommandWorld) {
    assert_eq!(
        column(world.files.workspace(), "sites", "LABEL"),
        vec![
            Value::from("west"),
            Value::from("middle"),
            Value::from("east"),
        ]
    );
}

#[then("the CLI reports that the \"target\" flag is missing")]
fn reports_missing_target(#[from(world)] world: &CommandWorld) {
    match &*world.error() {
        CliError::MissingArgument { field, env } => {
            assert_eq!(*field, ARG_TARGET);
            assert_eq!(*env, ENV_APPEND_TARGET);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

fn relations(world: &CommandWorld) -> Vec<serde_json::Value> {
    let text = std::fs::read_to_string(world.files.output()).expect("read join output");
    let document: serde_json::Value = serde_json::from_str(&text).expect("parse join output");
    document.as_array().cloned().expect("output is an array")
}

#[then("the output lists {count} relations for site {site}")]
fn output_lists_relations(#[from(world)] world: &CommandWorld, count: usize, site: i64) {
    let records = relations(world);
    assert_eq!(records.len(), count);
    for record in &records {
        assert_eq!(record["INPUT_OBJECTID"], serde_json::json!(site));
        assert_eq!(
            record["REF_DSPATH"],
            serde_json::json!(world.files.workspace().as_str())
        );
    }
}

#[then("the relations name zones a and b")]
fn relations_name_zones(#[from(world)] world: &CommandWorld) {
    let zones: Vec<_> = relations(world)
        .iter()
        .map(|record| (record["REF_OBJECTID"].clone(), record["ZONE"].clone()))
        .collect();
    assert_eq!(
        zones,
        vec![
            (serde_json::json!(1), serde_json::json!("a")),
            (serde_json::json!(2), serde_json::json!("b")),
        ]
    );
}

#[then("the CLI reports that opening the workspace failed {attempts} times")]
fn reports_open_failure(#[from(world)] world: &CommandWorld, attempts: u32) {
    match &*world.error() {
        CliError::OpenWorkspace { source, .. } => {
            assert_eq!(source.attempts(), attempts);
            assert_eq!(source.errors().len(), 2);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

macro_rules! register_command_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/geoload_commands.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: CommandWorld) {
            let _ = world;
        }
    };
}

register_command_scenario!(append_with_field_mapping, "appending a dataset with a field mapping");
register_command_scenario!(append_query_rows, "appending the rows of a query");
register_command_scenario!(reject_missing_target, "rejecting an append without a target");
register_command_scenario!(join_sites_to_zones, "joining sites to zones");
register_command_scenario!(report_unreachable_workspace, "reporting an unreachable workspace");
