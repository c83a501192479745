//! Behavioural tests for `SpatialJoiner` using rstest-bdd.

use std::cell::RefCell;

use geo::{Geometry, polygon};
use geoload_core::{
    JoinError, MemoryDataset, Record, Row, SpatialJoiner, Value,
    join::{INPUT_OBJECT_ID_FIELD, REFERENCE_PATH_FIELD},
    test_support::{feature_fields, point},
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

/// Shared state for spatial join scenarios.
#[derive(Debug, Default)]
struct JoinWorld {
    sites: RefCell<Option<MemoryDataset>>,
    zones: RefCell<Option<MemoryDataset>>,
    zones_path: RefCell<String>,
    relations: RefCell<Vec<Record>>,
    error: RefCell<Option<JoinError>>,
}

#[fixture]
fn world() -> JoinWorld {
    JoinWorld::default()
}

fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: x, y: y),
        (x: x + size, y: y),
        (x: x + size, y: y + size),
        (x: x, y: y + size),
    ])
}

#[given("three input sites where only the second lies inside zones")]
fn given_sites(world: &JoinWorld) {
    let sites = MemoryDataset::new("sites", feature_fields(&["LABEL"]));
    for (label, location) in [
        ("west", point(-40.0, -40.0)),
        ("middle", point(1.0, 1.0)),
        ("east", point(40.0, 40.0)),
    ] {
        sites
            .push(vec![Value::Null, Value::from(label), Value::Geometry(location)])
            .expect("seed site");
    }
    world.sites.replace(Some(sites));
}

#[given("reference zones stored at {path}")]
fn given_zones(world: &JoinWorld, path: String) {
    let zones = MemoryDataset::new("zones", feature_fields(&["ZONE"])).with_path(path.as_str());
    for (zone, area) in [
        ("a", square(0.0, 0.0, 2.0)),
        ("b", square(0.5, 0.5, 2.0)),
        ("c", square(20.0, 20.0, 1.0)),
    ] {
        zones
            .push(vec![Value::Null, Value::from(zone), Value::Geometry(area)])
            .expect("seed zone");
    }
    world.zones.replace(Some(zones));
    world.zones_path.replace(path);
}

fn run_join(world: &JoinWorld, mut joiner: SpatialJoiner<'_>) {
    let borrowed_sites = world.sites.borrow();
    let borrowed_zones = world.zones.borrow();
    let sites = borrowed_sites.as_ref().expect("sites should be initialised");
    let zones = borrowed_zones.as_ref().expect("zones should be initialised");
    match joiner.join(Some(sites), Some(zones)) {
        Ok(relations) => {
            world.relations.replace(relations);
            world.error.replace(None);
        }
        Err(err) => {
            world.relations.replace(Vec::new());
            world.error.replace(Some(err));
        }
    }
}

#[when("I join the sites to the zones")]
fn when_join(world: &JoinWorld) {
    run_join(world, SpatialJoiner::new());
}

#[when("I join the sites to the zones composing the zone name")]
fn when_join_composed(world: &JoinWorld) {
    run_join(
        world,
        SpatialJoiner::new().composer(|_: &Row, zones: &[Row]| {
            zones
                .iter()
                .map(|zone| {
                    let mut extra = Record::new();
                    extra.set("ZONE_NAME", zone.get("ZONE").cloned().unwrap_or_default());
                    extra
                })
                .collect::<Vec<_>>()
        }),
    );
}

#[when("I join the sites to the zones with a composer returning one record")]
fn when_join_mismatched(world: &JoinWorld) {
    run_join(
        world,
        SpatialJoiner::new().composer(|_: &Row, _: &[Row]| vec![Record::new()]),
    );
}

#[then("{count} relation records are produced")]
fn then_count(world: &JoinWorld, count: usize) {
    assert!(world.error.borrow().is_none(), "unexpected join error");
    assert_eq!(world.relations.borrow().len(), count);
}

#[then("every relation names input feature 2 and the zones path")]
fn then_relation_fields(world: &JoinWorld) {
    let path = world.zones_path.borrow().clone();
    for relation in world.relations.borrow().iter() {
        assert_eq!(relation.get(INPUT_OBJECT_ID_FIELD), Ok(&Value::Int(2)));
        assert_eq!(relation.get(REFERENCE_PATH_FIELD), Ok(&Value::from(path.as_str())));
    }
}

#[then("the relations carry zone names a and b")]
fn then_zone_names(world: &JoinWorld) {
    let names: Vec<_> = world
        .relations
        .borrow()
        .iter()
        .map(|relation| relation.get("zone_name").cloned())
        .collect();
    assert_eq!(names, vec![Ok(Value::from("a")), Ok(Value::from("b"))]);
}

#[then("the join fails with a count mismatch")]
fn then_mismatch(world: &JoinWorld) {
    let borrowed = world.error.borrow();
    let error = borrowed.as_ref().expect("an error should be recorded");
    assert!(matches!(
        error,
        JoinError::CountMismatch {
            input_id: 2,
            candidates: 2,
            composed: 1
        }
    ));
    assert!(world.relations.borrow().is_empty());
}

#[scenario(path = "tests/features/spatial_join.feature", index = 0)]
fn overlapping_zones(world: JoinWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/spatial_join.feature", index = 1)]
fn composed_zone_names(world: JoinWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/spatial_join.feature", index = 2)]
fn composer_count_mismatch(world: JoinWorld) {
    let _ = world;
}
