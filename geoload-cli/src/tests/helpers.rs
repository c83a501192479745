//! Test helpers building a seeded SQLite workspace for CLI runs.

use camino::{Utf8Path, Utf8PathBuf};
use geo::{Geometry, Rect, coord};
use geoload_core::{
    Dataset, RowBuffer, Value,
    test_support::{feature_fields, point},
};
use geoload_sqlite::{SqliteDataset, SqliteWorkspace};
use tempfile::TempDir;

/// A temporary workspace holding `sites_raw`, an empty `sites` dataset and
/// three `zones`.
pub(super) struct WorkspaceFiles {
    _dir: TempDir,
    workspace: Utf8PathBuf,
    output: Utf8PathBuf,
}

impl WorkspaceFiles {
    pub(super) fn seeded() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        let workspace = root.join("sites.sqlite");
        let output = root.join("relations.json");
        seed(&workspace);
        Self {
            _dir: dir,
            workspace,
            output,
        }
    }

    pub(super) fn workspace(&self) -> &Utf8Path {
        &self.workspace
    }

    pub(super) fn output(&self) -> &Utf8Path {
        &self.output
    }

    pub(super) fn missing_workspace(&self) -> Utf8PathBuf {
        self.workspace
            .parent()
            .expect("workspace has a parent")
            .join("absent")
            .join("nothing.sqlite")
    }
}

fn seed(path: &Utf8Path) {
    let workspace = SqliteWorkspace::open(path.as_std_path()).expect("create workspace");
    let raw = workspace
        .create_dataset("sites_raw", feature_fields(&["NAME"]))
        .expect("create sites_raw");
    insert_features(
        &raw,
        &[
            ("west", point(-40.0, -40.0)),
            ("middle", point(1.0, 1.0)),
            ("east", point(40.0, 40.0)),
        ],
    );
    workspace
        .create_dataset("sites", feature_fields(&["LABEL"]))
        .expect("create sites");
    let zones = workspace
        .create_dataset("zones", feature_fields(&["ZONE"]))
        .expect("create zones");
    insert_features(
        &zones,
        &[
            ("a", square(0.0, 0.0, 2.0)),
            ("b", square(0.5, 0.5, 2.0)),
            ("c", square(10.0, 10.0, 1.0)),
        ],
    );
}

fn insert_features(dataset: &SqliteDataset<'_>, features: &[(&str, Geometry<f64>)]) {
    let mut handle = dataset.begin_insert(true).expect("insert handle");
    for (name, shape) in features {
        let mut buffer = RowBuffer::new(dataset.fields());
        buffer
            .set_value(1, Value::from(*name))
            .expect("name slot");
        buffer.set_geometry(Some(shape.clone()));
        handle.insert(buffer).expect("insert feature");
    }
    handle.flush().expect("flush features");
}

fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
    Geometry::Polygon(
        Rect::new(coord! { x: x, y: y }, coord! { x: x + size, y: y + size }).to_polygon(),
    )
}

/// Values of `field` across `dataset`, in object-id order.
pub(super) fn column(path: &Utf8Path, dataset: &str, field: &str) -> Vec<Value> {
    let workspace = SqliteWorkspace::open(path.as_std_path()).expect("open workspace");
    let opened = workspace.dataset(dataset).expect("open dataset");
    let mut cursor = opened.search(None, true).expect("search dataset");
    let mut values = Vec::new();
    while let Some(row) = cursor.next_row().expect("dataset row") {
        values.push(row.get(field).cloned().unwrap_or(Value::Null));
    }
    values
}
