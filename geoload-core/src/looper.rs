//! Row-visiting helpers over dataset cursors.
//!
//! Visitors return `true` to keep going and `false` to stop. That return
//! value is the only way to cut a loop short; the cursor is dropped as soon
//! as the loop ends.

use crate::{Dataset, Predicate, Row, StoreError};

/// Outcome of a visiting loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Visited {
    /// Rows handed to the visitor, including the one that stopped the loop.
    pub rows: u64,
    /// Whether the visitor asked to stop before the cursor was exhausted.
    pub stopped: bool,
}

/// Visit rows of `dataset` matching `predicate` (every row for `None`).
///
/// The visitor receives each row with its 1-based position.
///
/// # Errors
///
/// Returns the store's error when the cursor cannot be opened or fails
/// mid-stream.
///
/// # Examples
///
/// ```
/// use geoload_core::{FieldDescriptor, FieldSet, FieldType, MemoryDataset, Value, looper};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fields = FieldSet::new(vec![FieldDescriptor::new("OBJECTID", FieldType::ObjectId)])?;
/// let table = MemoryDataset::new("t", fields);
/// for _ in 0..10 {
///     table.push(vec![Value::Null])?;
/// }
/// let visited = looper::visit(&table, None, true, |_, position| position < 3)?;
/// assert_eq!(visited.rows, 3);
/// assert!(visited.stopped);
/// # Ok(())
/// # }
/// ```
pub fn visit<F>(
    dataset: &dyn Dataset,
    predicate: Option<&Predicate>,
    read_only: bool,
    mut visitor: F,
) -> Result<Visited, StoreError>
where
    F: FnMut(&Row, u64) -> bool,
{
    let mut cursor = dataset.search(predicate, read_only)?;
    let mut visited = Visited::default();
    while let Some(row) = cursor.next_row()? {
        visited.rows += 1;
        if !visitor(&row, visited.rows) {
            visited.stopped = true;
            break;
        }
    }
    Ok(visited)
}

/// Visit rows for each predicate in turn, stopping at the first predicate
/// whose loop the visitor cut short. An empty predicate list visits every
/// row once.
///
/// Positions passed to the visitor restart at 1 for each predicate.
///
/// # Errors
///
/// As for [`visit`].
pub fn visit_each<F>(
    dataset: &dyn Dataset,
    predicates: &[Predicate],
    read_only: bool,
    mut visitor: F,
) -> Result<Visited, StoreError>
where
    F: FnMut(&Row, u64) -> bool,
{
    if predicates.is_empty() {
        return visit(dataset, None, read_only, visitor);
    }
    let mut total = Visited::default();
    for predicate in predicates {
        let visited = visit(dataset, Some(predicate), read_only, &mut visitor)?;
        total.rows += visited.rows;
        if visited.stopped {
            total.stopped = true;
            break;
        }
    }
    Ok(total)
}

/// Map every matching row through `map` and collect the results.
///
/// # Errors
///
/// As for [`visit`].
pub fn collect<T, F>(
    dataset: &dyn Dataset,
    predicate: Option<&Predicate>,
    read_only: bool,
    mut map: F,
) -> Result<Vec<T>, StoreError>
where
    F: FnMut(&Row) -> T,
{
    let mut items = Vec::new();
    visit(dataset, predicate, read_only, |row, _| {
        items.push(map(row));
        true
    })?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Value, test_support::numbered_table};
    use rstest::rstest;

    #[rstest]
    fn visit_reports_one_based_positions() {
        let table = numbered_table("t", 3);
        let mut positions = Vec::new();
        let visited = visit(&table, None, true, |_, position| {
            positions.push(position);
            true
        })
        .expect("visit");
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(visited, Visited { rows: 3, stopped: false });
    }

    #[rstest]
    fn visit_each_stops_at_the_interrupted_predicate() {
        let table = numbered_table("t", 6);
        let predicates = [
            Predicate::ObjectIds(vec![1, 2]),
            Predicate::ObjectIds(vec![3, 4]),
            Predicate::ObjectIds(vec![5, 6]),
        ];
        let mut seen = Vec::new();
        let visited = visit_each(&table, &predicates, true, |row, _| {
            seen.push(row.object_id());
            row.object_id() != 3
        })
        .expect("visit");
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(visited.stopped);
    }

    #[rstest]
    fn visit_each_without_predicates_visits_everything() {
        let table = numbered_table("t", 4);
        let visited = visit_each(&table, &[], true, |_, _| true).expect("visit");
        assert_eq!(visited.rows, 4);
    }

    #[rstest]
    fn collect_maps_rows() {
        let table = numbered_table("t", 2);
        let names = collect(&table, None, true, |row| row.get("name").cloned())
            .expect("collect");
        assert_eq!(
            names,
            vec![Some(Value::from("row-1")), Some(Value::from("row-2"))]
        );
    }
}
