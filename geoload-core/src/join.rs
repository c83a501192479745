//! Spatial join: relate each input feature to reference features.
//!
//! For every input feature the joiner runs a [`SpatialJoinStrategy`] against
//! the reference dataset and emits one relation record per related feature.
//! A relation record carries [`INPUT_OBJECT_ID_FIELD`],
//! [`REFERENCE_PATH_FIELD`] and [`REFERENCE_OBJECT_ID_FIELD`], plus any extra
//! fields a [`RecordComposer`] produces for that pair.

use std::num::NonZeroU32;

use thiserror::Error;

use crate::{
    Dataset, Predicate, Record, Row, SpatialQuery, SpatialRelation, StoreError, SubFields,
    progress::{DEFAULT_PROGRESS_STEP, ProgressCallback, ProgressReporter},
};

/// Relation field holding the input feature's object id.
pub const INPUT_OBJECT_ID_FIELD: &str = "INPUT_OBJECTID";
/// Relation field holding the reference dataset's data-source path.
pub const REFERENCE_PATH_FIELD: &str = "REF_DSPATH";
/// Relation field holding the reference feature's object id.
pub const REFERENCE_OBJECT_ID_FIELD: &str = "REF_OBJECTID";

/// Build a relation record with the three required fields.
#[must_use]
pub fn relation_record(input_id: i64, reference_path: &str, reference_id: i64) -> Record {
    let mut record = Record::new();
    record.set(INPUT_OBJECT_ID_FIELD, input_id);
    record.set(REFERENCE_PATH_FIELD, reference_path);
    record.set(REFERENCE_OBJECT_ID_FIELD, reference_id);
    record
}

/// Errors raised by [`SpatialJoiner::join`].
#[derive(Debug, Error)]
pub enum JoinError {
    /// A required dataset was absent.
    #[error("{argument} must be provided")]
    ArgumentNull {
        /// Name of the missing argument.
        argument: &'static str,
    },
    /// The progress step was outside `1..=100`.
    #[error("invalid progress_every_percent: {value}")]
    InvalidConfiguration {
        /// Rejected value.
        value: u32,
    },
    /// Reading the input or reference dataset failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The composer returned a non-empty list whose length differs from the
    /// number of related features.
    #[error(
        "composer returned {composed} records for input feature {input_id} \
         but {candidates} related features were found"
    )]
    CountMismatch {
        /// Object id of the input feature.
        input_id: i64,
        /// Number of related features after filtering.
        candidates: usize,
        /// Number of extra-field records the composer returned.
        composed: usize,
    },
}

/// Finds the reference features related to one input feature.
pub trait SpatialJoinStrategy {
    /// Related features of `input` in `reference`.
    ///
    /// # Errors
    ///
    /// Returns the reference dataset's error.
    fn find_related(&self, input: &Row, reference: &dyn Dataset) -> Result<Vec<Row>, StoreError>;
}

fn run_query(reference: &dyn Dataset, query: &SpatialQuery) -> Result<Vec<Row>, StoreError> {
    reference.search_spatial(query)?.collect()
}

/// Related features are those whose geometry intersects the input's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntersectsStrategy {
    sub_fields: SubFields,
}

impl IntersectsStrategy {
    /// Intersection test populating every reference field.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate only `sub_fields` on related features.
    #[must_use]
    pub fn with_sub_fields(sub_fields: SubFields) -> Self {
        Self { sub_fields }
    }
}

impl SpatialJoinStrategy for IntersectsStrategy {
    fn find_related(&self, input: &Row, reference: &dyn Dataset) -> Result<Vec<Row>, StoreError> {
        let Some(geometry) = input.shape() else {
            return Ok(Vec::new());
        };
        let query = SpatialQuery {
            geometry: geometry.clone(),
            relation: SpatialRelation::Intersects,
            sub_fields: self.sub_fields.clone(),
            predicate: None,
        };
        run_query(reference, &query)
    }
}

/// Caller-configured spatial filter. The input feature's geometry is bound
/// as the query geometry on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpatialFilterStrategy {
    relation: SpatialRelation,
    sub_fields: SubFields,
    predicate: Option<Predicate>,
}

impl SpatialFilterStrategy {
    /// Filter on `relation` with every field populated.
    #[must_use]
    pub fn new(relation: SpatialRelation) -> Self {
        Self {
            relation,
            ..Self::default()
        }
    }

    /// Populate only `sub_fields` on related features.
    #[must_use]
    pub fn sub_fields(mut self, sub_fields: SubFields) -> Self {
        self.sub_fields = sub_fields;
        self
    }

    /// Also require reference features to match `predicate`.
    #[must_use]
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

impl SpatialJoinStrategy for SpatialFilterStrategy {
    fn find_related(&self, input: &Row, reference: &dyn Dataset) -> Result<Vec<Row>, StoreError> {
        let Some(geometry) = input.shape() else {
            return Ok(Vec::new());
        };
        let query = SpatialQuery {
            geometry: geometry.clone(),
            relation: self.relation,
            sub_fields: self.sub_fields.clone(),
            predicate: self.predicate.clone(),
        };
        run_query(reference, &query)
    }
}

/// Decides whether an input feature takes part in the join.
pub trait InputFilter {
    /// `true` to process `input`.
    fn accept(&self, input: &Row) -> bool;
}

impl<F: Fn(&Row) -> bool> InputFilter for F {
    fn accept(&self, input: &Row) -> bool {
        self(input)
    }
}

/// Removes related features pairwise.
pub trait ResultFilter {
    /// `true` to keep `candidate` as related to `input`.
    fn keep(&self, input: &Row, candidate: &Row) -> bool;
}

impl<F: Fn(&Row, &Row) -> bool> ResultFilter for F {
    fn keep(&self, input: &Row, candidate: &Row) -> bool {
        self(input, candidate)
    }
}

/// Observes each input feature with its filtered related features.
pub trait RecordCallback {
    /// Returns `false` to stop the join after this feature.
    fn on_record(&mut self, input: &Row, related: &[Row]) -> bool;
}

impl<F: FnMut(&Row, &[Row]) -> bool> RecordCallback for F {
    fn on_record(&mut self, input: &Row, related: &[Row]) -> bool {
        self(input, related)
    }
}

/// Produces extra relation fields, one record per related feature.
///
/// An empty list means "no extra fields". Any other list must be exactly as
/// long as `related`.
pub trait RecordComposer {
    /// Extra-field records aligned with `related`.
    fn compose(&self, input: &Row, related: &[Row]) -> Vec<Record>;
}

impl<F: Fn(&Row, &[Row]) -> Vec<Record>> RecordComposer for F {
    fn compose(&self, input: &Row, related: &[Row]) -> Vec<Record> {
        self(input, related)
    }
}

/// Configurable spatial joiner.
///
/// # Examples
///
/// ```
/// use geoload_core::{
///     FieldDescriptor, FieldSet, FieldType, MemoryDataset, SpatialJoiner, Value,
///     join::REFERENCE_OBJECT_ID_FIELD,
/// };
/// use geo::{Geometry, Point, polygon};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fields = || FieldSet::new(vec![
///     FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
///     FieldDescriptor::new("SHAPE", FieldType::Geometry),
/// ]);
/// let zones = MemoryDataset::new("zones", fields()?).with_path("memory://zones");
/// zones.push(vec![Value::Null, Value::Geometry(Geometry::Polygon(polygon![
///     (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0),
/// ]))])?;
/// let sites = MemoryDataset::new("sites", fields()?);
/// sites.push(vec![Value::Null, Value::Geometry(Point::new(1.0, 1.0).into())])?;
///
/// let relations = SpatialJoiner::new().join(Some(&sites), Some(&zones))?;
/// assert_eq!(relations.len(), 1);
/// assert_eq!(relations[0].get(REFERENCE_OBJECT_ID_FIELD)?, &Value::Int(1));
/// # Ok(())
/// # }
/// ```
pub struct SpatialJoiner<'a> {
    strategy: Box<dyn SpatialJoinStrategy + 'a>,
    input_filter: Option<Box<dyn InputFilter + 'a>>,
    result_filter: Option<Box<dyn ResultFilter + 'a>>,
    on_record: Option<Box<dyn RecordCallback + 'a>>,
    composer: Option<Box<dyn RecordComposer + 'a>>,
    progress_every_percent: u32,
    on_progress: Option<ProgressCallback<'a>>,
}

impl Default for SpatialJoiner<'_> {
    fn default() -> Self {
        Self {
            strategy: Box::new(IntersectsStrategy::new()),
            input_filter: None,
            result_filter: None,
            on_record: None,
            composer: None,
            progress_every_percent: DEFAULT_PROGRESS_STEP.get(),
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for SpatialJoiner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialJoiner")
            .field("input_filter", &self.input_filter.is_some())
            .field("result_filter", &self.result_filter.is_some())
            .field("on_record", &self.on_record.is_some())
            .field("composer", &self.composer.is_some())
            .field("progress_every_percent", &self.progress_every_percent)
            .finish_non_exhaustive()
    }
}

impl<'a> SpatialJoiner<'a> {
    /// Joiner using [`IntersectsStrategy`] and reporting every 10 percent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: impl SpatialJoinStrategy + 'a) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// Only process input features the filter accepts.
    #[must_use]
    pub fn input_filter(mut self, filter: impl InputFilter + 'a) -> Self {
        self.input_filter = Some(Box::new(filter));
        self
    }

    /// Drop related features the filter rejects.
    #[must_use]
    pub fn result_filter(mut self, filter: impl ResultFilter + 'a) -> Self {
        self.result_filter = Some(Box::new(filter));
        self
    }

    /// Observe each processed input feature; return `false` to stop.
    #[must_use]
    pub fn on_record(mut self, callback: impl RecordCallback + 'a) -> Self {
        self.on_record = Some(Box::new(callback));
        self
    }

    /// Add extra fields to relation records.
    #[must_use]
    pub fn composer(mut self, composer: impl RecordComposer + 'a) -> Self {
        self.composer = Some(Box::new(composer));
        self
    }

    /// Percentage step between progress reports, from 1 to 100.
    #[must_use]
    pub const fn progress_every_percent(mut self, percent: u32) -> Self {
        self.progress_every_percent = percent;
        self
    }

    /// Receive completed percentages of the input features.
    #[must_use]
    pub fn on_progress(mut self, callback: impl FnMut(u32) + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Relate every input feature to `reference`.
    ///
    /// Progress counts every input feature, including those the input filter
    /// rejects.
    ///
    /// # Errors
    ///
    /// - [`JoinError::ArgumentNull`] when either dataset is `None`.
    /// - [`JoinError::InvalidConfiguration`] for a progress step outside
    ///   `1..=100`.
    /// - [`JoinError::CountMismatch`] when the composer's list has the wrong
    ///   length; no records are returned.
    /// - Store failures from either dataset.
    pub fn join(
        &mut self,
        input: Option<&dyn Dataset>,
        reference: Option<&dyn Dataset>,
    ) -> Result<Vec<Record>, JoinError> {
        let input_dataset = input.ok_or(JoinError::ArgumentNull { argument: "input" })?;
        let reference_dataset = reference.ok_or(JoinError::ArgumentNull {
            argument: "reference",
        })?;
        let step = NonZeroU32::new(self.progress_every_percent)
            .filter(|step| step.get() <= 100)
            .ok_or(JoinError::InvalidConfiguration {
                value: self.progress_every_percent,
            })?;

        let Self {
            strategy,
            input_filter,
            result_filter,
            on_record,
            composer,
            on_progress,
            ..
        } = self;

        let total = input_dataset.count(None)?;
        let mut progress = ProgressReporter::new(total, step, on_progress.as_mut());
        let mut cursor = input_dataset.search(None, true)?;
        let mut records = Vec::new();
        let mut processed = 0_u64;

        while let Some(feature) = cursor.next_row()? {
            processed += 1;
            let accepted = input_filter
                .as_ref()
                .is_none_or(|filter| filter.accept(&feature));
            let mut keep_going = true;
            if accepted {
                let mut related = strategy.find_related(&feature, reference_dataset)?;
                if let Some(filter) = result_filter.as_ref() {
                    related.retain(|candidate| filter.keep(&feature, candidate));
                }
                if let Some(callback) = on_record.as_mut() {
                    keep_going = callback.on_record(&feature, &related);
                }
                if !related.is_empty() {
                    let extras = composer
                        .as_ref()
                        .map(|extra| extra.compose(&feature, &related))
                        .unwrap_or_default();
                    emit_relations(
                        &feature,
                        &related,
                        &extras,
                        reference_dataset.path(),
                        &mut records,
                    )?;
                }
            }
            progress.record(processed);
            if !keep_going {
                log::debug!("join of {} stopped by record callback", input_dataset.name());
                break;
            }
        }

        log::info!(
            "joined {processed} features of {} to {}: {} relations",
            input_dataset.name(),
            reference_dataset.name(),
            records.len()
        );
        Ok(records)
    }
}

fn emit_relations(
    feature: &Row,
    related: &[Row],
    extras: &[Record],
    reference_path: &str,
    records: &mut Vec<Record>,
) -> Result<(), JoinError> {
    if !extras.is_empty() && extras.len() != related.len() {
        return Err(JoinError::CountMismatch {
            input_id: feature.object_id(),
            candidates: related.len(),
            composed: extras.len(),
        });
    }
    for (position, candidate) in related.iter().enumerate() {
        let mut record =
            relation_record(feature.object_id(), reference_path, candidate.object_id());
        if let Some(extra) = extras.get(position) {
            record.extend_from(extra);
            record.set(INPUT_OBJECT_ID_FIELD, feature.object_id());
            record.set(REFERENCE_PATH_FIELD, reference_path);
            record.set(REFERENCE_OBJECT_ID_FIELD, candidate.object_id());
        }
        records.push(record);
    }
    Ok(())
}
