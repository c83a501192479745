//! Streaming append: source rows through converters into a bulk-load writer.
//!
//! For every source row the orchestrator allocates a destination buffer,
//! copies the geometry, copies attributes field by field and inserts the
//! buffer through a [`BulkLoadWriter`], or straight through an unbuffered
//! insert handle when bulk loading is switched off. Attribute resolution per
//! destination field:
//!
//! 1. non-editable and skipped fields are left alone;
//! 2. a registered converter produces the value;
//! 3. otherwise a same-named source field is copied verbatim (GUIDs as
//!    braced upper-case text);
//! 4. otherwise the field keeps its default, or the run fails in strict mode.

use std::{
    num::{NonZeroU32, NonZeroU64},
    sync::Arc,
};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    ConvertError, CursorSource, Dataset, FieldConverter, FieldConverterRegistry, FieldSet,
    FieldType, InsertHandle, MAX_OBJECT_IDS_PER_PREDICATE, Predicate, Record, RecordListSource,
    RecordSource, RowBuffer, SkipFields, SourceRow, StoreError, Value,
    progress::{DEFAULT_PROGRESS_STEP, ProgressCallback, ProgressReporter},
    value::braced_upper,
    writer::{BulkLoadWriter, DEFAULT_FLUSH_EVERY, LoadSummary},
};

/// Errors raised by [`Appender`] runs.
#[derive(Debug, Error)]
pub enum AppendError {
    /// A required argument was absent.
    #[error("{argument} must be provided")]
    ArgumentNull {
        /// Name of the missing argument.
        argument: &'static str,
    },
    /// A setting was outside its valid range when the run started.
    #[error("invalid {setting}: {value}")]
    InvalidConfiguration {
        /// Setting name.
        setting: &'static str,
        /// Rejected value.
        value: u64,
    },
    /// The source or destination store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Strict mode found a destination field with no source.
    #[error("no value for field {field} of dataset {dataset}")]
    MissingField {
        /// Destination dataset.
        dataset: String,
        /// Destination field with no converter and no same-named source field.
        field: String,
    },
    /// A converter failed.
    #[error("converter for field {field} failed: {source}")]
    Convert {
        /// Destination field the converter was registered for.
        field: String,
        /// Converter error.
        #[source]
        source: ConvertError,
    },
    /// A geometry converter returned something other than a geometry.
    #[error("converter for geometry field {field} of dataset {dataset} returned {found:?}")]
    InvalidGeometryValue {
        /// Destination dataset.
        dataset: String,
        /// Destination geometry field.
        field: String,
        /// Type of the value the converter produced.
        found: Option<FieldType>,
    },
}

/// Configurable append orchestrator.
///
/// Settings are checked when a run starts, not when they are set.
///
/// # Examples
///
/// ```
/// use geoload_core::{Appender, Dataset, MemoryDataset, convert::copy_from};
/// # use geoload_core::{FieldDescriptor, FieldSet, FieldType, Value};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let fields = |name: &str| FieldSet::new(vec![
/// #     FieldDescriptor::new("OBJECTID", FieldType::ObjectId),
/// #     FieldDescriptor::new(name, FieldType::String),
/// # ]);
/// let source = MemoryDataset::new("roads_raw", fields("ROAD_NAME")?);
/// # source.push(vec![Value::Null, Value::from("Kirkgate")])?;
/// let destination = MemoryDataset::new("roads", fields("STREET")?);
///
/// let mut reports = Vec::new();
/// let written = Appender::new()
///     .converter("Street", copy_from("road_name"))
///     .on_progress(|percent| reports.push(percent))
///     .append_dataset(&source, None, Some(&destination))?;
///
/// assert_eq!(written, 1);
/// assert_eq!(destination.rows()[0].get("STREET"), Some(&Value::from("Kirkgate")));
/// assert_eq!(reports, vec![100]);
/// # Ok(())
/// # }
/// ```
pub struct Appender<'a> {
    converters: FieldConverterRegistry<'a>,
    skip_fields: SkipFields,
    flush_every: u64,
    progress_every_percent: u32,
    strict: bool,
    bulk_load: bool,
    on_progress: Option<ProgressCallback<'a>>,
}

impl Default for Appender<'_> {
    fn default() -> Self {
        Self {
            converters: FieldConverterRegistry::new(),
            skip_fields: SkipFields::new(),
            flush_every: DEFAULT_FLUSH_EVERY.get(),
            progress_every_percent: DEFAULT_PROGRESS_STEP.get(),
            strict: false,
            bulk_load: true,
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for Appender<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appender")
            .field("converters", &self.converters)
            .field("skip_fields", &self.skip_fields)
            .field("flush_every", &self.flush_every)
            .field("progress_every_percent", &self.progress_every_percent)
            .field("strict", &self.strict)
            .field("bulk_load", &self.bulk_load)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

struct CopyPlan {
    dataset: String,
    fields: Arc<FieldSet>,
    skip: SkipFields,
    geometry_field: Option<String>,
}

impl CopyPlan {
    fn new(destination: &dyn Dataset, configured: &SkipFields) -> Self {
        let geometry_field = destination
            .geometry_field()
            .filter(|name| !configured.contains(name));
        let mut skip = configured.clone();
        skip.extend(destination.object_id_field());
        skip.extend(destination.geometry_field());
        Self {
            dataset: destination.name().to_owned(),
            fields: destination.fields(),
            skip,
            geometry_field,
        }
    }
}

/// Where copied rows go: a bulk-load session, or a plain unbuffered insert
/// handle that leaves the lock and load-only mode alone.
enum RowSink<'d> {
    Bulk(BulkLoadWriter<'d>),
    Plain {
        handle: Box<dyn InsertHandle + 'd>,
        rows_inserted: u64,
    },
}

impl<'d> RowSink<'d> {
    fn open(
        destination: &'d dyn Dataset,
        bulk_load: bool,
        flush_every: NonZeroU64,
    ) -> Result<Self, StoreError> {
        if bulk_load {
            return BulkLoadWriter::begin(destination, flush_every).map(Self::Bulk);
        }
        log::debug!("plain append started on {}", destination.name());
        Ok(Self::Plain {
            handle: destination.begin_insert(false)?,
            rows_inserted: 0,
        })
    }

    fn insert(&mut self, row: RowBuffer) -> Result<i64, StoreError> {
        match self {
            Self::Bulk(writer) => writer.insert(row),
            Self::Plain {
                handle,
                rows_inserted,
            } => {
                let object_id = handle.insert(row)?;
                *rows_inserted += 1;
                Ok(object_id)
            }
        }
    }

    fn finish(self) -> Result<LoadSummary, StoreError> {
        match self {
            Self::Bulk(writer) => writer.finish(),
            Self::Plain { rows_inserted, .. } => Ok(LoadSummary {
                rows_inserted,
                flushes: 0,
            }),
        }
    }
}

struct LoadSession<'d, 'p, 'cb> {
    writer: RowSink<'d>,
    progress: ProgressReporter<'p, 'cb>,
    written: u64,
}

impl LoadSession<'_, '_, '_> {
    fn pump(
        &mut self,
        source: &mut dyn RecordSource,
        plan: &CopyPlan,
        converters: &FieldConverterRegistry<'_>,
        strict: bool,
    ) -> Result<(), AppendError> {
        while source.advance()? {
            let Some(row) = source.current() else {
                break;
            };
            let mut buffer = RowBuffer::new(Arc::clone(&plan.fields));
            copy_row(row, &mut buffer, plan, converters, strict)?;
            self.writer.insert(buffer)?;
            self.written += 1;
            self.progress.record(self.written);
        }
        Ok(())
    }
}

impl<'a> Appender<'a> {
    /// Orchestrator with default settings: flush every 10,000 rows, report
    /// every 10 percent, lenient field resolution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a converter for a destination field.
    #[must_use]
    pub fn converter(mut self, field: &str, converter: impl FieldConverter + 'a) -> Self {
        self.converters.register(field, converter);
        self
    }

    /// Exclude a destination field from the copy step.
    #[must_use]
    pub fn skip_field(mut self, field: &str) -> Self {
        self.skip_fields.insert(field);
        self
    }

    /// Rows between flushes. Must be positive.
    #[must_use]
    pub const fn flush_every(mut self, rows: u64) -> Self {
        self.flush_every = rows;
        self
    }

    /// Percentage step between progress reports, from 1 to 100.
    #[must_use]
    pub const fn progress_every_percent(mut self, percent: u32) -> Self {
        self.progress_every_percent = percent;
        self
    }

    /// Fail the run when a destination field has neither a converter nor a
    /// same-named source field.
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Load through a bulk-load session (the default) or, when `false`,
    /// insert row by row without touching the destination's lock or
    /// load-only mode. The plain path also serves destinations that have no
    /// load-only mode; it never flushes.
    #[must_use]
    pub const fn bulk_load(mut self, enabled: bool) -> Self {
        self.bulk_load = enabled;
        self
    }

    /// Receive completed percentages. A panicking callback aborts the run;
    /// the destination's lock and load-only state are still restored.
    #[must_use]
    pub fn on_progress(mut self, callback: impl FnMut(u32) + 'a) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Registered converters.
    #[must_use]
    pub const fn converters(&self) -> &FieldConverterRegistry<'a> {
        &self.converters
    }

    /// Configured skip fields, excluding the per-run object-id and geometry
    /// fields.
    #[must_use]
    pub const fn skip_fields(&self) -> &SkipFields {
        &self.skip_fields
    }

    /// Append every row of `source` to `destination`.
    ///
    /// `total_expected` drives progress reporting only. A `None` source
    /// writes nothing and returns zero.
    ///
    /// # Errors
    ///
    /// - [`AppendError::ArgumentNull`] when `destination` is `None`.
    /// - [`AppendError::InvalidConfiguration`] for a zero flush interval or a
    ///   progress step outside `1..=100`.
    /// - [`StoreError::UnsupportedOperation`] (wrapped) when bulk loading is
    ///   on and the destination has no load-only mode, before any lock is
    ///   taken.
    /// - Converter, strict-mode and store failures met while copying; the
    ///   destination is restored before they are returned.
    pub fn append(
        &mut self,
        source: Option<&mut dyn RecordSource>,
        destination: Option<&dyn Dataset>,
        total_expected: u64,
    ) -> Result<u64, AppendError> {
        let target = destination.ok_or(AppendError::ArgumentNull {
            argument: "destination",
        })?;
        let Some(records) = source else {
            return Ok(0);
        };
        self.run(target, total_expected, |session, plan, converters, strict| {
            session.pump(records, plan, converters, strict)
        })
    }

    /// Append the rows of `source` matching `predicate` (all rows for `None`).
    ///
    /// # Errors
    ///
    /// As for [`Appender::append`], plus failures counting or reading the
    /// source.
    pub fn append_dataset(
        &mut self,
        source: &dyn Dataset,
        predicate: Option<&Predicate>,
        destination: Option<&dyn Dataset>,
    ) -> Result<u64, AppendError> {
        let target = destination.ok_or(AppendError::ArgumentNull {
            argument: "destination",
        })?;
        let total = source.count(predicate)?;
        let mut records = CursorSource::new(source.search(predicate, true)?);
        self.append(Some(&mut records), Some(target), total)
    }

    /// Append the source rows whose object ids are listed.
    ///
    /// Ids are split into membership predicates of at most
    /// [`MAX_OBJECT_IDS_PER_PREDICATE`] entries, all loaded in one bulk-load
    /// session. Progress is measured against the number of ids. An empty id
    /// list writes nothing.
    ///
    /// # Errors
    ///
    /// As for [`Appender::append_dataset`].
    pub fn append_object_ids(
        &mut self,
        source: &dyn Dataset,
        destination: Option<&dyn Dataset>,
        object_ids: &[i64],
    ) -> Result<u64, AppendError> {
        let target = destination.ok_or(AppendError::ArgumentNull {
            argument: "destination",
        })?;
        if object_ids.is_empty() {
            return Ok(0);
        }
        let total = u64::try_from(object_ids.len()).unwrap_or(u64::MAX);
        let chunks = Predicate::object_id_chunks(object_ids, MAX_OBJECT_IDS_PER_PREDICATE);
        self.run(target, total, |session, plan, converters, strict| {
            for predicate in &chunks {
                let mut records = CursorSource::new(source.search(Some(predicate), true)?);
                session.pump(&mut records, plan, converters, strict)?;
            }
            Ok(())
        })
    }

    /// Append in-memory transfer records, matched to destination fields by
    /// name or through registered converters. A record's geometry is its
    /// first geometry value. Progress is measured against the number of
    /// records; an empty list writes nothing.
    ///
    /// # Errors
    ///
    /// As for [`Appender::append`].
    pub fn append_records(
        &mut self,
        records: &[Record],
        destination: Option<&dyn Dataset>,
    ) -> Result<u64, AppendError> {
        let target = destination.ok_or(AppendError::ArgumentNull {
            argument: "destination",
        })?;
        if records.is_empty() {
            return Ok(0);
        }
        let total = u64::try_from(records.len()).unwrap_or(u64::MAX);
        let mut source = RecordListSource::new(records);
        self.append(Some(&mut source), Some(target), total)
    }

    /// Copy geometry and attributes of one source row into `buffer`.
    ///
    /// # Errors
    ///
    /// Converter failures, strict-mode misses and source read failures.
    pub fn copy_row(
        &self,
        source: &dyn SourceRow,
        buffer: &mut RowBuffer,
        destination: &dyn Dataset,
    ) -> Result<(), AppendError> {
        let plan = CopyPlan::new(destination, &self.skip_fields);
        copy_row(source, buffer, &plan, &self.converters, self.strict)
    }

    fn settings(&self) -> Result<(NonZeroU64, NonZeroU32), AppendError> {
        let flush_every =
            NonZeroU64::new(self.flush_every).ok_or(AppendError::InvalidConfiguration {
                setting: "flush_every",
                value: self.flush_every,
            })?;
        let step = NonZeroU32::new(self.progress_every_percent)
            .filter(|step| step.get() <= 100)
            .ok_or(AppendError::InvalidConfiguration {
                setting: "progress_every_percent",
                value: u64::from(self.progress_every_percent),
            })?;
        Ok((flush_every, step))
    }

    fn run<F>(
        &mut self,
        destination: &dyn Dataset,
        total_expected: u64,
        load: F,
    ) -> Result<u64, AppendError>
    where
        F: FnOnce(
            &mut LoadSession<'_, '_, 'a>,
            &CopyPlan,
            &FieldConverterRegistry<'a>,
            bool,
        ) -> Result<(), AppendError>,
    {
        let (flush_every, step) = self.settings()?;
        let plan = CopyPlan::new(destination, &self.skip_fields);
        let mut session = LoadSession {
            writer: RowSink::open(destination, self.bulk_load, flush_every)?,
            progress: ProgressReporter::new(total_expected, step, self.on_progress.as_mut()),
            written: 0,
        };
        load(&mut session, &plan, &self.converters, self.strict)?;
        let written = session.written;
        let summary = session.writer.finish()?;
        log::info!(
            "appended {written} rows into {} ({} flushes)",
            plan.dataset,
            summary.flushes
        );
        Ok(written)
    }
}

fn copy_row(
    source: &dyn SourceRow,
    buffer: &mut RowBuffer,
    plan: &CopyPlan,
    converters: &FieldConverterRegistry<'_>,
    strict: bool,
) -> Result<(), AppendError> {
    if let Some(geometry_field) = &plan.geometry_field {
        copy_geometry(source, buffer, plan, geometry_field, converters)?;
    }

    for (index, field) in plan.fields.iter().enumerate() {
        if !field.editable || plan.skip.contains(&field.name) {
            continue;
        }
        let source_index = source.find_field(&field.name);
        let value = if let Some(converter) = converters.resolve(&field.name) {
            converter
                .convert(source, source_index)
                .map_err(|err| AppendError::Convert {
                    field: field.name.clone(),
                    source: err,
                })?
        } else if let Some(position) = source_index {
            let copied = source.value(position)?;
            if field.field_type.is_guid() {
                guid_text(copied)
            } else {
                copied
            }
        } else if strict {
            return Err(AppendError::MissingField {
                dataset: plan.dataset.clone(),
                field: field.name.clone(),
            });
        } else {
            continue;
        };
        buffer.set_value(index, value)?;
    }
    Ok(())
}

fn copy_geometry(
    source: &dyn SourceRow,
    buffer: &mut RowBuffer,
    plan: &CopyPlan,
    geometry_field: &str,
    converters: &FieldConverterRegistry<'_>,
) -> Result<(), AppendError> {
    let Some(converter) = converters.resolve(geometry_field) else {
        if let Some(geometry) = source.geometry() {
            buffer.set_geometry(Some(geometry));
        }
        return Ok(());
    };
    let value = converter
        .convert(source, source.find_field(geometry_field))
        .map_err(|err| AppendError::Convert {
            field: geometry_field.to_owned(),
            source: err,
        })?;
    match value {
        Value::Geometry(geometry) => buffer.set_geometry(Some(geometry)),
        Value::Null => buffer.set_geometry(None),
        other => {
            return Err(AppendError::InvalidGeometryValue {
                dataset: plan.dataset.clone(),
                field: geometry_field.to_owned(),
                found: other.field_type(),
            });
        }
    }
    Ok(())
}

/// Braced upper-case text for GUID-like values; other values pass through.
fn guid_text(value: Value) -> Value {
    match value {
        Value::Guid(id) => Value::String(braced_upper(id)),
        Value::Blob(bytes) => match Uuid::from_slice(&bytes) {
            Ok(id) => Value::String(braced_upper(id)),
            Err(_) => Value::Blob(bytes),
        },
        Value::String(text) => {
            match Uuid::parse_str(text.trim_start_matches('{').trim_end_matches('}')) {
                Ok(id) => Value::String(braced_upper(id)),
                Err(_) => Value::String(text),
            }
        }
        other => other,
    }
}
