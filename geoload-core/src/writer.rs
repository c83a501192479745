//! Batched insertion under an exclusive lock with load-only mode enabled.

use std::num::NonZeroU64;

use crate::{Dataset, InsertHandle, RowBuffer, SchemaLock, StoreError};

/// Default number of rows between flushes.
pub const DEFAULT_FLUSH_EVERY: NonZeroU64 = match NonZeroU64::new(10_000) {
    Some(every) => every,
    None => NonZeroU64::MIN,
};

/// Totals reported by [`BulkLoadWriter::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    /// Rows handed to the insert handle.
    pub rows_inserted: u64,
    /// Flushes issued, including the final one.
    pub flushes: u64,
}

/// Writes rows into a dataset in bulk.
///
/// [`BulkLoadWriter::begin`] takes the exclusive schema lock, enables
/// load-only mode and opens a buffered insert handle. Rows are flushed every
/// `flush_every` inserts. [`BulkLoadWriter::finish`] flushes what is left and
/// puts the lock and load-only flag back to the values they had before
/// `begin`; if the writer is dropped without finishing (an error or a panic
/// unwound past it) the same restoration runs from `Drop`. Restoration
/// happens exactly once either way.
///
/// # Examples
///
/// ```
/// use geoload_core::{
///     BulkLoadWriter, Dataset, FieldDescriptor, FieldSet, FieldType, MemoryDataset, RowBuffer,
///     SchemaLock,
/// };
/// use std::num::NonZeroU64;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fields = FieldSet::new(vec![FieldDescriptor::new("OBJECTID", FieldType::ObjectId)])?;
/// let target = MemoryDataset::new("target", fields);
/// let mut writer = BulkLoadWriter::begin(&target, NonZeroU64::new(2).unwrap())?;
/// for _ in 0..3 {
///     writer.insert(RowBuffer::new(target.fields()))?;
/// }
/// let summary = writer.finish()?;
/// assert_eq!((summary.rows_inserted, summary.flushes), (3, 2));
/// assert_eq!(target.schema_lock(), SchemaLock::Shared);
/// assert!(!target.load_only_mode());
/// # Ok(())
/// # }
/// ```
pub struct BulkLoadWriter<'a> {
    dataset: &'a dyn Dataset,
    handle: Option<Box<dyn InsertHandle + 'a>>,
    flush_every: NonZeroU64,
    prior_lock: SchemaLock,
    prior_load_only: bool,
    rows_inserted: u64,
    rows_since_flush: u64,
    flushes: u64,
    restored: bool,
}

impl<'a> BulkLoadWriter<'a> {
    /// Prepare `dataset` for a bulk load.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedOperation`] naming the dataset when it
    /// has no load-only mode; no lock is taken in that case. Failures while
    /// taking the lock, toggling the mode or opening the insert handle are
    /// returned after the prior state has been restored.
    pub fn begin(dataset: &'a dyn Dataset, flush_every: NonZeroU64) -> Result<Self, StoreError> {
        if !dataset.supports_load_only_mode() {
            return Err(StoreError::UnsupportedOperation {
                operation: "load-only mode",
                dataset: dataset.name().to_owned(),
            });
        }

        let mut writer = Self {
            dataset,
            handle: None,
            flush_every,
            prior_lock: dataset.schema_lock(),
            prior_load_only: dataset.load_only_mode(),
            rows_inserted: 0,
            rows_since_flush: 0,
            flushes: 0,
            restored: false,
        };

        dataset.change_schema_lock(SchemaLock::Exclusive)?;
        dataset.set_load_only_mode(true)?;
        writer.handle = Some(dataset.begin_insert(true)?);
        log::debug!(
            "bulk load started on {} (flush every {} rows)",
            dataset.name(),
            flush_every
        );
        Ok(writer)
    }

    /// Insert one row and flush when the running count reaches a multiple of
    /// the flush interval.
    ///
    /// # Errors
    ///
    /// Returns the insert handle's error. The writer remains usable for
    /// cleanup; dropping it restores the dataset.
    pub fn insert(&mut self, row: RowBuffer) -> Result<i64, StoreError> {
        let object_id = self.open_handle()?.insert(row)?;
        self.rows_inserted += 1;
        self.rows_since_flush += 1;
        self.flush_if_due(self.rows_inserted)?;
        Ok(object_id)
    }

    /// Flush when `current_row` is a multiple of the flush interval and rows
    /// are pending. Returns whether a flush was issued.
    ///
    /// # Errors
    ///
    /// Returns the insert handle's flush error.
    pub fn flush_if_due(&mut self, current_row: u64) -> Result<bool, StoreError> {
        if self.rows_since_flush == 0 || !current_row.is_multiple_of(self.flush_every.get()) {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Rows inserted so far.
    #[must_use]
    pub const fn rows_inserted(&self) -> u64 {
        self.rows_inserted
    }

    /// Flushes issued so far.
    #[must_use]
    pub const fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Flush outstanding rows, release the insert handle and restore the
    /// dataset's lock and load-only flag.
    ///
    /// # Errors
    ///
    /// Returns the first failure among the final flush and the restoration
    /// steps. Restoration is attempted even when the flush fails.
    pub fn finish(mut self) -> Result<LoadSummary, StoreError> {
        let flushed = if self.rows_since_flush > 0 {
            self.flush()
        } else {
            Ok(())
        };
        let restored = self.restore();
        flushed?;
        restored?;
        log::debug!(
            "bulk load finished on {}: {} rows, {} flushes",
            self.dataset.name(),
            self.rows_inserted,
            self.flushes
        );
        Ok(LoadSummary {
            rows_inserted: self.rows_inserted,
            flushes: self.flushes,
        })
    }

    fn open_handle(&mut self) -> Result<&mut Box<dyn InsertHandle + 'a>, StoreError> {
        let dataset = self.dataset;
        self.handle
            .as_mut()
            .ok_or_else(|| StoreError::UnsupportedOperation {
                operation: "insert after the bulk load ended",
                dataset: dataset.name().to_owned(),
            })
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.open_handle()?.flush()?;
        self.flushes += 1;
        self.rows_since_flush = 0;
        log::trace!(
            "flushed {} after {} rows",
            self.dataset.name(),
            self.rows_inserted
        );
        Ok(())
    }

    fn restore(&mut self) -> Result<(), StoreError> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        self.handle = None;
        let mode = self.dataset.set_load_only_mode(self.prior_load_only);
        let lock = self.dataset.change_schema_lock(self.prior_lock);
        mode.and(lock)
    }
}

impl std::fmt::Debug for BulkLoadWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLoadWriter")
            .field("dataset", &self.dataset.name())
            .field("flush_every", &self.flush_every)
            .field("rows_inserted", &self.rows_inserted)
            .field("flushes", &self.flushes)
            .field("restored", &self.restored)
            .finish_non_exhaustive()
    }
}

impl Drop for BulkLoadWriter<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            log::warn!(
                "failed to restore lock state of {} after bulk load: {err}",
                self.dataset.name()
            );
        }
    }
}
