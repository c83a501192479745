//! Percent-based progress throttling shared by appends and joins.

use std::num::NonZeroU32;

/// Default percentage step between progress callbacks.
pub const DEFAULT_PROGRESS_STEP: NonZeroU32 = match NonZeroU32::new(10) {
    Some(step) => step,
    None => NonZeroU32::MIN,
};

/// Callback receiving the completed percentage.
pub type ProgressCallback<'a> = Box<dyn FnMut(u32) + 'a>;

/// Decides when a progress callback should fire.
///
/// The completed percentage is `floor(100 * current / total)`, computed in
/// integer arithmetic. A report fires the first time the percentage reaches
/// the next multiple of `step`; the threshold then moves to the first
/// multiple of `step` above the reported percentage, so several boundaries
/// crossed at once produce a single report.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroU32;
/// use geoload_core::ProgressTracker;
///
/// let step = NonZeroU32::new(20).unwrap();
/// let mut tracker = ProgressTracker::new(25, step);
/// let fired: Vec<u32> = (1..=25).filter_map(|row| tracker.record(row)).collect();
/// assert_eq!(fired, vec![20, 40, 60, 80, 100]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTracker {
    total: u64,
    step: u32,
    next_threshold: u32,
}

impl ProgressTracker {
    /// Track progress towards `total` rows, reporting every `step` percent.
    #[must_use]
    pub const fn new(total: u64, step: NonZeroU32) -> Self {
        Self {
            total,
            step: step.get(),
            next_threshold: step.get(),
        }
    }

    /// Percentage the next report waits for.
    #[must_use]
    pub const fn next_threshold(&self) -> u32 {
        self.next_threshold
    }

    /// Record that `current` rows are done, returning the percentage to
    /// report when a threshold was reached.
    ///
    /// Never reports for a total of zero or a percentage of zero.
    pub fn record(&mut self, current: u64) -> Option<u32> {
        let percent = percent_complete(current, self.total)?;
        if percent == 0 || percent < self.next_threshold {
            return None;
        }
        let crossed = percent.checked_div(self.step)?;
        self.next_threshold = crossed.saturating_add(1).saturating_mul(self.step);
        Some(percent)
    }
}

/// `floor(100 * current / total)`, or `None` for a total of zero.
fn percent_complete(current: u64, total: u64) -> Option<u32> {
    let scaled = u128::from(current).checked_mul(100)?;
    let percent = scaled.checked_div(u128::from(total))?;
    Some(u32::try_from(percent).unwrap_or(u32::MAX))
}

/// Pairs a tracker with an optional callback.
pub(crate) struct ProgressReporter<'a, 'cb> {
    tracker: ProgressTracker,
    callback: Option<&'a mut ProgressCallback<'cb>>,
}

impl<'a, 'cb> ProgressReporter<'a, 'cb> {
    pub(crate) fn new(
        total: u64,
        step: NonZeroU32,
        callback: Option<&'a mut ProgressCallback<'cb>>,
    ) -> Self {
        Self {
            tracker: ProgressTracker::new(total, step),
            callback,
        }
    }

    pub(crate) fn record(&mut self, current: u64) {
        let Some(callback) = self.callback.as_mut() else {
            return;
        };
        if let Some(percent) = self.tracker.record(current) {
            callback(percent);
        }
    }
}
