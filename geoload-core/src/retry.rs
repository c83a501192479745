//! Bounded retries for opening data sources that fail transiently.

use std::fmt;

use thiserror::Error;

/// Default number of attempts made by [`open_with_retry`] callers.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Errors returned by [`open_with_retry`].
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    /// Every attempt failed.
    #[error("gave up after {attempts} attempts: {}", last_message(.errors))]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// One error per attempt, oldest first.
        errors: Vec<E>,
    },
}

impl<E: fmt::Display> RetryError<E> {
    /// Attempts made before giving up.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::MaxRetriesExceeded { attempts, .. } => *attempts,
        }
    }

    /// Every attempt's error, oldest first.
    #[must_use]
    pub fn errors(&self) -> &[E] {
        match self {
            Self::MaxRetriesExceeded { errors, .. } => errors,
        }
    }

    /// The error from the final attempt.
    #[must_use]
    pub fn last(&self) -> Option<&E> {
        self.errors().last()
    }
}

fn last_message<E: fmt::Display>(errors: &[E]) -> String {
    errors
        .last()
        .map_or_else(|| "no error recorded".to_owned(), ToString::to_string)
}

/// Call `open` up to `max_attempts` times until it succeeds.
///
/// `open` receives the 1-based attempt number. A `max_attempts` of zero is
/// treated as one.
///
/// # Errors
///
/// Returns [`RetryError`] carrying every attempt's error when none succeed.
///
/// # Examples
///
/// ```
/// use geoload_core::retry::open_with_retry;
///
/// let opened = open_with_retry(3, |attempt| {
///     if attempt < 3 { Err(format!("busy on attempt {attempt}")) } else { Ok(attempt) }
/// });
/// assert_eq!(opened.ok(), Some(3));
/// ```
pub fn open_with_retry<T, E, F>(max_attempts: u32, mut open: F) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let attempts = max_attempts.max(1);
    let mut errors = Vec::new();
    for attempt in 1..=attempts {
        match open(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                log::warn!("attempt {attempt} of {attempts} failed: {err}");
                errors.push(err);
            }
        }
    }
    Err(RetryError::MaxRetriesExceeded { attempts, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn succeeds_on_first_try() {
        let mut calls = 0;
        let value = open_with_retry(3, |_| {
            calls += 1;
            Ok::<_, String>("open")
        })
        .expect("opened");
        assert_eq!(value, "open");
        assert_eq!(calls, 1);
    }

    #[rstest]
    fn collects_every_failure() {
        let err = open_with_retry(3, |attempt| Err::<(), _>(format!("locked #{attempt}")))
            .expect_err("never opens");
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.errors(), ["locked #1", "locked #2", "locked #3"]);
        assert_eq!(err.last().map(String::as_str), Some("locked #3"));
        assert_eq!(err.to_string(), "gave up after 3 attempts: locked #3");
    }

    #[rstest]
    fn zero_attempts_still_tries_once() {
        let mut calls = 0;
        let err = open_with_retry(0, |_| {
            calls += 1;
            Err::<(), _>("nope")
        })
        .expect_err("fails");
        assert_eq!(calls, 1);
        assert_eq!(err.attempts(), 1);
    }
}
