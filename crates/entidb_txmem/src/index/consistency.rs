//! Consistency reports of ordered structures.

use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;
use std::fmt::{Debug, Write};

/// Outcome of a consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyState {
    /// Every invariant holds.
    Consistent,
    /// At least one invariant is violated.
    Broken,
}

/// Result of a consistency check with a human readable diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    state: ConsistencyState,
    report: Option<String>,
}

impl ConsistencyReport {
    /// A report without findings.
    #[must_use]
    pub fn consistent() -> Self {
        Self {
            state: ConsistencyState::Consistent,
            report: None,
        }
    }

    /// Returns the state.
    #[must_use]
    pub fn state(&self) -> ConsistencyState {
        self.state
    }

    /// Returns the diagnostic text of a broken structure.
    #[must_use]
    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    /// Returns true if no invariant is violated.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.state == ConsistencyState::Consistent
    }

    /// Converts a broken report into [`CoreError::ConsistencyViolation`].
    ///
    /// # Errors
    ///
    /// Fails when the report is broken.
    pub fn into_result(self) -> CoreResult<()> {
        match self.report {
            Some(report) if self.state == ConsistencyState::Broken => {
                Err(CoreError::consistency_violation(report))
            }
            _ => Ok(()),
        }
    }
}

/// Checks that bucket values strictly increase and no bucket is empty.
///
/// `buckets` yields each bucket's value and record count.
pub(crate) fn check_buckets<'a, T, I>(buckets: I, comparator: &dyn Fn(&T, &T) -> Ordering) -> ConsistencyReport
where
    T: Debug + 'a,
    I: IntoIterator<Item = (&'a T, usize)>,
{
    let mut report = String::new();
    let mut previous: Option<&T> = None;
    for (value, records) in buckets {
        if let Some(prev) = previous {
            if comparator(prev, value) != Ordering::Less {
                let _ = writeln!(
                    report,
                    "bucket values are not monotonic - conflicting values: {prev:?}, {value:?}."
                );
            }
        }
        if records == 0 {
            let _ = writeln!(report, "bucket {value:?} holds no record ids.");
        }
        previous = Some(value);
    }

    if report.is_empty() {
        ConsistencyReport::consistent()
    } else {
        ConsistencyReport {
            state: ConsistencyState::Broken,
            report: Some(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(values: &[(i32, usize)]) -> ConsistencyReport {
        check_buckets(values.iter().map(|(v, n)| (v, *n)), &|a: &i32, b: &i32| a.cmp(b))
    }

    #[test]
    fn increasing_values_are_consistent() {
        let report = check(&[(1, 1), (3, 2), (8, 1)]);
        assert!(report.is_consistent());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn duplicates_are_reported() {
        let report = check(&[(1, 1), (1, 1)]);
        assert_eq!(report.state(), ConsistencyState::Broken);
        assert!(report.report().unwrap().contains("conflicting values: 1, 1"));
    }

    #[test]
    fn decreasing_and_empty_buckets_are_reported() {
        let report = check(&[(5, 1), (2, 0)]);
        let text = report.report().unwrap();
        assert!(text.contains("5, 2"));
        assert!(text.contains("bucket 2 holds no record ids"));
        assert!(matches!(
            report.into_result(),
            Err(CoreError::ConsistencyViolation { .. })
        ));
    }
}
