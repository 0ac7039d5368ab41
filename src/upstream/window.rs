//! Retry-window fetcher.
//!
//! Transaction-history views are too large to scan unscoped, so every query
//! carries a trailing date window anchored at the first day of the current
//! month. When a window comes back empty the fetcher shifts it one full
//! period further into the past and tries again, up to `max_attempts`
//! queries. Exhausting the attempts is not an error: the caller gets an empty
//! table and decides whether that is fatal.

use chrono::{Datelike, Months, NaiveDate};
use serde::Deserialize;

use crate::store::{StoreError, Table};

/// Window size and attempt bound for one upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryWindow {
    pub period_months: u32,
    pub max_attempts: u32,
}

impl RetryWindow {
    pub const fn new(period_months: u32, max_attempts: u32) -> Self {
        Self {
            period_months,
            max_attempts,
        }
    }

    /// Start date for the zero-based `attempt`: `anchor - period * (attempt + 1)`.
    pub fn start_for_attempt(&self, anchor: NaiveDate, attempt: u32) -> Option<NaiveDate> {
        let months = self.period_months.checked_mul(attempt + 1)?;
        anchor.checked_sub_months(Months::new(months))
    }
}

/// First day of the month containing `today`.
pub fn period_anchor(today: NaiveDate) -> NaiveDate {
    today.with_day(1).unwrap_or(today)
}

/// Outcome of a windowed fetch.
#[derive(Debug, Clone)]
pub struct WindowFetch {
    pub table: Table,
    /// Number of queries issued.
    pub attempts: u32,
    /// Start of the last window tried.
    pub from: Option<NaiveDate>,
}

impl WindowFetch {
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Run `query` with successively older window starts until it returns rows.
///
/// Query errors are returned immediately; only empty results widen the window.
pub fn fetch_with_backoff<F>(
    window: RetryWindow,
    anchor: NaiveDate,
    mut query: F,
) -> Result<WindowFetch, StoreError>
where
    F: FnMut(NaiveDate) -> Result<Table, StoreError>,
{
    let mut last_from = None;
    let mut attempts = 0;

    for attempt in 0..window.max_attempts.max(1) {
        let Some(from) = window.start_for_attempt(anchor, attempt) else {
            break;
        };
        attempts += 1;
        last_from = Some(from);

        let table = query(from)?;
        if !table.is_empty() {
            tracing::debug!(attempts, from = %from, rows = table.len(), "window fetch hit");
            return Ok(WindowFetch {
                table,
                attempts,
                from: last_from,
            });
        }
        tracing::info!(
            attempt = attempts,
            from = %from,
            period_months = window.period_months,
            "no rows in window, widening"
        );
    }

    Ok(WindowFetch {
        table: Table::empty(),
        attempts,
        from: last_from,
    })
}
