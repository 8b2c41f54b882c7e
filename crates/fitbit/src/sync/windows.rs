//! Calendar window generation
//!
//! Pure functions of their inputs; iterating twice over the same arguments
//! yields the same windows.

use chrono::{Datelike, Months, NaiveDate};

use crate::catalog::Granularity;

/// One concrete period to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWindow {
    /// Stable key used for dedup/resume (`"2021"` or `"2021-03"`)
    pub period_key: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl SyncWindow {
    /// The degenerate window of a single-value endpoint
    pub fn whole() -> Self {
        Self {
            period_key: None,
            start: None,
            end: None,
        }
    }

    pub fn period(key: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            period_key: Some(key.into()),
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.period_key.as_deref()
    }

    /// Inclusive date bounds, if any
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.start?, self.end?))
    }
}

/// Lazy sequence of windows for one granularity
#[derive(Debug, Clone)]
pub struct Windows {
    granularity: Granularity,
    /// First day of the next period to yield
    next: Option<NaiveDate>,
    now: NaiveDate,
}

/// Windows a granularity needs between the account start and `now`
///
/// - `Once` yields a single window with no bounds.
/// - `Year` yields every calendar year from the start's year through `now`.
/// - `Month` yields every calendar month from the start's month through `now`.
///
/// An account start after `now` yields nothing for periodic granularities.
pub fn windows(granularity: Granularity, account_start: NaiveDate, now: NaiveDate) -> Windows {
    let next = match granularity {
        // Any date works as a marker; the `Once` arm never reads it.
        Granularity::Once => Some(account_start),
        Granularity::Year => floor_year(account_start),
        Granularity::Month => floor_month(account_start),
    }
    .filter(|_| granularity == Granularity::Once || account_start <= now);

    Windows {
        granularity,
        next,
        now,
    }
}

impl Iterator for Windows {
    type Item = SyncWindow;

    fn next(&mut self) -> Option<SyncWindow> {
        let start = self.next.take()?;

        let window = match self.granularity {
            Granularity::Once => return Some(SyncWindow::whole()),
            Granularity::Year => {
                let end = NaiveDate::from_ymd_opt(start.year(), 12, 31)?;
                SyncWindow::period(start.format("%Y").to_string(), start, end)
            }
            Granularity::Month => {
                let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
                SyncWindow::period(start.format("%Y-%m").to_string(), start, end)
            }
        };

        self.next = window
            .end
            .and_then(|end| end.succ_opt())
            .filter(|next| *next <= self.now);

        Some(window)
    }
}

fn floor_year(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), 1, 1)
}

fn floor_month(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)
}
