//! Month window resolution
//!
//! A run always targets one calendar month, expressed as the half-open date
//! interval `[start, end)`. The current month comes from an injected [`Clock`]
//! so tests can pin "today".

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{InvoiceError, Result};
use crate::models::Provider;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 9999;

/// Source of the current calendar date
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Host clock, local calendar date
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a fixed date
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Half-open `[start, end)` interval covering exactly one calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    /// Resolve a window from optional CLI input.
    ///
    /// Both omitted selects the clock's current month; a month without a year
    /// uses the clock's current year. A year without a month is rejected.
    pub fn resolve(month: Option<u32>, year: Option<i32>, clock: &dyn Clock) -> Result<Self> {
        let today = clock.today();
        match (month, year) {
            (None, None) => Self::for_month(today.year(), today.month()),
            (Some(month), None) => Self::for_month(today.year(), month),
            (Some(month), Some(year)) => Self::for_month(year, month),
            (None, Some(year)) => Err(InvoiceError::InvalidDateSpec(format!(
                "year {} given without a month",
                year
            ))),
        }
    }

    /// Window for a specific month of a specific year
    pub fn for_month(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(InvoiceError::InvalidDateSpec(format!(
                "month must be between 1 and 12, got {}",
                month
            )));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(InvoiceError::InvalidDateSpec(format!(
                "year must be between {} and {}, got {}",
                MIN_YEAR, MAX_YEAR, year
            )));
        }

        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };

        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            InvoiceError::InvalidDateSpec(format!("no such date {}-{:02}-01", year, month))
        })?;
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1).ok_or_else(|| {
            InvoiceError::InvalidDateSpec(format!(
                "no such date {}-{:02}-01",
                next_year, next_month
            ))
        })?;

        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Exclusive upper bound
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn month(&self) -> u32 {
        self.start.month()
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// `MM_YYYY`, used in directory names
    pub fn label(&self) -> String {
        self.start.format("%m_%Y").to_string()
    }

    /// `invoices_<provider>_MM_YYYY`
    pub fn provider_dir_name(&self, provider: Provider) -> String {
        format!("invoices_{}_{}", provider, self.label())
    }

    /// `invoices_MM_YYYY`
    pub fn consolidated_dir_name(&self) -> String {
        format!("invoices_{}", self.label())
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}
