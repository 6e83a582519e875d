//! Date-window predicates for probed date columns.
//!
//! A column is treated as date-time when the string form of its sample value
//! contains a `T` separator, and as a plain calendar date otherwise. Windows use
//! the local calendar day; no UTC normalisation happens here.

use crate::errors::{AppError, AppResult};
use crate::store::Filter;
use chrono::{Datelike, Local, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Source of "today" for window construction.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub fn local_clock() -> Clock {
    Arc::new(|| Local::now().date_naive())
}

pub fn fixed_clock(date: NaiveDate) -> Clock {
    Arc::new(move || date)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnKind {
    DateOnly,
    DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Period {
    Day,
    Month,
}

/// Classifies a date column from one sample value. Fails closed when there is
/// nothing to look at.
pub fn classify_sample(column: &str, sample: Option<&Value>) -> AppResult<ColumnKind> {
    let rendered = match sample {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.trim().to_string()),
        Some(other) => Some(other.to_string()),
    };
    match rendered {
        Some(text) if !text.is_empty() => {
            if text.contains('T') {
                Ok(ColumnKind::DateTime)
            } else {
                Ok(ColumnKind::DateOnly)
            }
        }
        _ => Err(AppError::FilterConstruction(format!(
            "no sample value for date column '{}'",
            column
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalWindow {
    pub kind: ColumnKind,
    pub period: Period,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TemporalWindow {
    pub fn day(kind: ColumnKind, date: NaiveDate) -> Self {
        let end = match kind {
            ColumnKind::DateOnly => date.and_time(NaiveTime::MIN),
            ColumnKind::DateTime => date.and_hms_opt(23, 59, 59).unwrap_or_else(|| date.and_time(NaiveTime::MIN)),
        };
        Self {
            kind,
            period: Period::Day,
            start: date.and_time(NaiveTime::MIN),
            end,
        }
    }

    pub fn month(kind: ColumnKind, date: NaiveDate) -> Self {
        Self {
            kind,
            period: Period::Month,
            start: month_start(date).and_time(NaiveTime::MIN),
            end: next_month_start(date).and_time(NaiveTime::MIN),
        }
    }

    pub fn previous_month(kind: ColumnKind, date: NaiveDate) -> Self {
        Self::month(kind, previous_month_start(date))
    }

    /// Predicates over `column`: equality for a date-only day, otherwise the
    /// half-open range `[start, end)`.
    pub fn to_filters(&self, column: &str) -> Vec<Filter> {
        match (self.period, self.kind) {
            (Period::Day, ColumnKind::DateOnly) => {
                vec![Filter::eq(column, self.start.format(DATE_FORMAT).to_string())]
            }
            (_, ColumnKind::DateOnly) => vec![
                Filter::gte(column, self.start.format(DATE_FORMAT).to_string()),
                Filter::lt(column, self.end.format(DATE_FORMAT).to_string()),
            ],
            (_, ColumnKind::DateTime) => vec![
                Filter::gte(column, self.start.format(DATE_TIME_FORMAT).to_string()),
                Filter::lt(column, self.end.format(DATE_TIME_FORMAT).to_string()),
            ],
        }
    }
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn next_month_start(date: NaiveDate) -> NaiveDate {
    let start = month_start(date);
    start.checked_add_months(Months::new(1)).unwrap_or(start)
}

pub fn previous_month_start(date: NaiveDate) -> NaiveDate {
    let start = month_start(date);
    start.checked_sub_months(Months::new(1)).unwrap_or(start)
}

#[cfg(test)]
mod tests {
    use super::{classify_sample, ColumnKind, TemporalWindow};
    use crate::store::Filter;
    use chrono::NaiveDate;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn date_only_sample_builds_equality_filter() {
        let kind = classify_sample("date", Some(&json!("2024-01-01"))).expect("kind");
        assert_eq!(kind, ColumnKind::DateOnly);

        let filters = TemporalWindow::day(kind, date(2024, 1, 1)).to_filters("date");
        assert_eq!(filters, vec![Filter::eq("date", "2024-01-01")]);
    }

    #[test]
    fn date_time_sample_builds_half_open_day_range() {
        let kind = classify_sample("created_at", Some(&json!("2024-01-01T22:00:00"))).expect("kind");
        assert_eq!(kind, ColumnKind::DateTime);

        let filters = TemporalWindow::day(kind, date(2024, 1, 1)).to_filters("created_at");
        assert_eq!(
            filters,
            vec![
                Filter::gte("created_at", "2024-01-01T00:00:00"),
                Filter::lt("created_at", "2024-01-01T23:59:59"),
            ]
        );
    }

    #[test]
    fn missing_sample_fails_closed() {
        for sample in [None, Some(json!(null)), Some(json!("  "))] {
            let error = classify_sample("date", sample.as_ref()).expect_err("no sample");
            assert_eq!(error.code(), "FILTER_UNAVAILABLE");
        }
    }

    #[test]
    fn month_windows_roll_over_year_boundaries() {
        let december = TemporalWindow::month(ColumnKind::DateOnly, date(2023, 12, 31));
        assert_eq!(
            december.to_filters("date"),
            vec![Filter::gte("date", "2023-12-01"), Filter::lt("date", "2024-01-01")]
        );

        let before_january = TemporalWindow::previous_month(ColumnKind::DateTime, date(2024, 1, 20));
        assert_eq!(
            before_january.to_filters("paid_at"),
            vec![
                Filter::gte("paid_at", "2023-12-01T00:00:00"),
                Filter::lt("paid_at", "2024-01-01T00:00:00"),
            ]
        );
    }
}
