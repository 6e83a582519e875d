//! Runtime detection of which candidate column names an external table uses.
//!
//! A probe reads one sample row. The first candidate that is a key of the
//! sample wins; otherwise the field's default name is used. A missing table is
//! never defaulted: it surfaces as `SchemaNotFound`.

pub mod adapter;
pub mod catalog;

use crate::errors::{AppError, AppResult};
use crate::models::{ProbedColumnReport, TableRole};
use crate::store::{Query, RecordStore, Row};
use catalog::{FieldCandidates, LogicalField, TableSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnSource {
    Matched,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbedColumn {
    pub field: LogicalField,
    pub name: String,
    pub source: ColumnSource,
}

/// First candidate present as a key of `sample`.
pub fn first_present<'a>(sample: &Row, candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|candidate| sample.contains_key(*candidate))
}

/// Resolves one field against an optional sample row.
pub fn probe_column(sample: Option<&Row>, spec: &FieldCandidates) -> ProbedColumn {
    match sample.and_then(|row| first_present(row, spec.candidates)) {
        Some(name) => ProbedColumn {
            field: spec.field,
            name: name.to_string(),
            source: ColumnSource::Matched,
        },
        None => ProbedColumn {
            field: spec.field,
            name: spec.default.to_string(),
            source: ColumnSource::Default,
        },
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbedSchema {
    pub table: TableRole,
    pub columns: BTreeMap<LogicalField, ProbedColumn>,
    pub sample: Option<Row>,
    pub probed_at: DateTime<Utc>,
}

impl ProbedSchema {
    /// Applies a table's candidate lists to a sample row.
    ///
    /// With a sample present, a required field that matches neither a
    /// candidate nor its default is `ColumnProbeExhausted`; an optional one is
    /// left out. Without a sample every field takes its default.
    pub fn from_sample(spec: &TableSpec, sample: Option<Row>) -> AppResult<Self> {
        let mut columns = BTreeMap::new();
        for field in spec.fields {
            let probed = probe_column(sample.as_ref(), field);
            let absent = match &sample {
                Some(row) => probed.source == ColumnSource::Default && !row.contains_key(&probed.name),
                None => false,
            };
            if absent {
                if field.required {
                    return Err(AppError::ColumnProbeExhausted(format!(
                        "{} has no {} column (tried {})",
                        spec.table(),
                        field.field.as_str(),
                        field.candidates.join(", ")
                    )));
                }
                continue;
            }
            columns.insert(field.field, probed);
        }

        Ok(Self {
            table: spec.role,
            columns,
            sample,
            probed_at: Utc::now(),
        })
    }

    pub fn column(&self, field: LogicalField) -> Option<&str> {
        self.columns.get(&field).map(|column| column.name.as_str())
    }

    pub fn require(&self, field: LogicalField) -> AppResult<&str> {
        self.column(field).ok_or_else(|| {
            AppError::ColumnProbeExhausted(format!("{} has no {} column", self.table.as_str(), field.as_str()))
        })
    }

    pub fn date_column(&self) -> AppResult<&str> {
        self.require(LogicalField::Date)
    }

    pub fn guest_count_column(&self) -> AppResult<&str> {
        self.require(LogicalField::GuestCount)
    }

    pub fn table_column(&self) -> AppResult<&str> {
        self.require(LogicalField::TableIdentifier)
    }

    pub fn amount_column(&self) -> AppResult<&str> {
        self.require(LogicalField::Amount)
    }

    pub fn quantity_column(&self) -> AppResult<&str> {
        self.require(LogicalField::Quantity)
    }

    pub fn reorder_level_column(&self) -> AppResult<&str> {
        self.require(LogicalField::ReorderLevel)
    }

    pub fn sample_value(&self, field: LogicalField) -> Option<&Value> {
        let column = self.column(field)?;
        self.sample.as_ref().and_then(|row| row.get(column))
    }

    pub fn is_empty_table(&self) -> bool {
        self.sample.is_none()
    }

    pub fn column_reports(&self) -> Vec<ProbedColumnReport> {
        self.columns
            .values()
            .map(|column| ProbedColumnReport {
                field: column.field.as_str().to_string(),
                column: column.name.clone(),
                matched: column.source == ColumnSource::Matched,
            })
            .collect()
    }
}

/// Fetches at most one row of `table`. `Ok(None)` means the table exists but
/// is empty.
pub async fn sample_row(store: &dyn RecordStore, table: &str, timeout: Duration) -> AppResult<Option<Row>> {
    let query = Query::table(table).limit(1);
    let rows = tokio::time::timeout(timeout, store.query(&query))
        .await
        .map_err(|_| AppError::Timeout(format!("sampling '{}' exceeded {} ms", table, timeout.as_millis())))??;
    Ok(rows.into_iter().next())
}

/// One probe pass over a table: sample, then resolve every field.
pub async fn probe_table(store: &dyn RecordStore, spec: &TableSpec, timeout: Duration) -> AppResult<ProbedSchema> {
    let sample = sample_row(store, spec.table(), timeout).await?;
    let schema = ProbedSchema::from_sample(spec, sample)?;
    tracing::debug!(
        table = spec.table(),
        empty = schema.is_empty_table(),
        columns = ?schema.columns.values().map(|column| column.name.as_str()).collect::<Vec<_>>(),
        "probed table schema"
    );
    Ok(schema)
}
