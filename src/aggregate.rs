use crate::store::Row;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SumAggregate {
    pub total: f64,
    pub counted: usize,
    pub skipped: usize,
}

/// Numeric value of a loosely-typed field. Strings are trimmed and parsed;
/// anything else non-numeric yields `None`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Sums `column` over `rows`, dropping values that do not coerce to a number.
pub fn sum_column(rows: &[Row], column: &str) -> SumAggregate {
    let mut aggregate = SumAggregate::default();
    for row in rows {
        match row.get(column).and_then(coerce_number) {
            Some(number) => {
                aggregate.total += number;
                aggregate.counted += 1;
            }
            None => aggregate.skipped += 1,
        }
    }
    if aggregate.skipped > 0 {
        tracing::debug!(column = %column, skipped = aggregate.skipped, "dropped non-numeric values from sum");
    }
    aggregate
}

/// Number of distinct non-empty identifiers in `column`. A string `"5"` and a
/// number `5` count as the same identifier.
pub fn distinct_count(rows: &[Row], column: &str) -> usize {
    rows.iter()
        .filter_map(|row| row.get(column).and_then(identifier_key))
        .collect::<HashSet<_>>()
        .len()
}

fn identifier_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => number_key(number),
        other => Some(other.to_string()),
    }
}

/// Integral numbers key the same as their integer text, so `5`, `5.0` and
/// `"5"` name one table.
fn number_key(number: &serde_json::Number) -> Option<String> {
    if let Some(integer) = number.as_i64() {
        return Some(integer.to_string());
    }
    if let Some(integer) = number.as_u64() {
        return Some(integer.to_string());
    }
    let value = number.as_f64().filter(|value| value.is_finite())?;
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Some(format!("{}", value as i64))
    } else {
        Some(value.to_string())
    }
}

/// Rows whose `quantity` is at or below their `threshold`. Rows where either
/// side is not numeric are ignored.
pub fn count_at_or_below(rows: &[Row], quantity: &str, threshold: &str) -> usize {
    rows.iter()
        .filter(|row| {
            match (
                row.get(quantity).and_then(coerce_number),
                row.get(threshold).and_then(coerce_number),
            ) {
                (Some(quantity), Some(threshold)) => quantity <= threshold,
                _ => false,
            }
        })
        .count()
}

/// Period-over-period change in percent; zero when there is no prior value.
pub fn percent_change(current: f64, prior: f64) -> f64 {
    if prior == 0.0 {
        return 0.0;
    }
    (current - prior) / prior * 100.0
}

#[cfg(test)]
mod tests {
    use super::{coerce_number, count_at_or_below, distinct_count, percent_change, sum_column};
    use crate::store::Row;
    use serde_json::{json, Value};

    fn rows(values: Value) -> Vec<Row> {
        serde_json::from_value(values).expect("rows")
    }

    #[test]
    fn percent_change_handles_zero_prior() {
        assert_eq!(percent_change(150.0, 100.0), 50.0);
        assert_eq!(percent_change(80.0, 0.0), 0.0);
        assert_eq!(percent_change(50.0, 100.0), -50.0);
        assert!(percent_change(0.0, 0.0).is_finite());
    }

    #[test]
    fn sum_skips_unparseable_values_without_aborting() {
        let data = rows(json!([
            { "amount": 100 },
            { "amount": "N/A" },
            { "amount": " 25.5 " },
            { "amount": null },
            { "other": 3 }
        ]));
        let sum = sum_column(&data, "amount");
        assert_eq!(sum.total, 125.5);
        assert_eq!(sum.counted, 2);
        assert_eq!(sum.skipped, 3);
    }

    #[test]
    fn distinct_count_is_idempotent_under_duplication() {
        let data = rows(json!([{ "table": "5" }, { "table": "5" }, { "table": "7" }]));
        assert_eq!(distinct_count(&data, "table"), 2);

        let mixed = rows(json!([
            { "table": "5" },
            { "table": 5 },
            { "table": 5.0 },
            { "table": null },
            { "table": "  " },
            { "table": "VIP1" }
        ]));
        assert_eq!(distinct_count(&mixed, "table"), 2);

        let fractional = rows(json!([{ "table": 5.5 }, { "table": "5.5" }, { "table": 5 }]));
        assert_eq!(distinct_count(&fractional, "table"), 2);
    }

    #[test]
    fn coerce_rejects_non_finite_and_non_numeric() {
        assert_eq!(coerce_number(&json!("12")), Some(12.0));
        assert_eq!(coerce_number(&json!("NaN")), None);
        assert_eq!(coerce_number(&json!(true)), None);
        assert_eq!(coerce_number(&json!({ "amount": 1 })), None);
    }

    #[test]
    fn counts_rows_at_or_below_threshold() {
        let data = rows(json!([
            { "stock": "3", "reorder": 10 },
            { "stock": 40, "reorder": 12 },
            { "stock": 5, "reorder": "5" },
            { "stock": "lots", "reorder": 20 }
        ]));
        assert_eq!(count_at_or_below(&data, "stock", "reorder"), 2);
    }
}
