use crate::errors::AppError;
use crate::models::{Degradation, MetricKind, MetricResult, MetricStatus, PipelineStage};
use crate::redaction::Redactor;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradeMode {
    /// Show a plausible placeholder number next to the error.
    #[default]
    Placeholder,
    /// Show no number at all.
    Unavailable,
}

/// Half-open range the placeholder for `kind` is drawn from.
pub fn placeholder_range(kind: MetricKind) -> Range<i64> {
    match kind {
        MetricKind::Revenue => 10_000..50_000,
        MetricKind::GuestsTonight => 100..300,
        MetricKind::TablesBooked => 5..20,
        MetricKind::LowStock => 1..10,
    }
}

/// Turns pipeline failures into something a dashboard card can always render.
#[derive(Debug, Clone, Default)]
pub struct DegradationPolicy {
    mode: DegradeMode,
    redactor: Redactor,
}

impl DegradationPolicy {
    pub fn new(mode: DegradeMode, redactor: Redactor) -> Self {
        Self { mode, redactor }
    }

    pub fn describe(&self, stage: PipelineStage, error: &AppError) -> Degradation {
        Degradation {
            stage,
            code: error.code().to_string(),
            message: self.redactor.redact(error.detail()),
            setup_required: error.requires_setup(),
        }
    }

    pub fn degrade(&self, kind: MetricKind, stage: PipelineStage, error: &AppError) -> MetricResult {
        tracing::warn!(
            metric = kind.as_str(),
            stage = stage.as_str(),
            code = error.code(),
            error = %error,
            "metric degraded"
        );

        let (value, status) = match self.mode {
            DegradeMode::Placeholder => {
                let placeholder = rand::rng().random_range(placeholder_range(kind));
                (Some(placeholder as f64), MetricStatus::Placeholder)
            }
            DegradeMode::Unavailable => (None, MetricStatus::Unavailable),
        };

        MetricResult {
            metric: kind,
            value,
            prior_value: None,
            change_percent: None,
            status,
            degradation: Some(self.describe(stage, error)),
            computed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{placeholder_range, DegradationPolicy, DegradeMode};
    use crate::errors::AppError;
    use crate::models::{MetricKind, MetricStatus, PipelineStage};
    use crate::redaction::Redactor;

    #[test]
    fn placeholders_stay_inside_documented_ranges() {
        let policy = DegradationPolicy::default();
        for kind in MetricKind::ALL {
            let range = placeholder_range(kind);
            for _ in 0..200 {
                let result = policy.degrade(kind, PipelineStage::Querying, &AppError::Query("boom".to_string()));
                let value = result.value.expect("placeholder value") as i64;
                assert!(range.contains(&value), "{} outside {:?}", value, range);
                assert_eq!(result.status, MetricStatus::Placeholder);
            }
        }
    }

    #[test]
    fn missing_table_is_flagged_for_setup() {
        let policy = DegradationPolicy::default();
        let result = policy.degrade(
            MetricKind::TablesBooked,
            PipelineStage::Probing,
            &AppError::SchemaNotFound("no such table: reservations".to_string()),
        );
        let degradation = result.degradation.expect("degradation");
        assert!(degradation.setup_required);
        assert_eq!(degradation.code, "SCHEMA_NOT_FOUND");
        assert_eq!(degradation.stage, PipelineStage::Probing);
        assert_eq!(degradation.message, "no such table: reservations");
        let value = result.value.expect("placeholder") as i64;
        assert!((5..20).contains(&value));
    }

    #[test]
    fn unavailable_mode_never_fabricates_a_value() {
        let policy = DegradationPolicy::new(DegradeMode::Unavailable, Redactor::new(true));
        let result = policy.degrade(
            MetricKind::Revenue,
            PipelineStage::Filtering,
            &AppError::FilterConstruction("no sample".to_string()),
        );
        assert!(result.value.is_none());
        assert_eq!(result.status, MetricStatus::Unavailable);
        assert!(result.is_degraded());
    }

    #[test]
    fn surfaced_message_is_redacted() {
        let policy = DegradationPolicy::new(DegradeMode::Placeholder, Redactor::new(false));
        let result = policy.degrade(
            MetricKind::Revenue,
            PipelineStage::Querying,
            &AppError::Query("401 on 'payments': apikey=secretvalue123 is invalid".to_string()),
        );
        let message = result.degradation.expect("degradation").message;
        assert!(!message.contains("secretvalue123"));
    }
}
