use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("SCHEMA_NOT_FOUND: {0}")]
    SchemaNotFound(String),
    #[error("COLUMN_PROBE_EXHAUSTED: {0}")]
    ColumnProbeExhausted(String),
    #[error("FILTER_UNAVAILABLE: {0}")]
    FilterConstruction(String),
    #[error("QUERY_FAILED: {0}")]
    Query(String),
    #[error("QUERY_TIMEOUT: {0}")]
    Timeout(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaNotFound(_) => "SCHEMA_NOT_FOUND",
            Self::ColumnProbeExhausted(_) => "COLUMN_PROBE_EXHAUSTED",
            Self::FilterConstruction(_) => "FILTER_UNAVAILABLE",
            Self::Query(_) => "QUERY_FAILED",
            Self::Timeout(_) => "QUERY_TIMEOUT",
            Self::Config(_) => "CONFIG_INVALID",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// The error without its code prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::SchemaNotFound(message)
            | Self::ColumnProbeExhausted(message)
            | Self::FilterConstruction(message)
            | Self::Query(message)
            | Self::Timeout(message)
            | Self::Config(message)
            | Self::Io(message)
            | Self::Internal(message) => message,
        }
    }

    pub fn requires_setup(&self) -> bool {
        matches!(self, Self::SchemaNotFound(_))
    }

    /// Errors after which a cached table schema can no longer be trusted.
    pub fn invalidates_schema(&self) -> bool {
        matches!(
            self,
            Self::SchemaNotFound(_) | Self::ColumnProbeExhausted(_) | Self::FilterConstruction(_) | Self::Query(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        let message = value.to_string();
        if message.contains("no such table") {
            Self::SchemaNotFound(message)
        } else {
            Self::Query(message)
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout(value.to_string())
        } else {
            Self::Query(value.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn missing_sqlite_table_maps_to_schema_not_found() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        let error = conn.prepare("SELECT * FROM reservations").expect_err("missing table");
        let mapped = AppError::from(error);
        assert_eq!(mapped.code(), "SCHEMA_NOT_FOUND");
        assert!(mapped.requires_setup());
    }

    #[test]
    fn display_carries_code_prefix() {
        let error = AppError::Query("permission denied".to_string());
        assert_eq!(error.to_string(), "QUERY_FAILED: permission denied");
        assert_eq!(error.detail(), "permission denied");
        assert!(!AppError::Timeout("slow".to_string()).invalidates_schema());
    }

    #[test]
    fn every_variant_prefixes_its_code() {
        let errors = [
            AppError::SchemaNotFound("m".to_string()),
            AppError::ColumnProbeExhausted("m".to_string()),
            AppError::FilterConstruction("m".to_string()),
            AppError::Query("m".to_string()),
            AppError::Timeout("m".to_string()),
            AppError::Config("m".to_string()),
            AppError::Io("m".to_string()),
            AppError::Internal("m".to_string()),
        ];
        for error in errors {
            assert_eq!(error.to_string(), format!("{}: m", error.code()));
            assert_eq!(error.detail(), "m");
        }
    }
}
