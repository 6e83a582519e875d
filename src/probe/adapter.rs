use crate::errors::AppResult;
use crate::models::{TableProbeReport, TableRole};
use crate::probe::catalog::table_spec;
use crate::probe::{probe_table, ProbedSchema};
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeMode {
    /// Probe once and reuse the result until a schema-related failure.
    #[default]
    Startup,
    /// Probe again on every metric refresh.
    PerRefresh,
}

/// Probed table schemas, selected once and shared by every metric pipeline.
pub struct SchemaAdapter {
    store: Arc<dyn RecordStore>,
    mode: ProbeMode,
    timeout: Duration,
    cache: RwLock<HashMap<TableRole, Arc<ProbedSchema>>>,
}

impl SchemaAdapter {
    pub fn new(store: Arc<dyn RecordStore>, mode: ProbeMode, timeout: Duration) -> Self {
        Self {
            store,
            mode,
            timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Probes every known table and caches the ones that succeed.
    pub async fn detect(&self) -> Vec<TableProbeReport> {
        let mut reports = Vec::with_capacity(TableRole::ALL.len());
        for role in TableRole::ALL {
            let report = match self.probe_and_cache(role).await {
                Ok(schema) => TableProbeReport {
                    table: role,
                    ok: true,
                    empty: schema.is_empty_table(),
                    columns: schema.column_reports(),
                    error: None,
                    setup_required: false,
                },
                Err(error) => {
                    tracing::warn!(table = role.as_str(), error = %error, "schema probe failed");
                    TableProbeReport {
                        table: role,
                        ok: false,
                        empty: false,
                        columns: Vec::new(),
                        error: Some(error.to_string()),
                        setup_required: error.requires_setup(),
                    }
                }
            };
            reports.push(report);
        }
        tracing::info!(
            store = self.store.name(),
            ok = reports.iter().filter(|report| report.ok).count(),
            total = reports.len(),
            "schema detection finished"
        );
        reports
    }

    /// The schema for `role`, probing when nothing usable is cached.
    pub async fn resolve(&self, role: TableRole) -> AppResult<Arc<ProbedSchema>> {
        if self.mode == ProbeMode::Startup {
            if let Some(schema) = self.cached(role).await {
                return Ok(schema);
            }
        }
        self.probe_and_cache(role).await
    }

    pub async fn invalidate(&self, role: TableRole) {
        let removed = self.cache.write().await.remove(&role).is_some();
        if removed {
            tracing::debug!(table = role.as_str(), "invalidated cached schema");
        }
    }

    pub async fn cached(&self, role: TableRole) -> Option<Arc<ProbedSchema>> {
        self.cache.read().await.get(&role).cloned()
    }

    async fn probe_and_cache(&self, role: TableRole) -> AppResult<Arc<ProbedSchema>> {
        let schema = Arc::new(probe_table(self.store.as_ref(), table_spec(role), self.timeout).await?);
        // An empty table gives nothing to classify dates with, so keep probing it.
        if !schema.is_empty_table() {
            self.cache.write().await.insert(role, Arc::clone(&schema));
        }
        Ok(schema)
    }
}
