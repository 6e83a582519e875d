use crate::aggregate::{coerce_number, count_at_or_below, distinct_count, percent_change, sum_column};
use crate::cards::{CardBoard, CardTicket};
use crate::config::AppConfig;
use crate::degrade::DegradationPolicy;
use crate::errors::{AppError, AppResult};
use crate::models::{
    DashboardSnapshot, GuestEntry, InventoryEntry, ListView, MetricKind, MetricResult, PipelineStage,
    TableProbeReport, TableRole,
};
use crate::probe::adapter::SchemaAdapter;
use crate::probe::catalog::LogicalField;
use crate::probe::ProbedSchema;
use crate::redaction::Redactor;
use crate::store::{Query, RecordStore, Row};
use crate::temporal::{classify_sample, local_clock, Clock, TemporalWindow};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A pipeline failure together with the stage it happened in.
#[derive(Debug)]
struct StageError {
    stage: PipelineStage,
    error: AppError,
}

impl StageError {
    fn at(stage: PipelineStage) -> impl FnOnce(AppError) -> Self {
        move |error| Self { stage, error }
    }
}

type StageResult<T> = Result<T, StageError>;

pub struct DashboardCore {
    store: Arc<dyn RecordStore>,
    schema: SchemaAdapter,
    policy: DegradationPolicy,
    cards: CardBoard,
    query_timeout: Duration,
    clock: Clock,
}

impl DashboardCore {
    pub fn new(store: Arc<dyn RecordStore>, config: &AppConfig) -> Self {
        let query_timeout = config.query_timeout();
        Self {
            schema: SchemaAdapter::new(Arc::clone(&store), config.probe_mode, query_timeout),
            policy: DegradationPolicy::new(config.degrade_mode, Redactor::new(config.redact_aggressive)),
            cards: CardBoard::new(),
            query_timeout,
            clock: local_clock(),
            store,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn cards(&self) -> &CardBoard {
        &self.cards
    }

    pub fn schema(&self) -> &SchemaAdapter {
        &self.schema
    }

    pub async fn detect_schema(&self) -> Vec<TableProbeReport> {
        self.schema.detect().await
    }

    /// Computes one metric. Failures at any stage come back as a degraded
    /// result, never as an error.
    pub async fn metric(&self, kind: MetricKind) -> MetricResult {
        self.run(kind, None).await
    }

    /// Runs one card through its pipeline. `None` when the card was unmounted
    /// or remounted before the result arrived.
    pub async fn refresh_card(&self, kind: MetricKind) -> Option<MetricResult> {
        let ticket = self.cards.mount(kind).await;
        let result = self.run(kind, Some(&ticket)).await;
        ticket.finish(result.clone()).await.then_some(result)
    }

    /// Every card, computed concurrently.
    pub async fn dashboard(&self) -> DashboardSnapshot {
        let refresh_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let (revenue, guests, tables, low_stock) = tokio::join!(
            self.metric(MetricKind::Revenue),
            self.metric(MetricKind::GuestsTonight),
            self.metric(MetricKind::TablesBooked),
            self.metric(MetricKind::LowStock),
        );
        let cards = vec![revenue, guests, tables, low_stock];

        let mut setup_required = Vec::new();
        for card in &cards {
            let table = card.metric.table();
            let needs_setup = card.degradation.as_ref().is_some_and(|degradation| degradation.setup_required);
            if needs_setup && !setup_required.contains(&table) {
                setup_required.push(table);
            }
        }

        tracing::info!(
            refresh_id = %refresh_id,
            degraded = cards.iter().filter(|card| card.is_degraded()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dashboard refreshed"
        );

        DashboardSnapshot {
            refresh_id,
            generated_at: Utc::now(),
            cards,
            setup_required,
        }
    }

    pub async fn guest_list(&self, limit: usize) -> ListView<GuestEntry> {
        let result = self.load_guests(limit).await;
        self.list_view(TableRole::Guests, result).await
    }

    pub async fn inventory_list(&self, limit: usize) -> ListView<InventoryEntry> {
        let result = self.load_inventory(limit).await;
        self.list_view(TableRole::Inventory, result).await
    }

    async fn run(&self, kind: MetricKind, ticket: Option<&CardTicket>) -> MetricResult {
        match self.compute(kind, ticket).await {
            Ok(result) => {
                tracing::debug!(metric = kind.as_str(), value = ?result.value, "metric computed");
                result
            }
            Err(StageError { stage, error }) => {
                if error.invalidates_schema() {
                    self.schema.invalidate(kind.table()).await;
                }
                self.policy.degrade(kind, stage, &error)
            }
        }
    }

    async fn list_view<T>(&self, role: TableRole, result: StageResult<Vec<T>>) -> ListView<T> {
        match result {
            Ok(items) => ListView {
                items,
                degradation: None,
            },
            Err(StageError { stage, error }) => {
                tracing::warn!(table = role.as_str(), stage = stage.as_str(), error = %error, "list view degraded");
                if error.invalidates_schema() {
                    self.schema.invalidate(role).await;
                }
                ListView {
                    items: Vec::new(),
                    degradation: Some(self.policy.describe(stage, &error)),
                }
            }
        }
    }

    async fn compute(&self, kind: MetricKind, ticket: Option<&CardTicket>) -> StageResult<MetricResult> {
        match kind {
            MetricKind::Revenue => self.revenue(ticket).await,
            MetricKind::GuestsTonight => self.guests_tonight(ticket).await,
            MetricKind::TablesBooked => self.tables_booked(ticket).await,
            MetricKind::LowStock => self.low_stock(ticket).await,
        }
    }

    async fn revenue(&self, ticket: Option<&CardTicket>) -> StageResult<MetricResult> {
        let schema = self.probe(TableRole::Payments).await?;
        let date_column = probed(schema.date_column())?;
        let amount_column = probed(schema.amount_column())?;

        advance(ticket, PipelineStage::Filtering).await;
        let column_kind = classify_sample(&date_column, schema.sample_value(LogicalField::Date))
            .map_err(StageError::at(PipelineStage::Filtering))?;
        let today = (self.clock)();
        let current = TemporalWindow::month(column_kind, today).to_filters(&date_column);
        let prior = TemporalWindow::previous_month(column_kind, today).to_filters(&date_column);

        advance(ticket, PipelineStage::Querying).await;
        let table = TableRole::Payments.as_str();
        let (current_rows, prior_rows) = tokio::try_join!(
            self.run_query(Query::table(table).select([amount_column.as_str()]).filters(current)),
            self.run_query(Query::table(table).select([amount_column.as_str()]).filters(prior)),
        )
        .map_err(StageError::at(PipelineStage::Querying))?;

        advance(ticket, PipelineStage::Aggregating).await;
        let current = sum_column(&current_rows, &amount_column);
        let prior = sum_column(&prior_rows, &amount_column);
        Ok(MetricResult::live(MetricKind::Revenue, current.total)
            .with_prior(prior.total, percent_change(current.total, prior.total)))
    }

    async fn guests_tonight(&self, ticket: Option<&CardTicket>) -> StageResult<MetricResult> {
        let (guest_column, rows) = self.tonight_reservations(ticket, ProbedSchema::guest_count_column).await?;

        advance(ticket, PipelineStage::Aggregating).await;
        let guests = sum_column(&rows, &guest_column);
        Ok(MetricResult::live(MetricKind::GuestsTonight, guests.total))
    }

    async fn tables_booked(&self, ticket: Option<&CardTicket>) -> StageResult<MetricResult> {
        let (table_column, rows) = self.tonight_reservations(ticket, ProbedSchema::table_column).await?;

        advance(ticket, PipelineStage::Aggregating).await;
        Ok(MetricResult::live(MetricKind::TablesBooked, distinct_count(&rows, &table_column) as f64))
    }

    /// Today's reservation rows projected to one probed column, returned
    /// alongside the column's name.
    async fn tonight_reservations(
        &self,
        ticket: Option<&CardTicket>,
        value_column: fn(&ProbedSchema) -> AppResult<&str>,
    ) -> StageResult<(String, Vec<Row>)> {
        let schema = self.probe(TableRole::Reservations).await?;
        let date_column = probed(schema.date_column())?;
        let value_column = probed(value_column(&schema))?;

        advance(ticket, PipelineStage::Filtering).await;
        let column_kind = classify_sample(&date_column, schema.sample_value(LogicalField::Date))
            .map_err(StageError::at(PipelineStage::Filtering))?;
        let filters = TemporalWindow::day(column_kind, (self.clock)()).to_filters(&date_column);

        advance(ticket, PipelineStage::Querying).await;
        let query = Query::table(TableRole::Reservations.as_str())
            .select([value_column.as_str()])
            .filters(filters);
        let rows = self
            .run_query(query)
            .await
            .map_err(StageError::at(PipelineStage::Querying))?;
        Ok((value_column, rows))
    }

    async fn low_stock(&self, ticket: Option<&CardTicket>) -> StageResult<MetricResult> {
        let schema = self.probe(TableRole::Inventory).await?;
        let quantity_column = probed(schema.quantity_column())?;
        let reorder_column = probed(schema.reorder_level_column())?;

        // No date window for stock levels.
        advance(ticket, PipelineStage::Filtering).await;
        if schema.is_empty_table() {
            return Ok(MetricResult::live(MetricKind::LowStock, 0.0));
        }

        advance(ticket, PipelineStage::Querying).await;
        let query = Query::table(TableRole::Inventory.as_str()).select([quantity_column.as_str(), reorder_column.as_str()]);
        let rows = self
            .run_query(query)
            .await
            .map_err(StageError::at(PipelineStage::Querying))?;

        advance(ticket, PipelineStage::Aggregating).await;
        let low = count_at_or_below(&rows, &quantity_column, &reorder_column);
        Ok(MetricResult::live(MetricKind::LowStock, low as f64))
    }

    async fn load_guests(&self, limit: usize) -> StageResult<Vec<GuestEntry>> {
        let schema = self.probe(TableRole::Guests).await?;
        if schema.is_empty_table() {
            return Ok(Vec::new());
        }

        let name = schema.column(LogicalField::GuestName).map(ToString::to_string);
        let email = schema.column(LogicalField::Email).map(ToString::to_string);
        let vip = schema.column(LogicalField::VipFlag).map(ToString::to_string);
        let visits = schema.column(LogicalField::VisitCount).map(ToString::to_string);

        let mut query = Query::table(TableRole::Guests.as_str())
            .select([&name, &email, &vip, &visits].into_iter().flatten().cloned())
            .limit(limit);
        if let Some(visits) = &visits {
            query = query.order_by(visits.as_str(), false);
        }
        let rows = self
            .run_query(query)
            .await
            .map_err(StageError::at(PipelineStage::Querying))?;

        Ok(rows
            .iter()
            .map(|row| GuestEntry {
                name: field_text(row, name.as_deref()),
                email: field_text(row, email.as_deref()),
                vip: vip.as_deref().and_then(|column| row.get(column)).is_some_and(coerce_flag),
                visit_count: field_number(row, visits.as_deref()),
            })
            .collect())
    }

    async fn load_inventory(&self, limit: usize) -> StageResult<Vec<InventoryEntry>> {
        let schema = self.probe(TableRole::Inventory).await?;
        if schema.is_empty_table() {
            return Ok(Vec::new());
        }
        let quantity_column = probed(schema.quantity_column())?;
        let name = schema.column(LogicalField::ItemName).map(ToString::to_string);
        let reorder = schema.column(LogicalField::ReorderLevel).map(ToString::to_string);
        let price = schema.column(LogicalField::UnitPrice).map(ToString::to_string);

        let columns = [Some(&quantity_column), name.as_ref(), reorder.as_ref(), price.as_ref()];
        let query = Query::table(TableRole::Inventory.as_str())
            .select(columns.into_iter().flatten().cloned())
            .order_by(quantity_column.as_str(), true)
            .limit(limit);
        let rows = self
            .run_query(query)
            .await
            .map_err(StageError::at(PipelineStage::Querying))?;

        Ok(rows
            .iter()
            .map(|row| {
                let quantity = field_number(row, Some(quantity_column.as_str()));
                let reorder_level = field_number(row, reorder.as_deref());
                InventoryEntry {
                    name: field_text(row, name.as_deref()),
                    quantity,
                    reorder_level,
                    unit_price: field_number(row, price.as_deref()),
                    low_stock: matches!((quantity, reorder_level), (Some(q), Some(r)) if q <= r),
                }
            })
            .collect())
    }

    async fn probe(&self, role: TableRole) -> StageResult<Arc<ProbedSchema>> {
        self.schema
            .resolve(role)
            .await
            .map_err(StageError::at(PipelineStage::Probing))
    }

    async fn run_query(&self, query: Query) -> AppResult<Vec<Row>> {
        let started = Instant::now();
        let rows = tokio::time::timeout(self.query_timeout, self.store.query(&query))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "query on '{}' exceeded {} ms",
                    query.table,
                    self.query_timeout.as_millis()
                ))
            })??;
        tracing::debug!(
            store = self.store.name(),
            table = %query.table,
            filters = query.filters.len(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query finished"
        );
        Ok(rows)
    }
}

async fn advance(ticket: Option<&CardTicket>, stage: PipelineStage) {
    if let Some(ticket) = ticket {
        ticket.advance(stage).await;
    }
}

fn probed(column: AppResult<&str>) -> StageResult<String> {
    column
        .map(ToString::to_string)
        .map_err(StageError::at(PipelineStage::Probing))
}

fn field_text(row: &Row, column: Option<&str>) -> Option<String> {
    match row.get(column?)? {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn field_number(row: &Row, column: Option<&str>) -> Option<f64> {
    row.get(column?).and_then(coerce_number)
}

/// Loose truthiness for VIP-style flags stored as booleans, 0/1 or text.
fn coerce_flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "yes" | "y" | "1" | "vip"
        ),
        _ => false,
    }
}
