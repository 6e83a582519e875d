use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableRole {
    Reservations,
    Payments,
    Inventory,
    Guests,
}

impl TableRole {
    pub const ALL: [TableRole; 4] = [Self::Reservations, Self::Payments, Self::Inventory, Self::Guests];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reservations => "reservations",
            Self::Payments => "payments",
            Self::Inventory => "inventory",
            Self::Guests => "guests",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricKind {
    Revenue,
    GuestsTonight,
    TablesBooked,
    LowStock,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [Self::Revenue, Self::GuestsTonight, Self::TablesBooked, Self::LowStock];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::GuestsTonight => "guests-tonight",
            Self::TablesBooked => "tables-booked",
            Self::LowStock => "low-stock",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Revenue => "Revenue (month)",
            Self::GuestsTonight => "Guests tonight",
            Self::TablesBooked => "Tables booked",
            Self::LowStock => "Low-stock items",
        }
    }

    pub fn table(self) -> TableRole {
        match self {
            Self::Revenue => TableRole::Payments,
            Self::GuestsTonight | Self::TablesBooked => TableRole::Reservations,
            Self::LowStock => TableRole::Inventory,
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "revenue" => Ok(Self::Revenue),
            "guests-tonight" => Ok(Self::GuestsTonight),
            "tables-booked" => Ok(Self::TablesBooked),
            "low-stock" => Ok(Self::LowStock),
            other => Err(format!("Unknown metric '{}'", other)),
        }
    }
}

/// Stage of the probe → filter → query → aggregate pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Probing,
    Filtering,
    Querying,
    Aggregating,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Probing => "probing",
            Self::Filtering => "filtering",
            Self::Querying => "querying",
            Self::Aggregating => "aggregating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricStatus {
    Live,
    Placeholder,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Degradation {
    pub stage: PipelineStage,
    pub code: String,
    pub message: String,
    pub setup_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub metric: MetricKind,
    pub value: Option<f64>,
    pub prior_value: Option<f64>,
    pub change_percent: Option<f64>,
    pub status: MetricStatus,
    pub degradation: Option<Degradation>,
    pub computed_at: DateTime<Utc>,
}

impl MetricResult {
    pub fn live(metric: MetricKind, value: f64) -> Self {
        Self {
            metric,
            value: Some(value),
            prior_value: None,
            change_percent: None,
            status: MetricStatus::Live,
            degradation: None,
            computed_at: Utc::now(),
        }
    }

    pub fn with_prior(mut self, prior: f64, change_percent: f64) -> Self {
        self.prior_value = Some(prior);
        self.change_percent = Some(change_percent);
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.status != MetricStatus::Live
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub refresh_id: String,
    pub generated_at: DateTime<Utc>,
    pub cards: Vec<MetricResult>,
    pub setup_required: Vec<TableRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListView<T> {
    pub items: Vec<T>,
    pub degradation: Option<Degradation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestEntry {
    pub name: Option<String>,
    pub email: Option<String>,
    pub vip: bool,
    pub visit_count: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub reorder_level: Option<f64>,
    pub unit_price: Option<f64>,
    pub low_stock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableProbeReport {
    pub table: TableRole,
    pub ok: bool,
    pub empty: bool,
    pub columns: Vec<ProbedColumnReport>,
    pub error: Option<String>,
    pub setup_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbedColumnReport {
    pub field: String,
    pub column: String,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}
