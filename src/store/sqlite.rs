use crate::errors::{AppError, AppResult};
use crate::store::{Filter, Query, RecordStore, Row};
use crate::temporal::{month_start, previous_month_start};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const DEMO_SCHEMA_SQL: &str = include_str!("demo_schema.sql");

/// Local SQLite-backed store for development, demos and tests.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(|err| AppError::Io(err.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(|err| AppError::Io(err.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn execute_batch(&self, sql: &str) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Recreates the demo tables and fills them with rows relative to `today`.
    ///
    /// Column names deliberately differ from the canonical ones (`booking_date`,
    /// `party_size`, `total`, `stock`, ...) so probing has something to do.
    pub fn seed_demo(&self, today: NaiveDate) -> AppResult<()> {
        let mut conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute_batch(DEMO_SCHEMA_SQL)?;

        let tx = conn.transaction()?;
        let day = |date: NaiveDate| date.format("%Y-%m-%d").to_string();
        let stamp = |date: NaiveDate, time: &str| format!("{}T{}", date.format("%Y-%m-%d"), time);
        let yesterday = today - Duration::days(1);
        let this_month = month_start(today);
        let last_month = previous_month_start(today);

        for (name, date, party, table) in [
            ("Ada Night", day(today), 4, "T5"),
            ("Ben Late", day(today), 6, "T5"),
            ("Cleo Dawn", day(today), 2, "T7"),
            ("Dee Dusk", day(today), 8, "VIP1"),
            ("Eli Early", day(yesterday), 10, "T1"),
        ] {
            tx.execute(
                "INSERT INTO reservations (customer_name, booking_date, party_size, table_id) VALUES (?1, ?2, ?3, ?4)",
                params![name, date, party, table],
            )?;
        }

        for (total, method, created_at) in [
            ("1200.50", "card", stamp(this_month, "21:00:00")),
            ("800", "cash", stamp(today, "22:15:00")),
            ("N/A", "comp", stamp(today, "23:30:00")),
            ("1000", "card", stamp(last_month, "23:00:00")),
            ("600", "card", stamp(last_month + Duration::days(9), "20:45:00")),
        ] {
            tx.execute(
                "INSERT INTO payments (total, method, created_at) VALUES (?1, ?2, ?3)",
                params![total, method, created_at],
            )?;
        }

        for (item, stock, min_quantity, unit_price) in [
            ("Vodka", "3", 10, 25.0),
            ("Tonic", "40", 12, 1.5),
            ("Limes", "5", 5, 0.3),
            ("Ice", "lots", 20, 0.0),
        ] {
            tx.execute(
                "INSERT INTO inventory (item_name, stock, min_quantity, unit_price) VALUES (?1, ?2, ?3, ?4)",
                params![item, stock, min_quantity, unit_price],
            )?;
        }

        for (name, email, vip, visits) in [
            ("Ada Night", Some("ada@example.com"), 1, 12),
            ("Ben Late", Some("ben@example.com"), 0, 3),
            ("Cleo Dawn", None, 1, 7),
        ] {
            tx.execute(
                "INSERT INTO guests (full_name, email, is_vip, visits) VALUES (?1, ?2, ?3, ?4)",
                params![name, email, vip, visits],
            )?;
        }

        tx.commit()?;
        tracing::info!(today = %today, "seeded demo store");
        Ok(())
    }

    fn run_query(conn: &Connection, query: &Query) -> AppResult<Vec<Row>> {
        let (sql, bindings) = build_select(query);
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(ToString::to_string).collect();
        let rows = stmt.query_map(params_from_iter(bindings.iter()), |row| {
            let mut record = Row::new();
            for (index, name) in names.iter().enumerate() {
                record.insert(name.clone(), json_from_sql(row.get_ref(index)?));
            }
            Ok(record)
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<Row>> {
        query.validate()?;
        let conn = Arc::clone(&self.conn);
        let query = query.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
            Self::run_query(&conn, &query)
        })
        .await
        .map_err(|error| AppError::Internal(format!("sqlite worker failed: {}", error)))?
    }
}

fn build_select(query: &Query) -> (String, Vec<SqlValue>) {
    let projection = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|column| quote(column))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, quote(&query.table));
    let mut bindings = Vec::with_capacity(query.filters.len());
    let mut clauses = Vec::with_capacity(query.filters.len());
    for filter in &query.filters {
        if filter.value().is_null() && matches!(filter, Filter::Eq { .. }) {
            clauses.push(format!("{} IS NULL", quote(filter.column())));
            continue;
        }
        let operator = match filter {
            Filter::Eq { .. } => "=",
            Filter::Gte { .. } => ">=",
            Filter::Lt { .. } => "<",
            Filter::Lte { .. } => "<=",
        };
        bindings.push(sql_from_json(filter.value()));
        clauses.push(format!("{} {} ?{}", quote(filter.column()), operator, bindings.len()));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if let Some(order) = &query.order {
        sql.push_str(&format!(
            " ORDER BY {} {}",
            quote(&order.column),
            if order.ascending { "ASC" } else { "DESC" }
        ));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    (sql, bindings)
}

// Backticks never fall back to string literals the way double quotes can.
fn quote(identifier: &str) -> String {
    format!("`{}`", identifier)
}

fn sql_from_json(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(integer) => Value::from(integer),
        ValueRef::Real(real) => serde_json::Number::from_f64(real)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) | ValueRef::Blob(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
    }
}
