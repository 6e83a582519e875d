use crate::errors::{AppError, AppResult};
use crate::store::{Query, RecordStore, Row};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const REST_PREFIX: &str = "rest/v1";
const MISSING_RELATION_CODES: &[&str] = &["PGRST205", "42P01"];
const PAGE_SIZE: usize = 1000;

#[derive(Debug, Default, Deserialize)]
struct RestErrorBody {
    code: Option<String>,
    message: Option<String>,
    hint: Option<String>,
}

/// Client for a PostgREST-style hosted database API.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    schema: Option<String>,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, schema: Option<String>, timeout: Duration) -> AppResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AppError::Config("REST base URL cannot be empty".to_string()));
        }
        if api_key.trim().is_empty() {
            return Err(AppError::Config("REST API key cannot be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| AppError::Config(format!("Failed to build HTTP client: {}", error)))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.trim().to_string(),
            schema,
        })
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PREFIX, table)
    }
}

#[async_trait]
impl RecordStore for RestStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<Row>> {
        query.validate()?;
        let mut rows: Vec<Row> = Vec::new();
        loop {
            let page_limit = match query.limit {
                Some(limit) => (limit - rows.len()).min(PAGE_SIZE),
                None => PAGE_SIZE,
            };
            let (page, total) = self.fetch_page(query, rows.len(), page_limit).await?;
            let fetched = page.len();
            rows.extend(page);

            let done = fetched == 0
                || query.limit.is_some_and(|limit| rows.len() >= limit)
                || match total {
                    Some(total) => rows.len() >= total,
                    None => fetched < page_limit,
                };
            if done {
                break;
            }
            tracing::debug!(table = %query.table, fetched = rows.len(), total = ?total, "fetching next page");
        }
        Ok(rows)
    }
}

impl RestStore {
    /// One page of rows plus the server's exact row count, when reported.
    async fn fetch_page(&self, query: &Query, offset: usize, limit: usize) -> AppResult<(Vec<Row>, Option<usize>)> {
        let mut request = self
            .client
            .get(self.table_url(&query.table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .header("Prefer", "count=exact")
            .query(&page_params(query, offset, Some(limit)));
        if let Some(schema) = &self.schema {
            request = request.header("Accept-Profile", schema);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(&query.table, status, &body));
        }

        let total = response
            .headers()
            .get("Content-Range")
            .and_then(|value| value.to_str().ok())
            .and_then(content_range_total);
        let rows: Vec<Row> = response
            .json()
            .await
            .map_err(|error| AppError::Query(format!("Malformed rows from '{}': {}", query.table, error)))?;
        Ok((rows, total))
    }
}

/// Total from a `Content-Range: 0-999/4210` header; `*` means unknown.
fn content_range_total(range: &str) -> Option<usize> {
    range.rsplit_once('/')?.1.trim().parse().ok()
}

/// PostgREST query string pairs for a query, in a stable order.
pub fn query_params(query: &Query) -> Vec<(String, String)> {
    page_params(query, 0, query.limit)
}

/// Responses are capped server-side (`max-rows`), so reads go out in pages.
fn page_params(query: &Query, offset: usize, limit: Option<usize>) -> Vec<(String, String)> {
    let mut params = Vec::with_capacity(query.filters.len() + 4);
    let select = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query.columns.join(",")
    };
    params.push(("select".to_string(), select));

    for filter in &query.filters {
        let value = filter.value();
        let rendered = if value.is_null() {
            "is.null".to_string()
        } else {
            format!("{}.{}", filter.operator(), render_value(value))
        };
        params.push((filter.column().to_string(), rendered));
    }

    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if offset > 0 {
        params.push(("offset".to_string(), offset.to_string()));
    }
    params
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn classify_failure(table: &str, status: StatusCode, body: &str) -> AppError {
    let parsed: RestErrorBody = serde_json::from_str(body).unwrap_or_default();
    let missing_relation = parsed
        .code
        .as_deref()
        .map(|code| MISSING_RELATION_CODES.contains(&code))
        .unwrap_or(false);

    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| body.trim().to_string());
    let message = match parsed.hint {
        Some(hint) if !hint.is_empty() => format!("{} ({})", message, hint),
        _ => message,
    };

    if missing_relation || status == StatusCode::NOT_FOUND {
        return AppError::SchemaNotFound(format!("table '{}' is not available: {}", table, message));
    }

    AppError::Query(format!("{} on '{}': {}", status.as_u16(), table, message))
}

#[cfg(test)]
mod tests {
    use super::{classify_failure, content_range_total, page_params, query_params, RestStore};
    use crate::store::{Filter, Query, RecordStore};
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RestStore {
        RestStore::new(&server.uri(), "anon-key", None, Duration::from_secs(5)).expect("client")
    }

    #[test]
    fn renders_postgrest_operators() {
        let query = Query::table("payments")
            .select(["amount", "created_at"])
            .filter(Filter::gte("created_at", "2024-01-01T00:00:00"))
            .filter(Filter::lt("created_at", "2024-01-01T23:59:59"))
            .filter(Filter::eq("voided", serde_json::Value::Null))
            .order_by("created_at", false)
            .limit(25);
        let params = query_params(&query);
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "amount,created_at".to_string()),
                ("created_at".to_string(), "gte.2024-01-01T00:00:00".to_string()),
                ("created_at".to_string(), "lt.2024-01-01T23:59:59".to_string()),
                ("voided".to_string(), "is.null".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "25".to_string()),
            ]
        );
    }

    #[test]
    fn pages_carry_offset_and_range_totals_parse() {
        let query = Query::table("payments").select(["amount"]);
        assert_eq!(
            page_params(&query, 2000, Some(1000)),
            vec![
                ("select".to_string(), "amount".to_string()),
                ("limit".to_string(), "1000".to_string()),
                ("offset".to_string(), "2000".to_string()),
            ]
        );
        assert_eq!(content_range_total("0-999/4210"), Some(4210));
        assert_eq!(content_range_total("*/0"), Some(0));
        assert_eq!(content_range_total("0-24/*"), None);
    }

    #[test]
    fn classifies_missing_relation_codes() {
        let body = r#"{"code":"42P01","message":"relation \"public.reservations\" does not exist"}"#;
        let error = classify_failure("reservations", StatusCode::BAD_REQUEST, body);
        assert_eq!(error.code(), "SCHEMA_NOT_FOUND");

        let error = classify_failure("reservations", StatusCode::FORBIDDEN, "permission denied");
        assert_eq!(error.code(), "QUERY_FAILED");
        assert!(error.to_string().contains("403"));
    }

    #[test]
    fn rejects_blank_configuration() {
        assert!(RestStore::new("  ", "key", None, Duration::from_secs(1)).is_err());
        assert!(RestStore::new("https://db.example.com", "", None, Duration::from_secs(1)).is_err());
        let store = RestStore::new("https://db.example.com/", "key", None, Duration::from_secs(1)).expect("store");
        assert_eq!(store.table_url("guests"), "https://db.example.com/rest/v1/guests");
    }

    #[tokio::test]
    async fn fetches_rows_with_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/reservations"))
            .and(header("apikey", "anon-key"))
            .and(header("Authorization", "Bearer anon-key"))
            .and(query_param("select", "*"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 1, "date": "2024-01-01", "table_number": "5" }
            ])))
            .mount(&server)
            .await;

        let rows = client(&server)
            .query(&Query::table("reservations").limit(1))
            .await
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("table_number"), Some(&json!("5")));
    }

    #[tokio::test]
    async fn follows_pages_until_the_reported_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payments"))
            .and(query_param("offset", "2"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "2-2/3")
                    .set_body_json(json!([{ "amount": 300 }])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payments"))
            .and(header("Prefer", "count=exact"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", "0-1/3")
                    .set_body_json(json!([{ "amount": 100 }, { "amount": 200 }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rows = client(&server)
            .query(&Query::table("payments"))
            .await
            .expect("rows");
        let amounts: Vec<_> = rows.iter().filter_map(|row| row.get("amount")).cloned().collect();
        assert_eq!(amounts, vec![json!(100), json!(200), json!(300)]);
    }

    #[tokio::test]
    async fn sends_schema_profile_header_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/guests"))
            .and(header("Accept-Profile", "club"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon-key", Some("club".to_string()), Duration::from_secs(5))
            .expect("client");
        let rows = store.query(&Query::table("guests")).await.expect("rows");
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn missing_table_response_maps_to_schema_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/inventory"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "PGRST205",
                "message": "Could not find the table 'public.inventory' in the schema cache",
                "hint": null
            })))
            .mount(&server)
            .await;

        let error = client(&server)
            .query(&Query::table("inventory"))
            .await
            .expect_err("missing table");
        assert_eq!(error.code(), "SCHEMA_NOT_FOUND");
    }

    #[tokio::test]
    async fn server_error_maps_to_query_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payments"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let error = client(&server)
            .query(&Query::table("payments"))
            .await
            .expect_err("server error");
        assert_eq!(error.code(), "QUERY_FAILED");
        assert!(error.to_string().contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn slow_response_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payments"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon-key", None, Duration::from_millis(50)).expect("client");
        let error = store
            .query(&Query::table("payments"))
            .await
            .expect_err("timeout");
        assert_eq!(error.code(), "QUERY_TIMEOUT");
    }
}
