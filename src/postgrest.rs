// 🌐 Remote store - Supabase REST (PostgREST) over blocking HTTP
//
// Every call goes to <base>/rest/v1/<table> with the service-role key in both
// the `apikey` and `Authorization` headers. No retries: a failed call is
// reported to the caller as-is.

use crate::config::RemoteConfig;
use crate::error::StoreError;
use crate::store::{check_identifier, Conflict, Filter, Row, Store};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

/// PostgREST caps responses at 1000 rows by default
const PAGE_SIZE: usize = 1000;

pub struct PostgrestStore {
    client: Client,
    rest_url: url::Url,
}

impl PostgrestStore {
    pub fn new(config: &RemoteConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(config.service_role_key())
            .map_err(|e| StoreError::Transport(format!("service role key is not a valid header: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_role_key()))
            .map_err(|e| StoreError::Transport(format!("service role key is not a valid header: {}", e)))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(PostgrestStore {
            client,
            rest_url: config.rest_url(),
        })
    }

    fn table_url(&self, table: &str) -> Result<url::Url, StoreError> {
        let table = check_identifier(table)?;
        self.rest_url
            .join(table)
            .map_err(|e| StoreError::Transport(format!("cannot build URL for {}: {}", table, e)))
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().map_err(|e| StoreError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            Err(StoreError::Http {
                status,
                message: error_message(&body),
            })
        }
    }
}

// ============================================================================
// QUERY ENCODING
// ============================================================================

/// Filter as a PostgREST query parameter (`column`, `operator.value`)
pub fn filter_param(filter: &Filter) -> Result<Option<(String, String)>, StoreError> {
    match filter {
        Filter::All => Ok(None),
        Filter::NotNull(column) => Ok(Some((check_identifier(column)?.to_string(), "not.is.null".to_string()))),
        Filter::In(column, values) => {
            let quoted: Vec<String> = values.iter().map(|v| quote_value(v)).collect();
            Ok(Some((
                check_identifier(column)?.to_string(),
                format!("in.({})", quoted.join(",")),
            )))
        }
    }
}

/// Double-quote a value for an `in.(...)` list; names like "Legal & Financial" need it
fn quote_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Query for one page of a select
///
/// Pages are ordered by every selected column; without an order PostgreSQL may
/// return rows in a different order for each request and offsets skip rows.
pub fn page_query(columns: &[&str], filter: Option<&(String, String)>, offset: usize) -> Vec<(String, String)> {
    let order: Vec<String> = columns.iter().map(|column| format!("{}.asc", column)).collect();

    let mut query = vec![
        ("select".to_string(), columns.join(",")),
        ("order".to_string(), order.join(",")),
        ("limit".to_string(), PAGE_SIZE.to_string()),
        ("offset".to_string(), offset.to_string()),
    ];
    if let Some(param) = filter {
        query.push(param.clone());
    }
    query
}

/// `Prefer` header for an insert
pub fn prefer_for_insert(conflict: &Conflict) -> &'static str {
    match conflict {
        Conflict::Fail => "return=representation",
        Conflict::Ignore(_) => "resolution=ignore-duplicates,return=representation",
    }
}

/// Total from a `Content-Range` header: `0-24/25`, `*/0`
pub fn content_range_total(header: &str) -> Option<usize> {
    let (_, total) = header.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Pull the human part out of a PostgREST error body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => {
            let message = json.get("message").and_then(Value::as_str).unwrap_or(body);
            let message = match json.get("code").and_then(Value::as_str) {
                Some(code) if !code.is_empty() => format!("{}: {}", code, message),
                _ => message.to_string(),
            };
            match json.get("details").and_then(Value::as_str) {
                Some(details) if !details.is_empty() => format!("{} ({})", message, details),
                _ => message,
            }
        }
        Err(_) => body.trim().to_string(),
    }
}

fn rows_from(response: Response, table: &str) -> Result<Vec<Row>, StoreError> {
    let body: Value = response
        .json()
        .map_err(|e| StoreError::malformed(table, format!("response is not JSON: {}", e)))?;

    match body {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(StoreError::malformed(table, format!("expected object, got {}", other))),
            })
            .collect(),
        other => Err(StoreError::malformed(table, format!("expected array, got {}", other))),
    }
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

impl Store for PostgrestStore {
    fn select(&mut self, table: &str, columns: &[&str], filter: &Filter) -> Result<Vec<Row>, StoreError> {
        for column in columns {
            check_identifier(column)?;
        }
        let url = self.table_url(table)?;
        let filter = filter_param(filter)?;

        let mut rows = Vec::new();
        let mut offset = 0;

        loop {
            let query = page_query(columns, filter.as_ref(), offset);

            log::debug!("GET {} offset={}", table, offset);
            let response = self.send(self.client.get(url.clone()).query(&query))?;
            let page = rows_from(response, table)?;
            let page_len = page.len();
            rows.extend(page);

            if page_len < PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        Ok(rows)
    }

    fn insert(&mut self, table: &str, rows: &[Row], conflict: &Conflict) -> Result<Vec<Row>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.table_url(table)?;
        let mut request = self
            .client
            .post(url)
            .header("Prefer", prefer_for_insert(conflict))
            .json(rows);

        if let Conflict::Ignore(columns) = conflict {
            for column in columns {
                check_identifier(column)?;
            }
            request = request.query(&[("on_conflict", columns.join(","))]);
        }

        log::debug!("POST {} ({} rows)", table, rows.len());
        let response = self.send(request)?;
        rows_from(response, table)
    }

    fn delete(&mut self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        // PostgREST refuses unfiltered deletes
        let param = filter_param(filter)?.ok_or_else(|| StoreError::Http {
            status: 400,
            message: format!("delete on {} needs a filter", table),
        })?;

        let url = self.table_url(table)?;
        log::debug!("DELETE {} where {}={}", table, param.0, param.1);
        let response = self.send(
            self.client
                .delete(url)
                .header("Prefer", "return=minimal,count=exact")
                .query(&[param]),
        )?;

        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total);

        match total {
            Some(count) => Ok(count),
            None => {
                log::warn!("no Content-Range on DELETE {}; reporting 0 rows", table);
                Ok(0)
            }
        }
    }
}
