//! Thin client for the ClickHouse HTTP interface.
//! - SQL goes in the POST body, bound parameters go in `param_<name>` URL pairs.
//! - Results come back as JSONEachRow text and are decoded lazily by the caller.
//! - `DataSource` / `Connector` are the seams the view uses, so tests can swap in fakes.

use std::{collections::BTreeMap, future::Future, time::Instant};

use chrono::NaiveDate;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::config::ClickHouseConfig;
use crate::error::{ConnectionError, QueryError};

/// SQL text plus its bound parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    sql: String,
    params: BTreeMap<String, String>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn bind_date(mut self, name: &str, date: NaiveDate) -> Self {
        self.params
            .insert(name.to_string(), date.format("%Y-%m-%d").to_string());
        self
    }

    /// Binds an `Array(String)` parameter using ClickHouse's text format.
    pub fn bind_str_array(mut self, name: &str, values: &[String]) -> Self {
        let quoted: Vec<String> = values
            .iter()
            .map(|v| format!("'{}'", escape_text_literal(v)))
            .collect();
        self.params
            .insert(name.to_string(), format!("[{}]", quoted.join(",")));
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Rendered query text: SQL followed by parameters in name order.
    pub fn cache_key(&self) -> String {
        let mut key = self.sql.trim().to_string();
        for (name, value) in &self.params {
            key.push('\n');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        key
    }
}

fn escape_text_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Raw JSONEachRow payload of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    body: String,
}

impl QueryResult {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Decode every non-blank line into `T`.
    pub fn rows<T: DeserializeOwned>(&self) -> Result<Vec<T>, QueryError> {
        self.body
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| QueryError::Decode {
                    line: idx + 1,
                    source,
                })
            })
            .collect()
    }
}

/// An open handle that can run read queries.
pub trait DataSource: Send + Sync + 'static {
    fn execute(&self, query: &Query) -> impl Future<Output = Result<QueryResult, QueryError>> + Send;
}

/// Produces a `DataSource`; invoked until it succeeds once.
pub trait Connector: Send + Sync + 'static {
    type Source: DataSource;

    fn connect(&self) -> impl Future<Output = Result<Self::Source, ConnectionError>> + Send;
}

#[derive(Clone)]
pub struct ClickHouseClient {
    http: Client,
    endpoint: Url,
    username: String,
    password: String,
    database: String,
}

impl ClickHouseClient {
    async fn post(&self, query: &Query) -> Result<reqwest::Response, reqwest::Error> {
        let params: Vec<(String, &str)> = query
            .params()
            .iter()
            .map(|(name, value)| (format!("param_{name}"), value.as_str()))
            .collect();
        self.http
            .post(self.endpoint.clone())
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .query(&[
                ("database", self.database.as_str()),
                ("default_format", "JSONEachRow"),
                ("output_format_json_quote_64bit_integers", "0"),
            ])
            .query(&params)
            .body(query.sql().to_string())
            .send()
            .await
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        let resp = self
            .post(&Query::new("SELECT 1"))
            .await
            .map_err(ConnectionError::Unreachable)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ConnectionError::Rejected {
            status: status.as_u16(),
            message: first_line(&body),
        })
    }
}

impl DataSource for ClickHouseClient {
    async fn execute(&self, query: &Query) -> Result<QueryResult, QueryError> {
        let started = Instant::now();
        let resp = self.post(query).await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "clickhouse query failed");
            return Err(QueryError::Server {
                status: status.as_u16(),
                message: first_line(&body),
            });
        }
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes = body.len(),
            "clickhouse query finished"
        );
        Ok(QueryResult::new(body))
    }
}

impl Connector for ClickHouseConfig {
    type Source = ClickHouseClient;

    async fn connect(&self) -> Result<ClickHouseClient, ConnectionError> {
        let host = self
            .host
            .as_deref()
            .ok_or(ConnectionError::MissingSetting("CLICKHOUSE_HOST"))?;
        let username = self
            .username
            .clone()
            .ok_or(ConnectionError::MissingSetting("CLICKHOUSE_USER"))?;
        let password = self
            .password
            .clone()
            .ok_or(ConnectionError::MissingSetting("CLICKHOUSE_PASSWORD"))?;

        let endpoint = endpoint_url(host, self.port, self.secure)?;
        let http = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ConnectionError::Client)?;
        let client = ClickHouseClient {
            http,
            endpoint,
            username,
            password,
            database: self.database.clone(),
        };
        client.ping().await?;
        tracing::info!(endpoint = %client.endpoint, database = %client.database, "connected to clickhouse");
        Ok(client)
    }
}

fn endpoint_url(host: &str, port: u16, secure: bool) -> Result<Url, ConnectionError> {
    let bare = host
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let scheme = if secure { "https" } else { "http" };
    let raw = format!("{scheme}://{bare}:{port}/");
    Url::parse(&raw).map_err(|err| ConnectionError::InvalidEndpoint {
        endpoint: raw,
        reason: err.to_string(),
    })
}

fn first_line(body: &str) -> String {
    body.lines().next().unwrap_or("").trim().to_string()
}
