// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// InfluxDB 1.x HTTP implementation of the database traits
//
// Query results arrive as newline-delimited JSON documents when
// `chunked=true` is requested: one document per server-side chunk,
// bounded by `chunk_size` rows. Writes go to /write as a line-protocol
// text body.

use super::interface::{
    FieldKind, FieldTypes, RowPage, RowStream, SourceDatabase, TargetDatabase,
};
use crate::config::ConnectionConfig;
use crate::error::BackupError;
use crate::lineprotocol::{encode, Point};
use crate::selector::RetentionTarget;
use crate::timerange::TimeRange;
use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client for an InfluxDB 1.x-compatible query/write interface.
/// One instance per run; the connection pool is internal to reqwest.
pub struct HttpDatabase {
    client: Client,
    base_url: String,
    auth: Option<(String, String)>,
    timeout: Duration,
}

impl HttpDatabase {
    pub fn new(config: &ConnectionConfig) -> Result<Self, BackupError> {
        config.validate()?;

        let client = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let auth = match (&config.username, &config.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            (Some(user), None) => Some((user.clone(), String::new())),
            _ => None,
        };

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            auth,
            timeout: config.timeout(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    /// Non-chunked control-plane query (SHOW MEASUREMENTS, SHOW FIELD
    /// KEYS). The whole response is buffered; these results are small.
    async fn query(&self, database: &str, statement: &str) -> Result<QueryResponse, BackupError> {
        let url = format!("{}/query", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("q", statement), ("db", database)])
            .timeout(self.timeout);

        let response = self.authorized(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackupError::QueryFailed {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| BackupError::BadResponse(format!("invalid query response: {}", e)))?;
        if let Some(error) = parsed.error {
            return Err(BackupError::BadResponse(error));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl SourceDatabase for HttpDatabase {
    async fn list_measurements(&self, database: &str) -> Result<Vec<String>, BackupError> {
        let response = self.query(database, "SHOW MEASUREMENTS").await?;

        let mut names = Vec::new();
        for result in response.results {
            if let Some(error) = result.error {
                return Err(BackupError::BadResponse(error));
            }
            for series in result.series {
                for row in series.values {
                    match row.first().and_then(|v| v.as_str()) {
                        Some(name) => names.push(name.to_string()),
                        None => {
                            return Err(BackupError::BadResponse(
                                "non-string measurement name".to_string(),
                            ))
                        }
                    }
                }
            }
        }
        Ok(names)
    }

    async fn field_types(
        &self,
        database: &str,
        measurements: &[String],
    ) -> Result<HashMap<String, FieldTypes>, BackupError> {
        if measurements.is_empty() {
            return Ok(HashMap::new());
        }

        // One batched request; statements are separated by semicolons
        // and answered in order.
        let statement = measurements
            .iter()
            .map(|m| format!("SHOW FIELD KEYS FROM \"{}\"", m))
            .collect::<Vec<_>>()
            .join(";");
        let response = self.query(database, &statement).await?;

        let mut types = HashMap::new();
        for result in response.results {
            if let Some(error) = result.error {
                return Err(BackupError::BadResponse(error));
            }
            // An empty measurement answers with no series at all.
            for series in result.series {
                let Some(name) = series.name.clone() else {
                    return Err(BackupError::BadResponse(
                        "field key series without a measurement name".to_string(),
                    ));
                };
                let mut fields = FieldTypes::new();
                for row in &series.values {
                    let (Some(key), Some(kind)) = (
                        row.first().and_then(|v| v.as_str()),
                        row.get(1).and_then(|v| v.as_str()),
                    ) else {
                        return Err(BackupError::BadResponse(format!(
                            "malformed field key row for '{}'",
                            name
                        )));
                    };
                    let Some(kind) = FieldKind::from_schema(kind) else {
                        return Err(BackupError::BadResponse(format!(
                            "unknown field type '{}' for '{}.{}'",
                            kind, name, key
                        )));
                    };
                    fields.insert(key.to_string(), kind);
                }
                types.insert(name, fields);
            }
        }
        Ok(types)
    }

    async fn query_chunked(
        &self,
        target: &RetentionTarget,
        measurement: &str,
        range: &TimeRange,
        chunk_size: usize,
    ) -> Result<Box<dyn RowStream>, BackupError> {
        let mut statement = format!("SELECT * FROM {}", target.from_clause(measurement));
        if let Some(predicate) = range.predicate() {
            statement.push_str(" WHERE ");
            statement.push_str(&predicate);
        }
        debug!("chunked query: {}", statement);

        let chunk_size = chunk_size.to_string();
        let url = format!("{}/query", self.base_url);
        // No overall deadline here: the download is unbounded and paced
        // by the pulls below. The connect timeout still applies.
        let request = self.client.get(&url).query(&[
            ("q", statement.as_str()),
            ("db", target.database.as_str()),
            ("epoch", "ns"),
            ("chunked", "true"),
            ("chunk_size", chunk_size.as_str()),
        ]);

        let response = self.authorized(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::QueryFailed {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::new(HttpRowStream {
            response,
            buffer: BytesMut::new(),
            measurement: measurement.to_string(),
            pages: 0,
            exhausted: false,
        }))
    }
}

#[async_trait]
impl TargetDatabase for HttpDatabase {
    async fn write_points(
        &self,
        target: &RetentionTarget,
        points: &[Point],
    ) -> Result<(), BackupError> {
        let mut body = String::new();
        for point in points {
            body.push_str(&encode(point));
            body.push('\n');
        }

        let url = format!("{}/write", self.base_url);
        let mut params = vec![("db", target.database.clone())];
        if let Some(rp) = &target.retention_policy {
            params.push(("rp", rp.clone()));
        }

        let request = self
            .client
            .post(&url)
            .query(&params)
            .body(body)
            .timeout(self.timeout);

        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status != StatusCode::NO_CONTENT && !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackupError::WriteFailed {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn ping(&self) -> Result<bool, BackupError> {
        let url = format!("{}/ping", self.base_url);
        match self.authorized(self.client.get(&url).timeout(self.timeout)).send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                warn!("ping returned status {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ping failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Streaming consumer for a chunked query response: buffers bytes until
/// a full newline-terminated JSON document is available, then hands it
/// back as one page. Holds at most one chunk document at a time.
struct HttpRowStream {
    response: reqwest::Response,
    buffer: BytesMut,
    measurement: String,
    pages: usize,
    exhausted: bool,
}

impl HttpRowStream {
    fn truncated(&self, reason: impl Into<String>) -> BackupError {
        BackupError::StreamTruncated {
            measurement: self.measurement.clone(),
            chunks: self.pages,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RowStream for HttpRowStream {
    async fn next_page(&mut self) -> Result<Option<RowPage>, BackupError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.iter().all(|b| b.is_ascii_whitespace()) {
                    continue;
                }
                match parse_chunk_document(&line)? {
                    Some(page) => {
                        self.pages += 1;
                        return Ok(Some(page));
                    }
                    // A document without series: the terminal summary
                    // chunk, or an empty statement result.
                    None => continue,
                }
            }

            if self.exhausted {
                if !self.buffer.is_empty() {
                    return Err(self.truncated("connection closed inside a chunk document"));
                }
                return Ok(None);
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.extend_from_slice(&bytes),
                Ok(None) => self.exhausted = true,
                Err(e) => return Err(self.truncated(e.to_string())),
            }
        }
    }
}

fn parse_chunk_document(line: &[u8]) -> Result<Option<RowPage>, BackupError> {
    let document: QueryResponse = serde_json::from_slice(line)
        .map_err(|e| BackupError::BadResponse(format!("invalid chunk document: {}", e)))?;
    if let Some(error) = document.error {
        return Err(BackupError::BadResponse(error));
    }

    let mut page = RowPage::default();
    for result in document.results {
        if let Some(error) = result.error {
            return Err(BackupError::BadResponse(error));
        }
        for series in result.series {
            if page.columns.is_empty() {
                page.columns = series.columns;
            } else if page.columns != series.columns {
                return Err(BackupError::BadResponse(
                    "column set changed between series".to_string(),
                ));
            }
            page.values.extend(series.values);
        }
    }

    if page.values.is_empty() {
        Ok(None)
    } else {
        Ok(Some(page))
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}
