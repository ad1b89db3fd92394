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

// Database traits for the extraction and load sides
//
// Both sides of the pipeline talk to the database through these traits
// so the run loops can be exercised against in-memory stubs. The HTTP
// implementation lives in `http.rs`.

use crate::error::BackupError;
use crate::lineprotocol::Point;
use crate::selector::RetentionTarget;
use crate::timerange::TimeRange;
use async_trait::async_trait;
use std::collections::HashMap;

/// Field type as reported by the source schema. Drives how a result
/// column is turned back into a typed field literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Integer,
    Boolean,
    String,
}

impl FieldKind {
    pub fn from_schema(name: &str) -> Option<Self> {
        match name {
            "float" => Some(FieldKind::Float),
            "integer" => Some(FieldKind::Integer),
            "boolean" => Some(FieldKind::Boolean),
            "string" => Some(FieldKind::String),
            _ => None,
        }
    }
}

/// Field name -> type for one measurement.
pub type FieldTypes = HashMap<String, FieldKind>;

/// One page of tabular results: column names plus rows of JSON values,
/// at most the requested chunk size of rows.
#[derive(Debug, Clone, Default)]
pub struct RowPage {
    pub columns: Vec<String>,
    pub values: Vec<Vec<serde_json::Value>>,
}

/// Pull-based stream of result pages. Suspension happens at each pull;
/// nothing beyond the current page is buffered.
#[async_trait]
pub trait RowStream: Send {
    /// Next page, or `Ok(None)` once the stream is exhausted. A
    /// transport failure mid-stream surfaces as
    /// [`BackupError::StreamTruncated`].
    async fn next_page(&mut self) -> Result<Option<RowPage>, BackupError>;
}

/// Read side: measurement discovery, schema discovery, chunked series
/// extraction.
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Names of all measurements in the database, in server order.
    async fn list_measurements(&self, database: &str) -> Result<Vec<String>, BackupError>;

    /// Field types per measurement. Measurements without fields (empty
    /// measurements) are absent from the result.
    async fn field_types(
        &self,
        database: &str,
        measurements: &[String],
    ) -> Result<HashMap<String, FieldTypes>, BackupError>;

    /// Start a chunked query for one measurement over one time range.
    /// The server never sends more than `chunk_size` rows per page.
    async fn query_chunked(
        &self,
        target: &RetentionTarget,
        measurement: &str,
        range: &TimeRange,
        chunk_size: usize,
    ) -> Result<Box<dyn RowStream>, BackupError>;
}

/// Write side: batched point ingestion.
#[async_trait]
pub trait TargetDatabase: Send + Sync {
    /// Write one batch of points. Returns `Ok(())` only when the target
    /// acknowledged the whole batch.
    async fn write_points(
        &self,
        target: &RetentionTarget,
        points: &[Point],
    ) -> Result<(), BackupError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<bool, BackupError>;
}
