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

// Chunked extraction: turns pages of tabular query results into typed
// points, one bounded chunk at a time.
//
// The column mapping follows the source schema: `time` is the
// timestamp, columns present in the measurement's field-type map are
// fields (typed accordingly), every other column is a tag. Null and
// empty values are absent from the point, matching what the source
// stores.

use crate::db::interface::{FieldKind, FieldTypes, RowStream};
use crate::error::BackupError;
use crate::lineprotocol::{FieldValue, Point};
use serde_json::Value;

/// Pull-based point extraction for one measurement. Each pull converts
/// exactly one result page, so memory stays bounded by the configured
/// chunk size regardless of measurement size.
pub struct Extractor {
    measurement: String,
    field_types: FieldTypes,
    stream: Box<dyn RowStream>,
}

impl Extractor {
    pub fn new(
        measurement: impl Into<String>,
        field_types: FieldTypes,
        stream: Box<dyn RowStream>,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            field_types,
            stream,
        }
    }

    /// Next chunk of points in source order, `Ok(None)` when the
    /// stream is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<Point>>, BackupError> {
        let Some(page) = self.stream.next_page().await? else {
            return Ok(None);
        };

        let mut points = Vec::with_capacity(page.values.len());
        for row in &page.values {
            points.push(self.row_to_point(&page.columns, row)?);
        }
        Ok(Some(points))
    }

    fn row_to_point(&self, columns: &[String], row: &[Value]) -> Result<Point, BackupError> {
        let mut point = Point::new(self.measurement.clone());
        let mut timestamp = None;

        for (column, value) in columns.iter().zip(row) {
            if value.is_null() || matches!(value.as_str(), Some("")) {
                continue;
            }

            if column == "time" {
                let Some(ns) = value.as_i64() else {
                    return Err(self.bad_row(format!("non-integer time value {}", value)));
                };
                timestamp = Some(ns);
            } else if let Some(kind) = self.field_types.get(column) {
                let field = convert_field(*kind, value)
                    .ok_or_else(|| self.bad_row(format!("column '{}' has value {} which does not fit its {:?} type", column, value, kind)))?;
                point.fields.insert(column.clone(), field);
            } else {
                let tag = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                point.tags.insert(column.clone(), tag);
            }
        }

        let Some(ns) = timestamp else {
            return Err(self.bad_row("row has no time column".to_string()));
        };
        if point.fields.is_empty() {
            return Err(self.bad_row(format!("row at {} has zero fields", ns)));
        }
        point.timestamp = Some(ns);
        Ok(point)
    }

    fn bad_row(&self, reason: String) -> BackupError {
        BackupError::BadRow {
            measurement: self.measurement.clone(),
            reason,
        }
    }
}

fn convert_field(kind: FieldKind, value: &Value) -> Option<FieldValue> {
    match kind {
        FieldKind::Float => value.as_f64().map(FieldValue::Float),
        // Integer fields normally arrive as JSON integers; a float with
        // no fractional part is accepted because some proxies re-encode
        // numbers on the way through.
        FieldKind::Integer => value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(FieldValue::Integer),
        FieldKind::Boolean => value.as_bool().map(FieldValue::Boolean),
        FieldKind::String => value.as_str().map(|s| FieldValue::String(s.to_string())),
    }
}
