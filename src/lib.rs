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

// Chunked backup/restore pipeline for InfluxDB-compatible time-series
// databases:
// - Streams measurements out of the HTTP query interface in bounded
//   server-side chunks
// - Serializes points to per-measurement line-protocol files, optionally
//   gzipped, preserving exact field/tag typing
// - Re-ingests backups through the write interface with configurable
//   pacing and bounded retry
// - Processes measurements independently so one failure never blocks or
//   corrupts the rest

pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod lineprotocol;
pub mod restore;
pub mod run;
pub mod selector;
pub mod timerange;

// Re-export main types
pub use backup::{dump, BackupWriter};
pub use config::{ConnectionConfig, DumpOptions, RestoreOptions};
pub use db::{
    FieldKind, FieldTypes, HttpDatabase, RowPage, RowStream, SourceDatabase, TargetDatabase,
};
pub use error::BackupError;
pub use extract::Extractor;
pub use lineprotocol::{decode, encode, FieldValue, ParseError, Point};
pub use restore::{measurement_files, restore};
pub use run::{MeasurementReport, RunSummary, StopFlag};
pub use selector::{MeasurementFilter, RetentionTarget};
pub use timerange::{partition, PartitionMode, TimeRange};
