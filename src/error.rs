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

// Error types for the backup/restore pipeline

use crate::lineprotocol::ParseError;
use thiserror::Error;

/// Errors produced by the backup/restore pipeline.
///
/// Errors are per-measurement where possible: one measurement failing
/// must not corrupt or block the others, so the run loops catch these,
/// record them in the tally and move on.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Time range with since >= until
    #[error("invalid time range: since {since} is not before until {until}")]
    InvalidRange { since: String, until: String },

    /// Source connection dropped mid-chunk. Not retried automatically;
    /// the operator narrows the time range and re-runs the measurement.
    #[error(
        "query stream for measurement '{measurement}' truncated after {chunks} chunk(s): {reason}. \
         Narrow the time range and re-run this measurement"
    )]
    StreamTruncated {
        measurement: String,
        chunks: usize,
        reason: String,
    },

    /// Malformed line-protocol text in a backup file. Backups are written
    /// exclusively by our own codec, so this means the file is corrupt.
    #[error("corrupt backup for measurement '{measurement}' at line {line}: {source}")]
    CorruptBackup {
        measurement: String,
        line: usize,
        source: ParseError,
    },

    /// Target database rejected a write batch. Prior chunks of this
    /// measurement remain committed.
    #[error(
        "target rejected chunk {chunk_index} of measurement '{measurement}' \
         with status {status}: {body}"
    )]
    WriteRejected {
        measurement: String,
        chunk_index: usize,
        status: u16,
        body: String,
    },

    /// Query request failed with a non-success status
    #[error("query failed with status {status}: {body}")]
    QueryFailed { status: u16, body: String },

    /// Write request failed with a non-success status. The restore
    /// loader wraps permanent failures into [`BackupError::WriteRejected`]
    /// with measurement context.
    #[error("write failed with status {status}: {body}")]
    WriteFailed { status: u16, body: String },

    /// Unexpected shape in a query response document
    #[error("malformed query response: {0}")]
    BadResponse(String),

    /// A row that cannot become a point (no timestamp or zero fields)
    #[error("bad row in measurement '{measurement}': {reason}")]
    BadRow { measurement: String, reason: String },

    /// Source/target unreachable or transport-level failure
    #[error("connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// Line-protocol parse error outside of a backup-file context
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// File I/O errors (backup directory, measurement files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected by validation
    #[error("configuration error: {0}")]
    Config(String),
}

impl BackupError {
    /// Whether a restore write that failed this way is worth retrying.
    /// Rejections (4xx) are permanent; transport errors and server-side
    /// failures may clear up.
    pub fn is_transient(&self) -> bool {
        match self {
            BackupError::Connection(_) => true,
            BackupError::QueryFailed { status, .. } | BackupError::WriteFailed { status, .. } => {
                *status >= 500
            }
            _ => false,
        }
    }
}
