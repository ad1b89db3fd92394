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

// Run configuration: connection settings and per-operation options.
// Everything is constructed explicitly (from the CLI in the binary, or
// directly in tests) and passed down; no process-wide state.

use crate::error::BackupError;
use crate::selector::{MeasurementFilter, RetentionTarget};
use crate::timerange::{PartitionMode, TimeRange};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the source or target database.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Base URL including scheme and port, e.g. `https://influx.example:8086`
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            timeout_seconds: default_timeout(),
        }
    }

    pub fn with_auth(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), BackupError> {
        if self.url.is_empty() {
            return Err(BackupError::Config("url must not be empty".to_string()));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(BackupError::Config(format!(
                "url '{}' must include an http:// or https:// scheme",
                self.url
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(BackupError::Config("timeout_seconds must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Options for one dump run.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub target: RetentionTarget,
    pub dir: PathBuf,
    pub filter: MeasurementFilter,
    pub gzip: bool,
    pub range: TimeRange,
    pub partition: PartitionMode,
    /// Server-side chunk size: the source never sends more rows than
    /// this in one response chunk.
    pub chunk_size: usize,
}

impl DumpOptions {
    pub fn new(target: RetentionTarget, dir: impl Into<PathBuf>) -> Self {
        Self {
            target,
            dir: dir.into(),
            filter: MeasurementFilter::default(),
            gzip: false,
            range: TimeRange::all(),
            partition: PartitionMode::Single,
            chunk_size: default_chunk_size(),
        }
    }

    pub fn validate(&self) -> Result<(), BackupError> {
        if self.chunk_size == 0 {
            return Err(BackupError::Config("chunk_size must be > 0".to_string()));
        }
        if self.partition == PartitionMode::Daily
            && (self.range.since.is_none() || self.range.until.is_none())
        {
            return Err(BackupError::Config(
                "daily partitioning requires both --since and --until".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for one restore run.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub target: RetentionTarget,
    pub dir: PathBuf,
    pub filter: MeasurementFilter,
    pub gzip: bool,
    /// Points per write request; restore batching is decided here,
    /// independent of how the dump chunked its queries.
    pub chunk_size: usize,
    /// Pause between chunk writes; zero means full speed.
    pub chunk_delay: Duration,
    /// Pause between measurements.
    pub measurement_delay: Duration,
    /// Attempts per chunk write before the measurement fails. Only
    /// transient failures are retried; rejections fail immediately.
    pub max_write_attempts: u32,
}

impl RestoreOptions {
    pub fn new(target: RetentionTarget, dir: impl Into<PathBuf>) -> Self {
        Self {
            target,
            dir: dir.into(),
            filter: MeasurementFilter::default(),
            gzip: false,
            chunk_size: default_chunk_size(),
            chunk_delay: Duration::ZERO,
            measurement_delay: Duration::ZERO,
            max_write_attempts: default_write_attempts(),
        }
    }

    pub fn validate(&self) -> Result<(), BackupError> {
        if self.chunk_size == 0 {
            return Err(BackupError::Config("chunk_size must be > 0".to_string()));
        }
        if self.max_write_attempts == 0 {
            return Err(BackupError::Config(
                "max_write_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    300
}

fn default_chunk_size() -> usize {
    5000
}

fn default_write_attempts() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RetentionTarget {
        RetentionTarget::new("metrics", None).unwrap()
    }

    #[test]
    fn test_connection_validation() {
        assert!(ConnectionConfig::new("http://localhost:8086").validate().is_ok());
        assert!(ConnectionConfig::new("").validate().is_err());
        assert!(ConnectionConfig::new("localhost:8086").validate().is_err());

        let mut config = ConnectionConfig::new("http://localhost:8086");
        config.timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dump_defaults() {
        let options = DumpOptions::new(target(), "/tmp/backup");
        assert_eq!(options.chunk_size, 5000);
        assert!(options.range.is_unbounded());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut dump = DumpOptions::new(target(), "/tmp/backup");
        dump.chunk_size = 0;
        assert!(dump.validate().is_err());

        let mut restore = RestoreOptions::new(target(), "/tmp/backup");
        restore.chunk_size = 0;
        assert!(restore.validate().is_err());
    }

    #[test]
    fn test_restore_defaults_unpaced() {
        let options = RestoreOptions::new(target(), "/tmp/backup");
        assert_eq!(options.chunk_delay, Duration::ZERO);
        assert_eq!(options.measurement_delay, Duration::ZERO);
        assert_eq!(options.max_write_attempts, 10);
    }
}
