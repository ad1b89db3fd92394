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

// Database/retention-policy targeting and measurement selection

use crate::error::BackupError;

/// Which database and retention policy a dump reads from or a restore
/// writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionTarget {
    pub database: String,
    pub retention_policy: Option<String>,
}

impl RetentionTarget {
    pub fn new(database: impl Into<String>, retention_policy: Option<String>) -> Result<Self, BackupError> {
        let database = database.into();
        if database.is_empty() {
            return Err(BackupError::Config("database name must not be empty".to_string()));
        }
        if matches!(&retention_policy, Some(rp) if rp.is_empty()) {
            return Err(BackupError::Config(
                "retention policy must not be empty when given".to_string(),
            ));
        }
        Ok(Self {
            database,
            retention_policy,
        })
    }

    /// FROM clause for a measurement under this target, retention
    /// policy qualifier included when one is set.
    pub fn from_clause(&self, measurement: &str) -> String {
        match &self.retention_policy {
            Some(rp) => format!("\"{}\".\"{}\"", rp, measurement),
            None => format!("\"{}\"", measurement),
        }
    }
}

/// Selects which measurements a run covers. An explicit list wins
/// outright; otherwise the discovered names are sorted once and then
/// filtered by pure predicates, so selection does not depend on network
/// timing or discovery order.
#[derive(Debug, Clone, Default)]
pub struct MeasurementFilter {
    /// Explicit measurement list; bypasses discovery and the other
    /// filters entirely.
    pub explicit: Vec<String>,
    /// Lexicographic cursor: keep names >= this one.
    pub from: Option<String>,
    /// Names to skip.
    pub ignore: Vec<String>,
}

impl MeasurementFilter {
    pub fn resolve(&self, discovered: Vec<String>) -> Vec<String> {
        if !self.explicit.is_empty() {
            return self.explicit.clone();
        }

        let mut names = discovered;
        names.sort();
        names.retain(|name| !self.ignore.iter().any(|skip| skip == name));
        if let Some(cursor) = &self.from {
            names.retain(|name| name.as_str() >= cursor.as_str());
        }
        names
    }
}
