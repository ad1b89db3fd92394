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

// Shared run-level types: the stop flag and the per-run tally.

use crate::error::BackupError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Cooperative stop request, checked at chunk boundaries only: the
/// in-flight chunk finishes, the rest of the current measurement is
/// skipped, and no further measurement starts. Never interrupts
/// mid-chunk, so no partial lines are ever written or decoded.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of one completed measurement.
#[derive(Debug, Clone)]
pub struct MeasurementReport {
    pub measurement: String,
    pub points: u64,
    pub bytes: u64,
}

/// Final tally of a dump or restore run. A failed measurement never
/// aborts the run; it is recorded here and the remaining measurements
/// still proceed.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<MeasurementReport>,
    pub failed: Vec<(String, BackupError)>,
    /// Measurement cut short by a stop request, if any. Its partial
    /// output is left in place for the operator to re-run.
    pub interrupted: Option<String>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.interrupted.is_none()
    }

    pub fn total_points(&self) -> u64 {
        self.completed.iter().map(|r| r.points).sum()
    }

    /// Log the tally the way operators read it: one line per failure,
    /// one closing line with the totals.
    pub fn log(&self, operation: &str) {
        for (measurement, err) in &self.failed {
            error!("{} failed for '{}': {}", operation, measurement, err);
        }
        if let Some(measurement) = &self.interrupted {
            info!(
                "{} interrupted during '{}'; partial file left in place",
                operation, measurement
            );
        }
        info!(
            "{} finished: {} measurement(s) ok, {} failed, {} points",
            operation,
            self.completed.len(),
            self.failed.len(),
            self.total_points()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag() {
        let flag = StopFlag::new();
        assert!(!flag.is_triggered());

        let shared = flag.clone();
        shared.trigger();
        assert!(flag.is_triggered());
    }

    #[test]
    fn test_summary_success() {
        let mut summary = RunSummary::default();
        assert!(summary.all_succeeded());

        summary.completed.push(MeasurementReport {
            measurement: "cpu".to_string(),
            points: 3,
            bytes: 120,
        });
        assert_eq!(summary.total_points(), 3);

        summary
            .failed
            .push(("mem".to_string(), BackupError::Config("boom".to_string())));
        assert!(!summary.all_succeeded());
    }
}
