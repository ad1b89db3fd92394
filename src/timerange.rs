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

// Time ranges and the dump partitioner

use crate::error::BackupError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

/// Half-open interval `[since, until)` in nanosecond instants.
/// `since = None` means unbounded past, `until = None` means "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub since: Option<i64>,
    pub until: Option<i64>,
}

impl TimeRange {
    /// The fully unbounded range.
    pub fn all() -> Self {
        Self {
            since: None,
            until: None,
        }
    }

    pub fn new(since: Option<i64>, until: Option<i64>) -> Result<Self, BackupError> {
        if let (Some(s), Some(u)) = (since, until) {
            if s >= u {
                return Err(BackupError::InvalidRange {
                    since: format_bound(Some(s)),
                    until: format_bound(Some(u)),
                });
            }
        }
        Ok(Self { since, until })
    }

    /// Build a range from optional `YYYY-MM-DD` date bounds. A date
    /// normalizes to midnight UTC of that day; the `until` date is
    /// exclusive.
    pub fn from_dates(since: Option<&str>, until: Option<&str>) -> Result<Self, BackupError> {
        let since = since.map(parse_date_ns).transpose()?;
        let until = until.map(parse_date_ns).transpose()?;
        Self::new(since, until)
    }

    /// Time predicate for the source query, `None` for the unbounded
    /// range. Bounds are nanosecond epoch integers.
    pub fn predicate(&self) -> Option<String> {
        match (self.since, self.until) {
            (None, None) => None,
            (Some(s), None) => Some(format!("time >= {}", s)),
            (None, Some(u)) => Some(format!("time < {}", u)),
            (Some(s), Some(u)) => Some(format!("time >= {} AND time < {}", s, u)),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_bound(self.since),
            format_bound(self.until)
        )
    }
}

fn format_bound(bound: Option<i64>) -> String {
    match bound {
        Some(ns) => Utc.timestamp_nanos(ns).to_rfc3339(),
        None => "..".to_string(),
    }
}

fn parse_date_ns(date: &str) -> Result<i64, BackupError> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| BackupError::Config(format!("invalid date '{}': {}", date, e)))?;
    let midnight: DateTime<Utc> = Utc.from_utc_datetime(&parsed.and_hms_opt(0, 0, 0).unwrap());
    midnight
        .timestamp_nanos_opt()
        .ok_or_else(|| BackupError::Config(format!("date '{}' out of timestamp range", date)))
}

/// How a dump splits its overall range into per-query sub-ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionMode {
    /// One query covering the whole range. Result volume is still
    /// bounded by server-side chunking.
    #[default]
    Single,
    /// One query per UTC day, for incremental captures. Requires both
    /// range bounds.
    Daily,
}

/// Split `range` into a lazy sequence of sub-ranges that together cover
/// it exactly: pairwise non-overlapping, no gaps, union equal to the
/// input.
pub fn partition(range: TimeRange, mode: PartitionMode) -> Result<Partitions, BackupError> {
    match mode {
        PartitionMode::Single => Ok(Partitions {
            next_since: range.since,
            until: range.until,
            step: None,
            done: false,
        }),
        PartitionMode::Daily => {
            let (Some(since), Some(until)) = (range.since, range.until) else {
                return Err(BackupError::Config(
                    "daily partitioning requires both --since and --until".to_string(),
                ));
            };
            Ok(Partitions {
                next_since: Some(since),
                until: Some(until),
                step: Some(NANOS_PER_DAY),
                done: false,
            })
        }
    }
}

/// Iterator over partitioned sub-ranges. Daily cuts fall on UTC
/// midnight boundaries; the first and last sub-range may be shorter.
pub struct Partitions {
    next_since: Option<i64>,
    until: Option<i64>,
    step: Option<i64>,
    done: bool,
}

impl Iterator for Partitions {
    type Item = TimeRange;

    fn next(&mut self) -> Option<TimeRange> {
        if self.done {
            return None;
        }

        let Some(step) = self.step else {
            self.done = true;
            return Some(TimeRange {
                since: self.next_since,
                until: self.until,
            });
        };

        // Daily mode: bounds are guaranteed present by partition().
        let since = self.next_since?;
        let until = self.until?;
        if since >= until {
            self.done = true;
            return None;
        }

        let next_midnight = (since.div_euclid(step) + 1) * step;
        let cut = next_midnight.min(until);
        self.next_since = Some(cut);
        if cut >= until {
            self.done = true;
        }
        Some(TimeRange {
            since: Some(since),
            until: Some(cut),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(date: &str) -> i64 {
        parse_date_ns(date).unwrap()
    }

    #[test]
    fn test_from_dates() {
        let range = TimeRange::from_dates(Some("2020-01-01"), Some("2020-01-02")).unwrap();
        assert_eq!(range.since, Some(1577836800000000000));
        assert_eq!(range.until, Some(1577923200000000000));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let result = TimeRange::from_dates(Some("2020-01-02"), Some("2020-01-01"));
        assert!(matches!(result, Err(BackupError::InvalidRange { .. })));

        // Empty ranges are invalid too: [t, t) holds nothing.
        assert!(TimeRange::new(Some(5), Some(5)).is_err());
    }

    #[test]
    fn test_invalid_date_rejected() {
        assert!(TimeRange::from_dates(Some("01/02/2020"), None).is_err());
        assert!(TimeRange::from_dates(Some("2020-13-40"), None).is_err());
    }

    #[test]
    fn test_predicate() {
        assert_eq!(TimeRange::all().predicate(), None);
        assert_eq!(
            TimeRange::new(Some(10), None).unwrap().predicate(),
            Some("time >= 10".to_string())
        );
        assert_eq!(
            TimeRange::new(Some(10), Some(20)).unwrap().predicate(),
            Some("time >= 10 AND time < 20".to_string())
        );
    }

    #[test]
    fn test_single_partition_is_whole_range() {
        let range = TimeRange::new(Some(10), Some(20)).unwrap();
        let parts: Vec<_> = partition(range, PartitionMode::Single).unwrap().collect();
        assert_eq!(parts, vec![range]);

        let parts: Vec<_> = partition(TimeRange::all(), PartitionMode::Single)
            .unwrap()
            .collect();
        assert_eq!(parts, vec![TimeRange::all()]);
    }

    #[test]
    fn test_daily_partition_covers_exactly() {
        let range =
            TimeRange::new(Some(ns("2020-01-01")), Some(ns("2020-01-04"))).unwrap();
        let parts: Vec<_> = partition(range, PartitionMode::Daily).unwrap().collect();

        assert_eq!(parts.len(), 3);
        // No gaps, no overlaps, exact union.
        assert_eq!(parts.first().unwrap().since, range.since);
        assert_eq!(parts.last().unwrap().until, range.until);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].until, pair[1].since);
        }
    }

    #[test]
    fn test_daily_partition_partial_days() {
        // Mid-day start and end: first and last sub-ranges are short.
        let start = ns("2020-01-01") + 3 * 3_600 * 1_000_000_000;
        let end = ns("2020-01-03") + 3_600 * 1_000_000_000;
        let range = TimeRange::new(Some(start), Some(end)).unwrap();

        let parts: Vec<_> = partition(range, PartitionMode::Daily).unwrap().collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].until, Some(ns("2020-01-02")));
        assert_eq!(parts[1].until, Some(ns("2020-01-03")));
        assert_eq!(parts[2].until, Some(end));
        assert_eq!(parts.first().unwrap().since, Some(start));
        for pair in parts.windows(2) {
            assert_eq!(pair[0].until, pair[1].since);
        }
    }

    #[test]
    fn test_daily_partition_requires_bounds() {
        assert!(partition(TimeRange::all(), PartitionMode::Daily).is_err());
    }
}
