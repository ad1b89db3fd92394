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

use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use tsdb_backup::backup::BackupWriter;
use tsdb_backup::config::RestoreOptions;
use tsdb_backup::db::TargetDatabase;
use tsdb_backup::error::BackupError;
use tsdb_backup::lineprotocol::{encode, FieldValue, Point};
use tsdb_backup::restore::restore;
use tsdb_backup::run::StopFlag;
use tsdb_backup::selector::RetentionTarget;

/// In-memory target that records every accepted batch. Can reject one
/// specific write call permanently or fail the first N calls
/// transiently.
#[derive(Default)]
struct StubTarget {
    batches: Mutex<Vec<Vec<Point>>>,
    calls: AtomicUsize,
    reject_call: Option<usize>,
    transient_failures: AtomicUsize,
}

#[async_trait]
impl TargetDatabase for StubTarget {
    async fn write_points(
        &self,
        _target: &RetentionTarget,
        points: &[Point],
    ) -> Result<(), BackupError> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackupError::WriteFailed {
                status: 503,
                body: "temporarily overloaded".to_string(),
            });
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_call == Some(call) {
            return Err(BackupError::WriteFailed {
                status: 400,
                body: "partial write: field type conflict".to_string(),
            });
        }

        self.batches.lock().unwrap().push(points.to_vec());
        Ok(())
    }

    async fn ping(&self) -> Result<bool, BackupError> {
        Ok(true)
    }
}

fn sample_points(measurement: &str, count: usize) -> Vec<Point> {
    (0..count)
        .map(|i| {
            Point::new(measurement)
                .tag("host", "web01")
                .field("value", FieldValue::Integer(i as i64))
                .timestamp(i as i64 + 1)
        })
        .collect()
}

fn write_backup(dir: &TempDir, measurement: &str, points: &[Point], gzip: bool) {
    let mut writer = BackupWriter::create(dir.path(), measurement, gzip).unwrap();
    writer.write_chunk(points).unwrap();
    writer.finish().unwrap();
}

fn options(dir: &TempDir) -> RestoreOptions {
    RestoreOptions::new(RetentionTarget::new("metrics", None).unwrap(), dir.path())
}

#[tokio::test]
async fn test_restore_rebatches_by_chunk_size() {
    let dir = TempDir::new().unwrap();
    let points = sample_points("cpu", 5);
    write_backup(&dir, "cpu", &points, false);

    let target = StubTarget::default();
    let mut opts = options(&dir);
    opts.chunk_size = 2;

    let summary = restore(&target, &opts, &StopFlag::new()).await.unwrap();

    assert!(summary.all_succeeded());
    assert_eq!(summary.total_points(), 5);
    let batches = target.batches.lock().unwrap();
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    let restored: Vec<Point> = batches.iter().flatten().cloned().collect();
    assert_eq!(restored, points);
}

#[tokio::test]
async fn test_restore_gzip_roundtrip() {
    let dir = TempDir::new().unwrap();
    let points = sample_points("cpu", 3);
    write_backup(&dir, "cpu", &points, true);

    let target = StubTarget::default();
    let mut opts = options(&dir);
    opts.gzip = true;

    let summary = restore(&target, &opts, &StopFlag::new()).await.unwrap();

    assert_eq!(summary.total_points(), 3);
    let batches = target.batches.lock().unwrap();
    let restored: Vec<Point> = batches.iter().flatten().cloned().collect();
    assert_eq!(restored, points);
}

#[tokio::test]
async fn test_corrupt_line_fails_measurement_but_not_run() {
    let dir = TempDir::new().unwrap();
    write_backup(&dir, "aaa", &sample_points("aaa", 2), false);

    // Hand-write a file with a malformed second line.
    let mut file = std::fs::File::create(dir.path().join("bad")).unwrap();
    writeln!(file, "{}", encode(&sample_points("bad", 1)[0])).unwrap();
    writeln!(file, "bad,host=a value=").unwrap();

    let target = StubTarget::default();
    let summary = restore(&target, &options(&dir), &StopFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    let (measurement, error) = &summary.failed[0];
    assert_eq!(measurement, "bad");
    match error {
        BackupError::CorruptBackup { line, .. } => assert_eq!(*line, 2),
        other => panic!("expected CorruptBackup, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_chunk_keeps_prior_chunks_and_later_measurements() {
    // The 2nd chunk of the first measurement is rejected; its first
    // chunk stays committed, the error names the measurement and chunk
    // index, and the next measurement proceeds.
    let dir = TempDir::new().unwrap();
    write_backup(&dir, "aaa", &sample_points("aaa", 4), false);
    write_backup(&dir, "zzz", &sample_points("zzz", 2), false);

    let target = StubTarget {
        reject_call: Some(1),
        ..Default::default()
    };
    let mut opts = options(&dir);
    opts.chunk_size = 2;

    let summary = restore(&target, &opts, &StopFlag::new()).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    let (measurement, error) = &summary.failed[0];
    assert_eq!(measurement, "aaa");
    match error {
        BackupError::WriteRejected {
            measurement,
            chunk_index,
            status,
            ..
        } => {
            assert_eq!(measurement, "aaa");
            assert_eq!(*chunk_index, 1);
            assert_eq!(*status, 400);
        }
        other => panic!("expected WriteRejected, got {:?}", other),
    }

    let batches = target.batches.lock().unwrap();
    // aaa chunk 0 plus the whole of zzz.
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0][0].measurement, "aaa");
    assert_eq!(batches[1][0].measurement, "zzz");
    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.completed[0].measurement, "zzz");
}

#[tokio::test]
async fn test_chunk_delay_paces_writes() {
    let dir = TempDir::new().unwrap();
    write_backup(&dir, "cpu", &sample_points("cpu", 3), false);

    let target = StubTarget::default();
    let mut opts = options(&dir);
    opts.chunk_size = 1;
    opts.chunk_delay = Duration::from_millis(40);

    let started = Instant::now();
    let summary = restore(&target, &opts, &StopFlag::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.total_points(), 3);
    // Three chunks, delay between writes: at least (3-1) * 40ms.
    assert!(
        elapsed >= Duration::from_millis(80),
        "restore finished too quickly: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_transient_write_failure_retried() {
    let dir = TempDir::new().unwrap();
    write_backup(&dir, "cpu", &sample_points("cpu", 2), false);

    let target = StubTarget {
        transient_failures: AtomicUsize::new(2),
        ..Default::default()
    };

    let summary = restore(&target, &options(&dir), &StopFlag::new())
        .await
        .unwrap();

    assert!(summary.all_succeeded());
    assert_eq!(summary.total_points(), 2);
}

#[tokio::test]
async fn test_restore_idempotent_under_dedup() {
    // A target that deduplicates by the full encoded line (measurement,
    // tag set, timestamp and values) ends up with the same point set no
    // matter how many times the backup is replayed.
    #[derive(Default)]
    struct DedupTarget {
        seen: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl TargetDatabase for DedupTarget {
        async fn write_points(
            &self,
            _target: &RetentionTarget,
            points: &[Point],
        ) -> Result<(), BackupError> {
            let mut seen = self.seen.lock().unwrap();
            for point in points {
                seen.insert(encode(point));
            }
            Ok(())
        }

        async fn ping(&self) -> Result<bool, BackupError> {
            Ok(true)
        }
    }

    let dir = TempDir::new().unwrap();
    write_backup(&dir, "cpu", &sample_points("cpu", 5), false);

    let target = DedupTarget::default();
    let opts = options(&dir);

    restore(&target, &opts, &StopFlag::new()).await.unwrap();
    let after_first = target.seen.lock().unwrap().len();
    restore(&target, &opts, &StopFlag::new()).await.unwrap();
    let after_second = target.seen.lock().unwrap().len();

    assert_eq!(after_first, 5);
    assert_eq!(after_second, after_first);
}

#[tokio::test]
async fn test_missing_directory_rejected() {
    let dir = TempDir::new().unwrap();
    let mut opts = options(&dir);
    opts.dir = dir.path().join("nope");

    let target = StubTarget::default();
    let result = restore(&target, &opts, &StopFlag::new()).await;
    assert!(matches!(result, Err(BackupError::Config(_))));
}

#[tokio::test]
async fn test_gzip_mismatch_means_nothing_to_restore() {
    // Directory holds only gzipped files but --gzip is off: fail with
    // a hint instead of silently restoring nothing.
    let dir = TempDir::new().unwrap();
    write_backup(&dir, "cpu", &sample_points("cpu", 1), true);

    let target = StubTarget::default();
    let result = restore(&target, &options(&dir), &StopFlag::new()).await;

    match result {
        Err(BackupError::Config(message)) => assert!(message.contains("--gzip")),
        other => panic!("expected Config error, got {:?}", other),
    }
}
