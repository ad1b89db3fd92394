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

// Restore loading: re-reads backup files line by line, re-batches into
// write chunks and paces the target database.
//
// Batching here is independent of how the dump chunked its queries:
// the loader decides chunk size. Every line is decoded before it is
// written; backups are produced exclusively by our own codec, so a line
// that does not decode means the file is corrupt and the measurement
// fails rather than silently losing points. Already-written chunks stay
// committed (at-least-once per chunk; re-running is idempotent when the
// target deduplicates identical measurement/tag-set/timestamp writes).

use crate::config::RestoreOptions;
use crate::db::interface::TargetDatabase;
use crate::error::BackupError;
use crate::lineprotocol::{decode, Point};
use crate::run::{MeasurementReport, RunSummary, StopFlag};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Measurement names recoverable from a backup directory: plain files
/// when `gzip` is off, `.gz` files (suffix stripped) when it is on.
/// Sorted so runs are deterministic.
pub fn measurement_files(dir: &Path, gzip: bool) -> Result<Vec<String>, BackupError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if gzip {
            if let Some(stripped) = name.strip_suffix(".gz") {
                names.push(stripped.to_string());
            }
        } else if !name.ends_with(".gz") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn open_reader(path: &Path, gzip: bool) -> Result<Box<dyn BufRead + Send>, BackupError> {
    let file = File::open(path)?;
    if gzip {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

enum Outcome {
    Complete(MeasurementReport),
    Interrupted(MeasurementReport),
}

/// Restore every selected backup file into the target database. Like
/// the dump side, one measurement failing is recorded and the rest
/// still run.
pub async fn restore(
    target: &dyn TargetDatabase,
    options: &RestoreOptions,
    stop: &StopFlag,
) -> Result<RunSummary, BackupError> {
    options.validate()?;
    if !options.dir.is_dir() {
        return Err(BackupError::Config(format!(
            "backup directory '{}' does not exist",
            options.dir.display()
        )));
    }

    let measurements = options
        .filter
        .resolve(measurement_files(&options.dir, options.gzip)?);
    if measurements.is_empty() {
        return Err(BackupError::Config(
            "nothing to restore; if the backup is gzipped, pass --gzip".to_string(),
        ));
    }
    info!(
        "restoring {} measurement(s) into '{}'",
        measurements.len(),
        options.target.database
    );

    let mut summary = RunSummary::default();
    let mut first = true;
    for measurement in &measurements {
        if stop.is_triggered() {
            info!("stop requested, not starting '{}'", measurement);
            break;
        }
        if !first && !options.measurement_delay.is_zero() {
            sleep(options.measurement_delay).await;
        }
        first = false;

        match restore_measurement(target, options, measurement, stop).await {
            Ok(Outcome::Complete(report)) => {
                info!("restored '{}': {} points", measurement, report.points);
                summary.completed.push(report);
            }
            Ok(Outcome::Interrupted(report)) => {
                info!(
                    "stop requested, '{}' cut short after {} points",
                    measurement, report.points
                );
                summary.interrupted = Some(measurement.clone());
                break;
            }
            Err(e) => {
                warn!("restore of '{}' failed: {}", measurement, e);
                summary.failed.push((measurement.clone(), e));
            }
        }
    }
    Ok(summary)
}

async fn restore_measurement(
    target: &dyn TargetDatabase,
    options: &RestoreOptions,
    measurement: &str,
    stop: &StopFlag,
) -> Result<Outcome, BackupError> {
    let file_name = if options.gzip {
        format!("{}.gz", measurement)
    } else {
        measurement.to_string()
    };
    let reader = open_reader(&options.dir.join(file_name), options.gzip)?;

    let mut batch: Vec<Point> = Vec::with_capacity(options.chunk_size);
    let mut points = 0u64;
    let mut bytes = 0u64;
    let mut chunk_index = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let point = decode(&line).map_err(|e| BackupError::CorruptBackup {
            measurement: measurement.to_string(),
            line: index + 1,
            source: e,
        })?;
        bytes += line.len() as u64 + 1;
        batch.push(point);

        if batch.len() == options.chunk_size {
            write_chunk(target, options, measurement, chunk_index, &batch).await?;
            points += batch.len() as u64;
            batch.clear();
            chunk_index += 1;

            if stop.is_triggered() {
                return Ok(Outcome::Interrupted(MeasurementReport {
                    measurement: measurement.to_string(),
                    points,
                    bytes,
                }));
            }
        }
    }

    if !batch.is_empty() {
        write_chunk(target, options, measurement, chunk_index, &batch).await?;
        points += batch.len() as u64;
    }

    Ok(Outcome::Complete(MeasurementReport {
        measurement: measurement.to_string(),
        points,
        bytes,
    }))
}

/// One paced, retried chunk write. The delay sits between writes, so
/// the first chunk goes out immediately. Transient failures back off
/// exponentially up to the attempt limit; rejections fail at once with
/// the measurement and chunk index attached.
async fn write_chunk(
    target: &dyn TargetDatabase,
    options: &RestoreOptions,
    measurement: &str,
    chunk_index: usize,
    points: &[Point],
) -> Result<(), BackupError> {
    if chunk_index > 0 && !options.chunk_delay.is_zero() {
        sleep(options.chunk_delay).await;
    }

    let mut attempt = 0u32;
    let mut delay = Duration::from_millis(100);
    loop {
        match target.write_points(&options.target, points).await {
            Ok(()) => {
                if attempt > 0 {
                    info!(
                        "chunk {} of '{}' written after {} retries",
                        chunk_index, measurement, attempt
                    );
                }
                return Ok(());
            }
            Err(e) if e.is_transient() && attempt + 1 < options.max_write_attempts => {
                warn!(
                    "chunk {} of '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                    chunk_index,
                    measurement,
                    attempt + 1,
                    options.max_write_attempts,
                    e,
                    delay
                );
                sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(30));
                attempt += 1;
            }
            Err(BackupError::WriteFailed { status, body }) => {
                return Err(BackupError::WriteRejected {
                    measurement: measurement.to_string(),
                    chunk_index,
                    status,
                    body,
                });
            }
            Err(e) => return Err(e),
        }
    }
}
