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

// Backup writing: the per-measurement file sink and the dump run loop.
//
// Each measurement gets exactly one output file (gzipped or plain) that
// is appended chunk by chunk and closed when the measurement completes
// or fails. A failed or interrupted measurement leaves its partial file
// in place and is reported; completed files are never touched again.

use crate::config::DumpOptions;
use crate::db::interface::{FieldTypes, SourceDatabase};
use crate::error::BackupError;
use crate::extract::Extractor;
use crate::lineprotocol::{encode, Point};
use crate::run::{MeasurementReport, RunSummary, StopFlag};
use crate::timerange::partition;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

enum LineSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

/// Append-only line-protocol sink for one measurement. Counts points
/// and uncompressed bytes so progress survives in the run tally.
pub struct BackupWriter {
    measurement: String,
    path: PathBuf,
    sink: LineSink,
    points: u64,
    bytes: u64,
}

impl BackupWriter {
    /// Create (truncate) the backup file for a measurement. The file is
    /// named after the measurement, with a `.gz` suffix when compression
    /// is on.
    pub fn create(dir: &Path, measurement: &str, gzip: bool) -> Result<Self, BackupError> {
        // File-per-measurement layout: a separator in the name would
        // escape the backup directory.
        if measurement.contains('/') || measurement.contains('\0') {
            return Err(BackupError::Config(format!(
                "measurement name '{}' cannot be used as a file name",
                measurement
            )));
        }

        let file_name = if gzip {
            format!("{}.gz", measurement)
        } else {
            measurement.to_string()
        };
        let path = dir.join(file_name);
        let file = BufWriter::new(File::create(&path)?);
        let sink = if gzip {
            LineSink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            LineSink::Plain(file)
        };

        debug!("writing measurement '{}' to {}", measurement, path.display());
        Ok(Self {
            measurement: measurement.to_string(),
            path,
            sink,
            points: 0,
            bytes: 0,
        })
    }

    /// Append one chunk of points, one encoded line each, in the order
    /// given.
    pub fn write_chunk(&mut self, points: &[Point]) -> Result<(), BackupError> {
        for point in points {
            let line = encode(point);
            match &mut self.sink {
                LineSink::Plain(w) => {
                    w.write_all(line.as_bytes())?;
                    w.write_all(b"\n")?;
                }
                LineSink::Gzip(w) => {
                    w.write_all(line.as_bytes())?;
                    w.write_all(b"\n")?;
                }
            }
            self.points += 1;
            self.bytes += line.len() as u64 + 1;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file, returning the tally for this
    /// measurement.
    pub fn finish(self) -> Result<MeasurementReport, BackupError> {
        match self.sink {
            LineSink::Plain(mut w) => w.flush()?,
            LineSink::Gzip(w) => {
                w.finish()?.flush()?;
            }
        }
        Ok(MeasurementReport {
            measurement: self.measurement,
            points: self.points,
            bytes: self.bytes,
        })
    }
}

enum Outcome {
    Complete(MeasurementReport),
    Interrupted(MeasurementReport),
}

/// Dump every selected measurement of a database into per-measurement
/// backup files. One measurement failing is recorded in the summary and
/// the rest still run; only run-level failures (discovery, directory
/// creation) abort the whole dump.
pub async fn dump(
    source: &dyn SourceDatabase,
    options: &DumpOptions,
    stop: &StopFlag,
) -> Result<RunSummary, BackupError> {
    options.validate()?;
    let database = &options.target.database;

    let measurements = if options.filter.explicit.is_empty() {
        options.filter.resolve(source.list_measurements(database).await?)
    } else {
        options.filter.resolve(Vec::new())
    };
    info!(
        "dumping {} measurement(s) from '{}' over {}",
        measurements.len(),
        database,
        options.range
    );

    let field_types = source.field_types(database, &measurements).await?;
    std::fs::create_dir_all(&options.dir)?;

    let mut summary = RunSummary::default();
    for measurement in &measurements {
        if stop.is_triggered() {
            info!("stop requested, not starting '{}'", measurement);
            break;
        }

        let Some(types) = field_types.get(measurement) else {
            info!("ignoring '{}': no fields", measurement);
            continue;
        };

        match dump_measurement(source, options, measurement, types, stop).await {
            Ok(Outcome::Complete(report)) => {
                info!(
                    "dumped '{}': {} points, {} bytes",
                    measurement, report.points, report.bytes
                );
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
                warn!("dump of '{}' failed: {}", measurement, e);
                summary.failed.push((measurement.clone(), e));
            }
        }
    }
    Ok(summary)
}

async fn dump_measurement(
    source: &dyn SourceDatabase,
    options: &DumpOptions,
    measurement: &str,
    types: &FieldTypes,
    stop: &StopFlag,
) -> Result<Outcome, BackupError> {
    let mut writer = BackupWriter::create(&options.dir, measurement, options.gzip)?;

    for range in partition(options.range, options.partition)? {
        let stream = source
            .query_chunked(&options.target, measurement, &range, options.chunk_size)
            .await?;
        let mut extractor = Extractor::new(measurement, types.clone(), stream);

        while let Some(chunk) = extractor.next_chunk().await? {
            writer.write_chunk(&chunk)?;
            // Stop only at chunk boundaries: the chunk just written is
            // complete, the rest of this measurement is skipped.
            if stop.is_triggered() {
                return Ok(Outcome::Interrupted(writer.finish()?));
            }
        }

        if stop.is_triggered() {
            return Ok(Outcome::Interrupted(writer.finish()?));
        }
    }

    Ok(Outcome::Complete(writer.finish()?))
}
