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

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tsdb_backup::config::{ConnectionConfig, DumpOptions, RestoreOptions};
use tsdb_backup::db::HttpDatabase;
use tsdb_backup::restore::measurement_files;
use tsdb_backup::run::StopFlag;
use tsdb_backup::selector::{MeasurementFilter, RetentionTarget};
use tsdb_backup::timerange::{PartitionMode, TimeRange};

/// Backup and restore InfluxDB-compatible databases via line-protocol files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database URL including scheme and port, e.g. https://influx.example:8086
    #[arg(long)]
    url: String,

    /// Username. The password comes from the INFLUX_PW environment
    /// variable, or an interactive prompt when that is unset.
    #[arg(long)]
    user: Option<String>,

    /// Directory to dump into or restore from
    #[arg(long)]
    dir: PathBuf,

    /// Comma-separated measurements to process (skips discovery and the
    /// filters below)
    #[arg(long, value_delimiter = ',')]
    measurements: Vec<String>,

    /// Process measurements lexicographically >= this name
    #[arg(long)]
    from_measurement: Option<String>,

    /// Comma-separated measurements to skip
    #[arg(long, value_delimiter = ',')]
    ignore_measurements: Vec<String>,

    /// Dump into / restore from gzipped files
    #[arg(long)]
    gzip: bool,

    /// Request timeout in seconds for non-streaming calls
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a backup
    Dump {
        /// Database to dump
        #[arg(long)]
        db: String,

        /// Retention policy to read from
        #[arg(long)]
        rp: Option<String>,

        /// Start date YYYY-MM-DD, midnight UTC, inclusive
        #[arg(long)]
        since: Option<String>,

        /// End date YYYY-MM-DD, midnight UTC, exclusive
        #[arg(long)]
        until: Option<String>,

        /// Issue one query per UTC day instead of a single query
        #[arg(long)]
        daily: bool,

        /// Server-side rows per response chunk
        #[arg(long, default_value_t = 5000)]
        chunk_size: usize,
    },

    /// Restore from a backup
    Restore {
        /// Database to restore into
        #[arg(long)]
        db: String,

        /// Retention policy to restore into
        #[arg(long)]
        rp: Option<String>,

        /// Points per write request
        #[arg(long, default_value_t = 5000)]
        chunk_size: usize,

        /// Seconds to pause between chunk writes
        #[arg(long, default_value_t = 0.0)]
        chunk_delay: f64,

        /// Seconds to pause between measurements
        #[arg(long, default_value_t = 0.0)]
        measurement_delay: f64,

        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut connection = ConnectionConfig::new(args.url.clone());
    connection.timeout_seconds = args.timeout;
    if let Some(user) = &args.user {
        connection = connection.with_auth(user.clone(), resolve_password()?);
    }

    let filter = MeasurementFilter {
        explicit: args.measurements.clone(),
        from: args.from_measurement.clone(),
        ignore: args.ignore_measurements.clone(),
    };

    // One stop flag for the whole run, tripped by Ctrl-C. Runs stop at
    // the next chunk boundary and skip the remaining measurements.
    let stop = StopFlag::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping at the next chunk boundary");
                stop.trigger();
            }
        });
    }

    let database = HttpDatabase::new(&connection)?;

    let summary = match args.command {
        Command::Dump {
            db,
            rp,
            since,
            until,
            daily,
            chunk_size,
        } => {
            let mut options =
                DumpOptions::new(RetentionTarget::new(db.clone(), rp)?, args.dir.clone());
            options.filter = filter;
            options.gzip = args.gzip;
            options.range = TimeRange::from_dates(since.as_deref(), until.as_deref())?;
            options.partition = if daily {
                PartitionMode::Daily
            } else {
                PartitionMode::Single
            };
            options.chunk_size = chunk_size;

            info!("Starting backup of '{}' into {}", db, args.dir.display());
            let summary = tsdb_backup::dump(&database, &options, &stop).await?;
            summary.log("dump");
            summary
        }

        Command::Restore {
            db,
            rp,
            chunk_size,
            chunk_delay,
            measurement_delay,
            yes,
        } => {
            let mut options =
                RestoreOptions::new(RetentionTarget::new(db.clone(), rp)?, args.dir.clone());
            options.filter = filter;
            options.gzip = args.gzip;
            options.chunk_size = chunk_size;
            options.chunk_delay = seconds(chunk_delay, "--chunk-delay")?;
            options.measurement_delay = seconds(measurement_delay, "--measurement-delay")?;

            if !yes {
                confirm_restore(&options, &db)?;
            }

            info!("Starting restore from {} into '{}'", args.dir.display(), db);
            let summary = tsdb_backup::restore(&database, &options, &stop).await?;
            summary.log("restore");
            summary
        }
    };

    if !summary.failed.is_empty() {
        bail!("{} measurement(s) failed", summary.failed.len());
    }
    if summary.interrupted.is_some() {
        bail!("run interrupted");
    }
    Ok(())
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        bail!("{} must be a non-negative number of seconds", flag);
    }
    Ok(Duration::from_secs_f64(value))
}

fn resolve_password() -> Result<String> {
    if let Ok(password) = std::env::var("INFLUX_PW") {
        return Ok(password);
    }
    // No INFLUX_PW set: ask once on stdin. The input is echoed.
    eprint!("Password: ");
    std::io::stderr().flush().ok();
    let mut password = String::new();
    std::io::stdin()
        .read_line(&mut password)
        .context("failed to read password from stdin")?;
    Ok(password.trim_end_matches(['\r', '\n']).to_string())
}

fn confirm_restore(options: &RestoreOptions, db: &str) -> Result<()> {
    let files = measurement_files(&options.dir, options.gzip)?;
    let selected = options.filter.resolve(files);
    eprintln!("Files to restore: {:?}", selected);
    eprint!("> Confirm restore into '{}' db? [yes/no] ", db);
    std::io::stderr().flush().ok();

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    if answer.trim() != "yes" {
        bail!("restore not confirmed");
    }
    Ok(())
}
