//! JSONL telemetry recording with file rotation.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::batch::TelemetryBatch;
use crate::config::RecorderConfig;
use crate::error::Result;

const FILE_PREFIX: &str = "telemetry_";
const FILE_SUFFIX: &str = ".jsonl";

#[derive(Serialize)]
struct Record<'a> {
    timestamp: String,
    #[serde(flatten)]
    batch: &'a TelemetryBatch,
}

/// Writes telemetry batches as JSON lines.
///
/// A new file starts after `max_records_per_file` records; only the newest
/// `max_files_to_keep` files are kept. Batches arriving closer together than
/// `log_interval_ms` are dropped.
pub struct TelemetryRecorder {
    dir: PathBuf,
    max_records: usize,
    max_files: usize,
    interval: Duration,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    files_opened: u64,
    last_record: Option<Instant>,
}

impl TelemetryRecorder {
    /// Create a recorder writing into `config.log_dir`, creating it if needed
    pub fn new(config: &RecorderConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_records: config.max_records_per_file.max(1),
            max_files: config.max_files_to_keep.max(1),
            interval: Duration::from_millis(config.log_interval_ms),
            writer: None,
            records_in_file: 0,
            files_opened: 0,
            last_record: None,
        })
    }

    /// Append `batch`; returns `false` when it was dropped by decimation
    pub fn record(&mut self, batch: &TelemetryBatch) -> Result<bool> {
        let now = Instant::now();
        if let Some(last) = self.last_record {
            if now.saturating_duration_since(last) < self.interval {
                return Ok(false);
            }
        }

        if self.writer.is_none() || self.records_in_file >= self.max_records {
            self.rotate()?;
        }

        let record = Record { timestamp: Utc::now().to_rfc3339(), batch };
        let line = serde_json::to_string(&record)?;
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
        }
        self.records_in_file += 1;
        self.last_record = Some(now);
        Ok(true)
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Record every batch from `rx` until the channel closes
    pub async fn run(mut self, mut rx: broadcast::Receiver<TelemetryBatch>) {
        info!("Telemetry recorder writing to {}", self.dir.display());
        loop {
            match rx.recv().await {
                Ok(batch) => {
                    if let Err(e) = self.record(&batch) {
                        warn!("Failed to record telemetry: {}", e);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Telemetry recorder fell behind, dropped {} batches", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
        if let Err(e) = self.flush() {
            warn!("Failed to flush telemetry log: {}", e);
        }
        info!("Telemetry recorder stopped");
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        self.files_opened += 1;
        let name = format!(
            "{}{}_{:04}{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.files_opened,
            FILE_SUFFIX
        );
        let path = self.dir.join(name);
        debug!("Opening telemetry log {}", path.display());

        self.writer = Some(BufWriter::new(File::create(&path)?));
        self.records_in_file = 0;
        self.prune()
    }

    /// Delete the oldest log files beyond the retention limit
    fn prune(&self) -> Result<()> {
        let mut files = log_files(&self.dir)?;
        if files.len() <= self.max_files {
            return Ok(());
        }
        files.sort();
        let excess = files.len() - self.max_files;
        for path in files.into_iter().take(excess) {
            debug!("Removing old telemetry log {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

impl Drop for TelemetryRecorder {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX));
        if is_log {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, max_records: usize, max_files: usize) -> RecorderConfig {
        RecorderConfig {
            log_dir: dir.path().to_string_lossy().into_owned(),
            max_records_per_file: max_records,
            max_files_to_keep: max_files,
            log_interval_ms: 0,
            ..RecorderConfig::default()
        }
    }

    fn read_lines(dir: &Path) -> Vec<String> {
        let mut files = log_files(dir).unwrap();
        files.sort();
        files
            .iter()
            .flat_map(|path| {
                fs::read_to_string(path).unwrap().lines().map(String::from).collect::<Vec<_>>()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut recorder = TelemetryRecorder::new(&config(&dir, 100, 5)).unwrap();

        assert!(recorder.record(&TelemetryBatch::new(1, 1)).unwrap());
        assert!(recorder.record(&TelemetryBatch::new(1, 2)).unwrap());
        recorder.flush().unwrap();

        let lines = read_lines(dir.path());
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["sequence"], 1);
        assert_eq!(first["generation"], 1);
        assert!(first["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_rotates_and_prunes() {
        let dir = TempDir::new().unwrap();
        let mut recorder = TelemetryRecorder::new(&config(&dir, 2, 2)).unwrap();

        for sequence in 1..=7 {
            recorder.record(&TelemetryBatch::new(1, sequence)).unwrap();
        }
        recorder.flush().unwrap();

        assert_eq!(log_files(dir.path()).unwrap().len(), 2);
        // Oldest files are gone; the newest records survive
        let lines = read_lines(dir.path());
        assert_eq!(lines.len(), 3);
        let last: serde_json::Value = serde_json::from_str(&lines[2]).unwrap();
        assert_eq!(last["sequence"], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decimates_by_interval() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, 100, 5);
        cfg.log_interval_ms = 100;
        let mut recorder = TelemetryRecorder::new(&cfg).unwrap();

        assert!(recorder.record(&TelemetryBatch::new(1, 1)).unwrap());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!recorder.record(&TelemetryBatch::new(1, 2)).unwrap());
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(recorder.record(&TelemetryBatch::new(1, 3)).unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let dir = TempDir::new().unwrap();
        let recorder = TelemetryRecorder::new(&config(&dir, 100, 5)).unwrap();
        let (tx, rx) = broadcast::channel(8);

        let handle = tokio::spawn(recorder.run(rx));
        tx.send(TelemetryBatch::new(2, 1)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(read_lines(dir.path()).len(), 1);
    }
}
