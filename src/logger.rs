//! Rolling JSON data logger
//!
//! Recorders that produce file artifacts append one JSON object per line to
//! `directory/log_name`. When the current file reaches the configured size it
//! is rolled over to `log_name-YYYYMMddHHmmss-count`, where the timestamp (UTC)
//! is the moment the file was finished and `count` disambiguates several
//! rollovers within the same second.

use crate::error::RecorderError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timestamp layout used in rolled file names
const ROLLOVER_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Writes newline-delimited JSON to a set of rolling log files
#[derive(Debug)]
pub struct DataLogger {
    directory: PathBuf,
    log_name: String,
    /// Roll over once the current file holds this many bytes (0 = never)
    max_file_size: u64,
    writer: Option<BufWriter<File>>,
    current_bytes: u64,
    completed: Vec<PathBuf>,
    items_written: usize,
}

impl DataLogger {
    /// Create a logger writing under `directory`, creating it if needed.
    ///
    /// `log_name` must be non-empty and must not contain `-`, which separates
    /// the parts of rolled file names.
    pub fn new(
        directory: impl Into<PathBuf>,
        log_name: &str,
        max_file_size: u64,
    ) -> Result<Self, RecorderError> {
        if log_name.is_empty() || log_name.contains('-') || log_name.contains('/') {
            return Err(RecorderError::ResourceUnavailable(format!(
                "invalid log name '{}'",
                log_name
            )));
        }

        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        Ok(Self {
            directory,
            log_name: log_name.to_string(),
            max_file_size,
            writer: None,
            current_bytes: 0,
            completed: Vec::new(),
            items_written: 0,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    /// Location of the file currently being written
    pub fn current_log_file(&self) -> PathBuf {
        self.directory.join(&self.log_name)
    }

    /// Number of items appended over the logger's lifetime
    pub fn items_written(&self) -> usize {
        self.items_written
    }

    /// Files finished so far, oldest first
    pub fn completed_files(&self) -> &[PathBuf] {
        &self.completed
    }

    /// Append one item as a JSON line, rolling over if the size limit is hit
    pub fn append<T: Serialize>(&mut self, item: &T) -> Result<(), RecorderError> {
        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');

        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.current_log_file())?;
            self.current_bytes = file.metadata()?.len();
            self.writer = Some(BufWriter::new(file));
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(&line)?;
        }
        self.current_bytes += line.len() as u64;
        self.items_written += 1;

        if self.max_file_size > 0 && self.current_bytes >= self.max_file_size {
            self.finish_current_log()?;
        }

        Ok(())
    }

    /// Force a rollover of the current file.
    ///
    /// Returns the rolled file, or `None` if nothing has been written since the
    /// last rollover.
    pub fn finish_current_log(&mut self) -> Result<Option<PathBuf>, RecorderError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(None);
        };
        writer.flush()?;
        drop(writer);

        if self.current_bytes == 0 {
            return Ok(None);
        }

        let rolled = self.next_rolled_path(Utc::now());
        fs::rename(self.current_log_file(), &rolled)?;
        debug!(file = %rolled.display(), bytes = self.current_bytes, "rolled over log file");

        self.current_bytes = 0;
        self.completed.push(rolled.clone());
        Ok(Some(rolled))
    }

    /// Roll the current file and return every completed file, oldest first
    pub fn finish(mut self) -> Result<Vec<PathBuf>, RecorderError> {
        self.finish_current_log()?;
        Ok(self.completed)
    }

    fn next_rolled_path(&self, finished_at: DateTime<Utc>) -> PathBuf {
        let stamp = finished_at.format(ROLLOVER_TIMESTAMP_FORMAT).to_string();
        let mut count = 0u32;
        loop {
            let candidate = self
                .directory
                .join(format!("{}-{}-{}", self.log_name, stamp, count));
            if !candidate.exists() {
                return candidate;
            }
            count += 1;
        }
    }
}

/// Parse `(timestamp, count)` out of a rolled file name for `log_name`
pub fn parse_rolled_name(log_name: &str, file_name: &str) -> Option<(String, u32)> {
    let rest = file_name.strip_prefix(log_name)?.strip_prefix('-')?;
    let (stamp, count) = rest.split_once('-')?;
    if stamp.len() != 14 || !stamp.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((stamp.to_string(), count.parse().ok()?))
}

/// List rolled files for `log_name` in `directory`, oldest first
pub fn enumerate_rolled_files(directory: &Path, log_name: &str) -> Result<Vec<PathBuf>, RecorderError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(key) = name.to_str().and_then(|n| parse_rolled_name(log_name, n)) {
            found.push((key, entry.path()));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejects_bad_log_names() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DataLogger::new(dir.path(), "", 0).is_err());
        assert!(DataLogger::new(dir.path(), "motion-data", 0).is_err());
        assert!(DataLogger::new(dir.path(), "motion", 0).is_ok());
    }

    #[test]
    fn test_single_file_without_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = DataLogger::new(dir.path(), "accel", 0).unwrap();
        for i in 0..50 {
            logger.append(&json!({ "i": i })).unwrap();
        }
        assert_eq!(logger.items_written(), 50);

        let files = logger.finish().unwrap();
        assert_eq!(files.len(), 1);

        let content = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(content.lines().count(), 50);
        let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["i"], 0);
    }

    #[test]
    fn test_rolls_over_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        // Each line is `{"i":N}\n`, 8 bytes for single digits
        let mut logger = DataLogger::new(dir.path(), "accel", 16).unwrap();
        for i in 0..6 {
            logger.append(&json!({ "i": i })).unwrap();
        }
        assert_eq!(logger.completed_files().len(), 3);

        let files = logger.finish().unwrap();
        assert_eq!(files.len(), 3);
        for file in &files {
            let name = file.file_name().unwrap().to_str().unwrap();
            assert!(parse_rolled_name("accel", name).is_some(), "bad name {}", name);
            assert_eq!(fs::read_to_string(file).unwrap().lines().count(), 2);
        }
        assert!(!dir.path().join("accel").exists());
    }

    #[test]
    fn test_enumerate_returns_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = DataLogger::new(dir.path(), "accel", 1).unwrap();
        for i in 0..4 {
            logger.append(&json!({ "i": i })).unwrap();
        }
        let files = logger.finish().unwrap();

        let listed = enumerate_rolled_files(dir.path(), "accel").unwrap();
        assert_eq!(listed, files);
    }

    #[test]
    fn test_finish_without_writes_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let logger = DataLogger::new(dir.path().join("nested"), "accel", 0).unwrap();
        assert!(dir.path().join("nested").is_dir());
        assert!(logger.finish().unwrap().is_empty());
    }

    #[test]
    fn test_parse_rolled_name() {
        assert_eq!(
            parse_rolled_name("accel", "accel-20240115120000-3"),
            Some(("20240115120000".to_string(), 3))
        );
        assert_eq!(parse_rolled_name("accel", "accel"), None);
        assert_eq!(parse_rolled_name("accel", "gyro-20240115120000-0"), None);
        assert_eq!(parse_rolled_name("accel", "accel-2024-0"), None);
    }
}
