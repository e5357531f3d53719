//! Size-rotated NDJSON file, the primary destination of the pipeline.

use crate::error::SinkError;
use crate::record::CanonicalRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 5;

/// When to rotate and how many archived generations to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// The active file is rotated as soon as a write takes it past this size.
    /// A file found already past it is rotated before it takes a record.
    pub max_file_size: u64,
    /// Archived generations retained; older ones are deleted.
    pub max_files: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

struct ActiveFile {
    file: File,
    size: u64,
}

/// Append-only line-delimited JSON file with size-based rotation.
///
/// Archives are named `<path>.1` (newest) through `<path>.N` (oldest). All
/// appends and rotations go through one mutex, so writers arriving during a
/// rotation wait for the fresh handle instead of writing to the old one.
pub struct RotatingFileSink {
    path: PathBuf,
    policy: RotationPolicy,
    sync_writes: bool,
    active: Mutex<Option<ActiveFile>>,
}

impl RotatingFileSink {
    /// Create a sink for `path`. The file and its parent directory are
    /// created on the first write.
    pub fn new(path: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            sync_writes: false,
            active: Mutex::new(None),
        }
    }

    /// `fsync` every record before `send` returns.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Path of archived generation `index` (1 is the newest).
    pub fn archive_path(&self, index: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        io_error_at(&self.path, source)
    }

    async fn open_active(&self) -> Result<ActiveFile, SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        let size = file.metadata().await.map_err(|e| self.io_error(e))?.len();

        Ok(ActiveFile { file, size })
    }

    async fn write_line(&self, active: &mut ActiveFile, line: &[u8]) -> std::io::Result<()> {
        active.file.write_all(line).await?;
        active.file.flush().await?;
        if self.sync_writes {
            active.file.sync_data().await?;
        }
        Ok(())
    }

    async fn rotate(&self) -> Result<(), SinkError> {
        info!(path = %self.path.display(), "rotating log file");

        if self.policy.max_files == 0 {
            return remove_if_exists(&self.path).await.map_err(|e| self.io_error(e));
        }

        let oldest = self.archive_path(self.policy.max_files);
        remove_if_exists(&oldest)
            .await
            .map_err(|e| io_error_at(&oldest, e))?;

        for index in (1..self.policy.max_files).rev() {
            let from = self.archive_path(index);
            let to = self.archive_path(index + 1);
            rename_if_exists(&from, &to)
                .await
                .map_err(|e| io_error_at(&to, e))?;
        }

        let newest = self.archive_path(1);
        tokio::fs::rename(&self.path, &newest)
            .await
            .map_err(|e| io_error_at(&newest, e))?;
        debug!(archive = %newest.display(), "archived log file");
        Ok(())
    }

    /// Rotate and open a fresh active file.
    ///
    /// A failed rotation is logged and leaves the current file in place; it is
    /// retried on the next write. Only failing to open the file is an error.
    async fn rotate_and_reopen(&self) -> Result<ActiveFile, SinkError> {
        if let Err(e) = self.rotate().await {
            warn!(error = %e, path = %self.path.display(), "log rotation failed, keeping the active file");
        }
        self.open_active().await
    }
}

fn io_error_at(path: &Path, source: std::io::Error) -> SinkError {
    SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn rename_if_exists(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[async_trait]
impl LogSink for RotatingFileSink {
    async fn send(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        let line = record.to_json_line()?;

        let mut guard = self.active.lock().await;

        // A handle that failed is dropped and reopened on the next write.
        let mut active = match guard.take() {
            Some(active) => active,
            None => self.open_active().await?,
        };

        // Left over from an earlier run or a lowered threshold.
        if active.size > self.policy.max_file_size {
            drop(active);
            active = self.rotate_and_reopen().await?;
        }

        self.write_line(&mut active, line.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        active.size += line.len() as u64;

        // The record is on disk from here on; rotation problems are not
        // reported as a lost write.
        if active.size > self.policy.max_file_size {
            drop(active);
            match self.rotate_and_reopen().await {
                Ok(fresh) => *guard = Some(fresh),
                Err(e) => warn!(error = %e, "reopening log file after rotation failed"),
            }
            return Ok(());
        }

        *guard = Some(active);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let mut guard = self.active.lock().await;
        if let Some(active) = guard.as_mut() {
            active.file.flush().await.map_err(|e| self.io_error(e))?;
            active.file.sync_data().await.map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::normalizer::Normalizer;
    use crate::record::Fields;
    use serde_json::Map;
    use std::sync::Arc;

    fn record(n: u64) -> CanonicalRecord {
        Normalizer::new("test").normalize(
            Level::Info,
            "Todo created",
            Fields::new().with("todo_id", n),
            Map::new(),
        )
    }

    fn line_len() -> u64 {
        record(0).to_json_line().unwrap().len() as u64
    }

    async fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => content
                .lines()
                .map(|l| serde_json::from_str(l).expect("intact json line"))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("elk.log");
        let sink = RotatingFileSink::new(&path, RotationPolicy::default());

        for i in 0..3 {
            sink.send(&record(i)).await.unwrap();
        }

        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["context"]["todo_id"], 2);
    }

    #[tokio::test]
    async fn rotates_once_when_threshold_is_crossed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elk.log");
        let len = line_len();
        let threshold = len * 2 + len / 2;
        let sink = RotatingFileSink::new(
            &path,
            RotationPolicy {
                max_file_size: threshold,
                max_files: 5,
            },
        );

        for i in 0..3 {
            sink.send(&record(i)).await.unwrap();
        }

        let archived = tokio::fs::metadata(sink.archive_path(1)).await.unwrap().len();
        assert!(archived > threshold);
        assert!(archived <= threshold + len);
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 0);
        assert!(tokio::fs::metadata(sink.archive_path(2)).await.is_err());

        sink.send(&record(3)).await.unwrap();
        assert_eq!(read_lines(&path).await.len(), 1);
        assert_eq!(read_lines(&sink.archive_path(1)).await.len(), 3);
    }

    #[tokio::test]
    async fn keeps_at_most_max_files_archives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elk.log");
        let sink = RotatingFileSink::new(
            &path,
            RotationPolicy {
                max_file_size: 1,
                max_files: 2,
            },
        );

        for i in 0..5 {
            sink.send(&record(i)).await.unwrap();
        }

        let newest = read_lines(&sink.archive_path(1)).await;
        let older = read_lines(&sink.archive_path(2)).await;
        assert_eq!(newest[0]["context"]["todo_id"], 4);
        assert_eq!(older[0]["context"]["todo_id"], 3);
        assert!(tokio::fs::metadata(sink.archive_path(3)).await.is_err());
    }

    #[tokio::test]
    async fn unwritable_destination_is_reported_not_panicked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elk.log");
        tokio::fs::create_dir(&path).await.unwrap();

        let sink = RotatingFileSink::new(&path, RotationPolicy::default());
        let err = sink.send(&record(0)).await.unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
    }

    #[tokio::test]
    async fn oversized_existing_file_is_archived_before_the_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elk.log");
        let mut leftover = "x".repeat(5000);
        leftover.push('\n');
        tokio::fs::write(&path, &leftover).await.unwrap();

        let sink = RotatingFileSink::new(
            &path,
            RotationPolicy {
                max_file_size: 1000,
                max_files: 5,
            },
        );
        sink.send(&record(1)).await.unwrap();

        let archived = tokio::fs::read_to_string(sink.archive_path(1)).await.unwrap();
        assert_eq!(archived, leftover);
        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["context"]["todo_id"], 1);
    }

    #[tokio::test]
    async fn failed_rotation_keeps_the_write_and_names_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elk.log");
        let sink = RotatingFileSink::new(
            &path,
            RotationPolicy {
                max_file_size: 10,
                max_files: 2,
            },
        );
        let blocked = sink.archive_path(2);
        tokio::fs::create_dir(&blocked).await.unwrap();
        tokio::fs::write(blocked.join("keep"), b"x").await.unwrap();

        sink.send(&record(1)).await.unwrap();
        sink.send(&record(2)).await.unwrap();

        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["context"]["todo_id"], 2);

        match sink.rotate().await {
            Err(SinkError::Io { path, .. }) => assert_eq!(path, blocked),
            other => panic!("expected rotation to fail on {:?}, got {:?}", blocked, other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_never_tear_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elk.log");
        let sink = Arc::new(RotatingFileSink::new(
            &path,
            RotationPolicy {
                max_file_size: line_len() * 7,
                max_files: 200,
            },
        ));

        let mut handles = Vec::new();
        for t in 0..8u64 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                for i in 0..25u64 {
                    sink.send(&record(t * 100 + i)).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut total = read_lines(&path).await.len();
        for index in 1..=200 {
            total += read_lines(&sink.archive_path(index)).await.len();
        }
        assert_eq!(total, 200);
    }
}
