//! # Core Logic - Result Log
//!
//! Append-only success/failure text files, one identity reference per line.
//! Each line goes out in a single `write_all` under a lock so concurrent
//! writers never interleave partial lines.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct ResultLog {
    success_path: PathBuf,
    failure_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl ResultLog {
    pub fn new(success_path: impl Into<PathBuf>, failure_path: impl Into<PathBuf>) -> Self {
        Self {
            success_path: success_path.into(),
            failure_path: failure_path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self, kind: ResultKind) -> &Path {
        match kind {
            ResultKind::Success => &self.success_path,
            ResultKind::Failure => &self.failure_path,
        }
    }

    pub async fn append(&self, kind: ResultKind, entry: &str) -> std::io::Result<()> {
        let path = self.path(kind);
        let mut line = entry.trim_end().to_string();
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    pub async fn success(&self, entry: &str) -> std::io::Result<()> {
        self.append(ResultKind::Success, entry).await
    }

    pub async fn failure(&self, entry: &str) -> std::io::Result<()> {
        self.append(ResultKind::Failure, entry).await
    }

    /// Reads back all lines of one destination. Missing file reads as empty.
    pub async fn read_lines(&self, kind: ResultKind) -> std::io::Result<Vec<String>> {
        match fs::read_to_string(self.path(kind)).await {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_parent_dirs_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultLog::new(
            dir.path().join("ok/success.txt"),
            dir.path().join("bad/failed.txt"),
        );

        log.success("0x01").await.unwrap();
        log.success("0x02\n").await.unwrap();
        log.failure("0x03").await.unwrap();

        assert_eq!(
            log.read_lines(ResultKind::Success).await.unwrap(),
            vec!["0x01".to_string(), "0x02".to_string()]
        );
        assert_eq!(
            log.read_lines(ResultKind::Failure).await.unwrap(),
            vec!["0x03".to_string()]
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultLog::new(dir.path().join("s.txt"), dir.path().join("f.txt"));

        let mut handles = Vec::new();
        for i in 0..50 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.success(&format!("0x{:040x}", i)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let lines = log.read_lines(ResultKind::Success).await.unwrap();
        assert_eq!(lines.len(), 50);
        assert!(lines.iter().all(|l| l.len() == 42 && l.starts_with("0x")));
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultLog::new(dir.path().join("s.txt"), dir.path().join("f.txt"));
        assert!(log.read_lines(ResultKind::Failure).await.unwrap().is_empty());
    }
}
