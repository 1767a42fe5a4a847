use crate::error::SinkError;
use crate::provider::{SearchRequest, SearchResult};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn write(
        &self,
        request: &SearchRequest,
        result: &SearchResult,
    ) -> Result<PathBuf, SinkError>;
}

/// `root/yyyy/MM/dd/HH-mm-ss.SSS.json`
pub fn log_path(root: &Path, at: DateTime<Local>) -> PathBuf {
    root.join(format!("{}.json", at.format("%Y/%m/%d/%H-%M-%S%.3f")))
}

/// Writes each result set as JSON into a date-partitioned directory tree.
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn write_at(
        &self,
        result: &SearchResult,
        at: DateTime<Local>,
    ) -> Result<PathBuf, SinkError> {
        let payload = serde_json::to_vec(result)?;
        let base = log_path(&self.root, at);
        if let Some(parent) = base.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Two dispatches in the same millisecond get suffixed files.
        let mut path = base.clone();
        let mut attempt = 0u32;
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    write_payload(&path, file, &payload).await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    attempt += 1;
                    path = suffixed(&base, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// A failed write removes the partial file.
async fn write_payload<W>(path: &Path, mut writer: W, payload: &[u8]) -> Result<(), SinkError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(payload).await?;
        writer.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(writer);
        if let Err(remove) = tokio::fs::remove_file(path).await {
            tracing::warn!(error = %remove, path = %path.display(), "failed to remove partial log file");
        }
        return Err(e.into());
    }
    Ok(())
}

fn suffixed(base: &Path, attempt: u32) -> PathBuf {
    let stem = base
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(".json"))
        .unwrap_or_default();
    base.with_file_name(format!("{stem}-{attempt}.json"))
}

#[async_trait]
impl ResultSink for FileSink {
    async fn write(
        &self,
        _request: &SearchRequest,
        result: &SearchResult,
    ) -> Result<PathBuf, SinkError> {
        self.write_at(result, Local::now()).await
    }
}
