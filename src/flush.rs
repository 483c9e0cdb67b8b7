//! Replay of drained samples into a freshly fetched RRD file.
//!
//! Writing samples into the RRD format belongs to the RRD writer. The engine only hands
//! it the samples through [`RrdFlusher`].

use crate::error::{MigrateError, Result};
use crate::model::GraphItem;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Applies buffered samples to the RRD file at `path`.
#[async_trait]
pub trait RrdFlusher: Send + Sync {
    /// Replays `items` into `path`.
    async fn flush(&self, path: &Path, items: &[GraphItem]) -> Result<()>;
}

/// Appends replayed samples as JSON lines to `<rrd file>.journal`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JournalFlusher;

impl JournalFlusher {
    /// Journal file next to `rrd`.
    pub fn journal_path(rrd: &Path) -> PathBuf {
        let mut name = rrd.as_os_str().to_owned();
        name.push(".journal");
        PathBuf::from(name)
    }
}

#[async_trait]
impl RrdFlusher for JournalFlusher {
    async fn flush(&self, path: &Path, items: &[GraphItem]) -> Result<()> {
        let flush_err = |reason: String| MigrateError::Flush {
            path: path.to_path_buf(),
            reason,
        };

        let mut buf = Vec::new();
        for item in items {
            serde_json::to_writer(&mut buf, item).map_err(|e| flush_err(e.to_string()))?;
            buf.push(b'\n');
        }

        let mut journal = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::journal_path(path))
            .await
            .map_err(|e| flush_err(e.to_string()))?;
        journal
            .write_all(&buf)
            .await
            .map_err(|e| flush_err(e.to_string()))?;
        journal.flush().await.map_err(|e| flush_err(e.to_string()))
    }
}
