//! Local file that mirrors the leader's output: stdout as it arrives,
//! stderr appended once the command is over.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// An open capture file. Created (or truncated) on open, closed on drop.
pub struct CaptureSink {
    path: PathBuf,
    file: File,
}

impl CaptureSink {
    /// Create or truncate `path`. Never appends.
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` verbatim. Flushed, so a reader tailing the file sees
    /// them right away.
    pub async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await
    }

    /// Sync everything written so far to disk.
    pub async fn finish(mut self) -> std::io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.path)
    }
}
